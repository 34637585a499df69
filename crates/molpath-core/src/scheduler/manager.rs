use super::auth::PasswordDigest;
use super::deferred::{DeferredAction, DeferredBatch, DeferredQueue};
use super::error::SchedulerError;
use super::job::{Job, JobOutcome, JobSummary, QueueState, StopRequest};
use crate::core::models::ids::JobId;
use crate::engine::cancel::CancellationToken;
use crate::engine::config::{ConfigError, SearchParams};
use crate::engine::context::{SearchContext, StopReason};
use crate::engine::error::EngineError;
use crate::engine::pipeline::IterationReport;
use crate::engine::snapshot::{IterationSnapshot, SnapshotStore};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// The context handed to a worker together with the cancellation flag of its lease.
pub struct JobLease {
    pub context: SearchContext,
    pub cancel: CancellationToken,
}

struct RunningJob {
    id: JobId,
    cancel: CancellationToken,
    requested: Option<StopRequest>,
    /// Actions drained into the lease that no committed iteration has absorbed yet.
    in_flight: Vec<DeferredAction>,
}

#[derive(Default)]
struct SchedulerState {
    jobs: HashMap<JobId, Job>,
    live: VecDeque<JobId>,
    sleeping: Vec<JobId>,
    finished: Vec<JobId>,
    deferred: HashMap<JobId, DeferredQueue>,
    running: Option<RunningJob>,
    next_id: u64,
    halted: bool,
}

impl SchedulerState {
    fn is_running(&self, id: JobId) -> bool {
        self.running.as_ref().is_some_and(|running| running.id == id)
    }

    fn authorize(&self, id: JobId, password: &str) -> Result<&Job, SchedulerError> {
        let job = self.jobs.get(&id).ok_or(SchedulerError::JobNotFound(id))?;
        if !job.password.verify(password) {
            warn!(job_id = %id, "Rejected control operation: wrong password");
            return Err(SchedulerError::Unauthorized(id));
        }
        Ok(job)
    }

    fn detach(&mut self, id: JobId) {
        self.live.retain(|queued| *queued != id);
        self.sleeping.retain(|queued| *queued != id);
        self.finished.retain(|queued| *queued != id);
    }

    fn move_to(&mut self, id: JobId, target: QueueState) {
        self.detach(id);
        match target {
            QueueState::Live => self.live.push_back(id),
            QueueState::Sleeping => self.sleeping.push(id),
            QueueState::Finished => self.finished.push(id),
        }
        if let Some(job) = self.jobs.get_mut(&id) {
            job.state = target;
        }
        info!(job_id = %id, state = ?target, "Job moved");
    }

    fn delete(&mut self, id: JobId) {
        self.detach(id);
        self.jobs.remove(&id);
        self.deferred.remove(&id);
        info!(job_id = %id, "Job removed");
    }

    /// Called whenever the running job stops being run. Pending parameter changes are folded
    /// into its committed state so they survive until the next lease.
    fn release(&mut self, id: JobId) {
        if self.is_running(id) {
            self.running = None;
        }
        let (Some(queue), Some(job)) = (self.deferred.get_mut(&id), self.jobs.get_mut(&id)) else {
            return;
        };
        queue.fold_into(Arc::make_mut(&mut job.committed));
        if queue.is_empty() {
            self.deferred.remove(&id);
        }
    }

    /// Returns the running job's drained but uncommitted actions to the front of its queue.
    fn requeue_in_flight(&mut self, id: JobId) {
        let Some(running) = self.running.as_mut().filter(|running| running.id == id) else {
            return;
        };
        let actions = std::mem::take(&mut running.in_flight);
        if !actions.is_empty() {
            debug!(job_id = %id, count = actions.len(), "Requeued changes of an uncommitted iteration");
            self.deferred.entry(id).or_default().requeue_front(actions);
        }
    }

    fn push_deferred(&mut self, id: JobId, action: DeferredAction) {
        self.deferred.entry(id).or_default().push(action);
    }

    fn apply_stop_request(&mut self, id: JobId, request: StopRequest) {
        self.release(id);
        match request {
            StopRequest::Pause => self.move_to(id, QueueState::Sleeping),
            StopRequest::Remove => self.delete(id),
        }
    }

    fn finish(&mut self, id: JobId, outcome: JobOutcome) {
        self.release(id);
        if let Some(job) = self.jobs.get_mut(&id) {
            job.outcome = Some(outcome);
        }
        self.move_to(id, QueueState::Finished);
    }
}

/// Owns every job, the live/sleeping/finished queues and the deferred command buffers.
///
/// A single worker leases the head of the live queue via [`fetch_next_job`](Self::fetch_next_job),
/// runs iterations on its private copy of the context and hands each result back through
/// [`commit_iteration`](Self::commit_iteration) or [`abort_iteration`](Self::abort_iteration).
/// Client operations never touch the leased context: changes to the running job are buffered
/// and drained at the start of its next iteration, while pause and remove only request
/// cooperative cancellation.
///
/// The internal lock is held for queue bookkeeping only. Snapshot I/O and context
/// reconstruction happen outside of it.
pub struct JobScheduler {
    state: Mutex<SchedulerState>,
    job_ready: Condvar,
    store: Arc<dyn SnapshotStore>,
    interactive: bool,
}

impl JobScheduler {
    /// Creates a scheduler.
    ///
    /// # Arguments
    ///
    /// * `store` - Receives one snapshot per committed iteration.
    /// * `interactive` - When `true`, [`fetch_next_job`](Self::fetch_next_job) blocks on an
    ///   empty live queue instead of signalling termination.
    pub fn new(store: Arc<dyn SnapshotStore>, interactive: bool) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                next_id: 1,
                ..SchedulerState::default()
            }),
            job_ready: Condvar::new(),
            store,
            interactive,
        }
    }

    /// Starts id assignment at `next` instead of 1, e.g. to avoid ids already present in a
    /// persistent store.
    pub fn with_next_id(mut self, next: JobId) -> Self {
        let state = self.state.get_mut();
        state.next_id = state.next_id.max(next.0);
        self
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Validates `context`, assigns it a fresh id and appends it to the live queue.
    ///
    /// The initial state is persisted as the job's first snapshot.
    pub fn create_job(&self, context: SearchContext, password: &str) -> Result<JobId, SchedulerError> {
        context.validate()?;
        self.enqueue(context, password)
    }

    /// Recreates a job under a new id from a stored snapshot.
    pub fn restore_job(
        &self,
        snapshot: IterationSnapshot,
        password: &str,
    ) -> Result<JobId, SchedulerError> {
        let origin = snapshot.job_id;
        let context = SearchContext::from_snapshot(snapshot)?;
        context.validate()?;
        let id = self.enqueue(context, password)?;
        info!(job_id = %id, restored_from = %origin, "Job restored");
        Ok(id)
    }

    fn enqueue(&self, mut context: SearchContext, password: &str) -> Result<JobId, SchedulerError> {
        let id = {
            let mut state = self.state.lock();
            if state.halted {
                return Err(SchedulerError::Halted);
            }
            let id = JobId(state.next_id);
            state.next_id += 1;
            id
        };

        context.job_id = id;
        let snapshot = context.to_snapshot();
        self.store.save(&snapshot)?;

        let mut state = self.state.lock();
        state
            .jobs
            .insert(id, Job::new(id, PasswordDigest::new(password), snapshot));
        if state.halted {
            state.move_to(id, QueueState::Sleeping);
        } else {
            state.live.push_back(id);
            self.job_ready.notify_one();
        }
        info!(job_id = %id, "Job created");
        Ok(id)
    }

    /// Leases the head of the live queue.
    ///
    /// Blocks while the queue is empty in interactive mode. Returns `None` once the scheduler
    /// is halted, or when the queue is empty and the scheduler is not interactive.
    pub fn fetch_next_job(&self) -> Option<JobLease> {
        loop {
            let (id, committed, cancel) = {
                let mut state = self.state.lock();
                loop {
                    if state.halted {
                        return None;
                    }
                    if let Some(&id) = state.live.front() {
                        let Some(job) = state.jobs.get(&id) else {
                            state.live.pop_front();
                            continue;
                        };
                        let committed = Arc::clone(&job.committed);
                        let cancel = CancellationToken::new();
                        state.running = Some(RunningJob {
                            id,
                            cancel: cancel.clone(),
                            requested: None,
                            in_flight: Vec::new(),
                        });
                        break (id, committed, cancel);
                    }
                    if !self.interactive {
                        return None;
                    }
                    self.job_ready.wait(&mut state);
                }
            };

            match SearchContext::from_snapshot((*committed).clone()) {
                Ok(context) => {
                    info!(job_id = %id, iteration = context.iteration, "Job fetched");
                    return Some(JobLease { context, cancel });
                }
                Err(e) => {
                    error!(job_id = %id, error = %e, "Committed state is corrupted");
                    self.state.lock().finish(id, JobOutcome::Failed(e.to_string()));
                }
            }
        }
    }

    /// Removes and returns the actions buffered for `job` while it was running.
    ///
    /// For the running job the actions stay on record until an iteration commits. A cancelled or
    /// failed iteration puts them back, so an accepted change is never lost.
    pub fn take_deferred(&self, job: JobId) -> DeferredBatch {
        let mut state = self.state.lock();
        let batch = state
            .deferred
            .get_mut(&job)
            .map(DeferredQueue::drain)
            .unwrap_or_default();
        if let Some(running) = state.running.as_mut().filter(|running| running.id == job) {
            running.in_flight.extend(batch.actions().iter().cloned());
        }
        batch
    }

    /// Hands a finished iteration back to the scheduler.
    ///
    /// A completed iteration is persisted and becomes the job's committed state. A cancelled one
    /// is discarded and the changes it had drained are queued again. The job then stays live only if `report.can_continue()` and no pause or
    /// removal was requested; paused jobs go to sleeping and exhausted ones to finished.
    ///
    /// Returns whether the worker may run another iteration on the same lease.
    #[instrument(skip_all, name = "commit_iteration", fields(job_id = %context.job_id, iteration = context.iteration))]
    pub fn commit_iteration(&self, context: &SearchContext, report: &IterationReport) -> bool {
        let id = context.job_id;
        let completed = report.stop != Some(StopReason::Cancelled);

        let snapshot = completed.then(|| context.to_snapshot());
        if let Some(snapshot) = &snapshot {
            if let Err(e) = self.store.save(snapshot) {
                error!(error = %e, "Failed to persist iteration snapshot");
            }
        }

        let mut state = self.state.lock();
        if completed {
            if let Some(running) = state.running.as_mut().filter(|running| running.id == id) {
                running.in_flight.clear();
            }
        } else {
            state.requeue_in_flight(id);
        }
        let requested = match state.running.as_ref() {
            Some(running) if running.id == id && running.cancel.is_cancelled() => {
                Some(running.requested.unwrap_or(StopRequest::Pause))
            }
            _ => None,
        };
        let Some(job) = state.jobs.get_mut(&id) else {
            state.release(id);
            return false;
        };
        if let Some(snapshot) = snapshot {
            job.committed = Arc::new(snapshot);
            job.failures = 0;
        }

        match (requested, report.stop) {
            (Some(StopRequest::Remove), _) => {
                state.apply_stop_request(id, StopRequest::Remove);
                false
            }
            (_, Some(reason)) if reason.is_exhaustion() => {
                state.finish(id, JobOutcome::Stopped(reason));
                false
            }
            (Some(request), _) => {
                state.apply_stop_request(id, request);
                false
            }
            (None, Some(_)) => {
                state.apply_stop_request(id, StopRequest::Pause);
                false
            }
            (None, None) => {
                info!("Iteration committed");
                true
            }
        }
    }

    /// Records a failed iteration. The job keeps its last committed state plus any changes the
    /// iteration had drained.
    ///
    /// Tree corruption retires the job as failed. Other failures leave it live until
    /// `max_stage_failures` consecutive failures, after which it sleeps.
    ///
    /// Returns whether the job is still live.
    pub fn abort_iteration(&self, job: JobId, failure: &EngineError) -> bool {
        let mut state = self.state.lock();
        state.requeue_in_flight(job);
        let request = state
            .running
            .as_ref()
            .filter(|running| running.id == job)
            .and_then(|running| running.requested);
        let Some(record) = state.jobs.get_mut(&job) else {
            state.release(job);
            return false;
        };
        record.failures += 1;
        let failures = record.failures;
        let limit = record.committed.params.max_stage_failures;
        warn!(job_id = %job, failures, error = %failure, "Iteration failed");

        if let Some(request) = request {
            state.apply_stop_request(job, request);
            false
        } else if failure.is_corruption() {
            state.finish(job, JobOutcome::Failed(failure.to_string()));
            false
        } else if failures >= limit {
            state.release(job);
            state.move_to(job, QueueState::Sleeping);
            false
        } else {
            state.release(job);
            true
        }
    }

    /// Moves a job to the sleeping queue. For the running job this only requests cancellation.
    pub fn pause(&self, job: JobId, password: &str) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        let current = state.authorize(job, password)?.state;
        match current {
            QueueState::Finished => Err(SchedulerError::InvalidState {
                job,
                state: QueueState::Finished,
                operation: "pause",
            }),
            QueueState::Sleeping => Ok(()),
            QueueState::Live => {
                if let Some(running) = state.running.as_mut().filter(|running| running.id == job) {
                    running.requested.get_or_insert(StopRequest::Pause);
                    running.cancel.cancel();
                    info!(job_id = %job, "Pause requested for running job");
                } else {
                    state.move_to(job, QueueState::Sleeping);
                }
                Ok(())
            }
        }
    }

    /// Appends a sleeping job to the live queue.
    pub fn resume(&self, job: JobId, password: &str) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        let current = state.authorize(job, password)?.state;
        match current {
            QueueState::Finished => Err(SchedulerError::InvalidState {
                job,
                state: QueueState::Finished,
                operation: "resume",
            }),
            QueueState::Live => Ok(()),
            QueueState::Sleeping => {
                if state.halted {
                    return Err(SchedulerError::Halted);
                }
                if let Some(record) = state.jobs.get_mut(&job) {
                    record.failures = 0;
                }
                state.move_to(job, QueueState::Live);
                self.job_ready.notify_one();
                Ok(())
            }
        }
    }

    /// Deletes a job. For the running job this only requests cancellation; the job is deleted
    /// when the worker hands the lease back.
    pub fn remove(&self, job: JobId, password: &str) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        state.authorize(job, password)?;
        if let Some(running) = state.running.as_mut().filter(|running| running.id == job) {
            running.requested = Some(StopRequest::Remove);
            running.cancel.cancel();
            info!(job_id = %job, "Removal requested for running job");
        } else {
            state.delete(job);
        }
        Ok(())
    }

    /// Moves a live job `delta` positions within the live queue; negative values move it towards
    /// the head.
    ///
    /// The job moves one position at a time. Moving forward stops at the head of the queue, at
    /// the running job, and at any job whose password differs from `password`. Moving backward
    /// stops only at the tail.
    ///
    /// Returns the job's new position in the live queue.
    pub fn reorder(&self, job: JobId, delta: i64, password: &str) -> Result<usize, SchedulerError> {
        let mut state = self.state.lock();
        let current = state.authorize(job, password)?.state;
        if current != QueueState::Live {
            return Err(SchedulerError::InvalidState {
                job,
                state: current,
                operation: "reorder",
            });
        }
        if state.is_running(job) {
            return Err(SchedulerError::JobRunning(job));
        }
        let Some(mut position) = state.live.iter().position(|queued| *queued == job) else {
            return Err(SchedulerError::JobNotFound(job));
        };

        let steps = delta.unsigned_abs();
        let mut moved = 0;
        while moved < steps {
            let target = if delta < 0 {
                let Some(ahead) = position.checked_sub(1) else { break };
                let ahead_id = state.live[ahead];
                let shares_owner = state
                    .jobs
                    .get(&ahead_id)
                    .is_some_and(|other| other.password.verify(password));
                if state.is_running(ahead_id) || !shares_owner {
                    break;
                }
                ahead
            } else {
                if position + 1 >= state.live.len() {
                    break;
                }
                position + 1
            };
            state.live.swap(position, target);
            position = target;
            moved += 1;
        }
        info!(job_id = %job, requested = delta, moved, position, "Job reordered");
        Ok(position)
    }

    /// Replaces a job's parameters. Deferred to the next iteration start for the running job.
    pub fn set_params(
        &self,
        job: JobId,
        params: SearchParams,
        password: &str,
    ) -> Result<(), SchedulerError> {
        params.validate()?;
        self.mutate(job, password, "set_params", DeferredAction::SetParams(params))
    }

    /// Replaces the operator set. Deferred to the next iteration start for the running job.
    pub fn set_operators(
        &self,
        job: JobId,
        operators: Vec<String>,
        password: &str,
    ) -> Result<(), SchedulerError> {
        if operators.is_empty() {
            return Err(ConfigError::MissingParameter("operators").into());
        }
        self.mutate(job, password, "set_operators", DeferredAction::SetOperators(operators))
    }

    /// Queues subtrees for pruning at the job's next iteration. Roots are never pruned.
    pub fn request_prune(
        &self,
        job: JobId,
        keys: Vec<String>,
        password: &str,
    ) -> Result<(), SchedulerError> {
        self.mutate(job, password, "request_prune", DeferredAction::Prune(keys))
    }

    fn mutate(
        &self,
        job: JobId,
        password: &str,
        operation: &'static str,
        action: DeferredAction,
    ) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        let current = state.authorize(job, password)?.state;
        if current == QueueState::Finished {
            return Err(SchedulerError::InvalidState {
                job,
                state: current,
                operation,
            });
        }
        if state.is_running(job) {
            state.push_deferred(job, action);
            info!(job_id = %job, operation, "Change deferred to next iteration");
            return Ok(());
        }
        let record = state.jobs.get_mut(&job).ok_or(SchedulerError::JobNotFound(job))?;
        if let Some(pending) = action.fold_into(Arc::make_mut(&mut record.committed)) {
            state.push_deferred(job, pending);
        }
        Ok(())
    }

    /// Loads a stored iteration of a job.
    pub fn history(
        &self,
        job: JobId,
        iteration: u32,
        password: &str,
    ) -> Result<IterationSnapshot, SchedulerError> {
        self.state.lock().authorize(job, password)?;
        self.store
            .load(job, iteration)?
            .ok_or(SchedulerError::HistoryNotFound { job, iteration })
    }

    /// The job's last committed state.
    pub fn committed(&self, job: JobId, password: &str) -> Result<IterationSnapshot, SchedulerError> {
        let state = self.state.lock();
        let record = state.authorize(job, password)?;
        Ok((*record.committed).clone())
    }

    pub fn job_state(&self, job: JobId) -> Option<QueueState> {
        self.state.lock().jobs.get(&job).map(|record| record.state)
    }

    /// Summaries of every job: live queue order first, then sleeping, then finished.
    pub fn jobs(&self) -> Vec<JobSummary> {
        let state = self.state.lock();
        state
            .live
            .iter()
            .chain(state.sleeping.iter())
            .chain(state.finished.iter())
            .filter_map(|id| state.jobs.get(id))
            .map(Job::summary)
            .collect()
    }

    pub fn is_halted(&self) -> bool {
        self.state.lock().halted
    }

    /// Stops the scheduler: queued jobs go to sleeping, the running job is asked to stop and
    /// blocked workers are released.
    pub fn halt(&self) {
        let mut state = self.state.lock();
        if state.halted {
            return;
        }
        state.halted = true;
        let queued: Vec<JobId> = state.live.iter().copied().collect();
        for id in queued {
            if state.is_running(id) {
                continue;
            }
            state.move_to(id, QueueState::Sleeping);
        }
        if let Some(running) = state.running.as_mut() {
            running.requested.get_or_insert(StopRequest::Pause);
            running.cancel.cancel();
        }
        self.job_ready.notify_all();
        info!("Scheduler halted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::candidate::CandidateRecord;
    use crate::core::tree::TreeError;
    use crate::engine::config::SearchParamsBuilder;
    use crate::engine::snapshot::MemorySnapshotStore;

    fn scheduler() -> (JobScheduler, Arc<MemorySnapshotStore>) {
        let store = Arc::new(MemorySnapshotStore::new());
        (JobScheduler::new(store.clone(), false), store)
    }

    fn context() -> SearchContext {
        SearchContext::new(
            SearchParams::default(),
            vec!["mutate".to_string()],
            [CandidateRecord::root("r", 1.0)],
        )
        .unwrap()
    }

    fn completed(iteration: u32) -> IterationReport {
        IterationReport {
            iteration,
            ..IterationReport::default()
        }
    }

    fn cancelled(iteration: u32) -> IterationReport {
        IterationReport {
            iteration,
            stop: Some(StopReason::Cancelled),
            ..IterationReport::default()
        }
    }

    #[test]
    fn ids_are_assigned_monotonically_and_initial_state_is_stored() {
        let (scheduler, store) = scheduler();
        let first = scheduler.create_job(context(), "pw").unwrap();
        let second = scheduler.create_job(context(), "pw").unwrap();
        assert_eq!(first, JobId(1));
        assert_eq!(second, JobId(2));
        assert_eq!(store.len(), 2);
        assert_eq!(store.latest_iteration(first).unwrap(), Some(0));
    }

    #[test]
    fn invalid_context_is_not_enqueued() {
        let (scheduler, store) = scheduler();
        let mut ctx = context();
        ctx.operators.clear();

        let result = scheduler.create_job(ctx, "pw");

        assert!(matches!(
            result,
            Err(SchedulerError::InvalidJob {
                source: ConfigError::MissingParameter("operators")
            })
        ));
        assert!(scheduler.jobs().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn non_interactive_fetch_terminates_on_empty_queue() {
        let (scheduler, _) = scheduler();
        assert!(scheduler.fetch_next_job().is_none());
    }

    #[test]
    fn wrong_password_leaves_state_unchanged() {
        let (scheduler, _) = scheduler();
        let id = scheduler.create_job(context(), "pw").unwrap();

        assert!(matches!(
            scheduler.pause(id, "nope"),
            Err(SchedulerError::Unauthorized(_))
        ));
        assert!(matches!(
            scheduler.remove(id, "nope"),
            Err(SchedulerError::Unauthorized(_))
        ));
        assert_eq!(scheduler.job_state(id), Some(QueueState::Live));
        assert!(matches!(
            scheduler.pause(JobId(99), "pw"),
            Err(SchedulerError::JobNotFound(_))
        ));
    }

    #[test]
    fn pausing_the_running_job_waits_for_commit() {
        let (scheduler, store) = scheduler();
        let id = scheduler.create_job(context(), "pw").unwrap();
        let JobLease { mut context, cancel } = scheduler.fetch_next_job().unwrap();

        scheduler.pause(id, "pw").unwrap();
        assert!(cancel.is_cancelled());
        assert_eq!(scheduler.job_state(id), Some(QueueState::Live));

        context.iteration = 1;
        let still_live = scheduler.commit_iteration(&context, &completed(1));

        assert!(!still_live);
        assert_eq!(scheduler.job_state(id), Some(QueueState::Sleeping));
        assert_eq!(store.latest_iteration(id).unwrap(), Some(1));
    }

    #[test]
    fn cancelled_iteration_is_discarded() {
        let (scheduler, store) = scheduler();
        let id = scheduler.create_job(context(), "pw").unwrap();
        let JobLease { mut context, .. } = scheduler.fetch_next_job().unwrap();
        scheduler.pause(id, "pw").unwrap();

        context.iteration = 1;
        assert!(!scheduler.commit_iteration(&context, &cancelled(1)));

        assert_eq!(scheduler.job_state(id), Some(QueueState::Sleeping));
        assert_eq!(store.latest_iteration(id).unwrap(), Some(0));
        assert_eq!(scheduler.committed(id, "pw").unwrap().iteration, 0);
    }

    #[test]
    fn exhausted_job_is_finished() {
        let (scheduler, _) = scheduler();
        let id = scheduler.create_job(context(), "pw").unwrap();
        let JobLease { mut context, .. } = scheduler.fetch_next_job().unwrap();
        context.iteration = 1;

        assert!(scheduler.commit_iteration(&context, &completed(1)));
        let report = IterationReport {
            stop: Some(StopReason::IterationLimit),
            ..completed(2)
        };
        context.iteration = 2;
        assert!(!scheduler.commit_iteration(&context, &report));

        let summary = &scheduler.jobs()[0];
        assert_eq!(summary.state, QueueState::Finished);
        assert_eq!(summary.iteration, 2);
        assert_eq!(
            summary.outcome,
            Some(JobOutcome::Stopped(StopReason::IterationLimit))
        );
        assert!(matches!(
            scheduler.resume(id, "pw"),
            Err(SchedulerError::InvalidState { .. })
        ));
    }

    #[test]
    fn removing_the_running_job_deletes_it_at_commit() {
        let (scheduler, _) = scheduler();
        let id = scheduler.create_job(context(), "pw").unwrap();
        let JobLease { context, .. } = scheduler.fetch_next_job().unwrap();

        scheduler.remove(id, "pw").unwrap();
        assert!(scheduler.job_state(id).is_some());

        assert!(!scheduler.commit_iteration(&context, &cancelled(1)));
        assert_eq!(scheduler.job_state(id), None);
    }

    #[test]
    fn params_change_of_running_job_is_deferred() {
        let (scheduler, _) = scheduler();
        let id = scheduler.create_job(context(), "pw").unwrap();
        let JobLease { mut context, .. } = scheduler.fetch_next_job().unwrap();
        let params = SearchParamsBuilder::new().max_iterations(3).build().unwrap();

        scheduler.set_params(id, params, "pw").unwrap();
        assert_eq!(context.params.max_iterations, 500);
        assert_eq!(scheduler.committed(id, "pw").unwrap().params.max_iterations, 500);

        scheduler.take_deferred(id).apply_to(&mut context);
        assert_eq!(context.params.max_iterations, 3);
        assert!(scheduler.take_deferred(id).is_empty());
    }

    #[test]
    fn params_change_of_idle_job_applies_immediately() {
        let (scheduler, _) = scheduler();
        let id = scheduler.create_job(context(), "pw").unwrap();
        let params = SearchParamsBuilder::new().max_iterations(3).build().unwrap();

        scheduler.set_params(id, params, "pw").unwrap();

        assert_eq!(scheduler.committed(id, "pw").unwrap().params.max_iterations, 3);
        assert!(matches!(
            scheduler.set_operators(id, Vec::new(), "pw"),
            Err(SchedulerError::InvalidJob { .. })
        ));
    }

    #[test]
    fn pending_changes_survive_a_pause() {
        let (scheduler, _) = scheduler();
        let id = scheduler.create_job(context(), "pw").unwrap();
        let JobLease { context, .. } = scheduler.fetch_next_job().unwrap();

        scheduler
            .set_operators(id, vec!["swap".to_string()], "pw")
            .unwrap();
        scheduler.request_prune(id, vec!["x".to_string()], "pw").unwrap();
        scheduler.pause(id, "pw").unwrap();
        scheduler.commit_iteration(&context, &cancelled(1));

        assert_eq!(
            scheduler.committed(id, "pw").unwrap().operators,
            vec!["swap".to_string()]
        );
        scheduler.resume(id, "pw").unwrap();
        let JobLease { mut context, .. } = scheduler.fetch_next_job().unwrap();
        let prunes = scheduler.take_deferred(id).apply_to(&mut context);
        assert!(prunes.contains("x"));
    }

    #[test]
    fn drained_changes_survive_a_cancelled_iteration() {
        let (scheduler, _) = scheduler();
        let id = scheduler.create_job(context(), "pw").unwrap();
        let JobLease { mut context, .. } = scheduler.fetch_next_job().unwrap();
        let params = SearchParamsBuilder::new().max_iterations(3).build().unwrap();
        scheduler.set_params(id, params, "pw").unwrap();
        scheduler.request_prune(id, vec!["x".to_string()], "pw").unwrap();

        scheduler.take_deferred(id).apply_to(&mut context);
        assert_eq!(context.params.max_iterations, 3);
        scheduler.pause(id, "pw").unwrap();
        assert!(!scheduler.commit_iteration(&context, &cancelled(1)));

        assert_eq!(scheduler.committed(id, "pw").unwrap().params.max_iterations, 3);
        scheduler.resume(id, "pw").unwrap();
        let JobLease { mut context, .. } = scheduler.fetch_next_job().unwrap();
        assert_eq!(context.params.max_iterations, 3);
        let prunes = scheduler.take_deferred(id).apply_to(&mut context);
        assert!(prunes.contains("x"));
    }

    #[test]
    fn drained_changes_survive_a_failed_iteration() {
        let (scheduler, _) = scheduler();
        let id = scheduler.create_job(context(), "pw").unwrap();
        let JobLease { mut context, .. } = scheduler.fetch_next_job().unwrap();
        let params = SearchParamsBuilder::new().max_iterations(3).build().unwrap();
        scheduler.set_params(id, params, "pw").unwrap();
        scheduler.request_prune(id, vec!["x".to_string()], "pw").unwrap();
        scheduler.take_deferred(id).apply_to(&mut context);

        let failure = EngineError::Internal("script crashed".to_string());
        assert!(scheduler.abort_iteration(id, &failure));

        let JobLease { mut context, .. } = scheduler.fetch_next_job().unwrap();
        assert_eq!(context.params.max_iterations, 3);
        let prunes = scheduler.take_deferred(id).apply_to(&mut context);
        assert!(prunes.contains("x"));
    }

    #[test]
    fn committed_iteration_consumes_drained_changes() {
        let (scheduler, _) = scheduler();
        let id = scheduler.create_job(context(), "pw").unwrap();
        let JobLease { mut context, .. } = scheduler.fetch_next_job().unwrap();
        scheduler.request_prune(id, vec!["x".to_string()], "pw").unwrap();
        scheduler.take_deferred(id).apply_to(&mut context);

        context.iteration = 1;
        assert!(scheduler.commit_iteration(&context, &completed(1)));
        let failure = EngineError::Internal("script crashed".to_string());
        assert!(scheduler.abort_iteration(id, &failure));

        scheduler.fetch_next_job().unwrap();
        assert!(scheduler.take_deferred(id).is_empty());
    }

    #[test]
    fn reorder_stops_at_running_and_foreign_jobs() {
        let (scheduler, _) = scheduler();
        let first = scheduler.create_job(context(), "a").unwrap();
        let second = scheduler.create_job(context(), "b").unwrap();
        let third = scheduler.create_job(context(), "a").unwrap();
        let fourth = scheduler.create_job(context(), "a").unwrap();
        let _lease = scheduler.fetch_next_job().unwrap();

        assert!(matches!(
            scheduler.reorder(first, 1, "a"),
            Err(SchedulerError::JobRunning(_))
        ));
        // Cannot overtake a job with a different password.
        assert_eq!(scheduler.reorder(fourth, -3, "a").unwrap(), 2);
        assert_eq!(scheduler.reorder(third, 5, "a").unwrap(), 3);
        // Moving towards the tail needs no permission.
        assert_eq!(scheduler.reorder(second, 2, "b").unwrap(), 3);
        assert_eq!(scheduler.reorder(second, -5, "b").unwrap(), 3);
        // Never ahead of the running job.
        assert_eq!(scheduler.reorder(fourth, -5, "a").unwrap(), 1);

        let order: Vec<JobId> = scheduler.jobs().iter().map(|job| job.id).collect();
        assert_eq!(order, vec![first, fourth, third, second]);
    }

    #[test]
    fn repeated_stage_failures_put_the_job_to_sleep() {
        let (scheduler, _) = scheduler();
        let id = scheduler.create_job(context(), "pw").unwrap();
        let failure = EngineError::Internal("script crashed".to_string());

        for _ in 0..2 {
            scheduler.fetch_next_job().unwrap();
            assert!(scheduler.abort_iteration(id, &failure));
        }
        scheduler.fetch_next_job().unwrap();
        assert!(!scheduler.abort_iteration(id, &failure));
        assert_eq!(scheduler.job_state(id), Some(QueueState::Sleeping));
    }

    #[test]
    fn tree_corruption_retires_the_job() {
        let (scheduler, _) = scheduler();
        let id = scheduler.create_job(context(), "pw").unwrap();
        scheduler.fetch_next_job().unwrap();

        let failure = EngineError::from(TreeError::MissingRecord("ghost".to_string()));
        assert!(!scheduler.abort_iteration(id, &failure));

        let summary = &scheduler.jobs()[0];
        assert_eq!(summary.state, QueueState::Finished);
        assert!(matches!(summary.outcome, Some(JobOutcome::Failed(_))));
    }

    #[test]
    fn halt_sleeps_queued_jobs_and_stops_workers() {
        let (scheduler, _) = scheduler();
        let running = scheduler.create_job(context(), "pw").unwrap();
        let queued = scheduler.create_job(context(), "pw").unwrap();
        let JobLease { context: leased, cancel } = scheduler.fetch_next_job().unwrap();

        scheduler.halt();

        assert!(cancel.is_cancelled());
        assert_eq!(scheduler.job_state(queued), Some(QueueState::Sleeping));
        assert!(!scheduler.commit_iteration(&leased, &cancelled(1)));
        assert_eq!(scheduler.job_state(running), Some(QueueState::Sleeping));
        assert!(scheduler.fetch_next_job().is_none());
        assert!(matches!(
            scheduler.create_job(context(), "pw"),
            Err(SchedulerError::Halted)
        ));
    }

    #[test]
    fn interactive_worker_wakes_on_new_job() {
        let store = Arc::new(MemorySnapshotStore::new());
        let scheduler = Arc::new(JobScheduler::new(store, true));
        let worker = {
            let scheduler = Arc::clone(&scheduler);
            std::thread::spawn(move || scheduler.fetch_next_job().map(|lease| lease.context.job_id))
        };

        let id = scheduler.create_job(context(), "pw").unwrap();

        assert_eq!(worker.join().unwrap(), Some(id));
    }

    #[test]
    fn restored_job_gets_a_new_id_and_keeps_progress() {
        let (scheduler, store) = scheduler();
        let id = scheduler.create_job(context(), "pw").unwrap();
        let JobLease { mut context, .. } = scheduler.fetch_next_job().unwrap();
        context.iteration = 4;
        scheduler.commit_iteration(&context, &completed(4));

        let snapshot = store.load_latest(id).unwrap().unwrap();
        let restored = scheduler.restore_job(snapshot, "other").unwrap();

        assert_ne!(restored, id);
        assert_eq!(scheduler.committed(restored, "other").unwrap().iteration, 4);
        assert_eq!(
            scheduler.history(restored, 4, "other").unwrap().job_id,
            restored
        );
        assert!(matches!(
            scheduler.history(restored, 3, "other"),
            Err(SchedulerError::HistoryNotFound { .. })
        ));
    }
}
