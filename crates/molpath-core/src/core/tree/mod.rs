//! # Candidate Tree
//!
//! The concurrent forest of explored candidates. Records are stored in a [`ShardedMap`] and
//! mutated through short-lived [`Accessor`] locks, one key at a time. Structural changes
//! (`children`, `parent`) are only made by acceptance and pruning; scans may only touch
//! non-structural fields such as improvement counters.
//!
//! Besides the records, the tree tracks:
//!
//! - the **derivation map**, counting how many neighbor-generation attempts each candidate has
//!   spawned across iterations,
//! - the **pruned log**, the ordered keys erased during the current iteration,
//! - an optional **alias index** mapping a coarser identity to the key that first claimed it.

pub mod map;

pub use map::{Accessor, ShardedMap};

use crate::core::models::candidate::CandidateRecord;
use std::collections::{BTreeMap, HashMap, VecDeque};
use thiserror::Error;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Candidate '{0}' is not present in the tree")]
    MissingRecord(String),

    #[error("Parent '{parent}' of candidate '{child}' is not present in the tree")]
    MissingParent { child: String, parent: String },

    #[error("Root candidate '{0}' must not have a parent")]
    RootWithParent(String),

    #[error("Inconsistent tree: {0}")]
    Inconsistent(String),
}

#[derive(Default)]
pub struct CandidateTree {
    records: ShardedMap<CandidateRecord>,
    aliases: ShardedMap<String>,
    roots: Vec<String>,
    derivations: HashMap<String, u32>,
    pruned: Vec<String>,
}

impl CandidateTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a tree whose forest is seeded by `roots`.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::RootWithParent`] if a root record names a parent.
    pub fn from_roots(roots: impl IntoIterator<Item = CandidateRecord>) -> Result<Self, TreeError> {
        let mut tree = Self::new();
        for root in roots {
            tree.add_root(root)?;
        }
        Ok(tree)
    }

    /// Reassembles a tree from persisted parts and verifies its structure.
    pub fn from_parts(
        roots: Vec<String>,
        records: impl IntoIterator<Item = CandidateRecord>,
        derivations: HashMap<String, u32>,
        pruned: Vec<String>,
    ) -> Result<Self, TreeError> {
        let tree = Self {
            roots,
            derivations,
            pruned,
            ..Self::default()
        };
        for record in records {
            tree.insert_if_absent(record);
        }
        for root in &tree.roots {
            let record = tree.get(root).ok_or_else(|| TreeError::MissingRecord(root.clone()))?;
            if !record.is_root() {
                return Err(TreeError::RootWithParent(root.clone()));
            }
        }
        tree.check_invariants()?;
        Ok(tree)
    }

    /// Adds a root record. Returns `false` if a record with the same key already exists.
    pub fn add_root(&mut self, record: CandidateRecord) -> Result<bool, TreeError> {
        if !record.is_root() {
            return Err(TreeError::RootWithParent(record.key));
        }
        let key = record.key.clone();
        let inserted = self.insert_if_absent(record);
        if inserted {
            self.roots.push(key);
        }
        Ok(inserted)
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn is_root_key(&self, key: &str) -> bool {
        self.roots.iter().any(|root| root == key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains(key)
    }

    pub fn contains_alias(&self, alias: &str) -> bool {
        self.aliases.contains(alias)
    }

    pub fn find(&self, key: &str) -> Option<Accessor<CandidateRecord>> {
        self.records.find(key)
    }

    /// Returns a copy of the record stored under `key`.
    pub fn get(&self, key: &str) -> Option<CandidateRecord> {
        self.find(key).map(|record| record.clone())
    }

    /// Inserts `record` unless its key is already present, indexing its alias if it has one.
    ///
    /// The alias index keeps the first key that claimed an alias.
    pub fn insert_if_absent(&self, record: CandidateRecord) -> bool {
        let key = record.key.clone();
        let alias = record.alias.clone();
        if !self.records.insert_if_absent(key.clone(), record) {
            return false;
        }
        if let Some(alias) = alias {
            self.aliases.insert_if_absent(alias, key);
        }
        true
    }

    /// Registers `child` under `parent`, in both the current and the historic children sets.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::MissingParent`] if `parent` is not in the tree.
    pub fn attach_child(&self, parent: &str, child: &str) -> Result<(), TreeError> {
        let mut record = self.find(parent).ok_or_else(|| TreeError::MissingParent {
            child: child.to_string(),
            parent: parent.to_string(),
        })?;
        record.children.insert(child.to_string());
        record.historic_children.insert(child.to_string());
        Ok(())
    }

    /// Visits every record (in parallel when enabled) and collects the visitor's outputs.
    ///
    /// The visitor may update non-structural fields only; it must not touch `children` or
    /// `parent`.
    pub fn scan<T, F>(&self, visitor: F) -> Vec<T>
    where
        T: Send,
        F: Fn(&mut CandidateRecord) -> Option<T> + Sync + Send,
    {
        let slots = self.records.slots();

        #[cfg(feature = "parallel")]
        let iter = slots.into_par_iter();
        #[cfg(not(feature = "parallel"))]
        let iter = slots.into_iter();

        iter.filter_map(|slot| {
            let mut record = Accessor::lock(slot);
            visitor(&mut record)
        })
        .collect()
    }

    /// Detaches `key` from its parent and erases it together with all of its descendants.
    ///
    /// Every erased key is appended to the pruned log. Keys that have already disappeared are
    /// skipped. Returns the number of erased records.
    pub fn erase_subtree(&mut self, key: &str) -> usize {
        let parent = match self.find(key) {
            Some(record) => record.parent.clone(),
            None => return 0,
        };
        if let Some(parent) = parent {
            if let Some(mut record) = self.find(&parent) {
                record.children.remove(key);
            }
        }

        let mut erased = 0;
        let mut queue = VecDeque::from([key.to_string()]);
        while let Some(current) = queue.pop_front() {
            let (children, alias) = match self.find(&current) {
                Some(mut record) => (std::mem::take(&mut record.children), record.alias.take()),
                None => continue,
            };
            queue.extend(children);

            if let Some(alias) = alias {
                let owned = self
                    .aliases
                    .find(&alias)
                    .is_some_and(|owner| *owner == current);
                if owned {
                    self.aliases.remove(&alias);
                }
            }
            self.records.remove(&current);
            self.roots.retain(|root| root != &current);
            self.pruned.push(current);
            erased += 1;
        }
        erased
    }

    pub fn derivations(&self, key: &str) -> u32 {
        self.derivations.get(key).copied().unwrap_or(0)
    }

    pub fn add_derivations(&mut self, key: &str, attempts: u32) {
        let count = self.derivations.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(attempts);
    }

    pub fn derivation_map(&self) -> &HashMap<String, u32> {
        &self.derivations
    }

    pub fn pruned_this_iteration(&self) -> &[String] {
        &self.pruned
    }

    /// Resets per-iteration bookkeeping.
    pub fn begin_iteration(&mut self) {
        self.pruned.clear();
    }

    /// Copies every record into a key-ordered map.
    pub fn records(&self) -> BTreeMap<String, CandidateRecord> {
        self.records
            .slots()
            .into_iter()
            .map(|slot| {
                let record = Accessor::lock(slot);
                (record.key.clone(), record.clone())
            })
            .collect()
    }

    /// Returns the keys from a root down to `key`.
    pub fn path_to(&self, key: &str) -> Result<Vec<String>, TreeError> {
        let mut path = vec![key.to_string()];
        let mut parent = self
            .find(key)
            .ok_or_else(|| TreeError::MissingRecord(key.to_string()))?
            .parent
            .clone();
        while let Some(current) = parent {
            let record = self.find(&current).ok_or_else(|| TreeError::MissingParent {
                child: path[path.len() - 1].clone(),
                parent: current.clone(),
            })?;
            parent = record.parent.clone();
            drop(record);
            path.push(current);
        }
        path.reverse();
        Ok(path)
    }

    /// Verifies the structural invariants of the forest.
    ///
    /// - `children` is a subset of `historic_children` for every record,
    /// - every child resolves to a record whose parent is the owner,
    /// - every non-root record's parent resolves to a live record.
    pub fn check_invariants(&self) -> Result<(), TreeError> {
        let records = self.records();
        for (key, record) in &records {
            if !record.children.is_subset(&record.historic_children) {
                return Err(TreeError::Inconsistent(format!(
                    "children of '{key}' are not a subset of its historic children"
                )));
            }
            for child in &record.children {
                let child_record = records
                    .get(child)
                    .ok_or_else(|| TreeError::MissingRecord(child.clone()))?;
                if child_record.parent.as_deref() != Some(key.as_str()) {
                    return Err(TreeError::Inconsistent(format!(
                        "child '{child}' of '{key}' names a different parent"
                    )));
                }
            }
            if let Some(parent) = &record.parent {
                if !records.contains_key(parent) {
                    return Err(TreeError::MissingParent {
                        child: key.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
