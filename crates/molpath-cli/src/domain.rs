//! Built-in string-morphing domain.
//!
//! Candidates are plain strings. Neighbors differ by one edit and the score is the normalized
//! edit distance to a target string, so a job walks from its roots towards the target.

use molpath::core::models::candidate::CandidateRecord;
use molpath::core::traits::{CandidateGenerator, CollaboratorError, Scorer};
use rand::Rng;
use rand::seq::SliceRandom;

pub const OPERATORS: [&str; 4] = ["insert", "delete", "substitute", "swap"];

/// Applies randomly chosen edit operators to a candidate key.
pub struct MorphGenerator {
    alphabet: Vec<char>,
}

impl MorphGenerator {
    pub fn new(alphabet: &str) -> Result<Self, String> {
        let mut alphabet: Vec<char> = alphabet.chars().collect();
        alphabet.sort_unstable();
        alphabet.dedup();
        if alphabet.is_empty() {
            return Err("the alphabet must contain at least one character".to_string());
        }
        Ok(Self { alphabet })
    }

    fn edit(&self, key: &str, operator: &str, rng: &mut impl Rng) -> Result<String, String> {
        let mut chars: Vec<char> = key.chars().collect();
        match operator {
            "insert" => {
                let position = rng.gen_range(0..=chars.len());
                chars.insert(position, self.random_char(rng, None));
            }
            "delete" => {
                if chars.len() < 2 {
                    return Err("too short to delete from".to_string());
                }
                chars.remove(rng.gen_range(0..chars.len()));
            }
            "substitute" => {
                if chars.is_empty() {
                    return Err("nothing to substitute".to_string());
                }
                let position = rng.gen_range(0..chars.len());
                chars[position] = self.random_char(rng, Some(chars[position]));
            }
            "swap" => {
                if chars.len() < 2 {
                    return Err("too short to swap".to_string());
                }
                let position = rng.gen_range(0..chars.len() - 1);
                chars.swap(position, position + 1);
            }
            other => return Err(format!("unknown operator '{other}'")),
        }
        Ok(chars.into_iter().collect())
    }

    /// Random alphabet character, different from `avoid` whenever the alphabet allows it.
    fn random_char(&self, rng: &mut impl Rng, avoid: Option<char>) -> char {
        let choices: Vec<char> = self
            .alphabet
            .iter()
            .copied()
            .filter(|c| Some(*c) != avoid)
            .collect();
        choices
            .choose(rng)
            .or_else(|| self.alphabet.first())
            .copied()
            .unwrap_or(' ')
    }
}

impl CandidateGenerator for MorphGenerator {
    fn generate(
        &self,
        candidate: &CandidateRecord,
        attempt_budget: usize,
        operators: &[String],
    ) -> Vec<Result<CandidateRecord, CollaboratorError>> {
        let mut rng = rand::thread_rng();
        (0..attempt_budget)
            .map(|_| {
                let operator = operators.choose(&mut rng).ok_or_else(|| {
                    CollaboratorError::Generation {
                        key: candidate.key.clone(),
                        reason: "no operators".to_string(),
                    }
                })?;
                let key = self
                    .edit(&candidate.key, operator, &mut rng)
                    .map_err(|reason| CollaboratorError::Generation {
                        key: candidate.key.clone(),
                        reason,
                    })?;
                if key == candidate.key {
                    return Err(CollaboratorError::InvalidCandidate {
                        key,
                        reason: format!("'{operator}' left the key unchanged"),
                    });
                }
                let weight = key.chars().count() as f64;
                Ok(CandidateRecord::derived(key, candidate.key.clone())
                    .with_weight(weight)
                    .with_operator(operator.clone()))
            })
            .collect()
    }
}

/// Scores a key by its normalized edit distance to the target. Lower is better, 0 is the target.
pub struct TargetDistance {
    target: Vec<char>,
}

impl TargetDistance {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.chars().collect(),
        }
    }

    pub fn distance(&self, key: &str) -> f64 {
        let key: Vec<char> = key.chars().collect();
        let longest = key.len().max(self.target.len()).max(1);
        levenshtein(&key, &self.target) as f64 / longest as f64
    }

    /// Root record for `key` with its score and weight filled in.
    pub fn root(&self, key: &str) -> CandidateRecord {
        CandidateRecord::root(key, self.distance(key)).with_weight(key.chars().count() as f64)
    }
}

impl Scorer for TargetDistance {
    fn score(&self, candidate: &CandidateRecord) -> Result<f64, CollaboratorError> {
        Ok(self.distance(&candidate.key))
    }

    /// Distance and length difference to the target, both minimized.
    fn descriptors(&self, candidate: &CandidateRecord) -> Result<Vec<f64>, CollaboratorError> {
        let length = candidate.key.chars().count() as f64;
        Ok(vec![
            self.distance(&candidate.key),
            (length - self.target.len() as f64).abs(),
        ])
    }
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn levenshtein_matches_known_distances() {
        assert_eq!(levenshtein(&chars("kitten"), &chars("sitting")), 3);
        assert_eq!(levenshtein(&chars(""), &chars("abc")), 3);
        assert_eq!(levenshtein(&chars("flaw"), &chars("lawn")), 2);
        assert_eq!(levenshtein(&chars("same"), &chars("same")), 0);
    }

    #[test]
    fn distance_is_normalized() {
        let scorer = TargetDistance::new("abcd");
        assert_eq!(scorer.distance("abcd"), 0.0);
        assert_eq!(scorer.distance("abce"), 0.25);
        assert_eq!(scorer.distance("wxyz"), 1.0);
        assert_eq!(TargetDistance::new("").distance(""), 0.0);
    }

    #[test]
    fn neighbors_are_one_edit_away() {
        let generator = MorphGenerator::new("xyz").unwrap();
        let parent = CandidateRecord::root("abcd", 1.0);
        let operators: Vec<String> = OPERATORS.iter().map(|op| op.to_string()).collect();

        let neighbors = generator.generate(&parent, 50, &operators);

        assert_eq!(neighbors.len(), 50);
        for neighbor in neighbors {
            let neighbor = neighbor.unwrap();
            assert_eq!(neighbor.parent.as_deref(), Some("abcd"));
            assert_eq!(neighbor.weight, neighbor.key.chars().count() as f64);
            let edits = levenshtein(&chars("abcd"), &chars(&neighbor.key));
            match neighbor.operator.as_deref() {
                Some("swap") => assert!(edits <= 2),
                _ => assert_eq!(edits, 1),
            }
        }
    }

    #[test]
    fn impossible_edits_are_reported_as_failures() {
        let generator = MorphGenerator::new("a").unwrap();
        let parent = CandidateRecord::root("q", 1.0);

        let attempts = generator.generate(&parent, 3, &["delete".to_string()]);
        assert!(attempts.iter().all(|attempt| attempt.is_err()));

        let attempts = generator.generate(&parent, 1, &["teleport".to_string()]);
        assert!(matches!(
            &attempts[0],
            Err(CollaboratorError::Generation { reason, .. }) if reason.contains("teleport")
        ));
    }

    #[test]
    fn edits_that_change_nothing_are_invalid_candidates() {
        let generator = MorphGenerator::new("xyz").unwrap();
        let parent = CandidateRecord::root("aa", 1.0);

        let attempts = generator.generate(&parent, 4, &["swap".to_string()]);

        assert_eq!(attempts.len(), 4);
        for attempt in attempts {
            assert!(matches!(
                attempt,
                Err(CollaboratorError::InvalidCandidate { key, .. }) if key == "aa"
            ));
        }
    }

    #[test]
    fn empty_alphabet_is_rejected() {
        assert!(MorphGenerator::new("").is_err());
    }

    #[test]
    fn descriptors_are_minimized_at_the_target() {
        let scorer = TargetDistance::new("abc");
        let at_target = CandidateRecord::root("abc", 0.0);
        let longer = CandidateRecord::root("abcde", 0.0);
        assert_eq!(scorer.descriptors(&at_target).unwrap(), vec![0.0, 0.0]);
        assert_eq!(scorer.descriptors(&longer).unwrap(), vec![0.4, 2.0]);
    }
}
