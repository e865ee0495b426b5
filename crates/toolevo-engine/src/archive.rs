//! Unbounded append-only archive of evaluated candidates
//!
//! Parent pointers form a forest stored as a child → parent map; iteration
//! order is insertion order. The archive is single-writer, owned by the
//! scheduler, so no interior locking is needed.

use crate::{CandidateId, EvaluatedCandidate};
use std::collections::HashMap;

/// Archive of every evaluated candidate in a run. Nothing is ever evicted.
#[derive(Debug, Default)]
pub struct CandidateArchive {
    entries: HashMap<CandidateId, EvaluatedCandidate>,
    parents: HashMap<CandidateId, CandidateId>,
    order: Vec<CandidateId>,
}

impl CandidateArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an evaluated candidate, recording its parent when present.
    ///
    /// The archive never rejects; deduplication is the caller's
    /// responsibility (the scheduler allocates fresh ids by construction).
    pub fn add(&mut self, evaluated: EvaluatedCandidate, parent_id: Option<CandidateId>) {
        let id = evaluated.candidate.id.clone();
        if let Some(parent) = parent_id {
            self.parents.insert(id.clone(), parent);
        }
        if self.entries.insert(id.clone(), evaluated).is_none() {
            self.order.push(id);
        }
    }

    pub fn get(&self, id: &str) -> Option<&EvaluatedCandidate> {
        self.entries.get(id)
    }

    pub fn size(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// All candidates in insertion order
    pub fn all(&self) -> impl Iterator<Item = &EvaluatedCandidate> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    /// Candidate ids in insertion order
    pub fn ids(&self) -> &[CandidateId] {
        &self.order
    }

    /// Parent of a candidate; `None` for the baseline
    pub fn parent_of(&self, id: &str) -> Option<&CandidateId> {
        self.parents.get(id)
    }

    /// Ancestry of a candidate, starting at the candidate itself and ending
    /// at its baseline root
    pub fn lineage(&self, id: &str) -> Vec<CandidateId> {
        let mut chain = Vec::new();
        let mut current = id;
        while let Some(entry) = self.entries.get(current) {
            chain.push(entry.candidate.id.clone());
            match self.parents.get(current) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        chain
    }

    /// Largest average description length over the archive
    pub fn max_avg_length(&self) -> f64 {
        self.all()
            .map(|e| e.avg_description_length)
            .fold(0.0, f64::max)
    }

    /// Blended accuracy/conciseness score of an archived candidate.
    ///
    /// `score = accuracy * alpha + conciseness * (1 - alpha)` where
    /// conciseness is the candidate's length relative to the longest
    /// average in the archive, clamped to [0, 1].
    pub fn global_score(&self, id: &str, accuracy_weight: f64) -> Option<f64> {
        let entry = self.entries.get(id)?;
        let max_len = self.max_avg_length();
        let conciseness = if max_len > 0.0 {
            (1.0 - entry.avg_description_length / max_len).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Some(entry.accuracy * accuracy_weight + conciseness * (1.0 - accuracy_weight))
    }
}
