//! Per-task Pareto index and parent selection
//!
//! One front per test case. Membership is lexicographic: correctness on the
//! task first, then candidate-level average description length. Dominance
//! counts (how many fronts a candidate sits on) drive the dominance-weighted
//! selection policy.

use crate::{
    archive::CandidateArchive, config::SelectionPolicy, CandidateId, EvaluatedCandidate,
    OptimizerConfig, OptimizerError, OptimizerResult, TestCase, TestCaseId,
};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::{HashMap, HashSet};

/// Whether `a` dominates `b` on test case `task`: correct beats incorrect,
/// and among correct candidates the shorter average description wins. Ties
/// coexist on the front.
pub fn dominates(a: &EvaluatedCandidate, b: &EvaluatedCandidate, task: &str) -> bool {
    let a_correct = a.correct_on(task);
    let b_correct = b.correct_on(task);
    if a_correct && !b_correct {
        return true;
    }
    a_correct && b_correct && a.avg_description_length < b.avg_description_length
}

/// One Pareto front per test case, plus dominance counts
#[derive(Debug)]
pub struct ParetoIndex {
    fronts: HashMap<TestCaseId, HashSet<CandidateId>>,
    dominance_counts: HashMap<CandidateId, usize>,
    test_case_ids: Vec<TestCaseId>,
}

impl ParetoIndex {
    /// Create an index with one empty front per test case
    pub fn new(test_cases: &[TestCase]) -> Self {
        let test_case_ids: Vec<TestCaseId> = test_cases.iter().map(|tc| tc.id.clone()).collect();
        let fronts = test_case_ids
            .iter()
            .map(|id| (id.clone(), HashSet::new()))
            .collect();
        Self {
            fronts,
            dominance_counts: HashMap::new(),
            test_case_ids,
        }
    }

    /// Insert a newly archived candidate into every front it is not
    /// dominated on, evicting the members it dominates. Task fronts are
    /// independent, so update order does not matter. Re-inserting a
    /// candidate that is already on a front is a no-op.
    pub fn update(&mut self, new: &EvaluatedCandidate, archive: &CandidateArchive) {
        for task in &self.test_case_ids {
            let Some(front) = self.fronts.get_mut(task) else {
                continue;
            };

            let dominated_by_existing = front.iter().any(|id| {
                archive
                    .get(id)
                    .map(|member| dominates(member, new, task))
                    .unwrap_or(false)
            });
            if dominated_by_existing {
                continue;
            }

            let evicted: Vec<CandidateId> = front
                .iter()
                .filter(|id| {
                    archive
                        .get(id)
                        .map(|member| dominates(new, member, task))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            for id in evicted {
                front.remove(&id);
                if let Some(count) = self.dominance_counts.get_mut(&id) {
                    *count = count.saturating_sub(1);
                }
            }

            if front.insert(new.id().clone()) {
                *self.dominance_counts.entry(new.id().clone()).or_insert(0) += 1;
            }
        }
    }

    /// Front for one test case
    pub fn front(&self, test_case_id: &str) -> Option<&HashSet<CandidateId>> {
        self.fronts.get(test_case_id)
    }

    /// Number of task fronts containing the candidate
    pub fn dominance_count(&self, id: &str) -> usize {
        self.dominance_counts.get(id).copied().unwrap_or(0)
    }

    /// Pick a parent for the next mutation according to the configured
    /// policy. Returns `None` only when the archive is empty.
    pub fn select_parent(
        &self,
        archive: &CandidateArchive,
        config: &OptimizerConfig,
        rng: &mut StdRng,
    ) -> OptimizerResult<Option<CandidateId>> {
        if archive.is_empty() {
            return Ok(None);
        }

        match config.selection_policy {
            SelectionPolicy::Dominance => self.select_by_dominance(archive, config, rng),
            SelectionPolicy::GlobalScore => self.select_by_global_score(archive, config, rng),
        }
    }

    fn select_by_dominance(
        &self,
        archive: &CandidateArchive,
        config: &OptimizerConfig,
        rng: &mut StdRng,
    ) -> OptimizerResult<Option<CandidateId>> {
        // Iterate in archive insertion order so seeded runs replay.
        let contenders: Vec<(&CandidateId, usize)> = archive
            .ids()
            .iter()
            .map(|id| (id, self.dominance_count(id)))
            .filter(|(_, count)| *count > 0)
            .collect();

        if contenders.is_empty() {
            // Only possible before the first successful insertion.
            let index = rng.gen_range(0..archive.size());
            return Ok(Some(archive.ids()[index].clone()));
        }

        let temperature = config.effective_temperature();
        let ids: Vec<&CandidateId> = contenders.iter().map(|(id, _)| *id).collect();
        let scores: Vec<f64> = contenders.iter().map(|(_, c)| *c as f64).collect();
        let id = sample_softmax(&ids, &scores, temperature, rng)?;
        Ok(Some(id))
    }

    fn select_by_global_score(
        &self,
        archive: &CandidateArchive,
        config: &OptimizerConfig,
        rng: &mut StdRng,
    ) -> OptimizerResult<Option<CandidateId>> {
        let mut eligible: Vec<&CandidateId> = archive
            .ids()
            .iter()
            .filter(|id| {
                archive
                    .get(id)
                    .map(|e| e.accuracy >= config.min_accuracy)
                    .unwrap_or(false)
            })
            .collect();
        if eligible.is_empty() {
            eligible = archive.ids().iter().collect();
        }

        let scores: Vec<f64> = eligible
            .iter()
            .map(|id| {
                archive
                    .global_score(id, config.accuracy_weight)
                    .unwrap_or(0.0)
            })
            .collect();

        let temperature = config.effective_temperature();
        let id = sample_softmax(&eligible, &scores, temperature, rng)?;
        Ok(Some(id))
    }
}

fn sample_softmax(
    ids: &[&CandidateId],
    scores: &[f64],
    temperature: f64,
    rng: &mut StdRng,
) -> OptimizerResult<CandidateId> {
    // Shift by the max before exponentiating; large dominance counts would
    // otherwise overflow to infinity and break the distribution.
    let max_score = scores.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let weights: Vec<f64> = scores
        .iter()
        .map(|s| ((s - max_score) / temperature).exp())
        .collect();

    let dist = WeightedIndex::new(&weights).map_err(|e| {
        OptimizerError::internal(format!("failed to build selection distribution: {e}"))
    })?;
    Ok(ids[dist.sample(rng)].clone())
}
