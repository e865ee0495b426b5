//! Run configuration

use crate::{OptimizerError, OptimizerResult};
use serde::{Deserialize, Serialize};

/// Parent-selection policy, fixed for the duration of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Weight candidates by the number of per-task Pareto fronts they sit on
    Dominance,
    /// Weight archived candidates by a blended accuracy/conciseness score
    #[default]
    GlobalScore,
}

/// Optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// LLM call budget counted in test-case-equivalents. Subsample and full
    /// evaluations each increment by their size; mutation calls do not count.
    pub max_evaluations: usize,
    /// Test cases per subsample filter, capped at the test-set size. When it
    /// equals the full set the subsample pass and the full pass are charged
    /// separately even though they touch the same cases.
    pub subsample_size: usize,
    /// Width of the semaphore gating every gateway call
    pub max_concurrent_evaluations: usize,
    /// Model used for tool-selection evaluations
    pub evaluation_model: String,
    /// Model used for reflective mutations
    pub generation_model: String,
    /// Acceptance floor on the subsample score, and the accuracy filter for
    /// global-score selection
    pub min_accuracy: f64,
    /// Accuracy weight in the global score; conciseness gets the remainder
    pub accuracy_weight: f64,
    /// Exploration temperature for parent selection, clamped to >= 0.1
    pub selection_temperature: f64,
    /// Parent-selection policy
    pub selection_policy: SelectionPolicy,
    /// PRNG seed; seeded runs replay identically against a deterministic
    /// gateway
    pub seed: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_evaluations: 500,
            subsample_size: 5,
            max_concurrent_evaluations: 3,
            evaluation_model: "gpt-4o-mini".to_string(),
            generation_model: "gpt-4o-mini".to_string(),
            min_accuracy: 0.0,
            accuracy_weight: 0.5,
            selection_temperature: 1.0,
            selection_policy: SelectionPolicy::default(),
            seed: None,
        }
    }
}

impl OptimizerConfig {
    /// Validate numeric ranges and required fields
    pub fn validate(&self) -> OptimizerResult<()> {
        if self.max_evaluations < 1 {
            return Err(OptimizerError::config("max_evaluations must be >= 1"));
        }
        if self.subsample_size < 1 {
            return Err(OptimizerError::config("subsample_size must be >= 1"));
        }
        if self.max_concurrent_evaluations < 1 {
            return Err(OptimizerError::config(
                "max_concurrent_evaluations must be >= 1",
            ));
        }
        if self.evaluation_model.is_empty() || self.generation_model.is_empty() {
            return Err(OptimizerError::config("model names must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.min_accuracy) {
            return Err(OptimizerError::config("min_accuracy must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.accuracy_weight) {
            return Err(OptimizerError::config("accuracy_weight must be in [0, 1]"));
        }
        if self.selection_temperature <= 0.0 {
            return Err(OptimizerError::config(
                "selection_temperature must be positive",
            ));
        }
        Ok(())
    }

    /// Selection temperature with the lower clamp applied
    pub fn effective_temperature(&self) -> f64 {
        self.selection_temperature.max(0.1)
    }
}
