//! Genetic-Pareto search engine for evolving tool descriptions
//!
//! Given a fixed tool inventory and a set of labelled test queries, the
//! engine searches the space of alternative tool descriptions so that an LLM
//! selects the correct tool more often while keeping descriptions short. The
//! mutation operator is itself an LLM call that reflects on failures.
//!
//! The main entry point is [`scheduler::Optimizer`]; progress is reported
//! through an [`events::EventSink`] and the evaluated population accumulates
//! in an unbounded [`archive::CandidateArchive`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub mod archive;
pub mod config;
pub mod evaluator;
pub mod events;
pub mod mutation;
pub mod pareto;
pub mod scheduler;
pub mod testing;

pub use archive::CandidateArchive;
pub use config::{OptimizerConfig, SelectionPolicy};
pub use events::{EventSink, MemorySink, NullSink, ProgressEvent};
pub use scheduler::{CancelHandle, Optimizer, RunOutcome, RunSummary};

/// Candidate identifier, stable for the lifetime of a run
pub type CandidateId = String;

/// Test case identifier
pub type TestCaseId = String;

/// Engine errors
#[derive(Error, Debug)]
pub enum OptimizerError {
    /// Invalid configuration or inputs, raised before the loop starts
    #[error("invalid configuration: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// LLM provider failure; contained by the evaluator and mutator
    #[error("provider error: {0}")]
    Provider(#[from] toolevo_gateway::ProviderError),

    /// Unexpected failure in archive/Pareto/scheduler logic
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl OptimizerError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type for engine operations
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// A callable tool exposed to the model.
///
/// `description` is the only field the engine ever rewrites; `input_schema`
/// is opaque JSON passed through to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub id: String,
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
}

/// A labelled test query: the model should pick `expected_tool_name` when
/// shown `query`. Immutable for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: TestCaseId,
    pub query: String,
    pub expected_tool_name: String,
}

/// One assignment of descriptions to the fixed tool inventory.
///
/// Two candidates differ only in `description` fields. Immutable once
/// created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub tools: Vec<Tool>,
}

impl Candidate {
    /// Mean description length across the inventory, in bytes
    pub fn avg_description_length(&self) -> f64 {
        if self.tools.is_empty() {
            return 0.0;
        }
        let total: usize = self.tools.iter().map(|t| t.description.len()).sum();
        total as f64 / self.tools.len() as f64
    }

    /// Look up a tool by name
    pub fn tool_named(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Name → description map, sorted by name
    pub fn descriptions(&self) -> BTreeMap<String, String> {
        self.tools
            .iter()
            .map(|t| (t.name.clone(), t.description.clone()))
            .collect()
    }
}

/// Outcome of running one candidate against one test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub test_case_id: TestCaseId,
    /// Tool the model selected; `None` for plain-text replies and gateway
    /// failures
    pub selected: Option<String>,
    pub expected: String,
    pub correct: bool,
}

/// A candidate together with its full evaluation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatedCandidate {
    pub candidate: Candidate,
    /// Fraction of test cases answered correctly, in [0, 1]
    pub accuracy: f64,
    pub avg_description_length: f64,
    pub evaluations: Vec<EvalResult>,
}

impl EvaluatedCandidate {
    /// Candidate id shorthand
    pub fn id(&self) -> &CandidateId {
        &self.candidate.id
    }

    /// Evaluations the candidate got wrong
    pub fn failures(&self) -> impl Iterator<Item = &EvalResult> {
        self.evaluations.iter().filter(|r| !r.correct)
    }

    /// Result for one test case, if evaluated
    pub fn result_for(&self, test_case_id: &str) -> Option<&EvalResult> {
        self.evaluations
            .iter()
            .find(|r| r.test_case_id == test_case_id)
    }

    /// Whether the candidate answered `test_case_id` correctly
    pub fn correct_on(&self, test_case_id: &str) -> bool {
        self.result_for(test_case_id)
            .map(|r| r.correct)
            .unwrap_or(false)
    }

    /// Accuracy restricted to the given test case ids, read from the cached
    /// per-test results
    pub fn subsample_score(&self, test_case_ids: &[TestCaseId]) -> f64 {
        if test_case_ids.is_empty() {
            return 0.0;
        }
        let correct = test_case_ids
            .iter()
            .filter(|id| self.correct_on(id))
            .count();
        correct as f64 / test_case_ids.len() as f64
    }
}

/// Run lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}
