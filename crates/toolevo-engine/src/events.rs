//! Progress event contract
//!
//! Event names and payload keys are a wire contract shared with the UI and
//! the replay log; the caller serializes events for transport and storage.

use crate::CandidateId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-test-case outcome carried by [`ProgressEvent::Evaluation`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub correct: bool,
    pub selected: Option<String>,
    pub expected: String,
}

/// The failure a reflective mutation is reacting to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionFailure {
    pub query: String,
    pub expected: String,
    pub selected: Option<String>,
}

/// Terminal status of a candidate within one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    Accepted,
    Rejected,
}

/// Progress events emitted by the scheduler, evaluator and mutator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    OptimizationStart {
        run_id: String,
    },
    IterationStart {
        iteration: u32,
        budget_consumed: usize,
    },
    ParentSelected {
        candidate_id: CandidateId,
        iteration: u32,
        global_score: f64,
    },
    MutationStart {
        candidate_id: CandidateId,
    },
    ReflectionStart {
        candidate_id: CandidateId,
        tool: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        failure: Option<ReflectionFailure>,
    },
    ReflectionDone {
        candidate_id: CandidateId,
        tool: String,
        old_desc: String,
        new_desc: String,
    },
    Evaluation {
        candidate_id: CandidateId,
        test_case: String,
        result: EvaluationOutcome,
    },
    SubsampleEval {
        candidate_id: CandidateId,
        iteration: u32,
        offspring_score: f64,
        parent_score: f64,
        subsample_size: usize,
    },
    CandidateDone {
        candidate_id: CandidateId,
        iteration: u32,
        tool_descriptions: BTreeMap<String, String>,
        accuracy: f64,
        avg_length: f64,
        is_pareto: bool,
        status: CandidateStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        rejection_reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_id: Option<CandidateId>,
    },
    OffspringAccepted {
        candidate_id: CandidateId,
        accuracy: f64,
        avg_length: f64,
        archive_index: usize,
        parent_id: CandidateId,
        iteration: u32,
    },
    OffspringRejected {
        candidate_id: CandidateId,
        reason: String,
        iteration: u32,
    },
    ArchiveUpdate {
        archive_size: usize,
        budget_consumed: usize,
        accepted: usize,
        rejected: usize,
    },
    IterationDone {
        iteration: u32,
        budget_consumed: usize,
        archive_size: usize,
    },
    OptimizationComplete {
        run_id: String,
        archive_size: usize,
        budget_consumed: usize,
        accepted: usize,
        rejected: usize,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    /// Contract name of this event (the serde tag)
    pub fn name(&self) -> &'static str {
        match self {
            Self::OptimizationStart { .. } => "optimization_start",
            Self::IterationStart { .. } => "iteration_start",
            Self::ParentSelected { .. } => "parent_selected",
            Self::MutationStart { .. } => "mutation_start",
            Self::ReflectionStart { .. } => "reflection_start",
            Self::ReflectionDone { .. } => "reflection_done",
            Self::Evaluation { .. } => "evaluation",
            Self::SubsampleEval { .. } => "subsample_eval",
            Self::CandidateDone { .. } => "candidate_done",
            Self::OffspringAccepted { .. } => "offspring_accepted",
            Self::OffspringRejected { .. } => "offspring_rejected",
            Self::ArchiveUpdate { .. } => "archive_update",
            Self::IterationDone { .. } => "iteration_done",
            Self::OptimizationComplete { .. } => "optimization_complete",
            Self::Error { .. } => "error",
        }
    }
}

/// Synchronous event sink capability.
///
/// The transport (HTTP streaming, file, in-memory queue) is the caller's
/// concern; `emit` must not block on I/O.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Sink that discards everything
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Sink that records events in memory, for replay folding and tests
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far, in emission order
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Events matching the given contract name
    pub fn named(&self, name: &str) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.name() == name)
            .cloned()
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tag_names_match_contract() {
        let event = ProgressEvent::OptimizationStart {
            run_id: "run-1".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "optimization_start");
        assert_eq!(json["run_id"], "run-1");
        assert_eq!(event.name(), "optimization_start");
    }

    #[test]
    fn test_candidate_done_serialization() {
        let mut descriptions = BTreeMap::new();
        descriptions.insert("weather".to_string(), "Look up weather".to_string());

        let event = ProgressEvent::CandidateDone {
            candidate_id: "cand_1".to_string(),
            iteration: 3,
            tool_descriptions: descriptions,
            accuracy: 0.75,
            avg_length: 14.0,
            is_pareto: true,
            status: CandidateStatus::Accepted,
            rejection_reason: None,
            parent_id: Some("cand_0".to_string()),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "candidate_done");
        assert_eq!(json["status"], "accepted");
        assert_eq!(json["parent_id"], "cand_0");
        // absent optional keys are omitted entirely
        assert!(json.get("rejection_reason").is_none());
    }

    #[test]
    fn test_rejected_event_round_trip() {
        let event = ProgressEvent::OffspringRejected {
            candidate_id: "cand_2".to_string(),
            reason: "subsample score 0.200 below parent score 0.800".to_string(),
            iteration: 1,
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: ProgressEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());

        sink.emit(ProgressEvent::OptimizationStart {
            run_id: "r".to_string(),
        });
        sink.emit(ProgressEvent::IterationStart {
            iteration: 1,
            budget_consumed: 2,
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name(), "optimization_start");
        assert_eq!(events[1].name(), "iteration_start");
        assert_eq!(sink.named("iteration_start").len(), 1);
    }

    #[test]
    fn test_null_sink_discards() {
        let sink = NullSink;
        sink.emit(ProgressEvent::Error {
            message: "ignored".to_string(),
        });
    }
}
