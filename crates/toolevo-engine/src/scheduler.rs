//! The optimization run loop
//!
//! A single logical task drives the iteration sequence: select a parent from
//! the Pareto index, mutate it, gate the offspring on a cheap subsample,
//! fully evaluate survivors, archive them and update the per-task fronts.
//! The loop stops on budget exhaustion or cooperative cancellation.

use crate::{
    archive::CandidateArchive,
    config::OptimizerConfig,
    evaluator::{draw_subsample, Evaluator},
    events::{CandidateStatus, EventSink, ProgressEvent},
    mutation::ReflectiveMutator,
    pareto::ParetoIndex,
    Candidate, CandidateId, OptimizerError, OptimizerResult, RunStatus, TestCase, TestCaseId, Tool,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use toolevo_gateway::LlmGateway;
use uuid::Uuid;

/// Score slack below the parent that still counts as a tie
const ACCEPT_EPSILON: f64 = 1e-3;

/// Cooperative cancellation flag shared with the caller.
///
/// Checked at iteration boundaries and between the subsample and full
/// evaluations; in-flight gateway calls are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// End-of-run digest computed from the archive
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub iterations: u32,
    pub archive_size: usize,
    pub budget_consumed: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub baseline_accuracy: f64,
    pub baseline_avg_length: f64,
    /// Archived candidate with the highest global score
    pub best_candidate_id: Option<CandidateId>,
    pub best_accuracy: f64,
    pub best_avg_length: f64,
}

/// Everything a finished run hands back to the caller
#[derive(Debug)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub archive: CandidateArchive,
}

/// Genetic-Pareto optimizer over tool descriptions
pub struct Optimizer {
    gateway: Arc<dyn LlmGateway>,
    config: OptimizerConfig,
    cancel: CancelHandle,
}

impl Optimizer {
    /// Create an optimizer; fails fast on invalid configuration.
    pub fn new(gateway: Arc<dyn LlmGateway>, config: OptimizerConfig) -> OptimizerResult<Self> {
        config.validate()?;
        Ok(Self {
            gateway,
            config,
            cancel: CancelHandle::new(),
        })
    }

    /// Handle for stopping the run from another task
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Run the optimization until the budget is exhausted or the run is
    /// cancelled. Returns the archive and a summary; internal failures mark
    /// the run failed but still return what was archived.
    pub async fn run(
        &self,
        tools: Vec<Tool>,
        test_cases: Vec<TestCase>,
        sink: &dyn EventSink,
    ) -> OptimizerResult<RunOutcome> {
        validate_inputs(&tools, &test_cases)?;

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        // run ids route through the run PRNG so seeded runs replay verbatim
        let run_id = Uuid::from_u128(rng.gen()).to_string();

        let gate = Arc::new(Semaphore::new(self.config.max_concurrent_evaluations));
        let evaluator = Evaluator::new(
            self.gateway.clone(),
            gate.clone(),
            self.config.evaluation_model.clone(),
        );
        let mutator = ReflectiveMutator::new(
            self.gateway.clone(),
            gate,
            self.config.generation_model.clone(),
        );

        let mut archive = CandidateArchive::new();
        let mut pareto = ParetoIndex::new(&test_cases);
        let mut budget_consumed = 0usize;
        let mut accepted = 0usize;
        let mut rejected = 0usize;
        let mut iteration = 0u32;
        let mut next_candidate = 0usize;
        let mut status = RunStatus::Completed;

        tracing::info!(
            run_id = %run_id,
            tools = tools.len(),
            test_cases = test_cases.len(),
            budget = self.config.max_evaluations,
            "optimization run started"
        );
        sink.emit(ProgressEvent::OptimizationStart {
            run_id: run_id.clone(),
        });

        // Baseline: the caller-supplied descriptions, fully evaluated.
        let baseline_id = allocate_id(&mut next_candidate);
        let baseline = Candidate {
            id: baseline_id.clone(),
            tools,
        };
        let baseline_eval = evaluator.evaluate(&baseline, &test_cases, sink).await;
        budget_consumed += test_cases.len();
        archive.add(baseline_eval, None);
        accepted += 1;

        let loop_result: OptimizerResult<()> = async {
            let baseline_entry = archive
                .get(&baseline_id)
                .ok_or_else(|| OptimizerError::internal("baseline missing from archive"))?;
            pareto.update(baseline_entry, &archive);
            sink.emit(candidate_done_event(
                baseline_entry,
                0,
                pareto.dominance_count(&baseline_id) > 0,
                CandidateStatus::Accepted,
                None,
                None,
            ));
            sink.emit(ProgressEvent::ArchiveUpdate {
                archive_size: archive.size(),
                budget_consumed,
                accepted,
                rejected,
            });

            while budget_consumed < self.config.max_evaluations && !self.cancel.is_cancelled() {
                iteration += 1;
                sink.emit(ProgressEvent::IterationStart {
                    iteration,
                    budget_consumed,
                });

                let Some(parent_id) = pareto.select_parent(&archive, &self.config, &mut rng)?
                else {
                    break;
                };
                let global_score = archive
                    .global_score(&parent_id, self.config.accuracy_weight)
                    .unwrap_or(0.0);
                sink.emit(ProgressEvent::ParentSelected {
                    candidate_id: parent_id.clone(),
                    iteration,
                    global_score,
                });

                let parent = archive
                    .get(&parent_id)
                    .cloned()
                    .ok_or_else(|| OptimizerError::internal("selected parent missing"))?;

                sink.emit(ProgressEvent::MutationStart {
                    candidate_id: parent_id.clone(),
                });
                let offspring_id = allocate_id(&mut next_candidate);
                let offspring = mutator
                    .mutate(&parent, &test_cases, offspring_id.clone(), sink, &mut rng)
                    .await;

                let subsample =
                    draw_subsample(&test_cases, self.config.subsample_size, &mut rng);
                let subsample_ids: Vec<TestCaseId> =
                    subsample.iter().map(|tc| tc.id.clone()).collect();
                let subsample_eval = evaluator.evaluate(&offspring, &subsample, sink).await;
                budget_consumed += subsample.len();

                let offspring_score = subsample_eval.accuracy;
                let parent_score = parent.subsample_score(&subsample_ids);
                sink.emit(ProgressEvent::SubsampleEval {
                    candidate_id: offspring_id.clone(),
                    iteration,
                    offspring_score,
                    parent_score,
                    subsample_size: subsample.len(),
                });

                let rejection = if offspring_score < parent_score - ACCEPT_EPSILON {
                    Some(format!(
                        "subsample score {offspring_score:.3} fell below parent score {parent_score:.3}"
                    ))
                } else if offspring_score < self.config.min_accuracy {
                    Some(format!(
                        "subsample score {offspring_score:.3} is under the minimum accuracy floor {:.3}",
                        self.config.min_accuracy
                    ))
                } else {
                    None
                };

                if let Some(reason) = rejection {
                    rejected += 1;
                    tracing::debug!(
                        offspring = %offspring_id,
                        parent = %parent_id,
                        reason = %reason,
                        "offspring rejected at subsample gate"
                    );
                    sink.emit(ProgressEvent::CandidateDone {
                        candidate_id: offspring_id.clone(),
                        iteration,
                        tool_descriptions: offspring.descriptions(),
                        accuracy: offspring_score,
                        avg_length: offspring.avg_description_length(),
                        is_pareto: false,
                        status: CandidateStatus::Rejected,
                        rejection_reason: Some(reason.clone()),
                        parent_id: Some(parent_id.clone()),
                    });
                    sink.emit(ProgressEvent::OffspringRejected {
                        candidate_id: offspring_id.clone(),
                        reason,
                        iteration,
                    });
                } else {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    let full_eval = evaluator.evaluate(&offspring, &test_cases, sink).await;
                    budget_consumed += test_cases.len();
                    archive.add(full_eval, Some(parent_id.clone()));
                    accepted += 1;

                    let entry = archive
                        .get(&offspring_id)
                        .ok_or_else(|| OptimizerError::internal("offspring missing from archive"))?;
                    pareto.update(entry, &archive);
                    let is_pareto = pareto.dominance_count(&offspring_id) > 0;

                    sink.emit(candidate_done_event(
                        entry,
                        iteration,
                        is_pareto,
                        CandidateStatus::Accepted,
                        None,
                        Some(parent_id.clone()),
                    ));
                    sink.emit(ProgressEvent::OffspringAccepted {
                        candidate_id: offspring_id.clone(),
                        accuracy: entry.accuracy,
                        avg_length: entry.avg_description_length,
                        archive_index: archive.size(),
                        parent_id: parent_id.clone(),
                        iteration,
                    });
                }

                sink.emit(ProgressEvent::ArchiveUpdate {
                    archive_size: archive.size(),
                    budget_consumed,
                    accepted,
                    rejected,
                });
                sink.emit(ProgressEvent::IterationDone {
                    iteration,
                    budget_consumed,
                    archive_size: archive.size(),
                });
            }
            Ok(())
        }
        .await;

        if let Err(e) = loop_result {
            tracing::error!(run_id = %run_id, error = %e, "optimization run failed");
            sink.emit(ProgressEvent::Error {
                message: e.to_string(),
            });
            status = RunStatus::Failed;
        }

        sink.emit(ProgressEvent::OptimizationComplete {
            run_id: run_id.clone(),
            archive_size: archive.size(),
            budget_consumed,
            accepted,
            rejected,
        });
        tracing::info!(
            run_id = %run_id,
            archive_size = archive.size(),
            budget_consumed,
            accepted,
            rejected,
            ?status,
            "optimization run finished"
        );

        let summary = summarize(
            &archive,
            &self.config,
            run_id,
            status,
            iteration,
            budget_consumed,
            accepted,
            rejected,
            &baseline_id,
        );
        Ok(RunOutcome { summary, archive })
    }
}

fn allocate_id(next: &mut usize) -> CandidateId {
    let id = format!("cand_{next}");
    *next += 1;
    id
}

fn validate_inputs(tools: &[Tool], test_cases: &[TestCase]) -> OptimizerResult<()> {
    if test_cases.is_empty() {
        return Err(OptimizerError::config("test case set must not be empty"));
    }
    if tools.is_empty() {
        return Err(OptimizerError::config("tool inventory must not be empty"));
    }

    let mut names = HashSet::new();
    for tool in tools {
        if !names.insert(tool.name.as_str()) {
            return Err(OptimizerError::config(format!(
                "duplicate tool name: {}",
                tool.name
            )));
        }
    }
    for tc in test_cases {
        if !names.contains(tc.expected_tool_name.as_str()) {
            return Err(OptimizerError::config(format!(
                "test case {} expects unknown tool {}",
                tc.id, tc.expected_tool_name
            )));
        }
    }
    Ok(())
}

fn candidate_done_event(
    entry: &crate::EvaluatedCandidate,
    iteration: u32,
    is_pareto: bool,
    status: CandidateStatus,
    rejection_reason: Option<String>,
    parent_id: Option<CandidateId>,
) -> ProgressEvent {
    ProgressEvent::CandidateDone {
        candidate_id: entry.id().clone(),
        iteration,
        tool_descriptions: entry.candidate.descriptions(),
        accuracy: entry.accuracy,
        avg_length: entry.avg_description_length,
        is_pareto,
        status,
        rejection_reason,
        parent_id,
    }
}

#[allow(clippy::too_many_arguments)]
fn summarize(
    archive: &CandidateArchive,
    config: &OptimizerConfig,
    run_id: String,
    status: RunStatus,
    iterations: u32,
    budget_consumed: usize,
    accepted: usize,
    rejected: usize,
    baseline_id: &str,
) -> RunSummary {
    let best_candidate_id = archive
        .ids()
        .iter()
        .max_by(|a, b| {
            let score_a = archive.global_score(a, config.accuracy_weight).unwrap_or(0.0);
            let score_b = archive.global_score(b, config.accuracy_weight).unwrap_or(0.0);
            score_a
                .partial_cmp(&score_b)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .cloned();

    let best = best_candidate_id.as_ref().and_then(|id| archive.get(id));
    let baseline = archive.get(baseline_id);

    RunSummary {
        run_id,
        status,
        iterations,
        archive_size: archive.size(),
        budget_consumed,
        accepted,
        rejected,
        baseline_accuracy: baseline.map(|b| b.accuracy).unwrap_or(0.0),
        baseline_avg_length: baseline.map(|b| b.avg_description_length).unwrap_or(0.0),
        best_candidate_id,
        best_accuracy: best.map(|b| b.accuracy).unwrap_or(0.0),
        best_avg_length: best.map(|b| b.avg_description_length).unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::testing::{ScriptedGateway, SelectionBehavior};

    fn tools() -> Vec<Tool> {
        vec![
            Tool {
                id: "weather".to_string(),
                name: "weather".to_string(),
                description: "x".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
                server_id: None,
            },
            Tool {
                id: "math".to_string(),
                name: "math".to_string(),
                description: "y".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
                server_id: None,
            },
        ]
    }

    fn test_cases() -> Vec<TestCase> {
        vec![
            TestCase {
                id: "t1".to_string(),
                query: "what is the temperature in Paris".to_string(),
                expected_tool_name: "weather".to_string(),
            },
            TestCase {
                id: "t2".to_string(),
                query: "compute 2+2".to_string(),
                expected_tool_name: "math".to_string(),
            },
        ]
    }

    fn keyword_gateway() -> Arc<ScriptedGateway> {
        Arc::new(ScriptedGateway::new(SelectionBehavior::KeywordMap(vec![
            ("temperature".to_string(), "weather".to_string()),
            ("compute".to_string(), "math".to_string()),
        ])))
    }

    #[tokio::test]
    async fn test_empty_test_set_is_config_error_with_no_events() {
        let optimizer =
            Optimizer::new(keyword_gateway(), OptimizerConfig::default()).unwrap();
        let sink = MemorySink::new();

        let result = optimizer.run(tools(), vec![], &sink).await;
        assert!(matches!(result, Err(OptimizerError::Config { .. })));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_expected_tool_is_config_error() {
        let optimizer =
            Optimizer::new(keyword_gateway(), OptimizerConfig::default()).unwrap();
        let sink = MemorySink::new();

        let mut cases = test_cases();
        cases[0].expected_tool_name = "ghost".to_string();
        let result = optimizer.run(tools(), cases, &sink).await;
        assert!(matches!(result, Err(OptimizerError::Config { .. })));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_tool_names_rejected() {
        let optimizer =
            Optimizer::new(keyword_gateway(), OptimizerConfig::default()).unwrap();
        let sink = MemorySink::new();

        let mut duplicated = tools();
        duplicated[1].name = "weather".to_string();
        let result = optimizer.run(duplicated, test_cases(), &sink).await;
        assert!(matches!(result, Err(OptimizerError::Config { .. })));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_at_construction() {
        let config = OptimizerConfig {
            max_evaluations: 0,
            ..Default::default()
        };
        assert!(Optimizer::new(keyword_gateway(), config).is_err());
    }

    #[tokio::test]
    async fn test_budget_smaller_than_test_set_stops_after_baseline() {
        let config = OptimizerConfig {
            max_evaluations: 1,
            seed: Some(1),
            ..Default::default()
        };
        let optimizer = Optimizer::new(keyword_gateway(), config).unwrap();
        let sink = MemorySink::new();

        let outcome = optimizer.run(tools(), test_cases(), &sink).await.unwrap();
        assert_eq!(outcome.archive.size(), 1);
        assert_eq!(outcome.summary.iterations, 0);
        assert_eq!(outcome.summary.budget_consumed, 2);
        assert_eq!(outcome.summary.status, RunStatus::Completed);
        assert!(sink.named("iteration_start").is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_first_iteration_keeps_baseline_only() {
        let config = OptimizerConfig {
            seed: Some(1),
            ..Default::default()
        };
        let optimizer = Optimizer::new(keyword_gateway(), config).unwrap();
        optimizer.cancel_handle().cancel();
        let sink = MemorySink::new();

        let outcome = optimizer.run(tools(), test_cases(), &sink).await.unwrap();
        assert_eq!(outcome.archive.size(), 1);
        assert_eq!(outcome.summary.status, RunStatus::Completed);
        assert_eq!(sink.named("optimization_complete").len(), 1);
    }

    #[tokio::test]
    async fn test_baseline_events_precede_iterations() {
        let config = OptimizerConfig {
            max_evaluations: 6,
            subsample_size: 2,
            seed: Some(3),
            ..Default::default()
        };
        let optimizer = Optimizer::new(keyword_gateway(), config).unwrap();
        let sink = MemorySink::new();
        optimizer.run(tools(), test_cases(), &sink).await.unwrap();

        let events = sink.events();
        let first_iteration = events
            .iter()
            .position(|e| e.name() == "iteration_start")
            .expect("at least one iteration");
        let baseline_done = events
            .iter()
            .position(|e| e.name() == "candidate_done")
            .expect("baseline candidate_done");
        assert!(events[0].name() == "optimization_start");
        assert!(baseline_done < first_iteration);
    }

    #[tokio::test]
    async fn test_summary_tracks_best_candidate() {
        let config = OptimizerConfig {
            max_evaluations: 10,
            subsample_size: 2,
            seed: Some(5),
            ..Default::default()
        };
        let optimizer = Optimizer::new(keyword_gateway(), config).unwrap();
        let sink = MemorySink::new();

        let outcome = optimizer.run(tools(), test_cases(), &sink).await.unwrap();
        assert!(outcome.summary.best_candidate_id.is_some());
        assert_eq!(outcome.summary.baseline_accuracy, 1.0);
        assert!(outcome.summary.best_accuracy >= 0.0);
        assert_eq!(
            outcome.summary.archive_size,
            outcome.summary.accepted
        );
    }
}
