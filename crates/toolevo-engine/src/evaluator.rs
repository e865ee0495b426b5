//! Candidate evaluation against the test set
//!
//! One gateway call per test case, fanned out concurrently under the shared
//! semaphore. Gateway failures are contained: a failed or tool-less reply is
//! recorded as an incorrect selection, never an error.

use crate::{
    events::{EvaluationOutcome, EventSink, ProgressEvent},
    Candidate, EvalResult, EvaluatedCandidate, TestCase,
};
use futures::future::join_all;
use rand::rngs::StdRng;
use std::sync::Arc;
use tokio::sync::Semaphore;
use toolevo_gateway::{LlmGateway, ToolFunction};
use tracing::warn;

/// Draw a uniform subsample of size `min(subsample_size, |test_cases|)`
/// without replacement, through the run-bound PRNG.
pub fn draw_subsample(
    test_cases: &[TestCase],
    subsample_size: usize,
    rng: &mut StdRng,
) -> Vec<TestCase> {
    let amount = subsample_size.min(test_cases.len());
    rand::seq::index::sample(rng, test_cases.len(), amount)
        .iter()
        .map(|i| test_cases[i].clone())
        .collect()
}

/// Runs candidates against test cases through the gateway
pub struct Evaluator {
    gateway: Arc<dyn LlmGateway>,
    gate: Arc<Semaphore>,
    model: String,
}

impl Evaluator {
    pub fn new(gateway: Arc<dyn LlmGateway>, gate: Arc<Semaphore>, model: impl Into<String>) -> Self {
        Self {
            gateway,
            gate,
            model: model.into(),
        }
    }

    /// Evaluate `candidate` on every test case in `test_cases`, emitting one
    /// `evaluation` event per case. Event order across cases is not
    /// guaranteed; the returned results follow the input order.
    pub async fn evaluate(
        &self,
        candidate: &Candidate,
        test_cases: &[TestCase],
        sink: &dyn EventSink,
    ) -> EvaluatedCandidate {
        let tools: Vec<ToolFunction> = candidate
            .tools
            .iter()
            .map(|t| ToolFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            })
            .collect();

        let evaluations = join_all(
            test_cases
                .iter()
                .map(|tc| self.evaluate_one(candidate, tc, &tools, sink)),
        )
        .await;

        let correct = evaluations.iter().filter(|r| r.correct).count();
        let accuracy = if evaluations.is_empty() {
            0.0
        } else {
            correct as f64 / evaluations.len() as f64
        };

        EvaluatedCandidate {
            accuracy,
            avg_description_length: candidate.avg_description_length(),
            candidate: candidate.clone(),
            evaluations,
        }
    }

    async fn evaluate_one(
        &self,
        candidate: &Candidate,
        test_case: &TestCase,
        tools: &[ToolFunction],
        sink: &dyn EventSink,
    ) -> EvalResult {
        let selected = match self.gate.acquire().await {
            Ok(_permit) => match self
                .gateway
                .tool_selection(&self.model, &test_case.query, tools)
                .await
            {
                Ok(selection) => selection.tool_name,
                Err(e) => {
                    warn!(
                        candidate = %candidate.id,
                        test_case = %test_case.id,
                        error = %e,
                        "tool selection failed, recording as incorrect"
                    );
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "evaluation gate closed, recording as incorrect");
                None
            }
        };

        let correct = selected.as_deref() == Some(test_case.expected_tool_name.as_str());
        let result = EvalResult {
            test_case_id: test_case.id.clone(),
            selected,
            expected: test_case.expected_tool_name.clone(),
            correct,
        };

        sink.emit(ProgressEvent::Evaluation {
            candidate_id: candidate.id.clone(),
            test_case: test_case.query.clone(),
            result: EvaluationOutcome {
                correct: result.correct,
                selected: result.selected.clone(),
                expected: result.expected.clone(),
            },
        });

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::testing::{ScriptedGateway, SelectionBehavior};
    use crate::Tool;
    use rand::SeedableRng;

    fn candidate() -> Candidate {
        Candidate {
            id: "cand_0".to_string(),
            tools: vec![
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
            ],
        }
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
    async fn test_full_evaluation_accuracy() {
        let gateway = keyword_gateway();
        let gate = Arc::new(Semaphore::new(3));
        let evaluator = Evaluator::new(gateway.clone(), gate, "model");
        let sink = MemorySink::new();

        let evaluated = evaluator.evaluate(&candidate(), &test_cases(), &sink).await;

        assert_eq!(evaluated.accuracy, 1.0);
        assert_eq!(evaluated.evaluations.len(), 2);
        assert_eq!(evaluated.avg_description_length, 1.0);
        assert_eq!(gateway.selection_calls(), 2);
        // one evaluation event per test case
        assert_eq!(sink.named("evaluation").len(), 2);
    }

    #[tokio::test]
    async fn test_results_follow_input_order() {
        let gateway = keyword_gateway();
        let evaluator = Evaluator::new(gateway, Arc::new(Semaphore::new(1)), "model");
        let sink = MemorySink::new();

        let evaluated = evaluator.evaluate(&candidate(), &test_cases(), &sink).await;
        let ids: Vec<_> = evaluated
            .evaluations
            .iter()
            .map(|r| r.test_case_id.as_str())
            .collect();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn test_gateway_failure_degrades_to_incorrect() {
        let gateway = Arc::new(ScriptedGateway::new(SelectionBehavior::Fail));
        let evaluator = Evaluator::new(gateway, Arc::new(Semaphore::new(3)), "model");
        let sink = MemorySink::new();

        let evaluated = evaluator.evaluate(&candidate(), &test_cases(), &sink).await;
        assert_eq!(evaluated.accuracy, 0.0);
        assert!(evaluated.evaluations.iter().all(|r| r.selected.is_none()));
        assert!(evaluated.evaluations.iter().all(|r| !r.correct));
    }

    #[tokio::test]
    async fn test_no_selection_is_incorrect() {
        let gateway = Arc::new(ScriptedGateway::new(SelectionBehavior::NoSelection));
        let evaluator = Evaluator::new(gateway, Arc::new(Semaphore::new(3)), "model");
        let sink = MemorySink::new();

        let evaluated = evaluator.evaluate(&candidate(), &test_cases(), &sink).await;
        assert_eq!(evaluated.accuracy, 0.0);
    }

    #[tokio::test]
    async fn test_concurrency_respects_gate() {
        let gateway = keyword_gateway();
        let gate = Arc::new(Semaphore::new(2));
        let evaluator = Evaluator::new(gateway.clone(), gate, "model");
        let sink = MemorySink::new();

        let many: Vec<TestCase> = (0..12)
            .map(|i| TestCase {
                id: format!("t{i}"),
                query: "compute something".to_string(),
                expected_tool_name: "math".to_string(),
            })
            .collect();

        evaluator.evaluate(&candidate(), &many, &sink).await;
        assert!(gateway.max_in_flight() <= 2);
    }

    #[test]
    fn test_draw_subsample_without_replacement() {
        let cases = test_cases();
        let mut rng = StdRng::seed_from_u64(42);

        let sample = draw_subsample(&cases, 1, &mut rng);
        assert_eq!(sample.len(), 1);

        // requested size larger than the set collapses to the full set
        let all = draw_subsample(&cases, 10, &mut rng);
        assert_eq!(all.len(), 2);
        let mut ids: Vec<_> = all.iter().map(|tc| tc.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    #[test]
    fn test_draw_subsample_is_seeded() {
        let cases: Vec<TestCase> = (0..20)
            .map(|i| TestCase {
                id: format!("t{i}"),
                query: format!("q{i}"),
                expected_tool_name: "tool".to_string(),
            })
            .collect();

        let mut rng_a = StdRng::seed_from_u64(7);
        let mut rng_b = StdRng::seed_from_u64(7);
        let a: Vec<_> = draw_subsample(&cases, 5, &mut rng_a)
            .iter()
            .map(|tc| tc.id.clone())
            .collect();
        let b: Vec<_> = draw_subsample(&cases, 5, &mut rng_b)
            .iter()
            .map(|tc| tc.id.clone())
            .collect();
        assert_eq!(a, b);
    }
}
