//! Reflective mutation of tool descriptions
//!
//! A mutation rewrites exactly one description. When the parent has failing
//! evaluations the rewrite reacts to one sampled failure; otherwise it
//! shortens one sampled description. Provider failures degrade to a no-op
//! mutation: a fresh candidate id over unchanged descriptions.

use crate::{
    events::{EventSink, ProgressEvent, ReflectionFailure},
    Candidate, CandidateId, EvalResult, EvaluatedCandidate, TestCase, Tool,
};
use rand::rngs::StdRng;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::Semaphore;
use toolevo_gateway::LlmGateway;
use tracing::{debug, warn};

/// Ceiling the failure-directed prompt asks for
const MAX_REWRITE_CHARS: usize = 200;
/// Floor for the conciseness target length
const MIN_SHORTEN_TARGET: usize = 50;
/// Output budget for one reflection call
const REFLECTION_MAX_TOKENS: u32 = 256;

/// LLM-backed mutation operator
pub struct ReflectiveMutator {
    gateway: Arc<dyn LlmGateway>,
    gate: Arc<Semaphore>,
    model: String,
}

impl ReflectiveMutator {
    pub fn new(gateway: Arc<dyn LlmGateway>, gate: Arc<Semaphore>, model: impl Into<String>) -> Self {
        Self {
            gateway,
            gate,
            model: model.into(),
        }
    }

    /// Produce an offspring of `parent` under the id `offspring_id`.
    ///
    /// Always returns a candidate; every failure path degrades to a no-op
    /// mutation that still consumes the mutation slot.
    pub async fn mutate(
        &self,
        parent: &EvaluatedCandidate,
        test_cases: &[TestCase],
        offspring_id: CandidateId,
        sink: &dyn EventSink,
        rng: &mut StdRng,
    ) -> Candidate {
        let failures: Vec<EvalResult> = parent.failures().cloned().collect();
        if failures.is_empty() {
            self.shorten_description(parent, offspring_id, sink, rng)
                .await
        } else {
            let failure = failures[rng.gen_range(0..failures.len())].clone();
            self.fix_failure(parent, test_cases, failure, offspring_id, sink)
                .await
        }
    }

    async fn fix_failure(
        &self,
        parent: &EvaluatedCandidate,
        test_cases: &[TestCase],
        failure: EvalResult,
        offspring_id: CandidateId,
        sink: &dyn EventSink,
    ) -> Candidate {
        let Some(tool) = parent.candidate.tool_named(&failure.expected) else {
            warn!(
                parent = %parent.id(),
                expected = %failure.expected,
                "failure names a tool missing from the inventory"
            );
            return no_op(parent, offspring_id);
        };

        let query = test_cases
            .iter()
            .find(|tc| tc.id == failure.test_case_id)
            .map(|tc| tc.query.clone())
            .unwrap_or_default();

        sink.emit(ProgressEvent::ReflectionStart {
            candidate_id: parent.id().clone(),
            tool: tool.name.clone(),
            failure: Some(ReflectionFailure {
                query: query.clone(),
                expected: failure.expected.clone(),
                selected: failure.selected.clone(),
            }),
        });

        let prompt = failure_prompt(tool, &parent.candidate.tools, &query, &failure);
        self.rewrite(parent, tool.name.clone(), prompt, offspring_id, sink)
            .await
    }

    async fn shorten_description(
        &self,
        parent: &EvaluatedCandidate,
        offspring_id: CandidateId,
        sink: &dyn EventSink,
        rng: &mut StdRng,
    ) -> Candidate {
        let tool = &parent.candidate.tools[rng.gen_range(0..parent.candidate.tools.len())];

        sink.emit(ProgressEvent::ReflectionStart {
            candidate_id: parent.id().clone(),
            tool: tool.name.clone(),
            failure: None,
        });

        let prompt = conciseness_prompt(tool);
        self.rewrite(parent, tool.name.clone(), prompt, offspring_id, sink)
            .await
    }

    async fn rewrite(
        &self,
        parent: &EvaluatedCandidate,
        tool_name: String,
        prompt: String,
        offspring_id: CandidateId,
        sink: &dyn EventSink,
    ) -> Candidate {
        let Ok(_permit) = self.gate.acquire().await else {
            warn!(parent = %parent.id(), "mutation gate closed, no-op mutation");
            return no_op(parent, offspring_id);
        };

        match self
            .gateway
            .text_completion(&self.model, &prompt, REFLECTION_MAX_TOKENS)
            .await
        {
            Ok(reply) => {
                let new_description = reply.trim().to_string();
                let old_description = parent
                    .candidate
                    .tool_named(&tool_name)
                    .map(|t| t.description.clone())
                    .unwrap_or_default();

                debug!(
                    parent = %parent.id(),
                    tool = %tool_name,
                    old_len = old_description.len(),
                    new_len = new_description.len(),
                    "description rewritten"
                );

                sink.emit(ProgressEvent::ReflectionDone {
                    candidate_id: parent.id().clone(),
                    tool: tool_name.clone(),
                    old_desc: old_description,
                    new_desc: new_description.clone(),
                });

                let tools = parent
                    .candidate
                    .tools
                    .iter()
                    .map(|t| {
                        let mut tool = t.clone();
                        if tool.name == tool_name {
                            tool.description = new_description.clone();
                        }
                        tool
                    })
                    .collect();

                Candidate {
                    id: offspring_id,
                    tools,
                }
            }
            Err(e) => {
                warn!(
                    parent = %parent.id(),
                    tool = %tool_name,
                    error = %e,
                    "reflection call failed, no-op mutation"
                );
                no_op(parent, offspring_id)
            }
        }
    }
}

fn no_op(parent: &EvaluatedCandidate, offspring_id: CandidateId) -> Candidate {
    Candidate {
        id: offspring_id,
        tools: parent.candidate.tools.clone(),
    }
}

fn failure_prompt(tool: &Tool, inventory: &[Tool], query: &str, failure: &EvalResult) -> String {
    let others = inventory
        .iter()
        .filter(|t| t.name != tool.name)
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");
    let selected = failure
        .selected
        .as_deref()
        .unwrap_or("no tool (plain-text reply)");

    format!(
        r#"You are improving the descriptions of callable tools so that an AI assistant picks the right one.

TOOL TO REWRITE:
- name: {name}
- current description: {description}

OTHER TOOLS:
{others}

FAILING QUERY: "{query}"
The assistant should have selected `{expected}` but selected {selected}.

Rewrite ONLY the description of `{name}` so that queries like this one clearly
map to it rather than to the other tools. Keep it under {limit} characters.
Respond with the new description as plain text, nothing else."#,
        name = tool.name,
        description = tool.description,
        others = others,
        query = query,
        expected = failure.expected,
        selected = selected,
        limit = MAX_REWRITE_CHARS,
    )
}

fn conciseness_prompt(tool: &Tool) -> String {
    let current_length = tool.description.len();
    let target = MIN_SHORTEN_TARGET.max((current_length as f64 * 0.75).floor() as usize);

    format!(
        r#"You are tightening the descriptions of callable tools.

TOOL:
- name: {name}
- current description ({current_length} characters): {description}

Shorten the description while preserving its meaning. Aim for at most {target}
characters. Respond with the new description as plain text, nothing else."#,
        name = tool.name,
        current_length = current_length,
        description = tool.description,
        target = target,
    )
}
