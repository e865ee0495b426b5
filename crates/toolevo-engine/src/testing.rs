//! Deterministic gateway stubs for tests
//!
//! The engine's behavior under test must be reproducible, so these stand-ins
//! are pure functions of their inputs plus an explicit script; no randomness
//! and no network.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use toolevo_gateway::{LlmGateway, ProviderError, ProviderResult, ToolFunction, ToolSelection};

/// How the stub picks a tool for a query
#[derive(Debug, Clone)]
pub enum SelectionBehavior {
    /// First `(keyword, tool)` rule whose keyword appears in the query wins;
    /// no rule matches → no tool call
    KeywordMap(Vec<(String, String)>),
    /// Pick the tool whose description shares the most whitespace-separated
    /// words with the query (ties to the first tool); zero overlap → no tool
    /// call
    DescriptionOverlap,
    /// Always reply with plain text, never a tool call
    NoSelection,
    /// Every selection call fails with a transport error
    Fail,
}

/// How the stub answers text completions
#[derive(Debug, Clone)]
pub enum CompletionBehavior {
    /// Pop queued replies in order, falling back to the default reply
    Queued,
    /// First `(needle, reply)` rule whose needle appears in the prompt wins,
    /// falling back to the default reply
    RuleBased(Vec<(String, String)>),
    /// Every completion call fails with a transport error
    Fail,
}

/// Scripted in-memory gateway
pub struct ScriptedGateway {
    selection: SelectionBehavior,
    completion: CompletionBehavior,
    queued: Mutex<VecDeque<String>>,
    default_completion: String,
    selection_calls: AtomicUsize,
    completion_calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new(selection: SelectionBehavior) -> Self {
        Self {
            selection,
            completion: CompletionBehavior::Queued,
            queued: Mutex::new(VecDeque::new()),
            default_completion: "ok".to_string(),
            selection_calls: AtomicUsize::new(0),
            completion_calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn with_completion(mut self, completion: CompletionBehavior) -> Self {
        self.completion = completion;
        self
    }

    pub fn with_queued_completions(self, replies: Vec<String>) -> Self {
        *self.queued.lock() = replies.into();
        self
    }

    pub fn with_default_completion(mut self, reply: impl Into<String>) -> Self {
        self.default_completion = reply.into();
        self
    }

    /// Number of tool-selection calls observed
    pub fn selection_calls(&self) -> usize {
        self.selection_calls.load(Ordering::Relaxed)
    }

    /// Number of text-completion calls observed
    pub fn completion_calls(&self) -> usize {
        self.completion_calls.load(Ordering::Relaxed)
    }

    /// Peak number of calls that were in flight simultaneously
    pub fn max_in_flight(&self) -> usize {
        self.max_active.load(Ordering::Relaxed)
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn select(&self, query: &str, tools: &[ToolFunction]) -> ProviderResult<ToolSelection> {
        match &self.selection {
            SelectionBehavior::KeywordMap(rules) => {
                for (keyword, tool) in rules {
                    if query.contains(keyword.as_str()) {
                        return Ok(ToolSelection {
                            tool_name: Some(tool.clone()),
                            arguments: None,
                        });
                    }
                }
                Ok(ToolSelection::none())
            }
            SelectionBehavior::DescriptionOverlap => {
                let query_words: Vec<String> = query
                    .to_lowercase()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();

                let mut best: Option<(usize, &ToolFunction)> = None;
                for tool in tools {
                    let description = tool.description.to_lowercase();
                    let words: Vec<&str> = description.split_whitespace().collect();
                    let overlap = query_words.iter().filter(|w| words.contains(&w.as_str())).count();
                    let better = match best {
                        Some((best_overlap, _)) => overlap > best_overlap,
                        None => true,
                    };
                    if better {
                        best = Some((overlap, tool));
                    }
                }

                match best {
                    Some((overlap, tool)) if overlap > 0 => Ok(ToolSelection {
                        tool_name: Some(tool.name.clone()),
                        arguments: None,
                    }),
                    _ => Ok(ToolSelection::none()),
                }
            }
            SelectionBehavior::NoSelection => Ok(ToolSelection::none()),
            SelectionBehavior::Fail => Err(ProviderError::Transport(
                "scripted selection failure".to_string(),
            )),
        }
    }

    fn complete(&self, prompt: &str) -> ProviderResult<String> {
        match &self.completion {
            CompletionBehavior::Queued => Ok(self
                .queued
                .lock()
                .pop_front()
                .unwrap_or_else(|| self.default_completion.clone())),
            CompletionBehavior::RuleBased(rules) => {
                for (needle, reply) in rules {
                    if prompt.contains(needle.as_str()) {
                        return Ok(reply.clone());
                    }
                }
                Ok(self.default_completion.clone())
            }
            CompletionBehavior::Fail => Err(ProviderError::Transport(
                "scripted completion failure".to_string(),
            )),
        }
    }
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    async fn tool_selection(
        &self,
        _model: &str,
        query: &str,
        tools: &[ToolFunction],
    ) -> ProviderResult<ToolSelection> {
        self.selection_calls.fetch_add(1, Ordering::Relaxed);
        self.enter();
        // give other gated calls a chance to start so tests can observe
        // real interleaving
        tokio::task::yield_now().await;
        let result = self.select(query, tools);
        self.exit();
        result
    }

    async fn text_completion(
        &self,
        _model: &str,
        prompt: &str,
        _max_output_tokens: u32,
    ) -> ProviderResult<String> {
        self.completion_calls.fetch_add(1, Ordering::Relaxed);
        self.enter();
        tokio::task::yield_now().await;
        let result = self.complete(prompt);
        self.exit();
        result
    }
}
