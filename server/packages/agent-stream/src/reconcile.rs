use serde_json::Value;

use crate::classify::{ChunkKind, ClassifiedEvent, StreamStage};
use crate::extract;
use crate::frames::RunMetadata;

/// Accumulated reconciliation inputs for one run.
///
/// Owned exclusively by the multiplexer task while the run is live, then
/// read once at finalize time. The candidate sources are kept separate so
/// the priority order stays explicit instead of being threaded through a
/// long conditional chain.
#[derive(Debug, Default)]
pub struct RunState {
    /// Text from the most recent assistant event with non-empty extraction.
    assistant_text: Option<String>,
    /// `result` field of the terminal result event, if non-empty.
    result_text: Option<String>,
    /// Every plain-text line observed, in order. Used only when no primary
    /// content was ever produced; the agent may die before emitting a
    /// structured result.
    fallback_lines: Vec<String>,
    metadata: Option<RunMetadata>,
}

/// Final answer and statistics decided once a run ends.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledAnswer {
    pub content: String,
    pub metadata: Option<RunMetadata>,
    pub token_count: Option<u64>,
    pub duration_ms: u64,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one classified event into the run state.
    pub fn observe(&mut self, event: &ClassifiedEvent) {
        match event.stage {
            StreamStage::Expandable => {
                if event.kind == ChunkKind::InitText {
                    self.fallback_lines.push(event.raw.clone());
                }
            }
            StreamStage::Primary => match (event.kind, event.payload.as_ref()) {
                (ChunkKind::Assistant, Some(payload)) => {
                    let text = extract::assistant_text(payload);
                    if !text.is_empty() {
                        self.assistant_text = Some(text);
                    }
                }
                (ChunkKind::Result, Some(payload)) => {
                    if let Some(text) = payload.get("result").and_then(Value::as_str) {
                        if !text.is_empty() {
                            self.result_text = Some(text.to_string());
                        }
                    }
                    self.metadata = Some(extract::run_metadata(payload));
                }
                _ => {}
            },
        }
    }

    pub fn has_primary_content(&self) -> bool {
        self.assistant_text.is_some() || self.result_text.is_some()
    }

    /// Pick the final answer: last assistant text, else the result field,
    /// else the collected plain text, else empty. `wall_ms` is the measured
    /// run duration, used when no result metadata was observed.
    pub fn reconcile(&self, wall_ms: u64) -> ReconciledAnswer {
        let content = self
            .assistant_text
            .clone()
            .or_else(|| self.result_text.clone())
            .unwrap_or_else(|| self.fallback_lines.join("\n"));

        let token_count = self.metadata.as_ref().and_then(|m| m.token_count);
        let duration_ms = self
            .metadata
            .as_ref()
            .and_then(|m| m.duration_ms)
            .unwrap_or(wall_ms);

        ReconciledAnswer {
            content,
            metadata: self.metadata.clone(),
            token_count,
            duration_ms,
        }
    }
}
