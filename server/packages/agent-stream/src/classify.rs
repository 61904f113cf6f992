use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extract;

/// Classified event kinds, in the order a healthy run tends to produce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Plain-text initialization output (banner, agent sync, ...).
    InitText,
    /// Structured system event (`init` or any other non-hook subtype).
    SystemInit,
    /// Structured hook lifecycle event.
    SystemHook,
    /// Token-level delta, or any structured event we do not recognize.
    StreamToken,
    /// Complete assistant message.
    Assistant,
    /// Terminal result event carrying the answer and run statistics.
    Result,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InitText => "init_text",
            Self::SystemInit => "system_init",
            Self::SystemHook => "system_hook",
            Self::StreamToken => "stream_token",
            Self::Assistant => "assistant",
            Self::Result => "result",
        }
    }

    pub fn stage(self) -> StreamStage {
        match self {
            Self::InitText | Self::SystemInit | Self::SystemHook | Self::StreamToken => {
                StreamStage::Expandable
            }
            Self::Assistant | Self::Result => StreamStage::Primary,
        }
    }
}

/// Two-stage taxonomy: ephemeral process narration vs. the final answer.
///
/// Expandable events are relayed to the client and dropped; only Primary
/// events feed the persisted answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum StreamStage {
    Expandable,
    Primary,
}

impl From<StreamStage> for u8 {
    fn from(stage: StreamStage) -> u8 {
        match stage {
            StreamStage::Expandable => 1,
            StreamStage::Primary => 2,
        }
    }
}

impl TryFrom<u8> for StreamStage {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StreamStage::Expandable),
            2 => Ok(StreamStage::Primary),
            other => Err(format!("unknown stream stage: {other}")),
        }
    }
}

/// One decoded line of agent output plus its classification.
///
/// Created and consumed within a single multiplexer iteration; never
/// persisted directly.
#[derive(Debug, Clone)]
pub struct ClassifiedEvent {
    pub kind: ChunkKind,
    pub stage: StreamStage,
    pub raw: String,
    /// Parsed structured form, present only when the line was valid JSON.
    pub payload: Option<Value>,
}

impl ClassifiedEvent {
    fn plain(kind: ChunkKind, raw: &str) -> Self {
        Self {
            kind,
            stage: kind.stage(),
            raw: raw.to_string(),
            payload: None,
        }
    }

    fn structured(kind: ChunkKind, raw: &str, payload: Value) -> Self {
        Self {
            kind,
            stage: kind.stage(),
            raw: raw.to_string(),
            payload: Some(payload),
        }
    }

    /// Human-readable text shown for this event in the client stream.
    pub fn display_content(&self) -> String {
        match (self.kind, self.payload.as_ref()) {
            (ChunkKind::Assistant, Some(payload)) => extract::assistant_text(payload),
            (ChunkKind::Result, Some(payload)) => payload
                .get("result")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => self.raw.clone(),
        }
    }
}

/// Classify one decoded line of agent output. Total: never fails, never
/// panics, and anything unknown or malformed lands in the Expandable stage.
/// Unrecognized data is never silently promoted to the persisted stage.
pub fn classify(raw_line: &str) -> ClassifiedEvent {
    let trimmed = raw_line.trim();
    if trimmed.is_empty() {
        return ClassifiedEvent::plain(ChunkKind::StreamToken, raw_line);
    }
    if !trimmed.starts_with('{') {
        return ClassifiedEvent::plain(ChunkKind::InitText, raw_line);
    }

    let Ok(payload) = serde_json::from_str::<Value>(trimmed) else {
        // Malformed JSON degrades to plain text rather than aborting the run.
        return ClassifiedEvent::plain(ChunkKind::InitText, raw_line);
    };

    let kind = match payload.get("type").and_then(Value::as_str) {
        Some("system") => match payload.get("subtype").and_then(Value::as_str) {
            Some("hook_started") | Some("hook_response") => ChunkKind::SystemHook,
            _ => ChunkKind::SystemInit,
        },
        Some("stream_event") => ChunkKind::StreamToken,
        Some("assistant") => ChunkKind::Assistant,
        Some("result") => ChunkKind::Result,
        _ => ChunkKind::StreamToken,
    };

    ClassifiedEvent::structured(kind, raw_line, payload)
}
