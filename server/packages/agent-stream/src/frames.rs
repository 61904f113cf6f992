use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classify::{ChunkKind, StreamStage};

/// Run statistics pulled out of the agent's terminal `result` event.
///
/// Every field is optional; extraction from a payload with missing or
/// malformed fields yields `None`s, never an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_api_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// The agent's own session identifier, for log correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartFrame {
    pub message_id: String,
    pub status: String,
}

impl StartFrame {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            status: "streaming".to_string(),
        }
    }
}

/// One classified event relayed to the client mid-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkFrame {
    pub content: String,
    pub event_type: ChunkKind,
    pub stage: StreamStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatFrame {
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteFrame {
    pub message_id: String,
    pub status: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RunMetadata>,
}

impl CompleteFrame {
    pub fn new(
        message_id: impl Into<String>,
        content: impl Into<String>,
        metadata: Option<RunMetadata>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            status: "completed".to_string(),
            content: content.into(),
            metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrame {
    pub message_id: String,
    pub status: String,
    pub error: String,
}

impl ErrorFrame {
    pub fn new(message_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            status: "error".to_string(),
            error: error.into(),
        }
    }
}

/// A single server-push frame.
///
/// Ordering guarantee: `Start` is always first, `Complete`/`Error` always
/// last and exactly once; everything in between follows subprocess output
/// order, with heartbeats interleaved when the agent is quiet.
#[derive(Debug, Clone)]
pub enum StreamFrame {
    Start(StartFrame),
    Chunk(ChunkFrame),
    Heartbeat(HeartbeatFrame),
    Complete(CompleteFrame),
    Error(ErrorFrame),
}

impl StreamFrame {
    /// Name used for the SSE `event:` field.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Chunk(chunk) => chunk.event_type.as_str(),
            Self::Heartbeat(_) => "heartbeat",
            Self::Complete(_) => "complete",
            Self::Error(_) => "error",
        }
    }

    /// Single-line JSON payload for the SSE `data:` field.
    pub fn data_json(&self) -> String {
        let result = match self {
            Self::Start(frame) => serde_json::to_string(frame),
            Self::Chunk(frame) => serde_json::to_string(frame),
            Self::Heartbeat(frame) => serde_json::to_string(frame),
            Self::Complete(frame) => serde_json::to_string(frame),
            Self::Error(frame) => serde_json::to_string(frame),
        };
        result.unwrap_or_else(|_| "{}".to_string())
    }

    /// Wire encoding: `event: <kind>\ndata: <json>\n\n`.
    pub fn encode(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event_name(), self.data_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_frame_encodes_named_event_with_blank_line() {
        let frame = StreamFrame::Start(StartFrame::new("msg-1"));
        let encoded = frame.encode();
        assert!(encoded.starts_with("event: start\ndata: "));
        assert!(encoded.ends_with("\n\n"));
        assert!(encoded.contains("\"messageId\":\"msg-1\""));
        assert!(encoded.contains("\"status\":\"streaming\""));
    }

    #[test]
    fn chunk_frame_uses_classified_kind_as_event_name() {
        let frame = StreamFrame::Chunk(ChunkFrame {
            content: "Loading agent...".to_string(),
            event_type: ChunkKind::InitText,
            stage: StreamStage::Expandable,
            raw_payload: None,
        });
        assert_eq!(frame.event_name(), "init_text");
        let data: serde_json::Value = serde_json::from_str(&frame.data_json()).unwrap();
        assert_eq!(data["stage"], 1);
        assert_eq!(data["eventType"], "init_text");
        assert!(data.get("rawPayload").is_none());
    }

    #[test]
    fn complete_frame_omits_absent_metadata() {
        let frame = StreamFrame::Complete(CompleteFrame::new("msg-1", "Paris", None));
        let data: serde_json::Value = serde_json::from_str(&frame.data_json()).unwrap();
        assert_eq!(data["status"], "completed");
        assert_eq!(data["content"], "Paris");
        assert!(data.get("metadata").is_none());
    }

    #[test]
    fn metadata_serializes_only_present_fields() {
        let metadata = RunMetadata {
            token_count: Some(42),
            duration_ms: Some(3064),
            ..Default::default()
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["tokenCount"], 42);
        assert_eq!(json["durationMs"], 3064);
        assert!(json.get("costUsd").is_none());
    }
}
