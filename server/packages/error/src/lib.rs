use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidRequest,
    SessionNotFound,
    SessionNotIndexed,
    MessageNotFound,
    StreamExpired,
    WorkspaceMissing,
    AgentNotAvailable,
    MissingCredential,
    RunTimeout,
    AgentFailed,
    StreamError,
}

impl ErrorType {
    pub fn as_urn(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "urn:research-chat:error:invalid_request",
            Self::SessionNotFound => "urn:research-chat:error:session_not_found",
            Self::SessionNotIndexed => "urn:research-chat:error:session_not_indexed",
            Self::MessageNotFound => "urn:research-chat:error:message_not_found",
            Self::StreamExpired => "urn:research-chat:error:stream_expired",
            Self::WorkspaceMissing => "urn:research-chat:error:workspace_missing",
            Self::AgentNotAvailable => "urn:research-chat:error:agent_not_available",
            Self::MissingCredential => "urn:research-chat:error:missing_credential",
            Self::RunTimeout => "urn:research-chat:error:run_timeout",
            Self::AgentFailed => "urn:research-chat:error:agent_failed",
            Self::StreamError => "urn:research-chat:error:stream_error",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "Invalid Request",
            Self::SessionNotFound => "Session Not Found",
            Self::SessionNotIndexed => "Session Not Indexed",
            Self::MessageNotFound => "Message Not Found",
            Self::StreamExpired => "Stream Expired",
            Self::WorkspaceMissing => "Workspace Missing",
            Self::AgentNotAvailable => "Agent Not Available",
            Self::MissingCredential => "Missing Credential",
            Self::RunTimeout => "Run Timeout",
            Self::AgentFailed => "Agent Failed",
            Self::StreamError => "Stream Error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::SessionNotFound => 404,
            Self::SessionNotIndexed => 400,
            Self::MessageNotFound => 404,
            Self::StreamExpired => 410,
            Self::WorkspaceMissing => 500,
            Self::AgentNotAvailable => 503,
            Self::MissingCredential => 500,
            Self::RunTimeout => 504,
            Self::AgentFailed => 502,
            Self::StreamError => 502,
        }
    }
}

/// RFC 7807 problem document returned by every error response.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl ProblemDetails {
    pub fn new(error_type: ErrorType, detail: Option<String>) -> Self {
        Self {
            type_: error_type.as_urn().to_string(),
            title: error_type.title().to_string(),
            status: error_type.status_code(),
            detail,
            instance: None,
            extensions: Map::new(),
        }
    }
}

/// Closed error taxonomy for the chat service.
///
/// Precondition errors (agent missing, credential missing, workspace missing)
/// are raised before the subprocess is spawned. Runtime errors (timeout,
/// non-zero exit) are only raised after the child has been killed and reaped.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },
    #[error("session must be indexed before chat is available: {session_id}")]
    SessionNotIndexed { session_id: String },
    #[error("chat message not found: {message_id}")]
    MessageNotFound { message_id: String },
    #[error("stream has already completed or failed: {message_id}")]
    StreamExpired { message_id: String },
    #[error("session workspace directory not found: {path}")]
    WorkspaceMissing { path: String },
    #[error("agent not available: {message}")]
    AgentNotAvailable { message: String },
    #[error("required credential not set: {name}")]
    MissingCredential { name: String },
    #[error("agent response timed out after {seconds} seconds")]
    RunTimeout { seconds: u64 },
    #[error("agent process failed with exit code {exit_code:?}")]
    AgentFailed {
        exit_code: Option<i32>,
        stderr: Option<String>,
    },
    #[error("stream error: {message}")]
    StreamError { message: String },
}

impl ChatError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::InvalidRequest { .. } => ErrorType::InvalidRequest,
            Self::SessionNotFound { .. } => ErrorType::SessionNotFound,
            Self::SessionNotIndexed { .. } => ErrorType::SessionNotIndexed,
            Self::MessageNotFound { .. } => ErrorType::MessageNotFound,
            Self::StreamExpired { .. } => ErrorType::StreamExpired,
            Self::WorkspaceMissing { .. } => ErrorType::WorkspaceMissing,
            Self::AgentNotAvailable { .. } => ErrorType::AgentNotAvailable,
            Self::MissingCredential { .. } => ErrorType::MissingCredential,
            Self::RunTimeout { .. } => ErrorType::RunTimeout,
            Self::AgentFailed { .. } => ErrorType::AgentFailed,
            Self::StreamError { .. } => ErrorType::StreamError,
        }
    }

    /// Human-readable form used for transport `error` frames and the
    /// persisted `error_message` column. Includes captured stderr where the
    /// bare Display impl would lose it.
    pub fn stream_message(&self) -> String {
        match self {
            Self::AgentFailed { exit_code, stderr } => {
                let code = exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                match stderr {
                    Some(stderr) if !stderr.is_empty() => {
                        format!("agent process failed with exit code {code}: {stderr}")
                    }
                    _ => format!("agent process failed with exit code {code}"),
                }
            }
            other => other.to_string(),
        }
    }

    pub fn to_problem_details(&self) -> ProblemDetails {
        let mut problem = ProblemDetails::new(self.error_type(), Some(self.stream_message()));

        let mut extensions = Map::new();
        match self {
            Self::SessionNotFound { session_id } | Self::SessionNotIndexed { session_id } => {
                extensions.insert("sessionId".to_string(), Value::String(session_id.clone()));
            }
            Self::MessageNotFound { message_id } | Self::StreamExpired { message_id } => {
                extensions.insert("messageId".to_string(), Value::String(message_id.clone()));
            }
            Self::AgentFailed { exit_code, stderr } => {
                if let Some(code) = exit_code {
                    extensions.insert(
                        "exitCode".to_string(),
                        Value::Number(serde_json::Number::from(*code as i64)),
                    );
                }
                if let Some(stderr) = stderr {
                    extensions.insert("stderr".to_string(), Value::String(stderr.clone()));
                }
            }
            _ => {}
        }
        problem.extensions = extensions;
        problem
    }
}

impl From<ChatError> for ProblemDetails {
    fn from(value: ChatError) -> Self {
        value.to_problem_details()
    }
}

impl From<&ChatError> for ProblemDetails {
    fn from(value: &ChatError) -> Self {
        value.to_problem_details()
    }
}
