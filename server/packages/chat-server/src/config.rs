use std::path::PathBuf;
use std::time::Duration;

use research_chat_error::ChatError;

pub const DEFAULT_AGENT_BINARY: &str = "research-agent";
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 15;
pub const DEFAULT_STREAM_BUFFER_BYTES: usize = 1024 * 1024;

/// Runtime knobs for agent subprocess runs.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Explicit path to the agent executable. When unset, the binary is
    /// resolved through `PATH`.
    pub agent_path: Option<PathBuf>,
    pub agent_binary: String,
    /// Hard wall-clock ceiling for one run. The child is killed when it
    /// elapses.
    pub run_timeout: Duration,
    /// Quiet-period interval between keep-alive frames.
    pub heartbeat_interval: Duration,
    /// Line reader buffer capacity. A single stream-json event can carry a
    /// whole assistant message, so this is generous.
    pub stream_buffer_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            agent_path: None,
            agent_binary: DEFAULT_AGENT_BINARY.to_string(),
            run_timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            stream_buffer_bytes: DEFAULT_STREAM_BUFFER_BYTES,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.run_timeout.is_zero() {
            return Err(ChatError::InvalidRequest {
                message: "run timeout must be non-zero".to_string(),
            });
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ChatError::InvalidRequest {
                message: "heartbeat interval must be non-zero".to_string(),
            });
        }
        if self.heartbeat_interval >= self.run_timeout {
            return Err(ChatError::InvalidRequest {
                message: "heartbeat interval must be shorter than the run timeout".to_string(),
            });
        }
        if self.stream_buffer_bytes == 0 {
            return Err(ChatError::InvalidRequest {
                message: "stream buffer size must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}
