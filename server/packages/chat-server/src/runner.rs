use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use research_chat_agent_stream::{
    classify, ChunkFrame, HeartbeatFrame, RunState, StartFrame, StreamFrame,
};
use research_chat_error::ChatError;

use crate::config::RuntimeConfig;

const CREDENTIAL_ENV: &str = "ANTHROPIC_API_KEY";
const WORKSPACE_ENV: &str = "RESEARCH_AGENT_USER_PWD";
const STDERR_TAIL_LINES: usize = 50;

/// How a run's frame loop ended. `Cancelled` means the frame receiver went
/// away mid-run; the child has already been killed and reaped, and whatever
/// landed in the [`RunState`] is the partial result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Completed,
    Cancelled,
}

/// Spawns the agent subprocess and multiplexes its stdout against heartbeat
/// and deadline timers.
///
/// The runner never touches the message store. It classifies lines, feeds
/// them to the caller's `RunState`, and pushes transport frames; persistence
/// and terminal frames belong to the lifecycle layer.
pub struct AgentRunner {
    config: RuntimeConfig,
}

impl AgentRunner {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Resolve the agent executable, either from the configured path or by
    /// walking `PATH`.
    pub fn resolve_agent(&self) -> Result<PathBuf, ChatError> {
        if let Some(path) = &self.config.agent_path {
            if path.is_file() {
                return Ok(path.clone());
            }
            return Err(ChatError::AgentNotAvailable {
                message: format!("configured agent path does not exist: {}", path.display()),
            });
        }
        find_in_path(&self.config.agent_binary).ok_or_else(|| ChatError::AgentNotAvailable {
            message: format!("{} not found on PATH", self.config.agent_binary),
        })
    }

    fn check_preconditions(&self, workspace: &Path) -> Result<(), ChatError> {
        if !workspace.is_dir() {
            return Err(ChatError::WorkspaceMissing {
                path: workspace.display().to_string(),
            });
        }
        if std::env::var_os(CREDENTIAL_ENV).is_none() {
            return Err(ChatError::MissingCredential {
                name: CREDENTIAL_ENV.to_string(),
            });
        }
        Ok(())
    }

    /// Run one agent subprocess to completion, classifying each stdout line
    /// into `state` and relaying frames to `frames`.
    ///
    /// Errors are only returned once the child is no longer running; every
    /// exit path kills and reaps before surfacing anything.
    pub async fn run(
        &self,
        workspace: &Path,
        prompt: &str,
        message_id: &str,
        frames: &mpsc::Sender<StreamFrame>,
        state: &mut RunState,
    ) -> Result<RunEnd, ChatError> {
        let agent = self.resolve_agent()?;
        self.check_preconditions(workspace)?;

        let mut command = Command::new(&agent);
        command
            .arg("run")
            .arg("--non-interactive")
            .arg("-i")
            .arg(prompt)
            .arg("--")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .current_dir(workspace)
            .env(WORKSPACE_ENV, workspace.as_os_str())
            .env("DISABLE_TELEMETRY", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            message_id,
            agent = %agent.display(),
            workspace = %workspace.display(),
            "spawning agent subprocess"
        );
        let mut child = command.spawn().map_err(|err| ChatError::AgentNotAvailable {
            message: format!("failed to spawn {}: {err}", agent.display()),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| ChatError::StreamError {
            message: "agent stdout was not captured".to_string(),
        })?;
        let stderr = child.stderr.take();

        // Drain stderr concurrently so the child can never block on a full
        // pipe; keep a bounded tail for error reporting.
        let stderr_task = tokio::spawn(async move {
            let mut tail: VecDeque<String> = VecDeque::new();
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        if frames
            .send(StreamFrame::Start(StartFrame::new(message_id)))
            .await
            .is_err()
        {
            kill_and_reap(&mut child).await;
            return Ok(RunEnd::Cancelled);
        }

        let mut lines =
            BufReader::with_capacity(self.config.stream_buffer_bytes, stdout).lines();

        let deadline = tokio::time::sleep(self.config.run_timeout);
        tokio::pin!(deadline);
        let mut heartbeat = interval_at(
            Instant::now() + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut cancelled = false;
        loop {
            tokio::select! {
                () = &mut deadline => {
                    kill_and_reap(&mut child).await;
                    tracing::warn!(message_id, "agent run exceeded deadline; killed");
                    return Err(ChatError::RunTimeout {
                        seconds: self.config.run_timeout.as_secs(),
                    });
                }
                _ = heartbeat.tick() => {
                    let frame = StreamFrame::Heartbeat(HeartbeatFrame {
                        timestamp: now_rfc3339(),
                    });
                    if frames.send(frame).await.is_err() {
                        cancelled = true;
                        break;
                    }
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            let event = classify(&line);
                            state.observe(&event);
                            let frame = StreamFrame::Chunk(ChunkFrame {
                                content: event.display_content(),
                                event_type: event.kind,
                                stage: event.stage,
                                raw_payload: event.payload,
                            });
                            if frames.send(frame).await.is_err() {
                                cancelled = true;
                                break;
                            }
                            // Any line counts as liveness.
                            heartbeat.reset();
                        }
                        Ok(None) => break,
                        Err(err) => {
                            kill_and_reap(&mut child).await;
                            return Err(ChatError::StreamError {
                                message: format!("failed to read agent output: {err}"),
                            });
                        }
                    }
                }
            }
        }

        if cancelled {
            kill_and_reap(&mut child).await;
            tracing::info!(message_id, "client went away; run cancelled with partial output");
            return Ok(RunEnd::Cancelled);
        }

        let status = child.wait().await.map_err(|err| ChatError::StreamError {
            message: format!("failed to reap agent process: {err}"),
        })?;
        let stderr_tail = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(ChatError::AgentFailed {
                exit_code: status.code(),
                stderr: if stderr_tail.is_empty() {
                    None
                } else {
                    Some(stderr_tail)
                },
            });
        }
        Ok(RunEnd::Completed)
    }
}

async fn kill_and_reap(child: &mut Child) {
    if let Err(err) = child.kill().await {
        tracing::warn!(error = %err, "failed to kill agent subprocess");
    }
    let _ = child.wait().await;
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}
