use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use research_chat_agent_stream::{CompleteFrame, ErrorFrame, RunState, StreamFrame};
use research_chat_error::ChatError;

use crate::runner::{AgentRunner, RunEnd};
use crate::sessions::SessionStore;
use crate::store::MessageStore;

const FRAME_CHANNEL_CAPACITY: usize = 64;
const USER_FAILURE_NOTE: &str = "assistant response failed";

/// Orchestrates one agent run per assistant message.
///
/// The run itself lives on a detached task, so a client that connects, reads
/// a few frames and disconnects does not abort the run's bookkeeping: the
/// tail of that task reconciles and persists no matter what happened on the
/// transport.
pub struct ChatRuntime {
    store: Arc<MessageStore>,
    sessions: Arc<SessionStore>,
    runner: Arc<AgentRunner>,
}

impl ChatRuntime {
    pub fn new(
        store: Arc<MessageStore>,
        sessions: Arc<SessionStore>,
        runner: Arc<AgentRunner>,
    ) -> Self {
        Self {
            store,
            sessions,
            runner,
        }
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Validate a stream request and launch the run.
    ///
    /// Returns the frame receiver for the transport. Validation failures are
    /// returned before anything is spawned or persisted; in particular a
    /// message that already reached a terminal status yields `StreamExpired`,
    /// so a stream URL can be consumed at most once.
    pub async fn start_run(
        self: &Arc<Self>,
        session_id: &str,
        assistant_message_id: &str,
    ) -> Result<mpsc::Receiver<StreamFrame>, ChatError> {
        let session =
            self.sessions
                .get(session_id)
                .await
                .ok_or_else(|| ChatError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
        if !session.indexed {
            return Err(ChatError::SessionNotIndexed {
                session_id: session_id.to_string(),
            });
        }

        let assistant = self
            .store
            .get(session_id, assistant_message_id)
            .await
            .ok_or_else(|| ChatError::MessageNotFound {
                message_id: assistant_message_id.to_string(),
            })?;
        if assistant.status.is_terminal() {
            return Err(ChatError::StreamExpired {
                message_id: assistant_message_id.to_string(),
            });
        }

        let user = self
            .store
            .user_message_before(session_id, assistant_message_id)
            .await
            .ok_or_else(|| ChatError::MessageNotFound {
                message_id: format!("no user message precedes {assistant_message_id}"),
            })?;

        self.store.set_streaming(assistant_message_id).await;

        let (frames, receiver) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let runtime = Arc::clone(self);
        let run = PendingRun {
            workspace: session.workspace_path,
            prompt: user.content.clone(),
            assistant_message_id: assistant_message_id.to_string(),
            user_message_id: user.message_id,
            user_content: user.content,
        };
        tokio::spawn(async move {
            runtime.drive_run(run, frames).await;
        });
        Ok(receiver)
    }

    async fn drive_run(&self, run: PendingRun, frames: mpsc::Sender<StreamFrame>) {
        let started = Instant::now();
        let mut state = RunState::new();
        let outcome = self
            .runner
            .run(
                &run.workspace,
                &run.prompt,
                &run.assistant_message_id,
                &frames,
                &mut state,
            )
            .await;
        let wall_ms = started.elapsed().as_millis() as u64;

        // Finalization happens here unconditionally. Frame sends may fail
        // when nobody is listening any more; persistence must not.
        match outcome {
            Ok(end) => {
                let answer = state.reconcile(wall_ms);
                if answer.content.is_empty() {
                    tracing::warn!(
                        message_id = %run.assistant_message_id,
                        "run finished without content from any source"
                    );
                }
                if end == RunEnd::Completed {
                    let frame = StreamFrame::Complete(CompleteFrame::new(
                        &run.assistant_message_id,
                        &answer.content,
                        answer.metadata.clone(),
                    ));
                    let _ = frames.send(frame).await;
                }
                self.store
                    .set_completed(
                        &run.assistant_message_id,
                        &answer.content,
                        answer.token_count,
                        Some(answer.duration_ms),
                    )
                    .await;
                self.store
                    .set_completed(&run.user_message_id, &run.user_content, None, None)
                    .await;
                tracing::info!(
                    message_id = %run.assistant_message_id,
                    cancelled = end == RunEnd::Cancelled,
                    token_count = ?answer.token_count,
                    duration_ms = answer.duration_ms,
                    "run finalized"
                );
            }
            Err(err) => {
                let message = err.stream_message();
                let frame =
                    StreamFrame::Error(ErrorFrame::new(&run.assistant_message_id, &message));
                let _ = frames.send(frame).await;
                self.store
                    .set_failed(&run.assistant_message_id, &message)
                    .await;
                self.store
                    .set_failed(&run.user_message_id, USER_FAILURE_NOTE)
                    .await;
                tracing::error!(
                    message_id = %run.assistant_message_id,
                    error = %message,
                    "run failed"
                );
            }
        }
    }
}

struct PendingRun {
    workspace: PathBuf,
    prompt: String,
    assistant_message_id: String,
    user_message_id: String,
    user_content: String,
}
