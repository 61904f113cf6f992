//! Protocol layer for agent stdout streams.
//!
//! Everything in this crate is pure: classifying a line of agent output,
//! extracting answer text and run metadata from structured payloads, and
//! reconciling the accumulated run state into one final answer. No I/O and
//! no process handling; that lives in the server crate.

mod classify;
mod extract;
mod frames;
mod reconcile;

pub use classify::{classify, ChunkKind, ClassifiedEvent, StreamStage};
pub use extract::{assistant_text, run_metadata};
pub use frames::{
    ChunkFrame, CompleteFrame, ErrorFrame, HeartbeatFrame, RunMetadata, StartFrame, StreamFrame,
};
pub use reconcile::{ReconciledAnswer, RunState};
