//! Research-assistant chat service.
//!
//! Accepts chat messages over HTTP, runs an external CLI agent per message,
//! classifies its mixed plain-text/stream-json output into a two-stage event
//! taxonomy, and relays the run over SSE while persisting the reconciled
//! answer exactly once.

pub mod cli;
pub mod config;
pub mod lifecycle;
pub mod router;
pub mod runner;
pub mod sessions;
pub mod sse;
pub mod store;
