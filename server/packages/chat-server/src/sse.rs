use std::convert::Infallible;

use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use research_chat_agent_stream::StreamFrame;

pub fn to_sse_event(frame: &StreamFrame) -> Event {
    Event::default()
        .event(frame.event_name())
        .data(frame.data_json())
}

/// Adapt a frame channel to an SSE response. The response body ends when the
/// run task drops its sender, which only happens after finalization.
pub fn stream_response(receiver: mpsc::Receiver<StreamFrame>) -> Response {
    let stream = ReceiverStream::new(receiver)
        .map(|frame| Ok::<Event, Infallible>(to_sse_event(&frame)));
    // Disable proxy buffering so frames reach the client as they are sent.
    ([("x-accel-buffering", "no")], Sse::new(stream)).into_response()
}
