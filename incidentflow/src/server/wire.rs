//! Translation of progress events into wire messages.

use crate::core::{JobId, ProgressEvent};
use crate::errors::BufferOverrunError;
use crate::utils::format_iso8601;
use axum::response::sse::Event;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::warn;

/// One message on the progress stream: `{ "type", "data", "timestamp" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// `connected`, `status`, `step_start`, `<stage>_complete`, `warning`, ...
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-specific payload.
    pub data: serde_json::Value,
    /// ISO-8601 time the event was appended.
    pub timestamp: String,
}

impl From<&ProgressEvent> for WireMessage {
    fn from(event: &ProgressEvent) -> Self {
        Self {
            kind: event.kind.wire_type().into_owned(),
            data: event.payload.clone(),
            timestamp: format_iso8601(&event.timestamp),
        }
    }
}

/// SSE frame for `event`, with the sequence number as its id.
pub fn sse_event(event: &ProgressEvent) -> Result<Event, serde_json::Error> {
    let message = WireMessage::from(event);
    Ok(Event::default()
        .id(event.sequence_number.to_string())
        .data(serde_json::to_string(&message)?))
}

/// SSE frames for an observer's events.
///
/// Ends after `done`, after an overrun, or at the first event that cannot be
/// encoded; a frame is never skipped while the stream continues.
pub fn progress_frames<S, F>(
    job_id: JobId,
    mut events: S,
    encode: F,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static
where
    S: Stream<Item = Result<ProgressEvent, BufferOverrunError>> + Unpin + Send + 'static,
    F: Fn(&ProgressEvent) -> Result<Event, serde_json::Error> + Send + 'static,
{
    async_stream::stream! {
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => match encode(&event) {
                    Ok(frame) => yield Ok(frame),
                    Err(err) => {
                        warn!(
                            job_id = %job_id,
                            sequence = event.sequence_number,
                            error = %err,
                            "Progress stream closed on unencodable event"
                        );
                        break;
                    }
                },
                Err(overrun) => {
                    warn!(job_id = %job_id, error = %overrun, "Progress stream closed after overrun");
                    break;
                }
            }
        }
    }
}
