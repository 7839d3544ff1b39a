use console::style;
use futures_util::{Stream, StreamExt};
use std::convert::Infallible;

use crate::pipeline::{EventKind, PipelineEvent};
use crate::Result;

/// Encode one event as a server-sent-events frame: `data: <json>\n\n`
pub fn encode_event(event: &PipelineEvent) -> Result<Vec<u8>> {
    let json = serde_json::to_string(event)?;
    let mut frame = Vec::with_capacity(json.len() + 8);
    frame.extend_from_slice(b"data: ");
    frame.extend_from_slice(json.as_bytes());
    frame.extend_from_slice(b"\n\n");
    Ok(frame)
}

/// Map an event stream to SSE frames, one frame per event, in order
pub fn sse_frames<S>(events: S) -> impl Stream<Item = std::result::Result<Vec<u8>, Infallible>>
where
    S: Stream<Item = PipelineEvent>,
{
    events.filter_map(|event| async move {
        match encode_event(&event) {
            Ok(frame) => Some(Ok(frame)),
            Err(e) => {
                tracing::warn!("Failed to serialize event: {}", e);
                None
            }
        }
    })
}

/// One-line console rendering of an event
pub fn format_event(event: &PipelineEvent) -> String {
    match event.kind {
        EventKind::Info => format!("{} {}", style("ℹ").cyan(), event.message),
        EventKind::Progress => format!("{} {}", style("→").blue(), event.message),
        EventKind::Error => {
            format!("{} {}", style("✗").red().bold(), style(&event.message).red())
        }
        EventKind::Complete => format!("{} {}", style("✓").green().bold(), event.message),
    }
}
