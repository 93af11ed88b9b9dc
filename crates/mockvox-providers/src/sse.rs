//! Server-Sent Events line parser.

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio_stream::StreamExt;

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Parse a reqwest response body as an SSE stream.
pub fn parse_sse_stream(response: reqwest::Response) -> impl Stream<Item = anyhow::Result<SseEvent>> {
    parse_sse_bytes(
        response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| anyhow::anyhow!("SSE stream error: {e}"))),
    )
}

/// Parse any byte stream as SSE. Lines are split on raw bytes so a
/// multi-byte character cut across chunks survives.
pub fn parse_sse_bytes<S>(byte_stream: S) -> impl Stream<Item = anyhow::Result<SseEvent>>
where
    S: Stream<Item = anyhow::Result<Bytes>> + Send + 'static,
{
    futures::stream::unfold(
        SseState {
            byte_stream: Box::pin(byte_stream),
            buffer: Vec::new(),
            pending: PendingEvent::default(),
        },
        |mut state| async move {
            loop {
                if let Some(newline) = state.buffer.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = state.buffer.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&raw[..newline]);
                    let line = line.trim_end_matches('\r');

                    if line.is_empty() {
                        // Blank line dispatches the event
                        if let Some(event) = state.pending.take() {
                            return Some((Ok(event), state));
                        }
                        continue;
                    }
                    state.pending.apply(line);
                    continue;
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => return Some((Err(e), state)),
                    None => {
                        if !state.buffer.is_empty() {
                            let rest = std::mem::take(&mut state.buffer);
                            state.pending.apply(String::from_utf8_lossy(&rest).trim_end_matches('\r'));
                        }
                        return state.pending.take().map(|event| (Ok(event), state));
                    }
                }
            }
        },
    )
}

#[derive(Default)]
struct PendingEvent {
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl PendingEvent {
    fn apply(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        if let Some(value) = line.strip_prefix("event:") {
            self.event = Some(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            self.id = Some(value.trim_start().to_string());
        }
    }

    fn take(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            self.id = None;
            return None;
        }
        let pending = std::mem::take(self);
        Some(SseEvent {
            event: pending.event,
            data: pending.data.join("\n"),
            id: pending.id,
        })
    }
}

struct SseState {
    byte_stream: Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
    pending: PendingEvent,
}
