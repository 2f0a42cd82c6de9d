use super::DatabaseError;
use bytes::{Bytes, BytesMut};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};

/// An event sent by the database over a streaming connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The data at `path` (relative to the listened location) was replaced.
    Put { path: String, data: Value },
    /// The children of `path` named in `data` were replaced.
    Patch { path: String, data: Value },
    /// Sent periodically to keep the connection open.
    KeepAlive,
    /// The security rules no longer allow reading the location.
    Cancel(String),
    /// The credential used for the stream expired or was revoked.
    AuthRevoked,
}

#[derive(Deserialize)]
struct DataPayload {
    path: String,
    data: Value,
}

/// A stream of `ServerEvent`s decoded from a `text/event-stream` response.
pub struct ListenStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: BytesMut,
    // Bytes of `buffer` already searched for a boundary.
    scanned: usize,
    finished: bool,
}

impl ListenStream {
    pub fn new(inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            scanned: 0,
            finished: false,
        }
    }
}

impl Stream for ListenStream {
    type Item = Result<ServerEvent, DatabaseError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            // 1. Drain every complete event already buffered.
            let from = self.scanned.saturating_sub(2);
            if let Some((end, consumed)) = find_event_boundary(&self.buffer, from) {
                let block = self.buffer.split_to(consumed);
                self.scanned = 0;
                match parse_event(&block[..end]) {
                    Ok(Some(event)) => return Poll::Ready(Some(Ok(event))),
                    Ok(None) => continue,
                    Err(e) => return Poll::Ready(Some(Err(e))),
                }
            }

            self.scanned = self.buffer.len();

            if self.finished {
                return Poll::Ready(None);
            }

            // 2. Otherwise wait for more bytes.
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buffer.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(DatabaseError::RequestError(e))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    if self.buffer.iter().all(|b| b.is_ascii_whitespace()) {
                        return Poll::Ready(None);
                    }
                    // A final event may be missing its blank line.
                    let block = self.buffer.split();
                    return match parse_event(&block) {
                        Ok(Some(event)) => Poll::Ready(Some(Ok(event))),
                        Ok(None) => Poll::Ready(None),
                        Err(e) => Poll::Ready(Some(Err(e))),
                    };
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Finds the first blank line terminating an event, starting the search at
/// `from`.
///
/// Returns the length of the event text and the number of bytes to consume,
/// including the terminator. Accepts both `\n` and `\r\n` line endings.
fn find_event_boundary(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i < buf.len() {
        if buf[i] == b'\n' {
            let rest = &buf[i + 1..];
            if rest.starts_with(b"\n") {
                return Some((i, i + 2));
            }
            if rest.starts_with(b"\r\n") {
                return Some((i, i + 3));
            }
        }
        i += 1;
    }
    None
}

/// Decodes one event block. Unknown event types yield `Ok(None)`.
fn parse_event(block: &[u8]) -> Result<Option<ServerEvent>, DatabaseError> {
    let text = std::str::from_utf8(block)
        .map_err(|e| DatabaseError::StreamError(format!("Event is not valid UTF-8: {}", e)))?;

    let mut event_type = None;
    let mut data_lines = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event_type = Some(value),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    let data = data_lines.join("\n");

    let event = match event_type {
        Some("put") => {
            let payload: DataPayload = serde_json::from_str(&data)?;
            ServerEvent::Put {
                path: payload.path,
                data: payload.data,
            }
        }
        Some("patch") => {
            let payload: DataPayload = serde_json::from_str(&data)?;
            ServerEvent::Patch {
                path: payload.path,
                data: payload.data,
            }
        }
        Some("keep-alive") => ServerEvent::KeepAlive,
        Some("cancel") => {
            let reason = match serde_json::from_str::<Value>(&data) {
                Ok(Value::String(reason)) => reason,
                _ => data,
            };
            ServerEvent::Cancel(reason)
        }
        Some("auth_revoked") => ServerEvent::AuthRevoked,
        _ => return Ok(None),
    };

    Ok(Some(event))
}
