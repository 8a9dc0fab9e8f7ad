//! Incremental SSE decoding of OpenAI-style chat completion streams
//!
//! The upstream body is a sequence of lines:
//! ```text
//! data: {"id":"chatcmpl-1","created":1700000000,"choices":[{"delta":{"content":"Hi"}}]}
//!
//! data: [DONE]
//! ```
//! Lines without the `data: ` prefix (comments, `event:`, blank separators)
//! are ignored. Chunk boundaries from the transport may fall anywhere,
//! including inside a multi-byte UTF-8 sequence, so bytes are buffered until a
//! full line is available.

use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use super::error::UpstreamError;
use super::types::{Fragment, StreamEvent, Terminal};
use super::upstream::ByteStream;

/// Prefix of every payload-carrying line
pub const DATA_PREFIX: &str = "data: ";

/// Payload of the end-of-stream line
pub const DONE_SENTINEL: &str = "[DONE]";

/// Longest line accepted before the body is treated as broken
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    id: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Parse one complete line (without its line terminator)
///
/// Returns `Ok(None)` for lines that carry nothing to forward: non-data
/// lines, and payloads whose first choice has no or empty content.
pub fn parse_line(line: &str) -> Result<Option<StreamEvent>, UpstreamError> {
    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
        return Ok(None);
    };

    if data == DONE_SENTINEL {
        return Ok(Some(StreamEvent::Terminal(Terminal::Completed)));
    }

    let payload: ChunkPayload =
        serde_json::from_str(data).map_err(|e| UpstreamError::DecodeFailed {
            line: data.to_string(),
            reason: e.to_string(),
        })?;

    let text = payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .unwrap_or_default();

    if text.is_empty() {
        return Ok(None);
    }

    Ok(Some(StreamEvent::Fragment(Fragment {
        id: payload.id,
        text,
        created: payload.created,
    })))
}

struct DecoderState {
    input: ByteStream,
    buf: Vec<u8>,
    /// Prefix of `buf` already known to hold no newline
    scanned: usize,
    eof: bool,
    finished: bool,
}

impl DecoderState {
    /// Split off the next complete line, stripping `\n` and a trailing `\r`
    fn take_line(&mut self) -> Option<String> {
        let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') else {
            self.scanned = self.buf.len();
            return None;
        };
        let idx = self.scanned + offset;
        self.scanned = 0;
        let mut line: Vec<u8> = self.buf.drain(..=idx).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// At EOF the last line may lack a terminator
    fn take_remainder(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        self.scanned = 0;
        let mut line = std::mem::take(&mut self.buf);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// Turn an upstream byte stream into a lazy sequence of [`StreamEvent`]s
///
/// The sequence ends after the first `Terminal`, at EOF, or after yielding a
/// single unrecoverable error. Malformed data lines are logged and skipped.
/// A line growing past [`MAX_LINE_BYTES`] without a newline is a `ReadFailed`.
pub fn decode_events(input: ByteStream) -> BoxStream<'static, Result<StreamEvent, UpstreamError>> {
    let state = DecoderState {
        input,
        buf: Vec::new(),
        scanned: 0,
        eof: false,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            let line = if state.eof {
                match state.take_remainder() {
                    Some(line) => line,
                    None => return None,
                }
            } else if let Some(line) = state.take_line() {
                line
            } else if state.buf.len() > MAX_LINE_BYTES {
                state.finished = true;
                let e = UpstreamError::ReadFailed(format!(
                    "stream line exceeds {MAX_LINE_BYTES} bytes without a newline"
                ));
                return Some((Err(e), state));
            } else {
                match state.input.next().await {
                    Some(Ok(bytes)) => {
                        state.buf.extend_from_slice(&bytes);
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                    None => {
                        state.eof = true;
                    }
                }
                continue;
            };

            match parse_line(&line) {
                Ok(Some(event)) => {
                    if event.is_terminal() {
                        // Anything after the sentinel is discarded
                        debug!("Received end-of-stream sentinel");
                        state.finished = true;
                    }
                    return Some((Ok(event), state));
                }
                Ok(None) => continue,
                Err(e) if e.is_recoverable() => {
                    warn!(
                        error_type = e.category(),
                        error_message = %e,
                        "Skipping malformed stream line"
                    );
                    continue;
                }
                Err(e) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
            }
        }
    })
    .boxed()
}
