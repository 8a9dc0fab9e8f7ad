//! Test utilities for chatrelay - scripted upstreams and stream fixtures
//!
//! [`ScriptedUpstream`] replays a fixed body through the [`UpstreamCaller`]
//! seam so relay sessions can be exercised without a network. A
//! [`StreamProbe`] observes how the relay consumed that body.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::relay::{ByteStream, GenerationRequest, UpstreamCaller, UpstreamError};

/// One upstream `data:` line carrying `text` as the delta content
pub fn chunk_line(text: &str) -> String {
    let payload = serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion.chunk",
        "created": 1_700_000_000,
        "choices": [{ "index": 0, "delta": { "content": text } }],
    });
    format!("data: {payload}")
}

/// Full SSE body for `lines`, one blank line after each
pub fn sse_body(lines: &[&str]) -> String {
    lines.iter().map(|line| format!("{line}\n\n")).collect()
}

/// Shared view of how a scripted body was consumed
#[derive(Debug, Clone, Default)]
pub struct StreamProbe {
    opened: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
    dropped: Arc<AtomicBool>,
}

impl StreamProbe {
    /// Number of `open_stream` calls that returned a body
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of times the body was polled
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Wait until the body has been dropped; false if `timeout` passes first
    pub async fn wait_dropped(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.is_dropped() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

/// An [`UpstreamCaller`] that replays a scripted body
#[derive(Debug, Clone, Default)]
pub struct ScriptedUpstream {
    chunks: Vec<Result<Bytes, UpstreamError>>,
    failure: Option<UpstreamError>,
    hang: bool,
    open_delay: Option<Duration>,
    probe: StreamProbe,
}

impl ScriptedUpstream {
    /// Body made of raw chunks, delivered one per poll
    pub fn from_chunks(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks
                .iter()
                .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
                .collect(),
            ..Self::default()
        }
    }

    /// Body made of SSE lines, one line per chunk
    pub fn from_lines(lines: &[&str]) -> Self {
        let chunks: Vec<String> = lines.iter().map(|line| format!("{line}\n\n")).collect();
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        Self::from_chunks(&refs)
    }

    /// `open_stream` fails with `error`
    pub fn failing(error: UpstreamError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    /// After the scripted chunks, the body never yields again
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// After the scripted chunks, the body fails with a read error
    pub fn with_read_error(mut self, message: &str) -> Self {
        self.chunks
            .push(Err(UpstreamError::ReadFailed(message.to_string())));
        self
    }

    /// Delay before the response head "arrives"
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    pub fn probe(&self) -> StreamProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl UpstreamCaller for ScriptedUpstream {
    async fn open_stream(
        &self,
        _request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, UpstreamError> {
        if let Some(delay) = self.open_delay {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(UpstreamError::ConnectFailed("cancelled".to_string()));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        self.probe.opened.fetch_add(1, Ordering::SeqCst);
        let body = ScriptedBody {
            chunks: self.chunks.iter().cloned().collect(),
            hang: self.hang,
            probe: self.probe.clone(),
        };

        Ok(body.take_until(cancel.cancelled_owned()).boxed())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedBody {
    chunks: VecDeque<Result<Bytes, UpstreamError>>,
    hang: bool,
    probe: StreamProbe,
}

impl Stream for ScriptedBody {
    type Item = Result<Bytes, UpstreamError>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        match self.chunks.pop_front() {
            Some(chunk) => Poll::Ready(Some(chunk)),
            None if self.hang => Poll::Pending,
            None => Poll::Ready(None),
        }
    }
}

impl Drop for ScriptedBody {
    fn drop(&mut self) {
        self.probe.dropped.store(true, Ordering::SeqCst);
    }
}
