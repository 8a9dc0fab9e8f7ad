//! Relay sessions: one producer task per request feeding a bounded queue
//!
//! ```text
//! RelayPipeline::start
//!   ├─ producer task: UpstreamCaller → decode_events → mpsc::Sender
//!   └─ RelayStream (consumer): select { disconnect | queue | deadline }
//! ```
//!
//! The producer owns the only `Sender`, so the queue closes exactly when the
//! producer exits. A terminal event that cannot be queued in time is handed
//! over on a oneshot instead, which the consumer reads once the queue closes.
//! The consumer owns the session token; every way a session can end goes
//! through [`RelayStream::finish`], which cancels the token once.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;

use super::decoder::decode_events;
use super::error::UpstreamError;
use super::stats::RelayStats;
use super::types::{EndReason, GenerationRequest, StreamEvent, Terminal};
use super::upstream::UpstreamCaller;

/// Message delivered to the consumer when the session deadline passes
pub const TIMEOUT_MESSAGE: &str = "request timed out";

/// Tuning for a [`RelayPipeline`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub queue_capacity: usize,
    pub session_timeout: Duration,
    pub error_send_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for PipelineSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity.max(1),
            session_timeout: config.session_timeout(),
            error_send_timeout: config.error_send_timeout(),
        }
    }
}

/// Event name of an outbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Message,
    Error,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Message => "message",
            FrameKind::Error => "error",
        }
    }
}

/// One unit written to the consumer transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub data: String,
}

impl Frame {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Message,
            data: text.into(),
        }
    }

    /// Error frames carry `{"error": "..."}`
    pub fn error(message: &str) -> Self {
        Self {
            kind: FrameKind::Error,
            data: serde_json::json!({ "error": message }).to_string(),
        }
    }
}

/// What the serving side should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Write the frame and poll again
    KeepOpen(Frame),
    /// Write the frame, if any, then close the transport
    Close(Option<Frame>),
}

/// Lifecycle of a session as seen by the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Streaming,
    Closed(EndReason),
}

/// Builds relay sessions around an injected upstream caller
pub struct RelayPipeline {
    upstream: Arc<dyn UpstreamCaller>,
    settings: PipelineSettings,
    stats: Arc<RelayStats>,
}

impl RelayPipeline {
    pub fn new(upstream: Arc<dyn UpstreamCaller>, settings: PipelineSettings) -> Self {
        Self {
            upstream,
            settings,
            stats: Arc::new(RelayStats::new()),
        }
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Start a session and return its consumer side
    ///
    /// Cancelling `disconnect` ends the session with
    /// [`EndReason::Disconnected`]; so does dropping the returned stream
    /// before it closed.
    pub fn start(&self, request: GenerationRequest, disconnect: CancellationToken) -> RelayStream {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.settings.queue_capacity);
        let (fallback_tx, fallback_rx) = oneshot::channel();
        let cancel = disconnect.child_token();
        let deadline = Instant::now() + self.settings.session_timeout;

        self.stats.record_start();
        info!(
            session_id = %session_id,
            upstream = self.upstream.name(),
            max_tokens = request.max_tokens(),
            "Relay session started"
        );

        let producer = Producer {
            session_id,
            upstream: Arc::clone(&self.upstream),
            request,
            tx,
            fallback: fallback_tx,
            cancel: cancel.clone(),
            deadline,
            error_send_timeout: self.settings.error_send_timeout,
        };
        tokio::spawn(producer.run());

        RelayStream {
            session_id,
            rx,
            fallback: fallback_rx,
            cancel,
            disconnect,
            deadline,
            state: SessionState::Open,
            stats: Arc::clone(&self.stats),
        }
    }
}

enum ProducerExit {
    Finished(Terminal),
    Eof,
    Stopped,
}

struct Producer {
    session_id: Uuid,
    upstream: Arc<dyn UpstreamCaller>,
    request: GenerationRequest,
    tx: mpsc::Sender<StreamEvent>,
    fallback: oneshot::Sender<Terminal>,
    cancel: CancellationToken,
    deadline: Instant,
    error_send_timeout: Duration,
}

impl Producer {
    async fn run(self) {
        let terminal = match self.relay_events().await {
            Ok(ProducerExit::Finished(terminal)) => {
                debug!(session_id = %self.session_id, "Producer finished at sentinel");
                terminal
            }
            Ok(ProducerExit::Eof) => {
                debug!(session_id = %self.session_id, "Upstream closed without sentinel");
                return;
            }
            Ok(ProducerExit::Stopped) => {
                debug!(session_id = %self.session_id, "Producer stopped by cancellation or deadline");
                return;
            }
            Err(e) if self.cancel.is_cancelled() => {
                debug!(session_id = %self.session_id, error_message = %e, "Upstream error after cancellation");
                return;
            }
            Err(e) => {
                error!(
                    session_id = %self.session_id,
                    error_type = e.category(),
                    error_message = %e,
                    "Upstream failed, surfacing error to consumer"
                );
                Terminal::Errored(e.user_message())
            }
        };
        // Consumes `self`; the queue closes when `tx` drops with it
        self.push_terminal(terminal).await;
    }

    /// Resolves once the session is cancelled or past its deadline
    async fn stopped(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep_until(self.deadline) => {}
        }
    }

    async fn relay_events(&self) -> Result<ProducerExit, UpstreamError> {
        let body = tokio::select! {
            _ = self.stopped() => return Ok(ProducerExit::Stopped),
            body = self.upstream.open_stream(&self.request, self.cancel.clone()) => body?,
        };

        let mut events = decode_events(body);
        let mut fragments = 0usize;
        let mut transcript = String::new();

        loop {
            let next = tokio::select! {
                _ = self.stopped() => return Ok(ProducerExit::Stopped),
                next = events.next() => next,
            };

            let event = match next {
                None => {
                    debug!(
                        session_id = %self.session_id,
                        fragments,
                        chars = transcript.chars().count(),
                        "Upstream stream ended"
                    );
                    return Ok(ProducerExit::Eof);
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(event)) => event,
            };

            match event {
                StreamEvent::Fragment(fragment) => {
                    fragments += 1;
                    transcript.push_str(&fragment.text);
                    if !self.push(StreamEvent::Fragment(fragment)).await {
                        return Ok(ProducerExit::Stopped);
                    }
                }
                StreamEvent::Terminal(terminal) => {
                    debug!(
                        session_id = %self.session_id,
                        fragments,
                        chars = transcript.chars().count(),
                        "Upstream stream completed"
                    );
                    return Ok(ProducerExit::Finished(terminal));
                }
            }
        }
    }

    /// Enqueue a fragment, waiting for room; false once the session is over
    async fn push(&self, event: StreamEvent) -> bool {
        tokio::select! {
            _ = self.stopped() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }

    /// Enqueue a terminal event, waiting at most `error_send_timeout` for room
    ///
    /// On timeout the event goes to the fallback slot, which the consumer
    /// drains after every queued fragment.
    async fn push_terminal(self, terminal: Terminal) {
        let event = StreamEvent::Terminal(terminal);
        let sent = tokio::select! {
            _ = self.cancel.cancelled() => return,
            sent = self.tx.send_timeout(event, self.error_send_timeout) => sent,
        };

        if let Err(SendTimeoutError::Timeout(StreamEvent::Terminal(terminal))) = sent {
            warn!(
                session_id = %self.session_id,
                "Queue still full after {:?}, handing terminal event over out of band",
                self.error_send_timeout
            );
            // Err only if the consumer is gone
            let _ = self.fallback.send(terminal);
        }
    }
}

enum Signal {
    Disconnected,
    Event(Option<StreamEvent>),
    Deadline,
}

/// Consumer side of a relay session
pub struct RelayStream {
    session_id: Uuid,
    rx: mpsc::Receiver<StreamEvent>,
    fallback: oneshot::Receiver<Terminal>,
    cancel: CancellationToken,
    disconnect: CancellationToken,
    deadline: Instant,
    state: SessionState,
    stats: Arc<RelayStats>,
}

impl RelayStream {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Why the session ended, once it has
    pub fn outcome(&self) -> Option<EndReason> {
        match self.state {
            SessionState::Closed(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed(_))
    }

    /// Wait for the next thing to write to the consumer
    ///
    /// After a `Delivery::Close` every further call returns `Close(None)`.
    pub async fn next_delivery(&mut self) -> Delivery {
        if self.is_closed() {
            return Delivery::Close(None);
        }

        let signal = tokio::select! {
            _ = self.disconnect.cancelled() => Signal::Disconnected,
            event = self.rx.recv() => Signal::Event(event),
            _ = tokio::time::sleep_until(self.deadline) => Signal::Deadline,
        };

        match signal {
            Signal::Disconnected => {
                self.finish(EndReason::Disconnected);
                Delivery::Close(None)
            }
            Signal::Event(Some(StreamEvent::Fragment(fragment))) => {
                self.state = SessionState::Streaming;
                Delivery::KeepOpen(Frame::message(fragment.text))
            }
            Signal::Event(Some(StreamEvent::Terminal(terminal))) => self.close_with(terminal),
            Signal::Event(None) => match self.fallback.try_recv() {
                Ok(terminal) => self.close_with(terminal),
                // The producer also stops at the deadline; report that as a timeout
                Err(_) if Instant::now() >= self.deadline => self.time_out(),
                Err(_) => {
                    self.finish(EndReason::ProducerClosed);
                    Delivery::Close(None)
                }
            },
            Signal::Deadline => self.time_out(),
        }
    }

    fn close_with(&mut self, terminal: Terminal) -> Delivery {
        match terminal {
            Terminal::Completed => {
                self.finish(EndReason::Completed);
                Delivery::Close(None)
            }
            Terminal::Errored(message) => {
                self.finish(EndReason::Errored);
                Delivery::Close(Some(Frame::error(&message)))
            }
        }
    }

    fn time_out(&mut self) -> Delivery {
        self.finish(EndReason::TimedOut);
        Delivery::Close(Some(Frame::error(TIMEOUT_MESSAGE)))
    }

    /// End the session; only the first call has any effect
    fn finish(&mut self, reason: EndReason) {
        if self.is_closed() {
            return;
        }
        self.state = SessionState::Closed(reason);
        self.cancel.cancel();
        self.stats.record_end(reason);

        match reason {
            EndReason::Completed | EndReason::Disconnected => {
                info!(session_id = %self.session_id, reason = %reason, "Relay session ended");
            }
            EndReason::Errored | EndReason::TimedOut | EndReason::ProducerClosed => {
                warn!(session_id = %self.session_id, reason = %reason, "Relay session ended");
            }
        }
    }
}

impl Drop for RelayStream {
    fn drop(&mut self) {
        self.finish(EndReason::Disconnected);
    }
}
