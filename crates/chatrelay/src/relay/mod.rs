//! Streaming relay core
//!
//! - [`decoder`]: upstream bytes → [`StreamEvent`]s
//! - [`upstream`]: the [`UpstreamCaller`] seam and its HTTP implementation
//! - [`session`]: producer/consumer pipeline with cancellation and deadline
//! - [`sse`]: adapter from a [`RelayStream`] to an axum SSE body

pub mod decoder;
pub mod error;
pub mod session;
pub mod sse;
pub mod stats;
pub mod types;
pub mod upstream;

pub use decoder::{DATA_PREFIX, DONE_SENTINEL, decode_events, parse_line};
pub use error::UpstreamError;
pub use session::{
    Delivery, Frame, FrameKind, PipelineSettings, RelayPipeline, RelayStream, SessionState,
    TIMEOUT_MESSAGE,
};
pub use sse::relay_to_sse;
pub use stats::{RelayStats, RelayStatsSnapshot};
pub use types::{
    ChatStreamRequest, EndReason, Fragment, GenerationRequest, RequestError, StreamEvent, Terminal,
};
pub use upstream::{ByteStream, OpenAiUpstream, UpstreamCaller};
