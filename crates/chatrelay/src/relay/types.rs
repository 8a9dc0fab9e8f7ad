//! Request and event types flowing through the relay

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::config::ChatConfig;

/// Validation failures for an inbound generation request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    #[error("message cannot be empty")]
    EmptyPrompt,

    #[error("temperature must be a finite number >= 0, got {0}")]
    InvalidTemperature(f32),

    #[error("max_tokens must be > 0, got {0}")]
    InvalidMaxTokens(i64),
}

/// Inbound JSON body of `POST /api/v1/chat/stream`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatStreamRequest {
    pub message: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<i64>,
    /// Accepted for client compatibility; this endpoint always streams
    #[serde(default)]
    pub stream: Option<bool>,
}

impl ChatStreamRequest {
    /// Validate the body and fill unset sampling parameters from config
    pub fn into_generation_request(
        self,
        defaults: &ChatConfig,
    ) -> Result<GenerationRequest, RequestError> {
        let temperature = self.temperature.unwrap_or(defaults.temperature);
        let max_tokens = match self.max_tokens {
            Some(n) if n <= 0 || n > u32::MAX as i64 => {
                return Err(RequestError::InvalidMaxTokens(n));
            }
            Some(n) => n as u32,
            None => defaults.max_tokens,
        };

        if self.stream == Some(false) {
            debug!("Ignoring stream=false, responses are always streamed");
        }

        GenerationRequest::new(self.message, temperature, max_tokens)
    }
}

/// A validated, immutable generation request
///
/// Requests built here always stream; the flag is carried into the upstream
/// call body.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    prompt: String,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

impl GenerationRequest {
    pub fn new(
        prompt: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Self, RequestError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(RequestError::EmptyPrompt);
        }
        if !temperature.is_finite() || temperature < 0.0 {
            return Err(RequestError::InvalidTemperature(temperature));
        }
        if max_tokens == 0 {
            return Err(RequestError::InvalidMaxTokens(0));
        }

        Ok(Self {
            prompt,
            temperature,
            max_tokens,
            stream: true,
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn stream(&self) -> bool {
        self.stream
    }
}

/// One incremental unit of generated text
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    /// Upstream completion id
    pub id: String,
    pub text: String,
    /// Upstream `created` timestamp (unix seconds)
    pub created: i64,
}

/// How the producer side ended the event sequence
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    /// The upstream sent its end-of-stream sentinel
    Completed,
    /// The upstream call or stream failed; carries a message for the consumer
    Errored(String),
}

/// Decoded unit moved from the producer to the consumer
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Fragment(Fragment),
    Terminal(Terminal),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Terminal(_))
    }
}

/// Why a relay session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Completed,
    Errored,
    Disconnected,
    TimedOut,
    /// The producer closed the queue without sending a terminal event
    ProducerClosed,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Completed => "completed",
            EndReason::Errored => "errored",
            EndReason::Disconnected => "disconnected",
            EndReason::TimedOut => "timed_out",
            EndReason::ProducerClosed => "producer_closed",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
