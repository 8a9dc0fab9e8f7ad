//! Upstream generation service client
//!
//! Implements [`UpstreamCaller`] for any OpenAI-compatible
//! `POST {base_url}/chat/completions` endpoint with `stream: true`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::config::ChatConfig;
use crate::error::{RelayError, Result};

use super::error::UpstreamError;
use super::types::GenerationRequest;

/// Raw response body chunks from the upstream service
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, UpstreamError>>;

/// Issues one generation request and hands back the streaming body
///
/// The returned stream must end as soon as `cancel` fires, even while a read
/// is pending, and dropping it must release the upstream connection.
#[async_trait]
pub trait UpstreamCaller: Send + Sync {
    async fn open_stream(
        &self,
        request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<ByteStream, UpstreamError>;

    /// Caller name for logging
    fn name(&self) -> &'static str;
}

/// OpenAI-compatible chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

/// Streaming client for OpenAI-compatible chat completion APIs
#[derive(Debug, Clone)]
pub struct OpenAiUpstream {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    model: String,
    response_timeout: Duration,
}

impl OpenAiUpstream {
    /// Build a client from the chat configuration
    ///
    /// `timeout_secs` bounds connecting and waiting for the response head.
    /// Body reads are bounded by the relay session deadline instead, so a
    /// long generation is not cut off by the client.
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| RelayError::Config(format!("Invalid chat endpoint '{endpoint}': {e}")))?;

        let client = Client::builder()
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| RelayError::Upstream(format!("Failed to create HTTP client: {e}")))?;

        let api_key = config.resolve_api_key();
        if api_key.is_none() {
            tracing::warn!(
                "No API key configured (chat.api_key or ${}); sending unauthenticated requests",
                config.api_key_env
            );
        }

        info!(
            "OpenAiUpstream initialized with model: {}, endpoint: {}",
            config.model, endpoint
        );

        Ok(Self {
            client,
            endpoint,
            api_key,
            model: config.model.clone(),
            response_timeout: config.timeout(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<reqwest::Response, UpstreamError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: request.prompt(),
            }],
            temperature: request.temperature(),
            max_tokens: request.max_tokens(),
            stream: request.stream(),
        };

        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = tokio::time::timeout(self.response_timeout, builder.send())
            .await
            .map_err(|_| {
                UpstreamError::ConnectFailed(format!(
                    "no response within {}s",
                    self.response_timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::ConnectFailed(format!("Request timed out: {e}"))
                } else if e.is_connect() {
                    UpstreamError::ConnectFailed(format!("Failed to connect to upstream: {e}"))
                } else {
                    UpstreamError::ConnectFailed(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read error body: {e}>"));
            return Err(UpstreamError::BadStatus {
                code: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl UpstreamCaller for OpenAiUpstream {
    async fn open_stream(
        &self,
        request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<ByteStream, UpstreamError> {
        debug!("Sending streaming request to {}", self.endpoint);

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(UpstreamError::ConnectFailed(
                    "request cancelled before upstream responded".to_string(),
                ));
            }
            response = self.send(request) => response?,
        };

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| UpstreamError::ReadFailed(e.to_string())))
            .take_until(cancel.cancelled_owned());

        Ok(body.boxed())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
