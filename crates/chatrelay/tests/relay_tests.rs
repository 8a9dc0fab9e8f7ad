//! Integration tests for the relay pipeline against a mocked HTTP upstream
//!
//! Each test points an `OpenAiUpstream` at a wiremock server and drives a
//! `RelayStream` to completion, checking frames and the end reason.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

use chatrelay::config::ChatConfig;
use chatrelay::relay::{
    ChatStreamRequest, Delivery, EndReason, Frame, FrameKind, GenerationRequest, OpenAiUpstream,
    PipelineSettings, RelayPipeline, RelayStream, TIMEOUT_MESSAGE,
};
use chatrelay::testing::{chunk_line, sse_body};

// =============================================================================
// Test Fixtures
// =============================================================================

fn chat_config(server: &MockServer) -> ChatConfig {
    ChatConfig {
        base_url: format!("{}/v1", server.uri()),
        api_key: Some("sk-test".to_string()),
        model: "test-model".to_string(),
        timeout_secs: 5,
        ..ChatConfig::default()
    }
}

fn create_pipeline(server: &MockServer, session_timeout: Duration) -> RelayPipeline {
    let upstream = OpenAiUpstream::new(&chat_config(server)).unwrap();
    RelayPipeline::new(
        Arc::new(upstream),
        PipelineSettings {
            queue_capacity: 8,
            session_timeout,
            error_send_timeout: Duration::from_millis(200),
        },
    )
}

fn request(prompt: &str) -> GenerationRequest {
    GenerationRequest::new(prompt, 0.7, 256).unwrap()
}

fn sse_response(lines: &[&str]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(sse_body(lines))
}

async fn drain(stream: &mut RelayStream) -> Vec<Frame> {
    let mut frames = Vec::new();
    loop {
        match stream.next_delivery().await {
            Delivery::KeepOpen(frame) => frames.push(frame),
            Delivery::Close(Some(frame)) => {
                frames.push(frame);
                return frames;
            }
            Delivery::Close(None) => return frames,
        }
    }
}

// =============================================================================
// Successful Streams
// =============================================================================

mod completion_tests {
    use super::*;

    #[tokio::test]
    async fn test_single_fragment_then_done() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/v1/chat/completions"))
            .and(matchers::header("authorization", "Bearer sk-test"))
            .and(matchers::header("accept", "text/event-stream"))
            .and(matchers::body_partial_json(serde_json::json!({
                "model": "test-model",
                "stream": true,
                "max_tokens": 256,
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .respond_with(sse_response(&[&chunk_line("Hi"), "data: [DONE]"]))
            .expect(1)
            .mount(&server)
            .await;

        let pipeline = create_pipeline(&server, Duration::from_secs(5));
        let mut stream = pipeline.start(request("hello"), CancellationToken::new());
        let frames = drain(&mut stream).await;

        assert_eq!(frames, vec![Frame::message("Hi")]);
        assert_eq!(stream.outcome(), Some(EndReason::Completed));
    }

    #[tokio::test]
    async fn test_fragments_arrive_in_upstream_order() {
        let server = MockServer::start().await;
        let words = ["The", " quick", " brown", " fox", " jumps", " over", " the", " dog"];
        let mut lines: Vec<String> = words.iter().map(|w| chunk_line(w)).collect();
        lines.push("data: [DONE]".to_string());
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();

        Mock::given(matchers::method("POST"))
            .respond_with(sse_response(&refs))
            .mount(&server)
            .await;

        let pipeline = create_pipeline(&server, Duration::from_secs(5));
        let mut stream = pipeline.start(request("story"), CancellationToken::new());
        let frames = drain(&mut stream).await;

        let text: String = frames.iter().map(|f| f.data.as_str()).collect();
        assert_eq!(text, "The quick brown fox jumps over the dog");
        assert!(frames.iter().all(|f| f.kind == FrameKind::Message));
    }

    #[tokio::test]
    async fn test_malformed_and_empty_lines_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(sse_response(&[
                r#"data: {"id":"1","choices":[{"delta":{"role":"assistant"}}]}"#,
                &chunk_line("a"),
                "data: {garbage",
                ": keep-alive comment",
                &chunk_line(""),
                &chunk_line("b"),
                "data: [DONE]",
            ]))
            .mount(&server)
            .await;

        let pipeline = create_pipeline(&server, Duration::from_secs(5));
        let mut stream = pipeline.start(request("hello"), CancellationToken::new());
        let frames = drain(&mut stream).await;

        assert_eq!(frames, vec![Frame::message("a"), Frame::message("b")]);
        assert_eq!(stream.outcome(), Some(EndReason::Completed));
    }

    #[tokio::test]
    async fn test_body_without_sentinel_ends_as_producer_closed() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(sse_response(&[&chunk_line("cut off")]))
            .mount(&server)
            .await;

        let pipeline = create_pipeline(&server, Duration::from_secs(5));
        let mut stream = pipeline.start(request("hello"), CancellationToken::new());
        let frames = drain(&mut stream).await;

        assert_eq!(frames, vec![Frame::message("cut off")]);
        assert_eq!(stream.outcome(), Some(EndReason::ProducerClosed));
    }

    #[tokio::test]
    async fn test_explicit_zero_temperature_is_forwarded() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::body_partial_json(serde_json::json!({"temperature": 0.0})))
            .respond_with(sse_response(&["data: [DONE]"]))
            .expect(1)
            .mount(&server)
            .await;

        let body: ChatStreamRequest =
            serde_json::from_str(r#"{"message":"hello","temperature":0}"#).unwrap();
        let request = body
            .into_generation_request(&ChatConfig::default())
            .unwrap();

        let pipeline = create_pipeline(&server, Duration::from_secs(5));
        let mut stream = pipeline.start(request, CancellationToken::new());
        assert!(drain(&mut stream).await.is_empty());
        assert_eq!(stream.outcome(), Some(EndReason::Completed));
    }
}

// =============================================================================
// Failures, Timeouts and Disconnects
// =============================================================================

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_bad_status_yields_one_error_frame() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let pipeline = create_pipeline(&server, Duration::from_secs(5));
        let mut stream = pipeline.start(request("hello"), CancellationToken::new());
        let frames = drain(&mut stream).await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, FrameKind::Error);
        assert!(frames[0].data.contains("overloaded"));
        assert!(frames[0].data.contains("500"));
        assert_eq!(stream.outcome(), Some(EndReason::Errored));
        assert_eq!(stream.next_delivery().await, Delivery::Close(None));
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out_at_deadline() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(sse_response(&["data: [DONE]"]).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let timeout = Duration::from_millis(300);
        let pipeline = create_pipeline(&server, timeout);

        let started = Instant::now();
        let mut stream = pipeline.start(request("hello"), CancellationToken::new());
        let frames = drain(&mut stream).await;
        let elapsed = started.elapsed();

        assert!(elapsed >= timeout);
        assert!(elapsed < Duration::from_secs(5));
        assert_eq!(frames, vec![Frame::error(TIMEOUT_MESSAGE)]);
        assert_eq!(stream.outcome(), Some(EndReason::TimedOut));
    }

    #[tokio::test]
    async fn test_disconnect_while_waiting_for_upstream() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(sse_response(&["data: [DONE]"]).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let pipeline = create_pipeline(&server, Duration::from_secs(30));
        let disconnect = CancellationToken::new();
        let mut stream = pipeline.start(request("hello"), disconnect.clone());

        let canceller = disconnect.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let frames = drain(&mut stream).await;

        assert!(frames.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(stream.outcome(), Some(EndReason::Disconnected));

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.disconnected, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_yields_error_frame() {
        let config = ChatConfig {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            timeout_secs: 2,
            ..ChatConfig::default()
        };
        let pipeline = RelayPipeline::new(
            Arc::new(OpenAiUpstream::new(&config).unwrap()),
            PipelineSettings::default(),
        );

        let mut stream = pipeline.start(request("hello"), CancellationToken::new());
        let frames = drain(&mut stream).await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, FrameKind::Error);
        assert_eq!(stream.outcome(), Some(EndReason::Errored));
    }
}
