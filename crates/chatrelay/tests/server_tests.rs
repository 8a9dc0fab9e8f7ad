//! Integration tests for the HTTP surface
//!
//! Chat streaming and the certificate facade are exercised through the full
//! router with `tower::ServiceExt::oneshot`; one test runs a real listener.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

use chatrelay::config::Config;
use chatrelay::ledger::{MockLedger, SEED_CERTIFICATE_ID, hash_content};
use chatrelay::relay::{OpenAiUpstream, UpstreamError};
use chatrelay::server::{AppState, RelayServer, create_router};
use chatrelay::testing::{ScriptedUpstream, chunk_line, sse_body};

// =============================================================================
// Test Fixtures
// =============================================================================

fn create_test_state(upstream: ScriptedUpstream) -> Arc<AppState> {
    Arc::new(AppState::new(
        Config::default(),
        Arc::new(upstream),
        Arc::new(MockLedger::new(11155111)),
    ))
}

fn create_test_app() -> Router {
    create_router(create_test_state(ScriptedUpstream::default()))
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_string(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

/// Split an SSE body into (event, data) pairs
fn parse_sse(body: &str) -> Vec<(String, String)> {
    body.split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .map(|block| {
            let mut event = String::new();
            let mut data = Vec::new();
            for line in block.lines() {
                if let Some(name) = line.strip_prefix("event: ") {
                    event = name.to_string();
                } else if let Some(value) = line.strip_prefix("data: ") {
                    data.push(value);
                }
            }
            (event, data.join("\n"))
        })
        .collect()
}

// =============================================================================
// Chat Streaming Tests
// =============================================================================

mod chat_stream_tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_relays_fragments_as_message_events() {
        let upstream = ScriptedUpstream::from_lines(&[
            &chunk_line("Hel"),
            &chunk_line("lo"),
            "data: [DONE]",
        ]);
        let state = create_test_state(upstream);
        let app = create_router(Arc::clone(&state));

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/v1/chat/stream",
                serde_json::json!({"message": "hi"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let events = parse_sse(&body_string(response).await);
        assert_eq!(
            events,
            vec![
                ("message".to_string(), "Hel".to_string()),
                ("message".to_string(), "lo".to_string()),
            ]
        );

        let stats = state.pipeline.stats().snapshot();
        assert_eq!(stats.started, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_final_error_event() {
        let upstream = ScriptedUpstream::failing(UpstreamError::BadStatus {
            code: 500,
            body: "overloaded".to_string(),
        });
        let app = create_router(create_test_state(upstream));

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/v1/chat/stream",
                serde_json::json!({"message": "hi"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let events = parse_sse(&body_string(response).await);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "error");
        let payload: serde_json::Value = serde_json::from_str(&events[0].1).unwrap();
        assert!(payload["error"].as_str().unwrap().contains("overloaded"));
    }

    #[tokio::test]
    async fn test_missing_message_is_bad_request() {
        let response = create_test_app()
            .oneshot(json_request(
                "POST",
                "/api/v1/chat/stream",
                serde_json::json!({"temperature": 0.5}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "invalid_request");
    }

    #[tokio::test]
    async fn test_negative_temperature_is_bad_request() {
        let response = create_test_app()
            .oneshot(json_request(
                "POST",
                "/api/v1/chat/stream",
                serde_json::json!({"message": "hi", "temperature": -1.0}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_endpoint_reports_counters() {
        let state = create_test_state(ScriptedUpstream::from_lines(&["data: [DONE]"]));

        let response = create_router(Arc::clone(&state))
            .oneshot(json_request(
                "POST",
                "/api/v1/chat/stream",
                serde_json::json!({"message": "hi"}),
            ))
            .await
            .unwrap();
        body_string(response).await;

        let response = create_router(state)
            .oneshot(get_request("/api/v1/chat/stats"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["started"], 1);
        assert_eq!(json["completed"], 1);
        assert_eq!(json["active"], 0);
    }
}

// =============================================================================
// Certificate Facade Tests
// =============================================================================

mod ledger_route_tests {
    use super::*;

    #[tokio::test]
    async fn test_network_status() {
        let response = create_test_app()
            .oneshot(get_request("/api/blockchain/status"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["network"], "Sepolia Testnet");
        assert_eq!(json["is_connected"], true);
        assert!(json["block_height"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_create_then_verify_certificate() {
        let app = create_test_app();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/certificate",
                serde_json::json!({"id": "cert_100", "content": "consultation notes"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = body_json(response).await;
        assert_eq!(created["certificate"]["status"], "confirmed");
        assert_eq!(
            created["certificate"]["hash"],
            hash_content("consultation notes")
        );

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/certificate/verify",
                serde_json::json!({"cert_id": "cert_100"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let verified = body_json(response).await;
        assert_eq!(verified["valid"], true);
        assert_eq!(verified["certificate"]["id"], "cert_100");
    }

    #[tokio::test]
    async fn test_duplicate_certificate_conflicts() {
        let response = create_test_app()
            .oneshot(json_request(
                "POST",
                "/api/certificate",
                serde_json::json!({"id": SEED_CERTIFICATE_ID, "content": "again"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["error"]["type"], "conflict");
    }

    #[tokio::test]
    async fn test_create_without_content_is_bad_request() {
        let response = create_test_app()
            .oneshot(json_request(
                "POST",
                "/api/certificate",
                serde_json::json!({"id": "cert_101"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_verify_unknown_is_not_found() {
        let response = create_test_app()
            .oneshot(json_request(
                "POST",
                "/api/certificate/verify",
                serde_json::json!({"cert_id": "nope"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_with_statistics_and_filter() {
        let app = create_test_app();

        let response = app
            .clone()
            .oneshot(get_request("/api/certificate"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["certificates"].as_array().unwrap().len(), 1);
        assert_eq!(json["statistics"]["total"], 1);
        assert_eq!(json["statistics"]["confirmed"], 1);
        assert_eq!(json["statistics"]["pending"], 0);

        let response = app
            .clone()
            .oneshot(get_request("/api/certificate?status=pending"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert!(json["certificates"].as_array().unwrap().is_empty());
        assert_eq!(json["statistics"]["total"], 0);

        let response = app
            .oneshot(get_request("/api/certificate?status=bogus"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_certificate_by_id() {
        let app = create_test_app();

        let response = app
            .clone()
            .oneshot(get_request("/api/certificate/cert_001"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["certificate"]["id"], "cert_001");
        assert_eq!(json["valid"], true);

        let response = app
            .oneshot(get_request("/api/certificate/cert_404"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

// =============================================================================
// End-to-End Over TCP
// =============================================================================

mod end_to_end_tests {
    use super::*;

    #[tokio::test]
    async fn test_relay_over_real_listener() {
        let upstream_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body(&[&chunk_line("Hi"), "data: [DONE]"])),
            )
            .mount(&upstream_server)
            .await;

        let mut config = Config::default();
        config.chat.base_url = format!("{}/v1", upstream_server.uri());
        config.chat.api_key = Some("sk-test".to_string());

        let upstream = Arc::new(OpenAiUpstream::new(&config.chat).unwrap());
        let ledger = Arc::new(MockLedger::new(config.ledger.chain_id));
        let server = RelayServer::new(config, upstream, ledger);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server
                .serve_on(listener, async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{addr}/api/v1/chat/stream"))
            .json(&serde_json::json!({"message": "hello"}))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );
        let body = response.text().await.unwrap();
        assert_eq!(
            parse_sse(&body),
            vec![("message".to_string(), "Hi".to_string())]
        );

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
