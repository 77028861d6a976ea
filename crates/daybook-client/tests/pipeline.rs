//! End-to-end request pipeline tests against a mock HTTP server
//!
//! Tests cover:
//! - Breaker opening after consecutive server failures
//! - Fail-fast validation errors
//! - Offline queue replay order, including replays gated by an open breaker
//! - Retry and recovery across transient failures

use daybook_client::{
    ClientConfig, DrainHalt, ErrorKind, MemoryStore, ReqwestTransport, RequestExecutor,
    RequestOptions,
};
use daybook_resilience::{CircuitState, ManualClock};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn executor(server: &MockServer, config: ClientConfig) -> (RequestExecutor, Arc<ManualClock>) {
    let config = ClientConfig {
        base_url: server.uri(),
        ..config
    };
    let transport = Arc::new(ReqwestTransport::new(&config).unwrap());
    let clock = Arc::new(ManualClock::new());
    let exec = RequestExecutor::new(&config, transport, MemoryStore::shared(), clock.clone());
    (exec, clock)
}

fn entries_url(server: &MockServer) -> String {
    format!("{}/api/entries", server.uri())
}

// ============================================================================
// Circuit Breaker
// ============================================================================

mod breaker_tests {
    use super::*;

    #[tokio::test]
    async fn test_three_503s_open_the_breaker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/entries"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let config = ClientConfig::default().with_breaker(3, Duration::from_secs(60));
        let (exec, _) = executor(&server, config);
        let url = entries_url(&server);

        for _ in 0..3 {
            let err = exec.execute(&url, RequestOptions::get(), 0).await.unwrap_err();
            assert_eq!(err.kind, ErrorKind::Server);
        }
        assert_eq!(exec.breaker().state(), CircuitState::Open);

        let err = exec.execute(&url, RequestOptions::get(), 0).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
        assert_eq!(err.context.circuit_state, Some(CircuitState::Open));

        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_breaker_recovers_after_reset_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/entries"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/entries"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let config = ClientConfig::default().with_breaker(2, Duration::from_secs(30));
        let (exec, clock) = executor(&server, config);
        let url = entries_url(&server);

        for _ in 0..2 {
            let _ = exec.execute(&url, RequestOptions::get(), 0).await;
        }
        assert!(!exec.breaker().can_request());

        clock.advance(Duration::from_secs(30));
        let value = exec.execute(&url, RequestOptions::get(), 0).await.unwrap();
        assert_eq!(value, json!([]));

        let metrics = exec.breaker().metrics();
        assert_eq!(metrics.state, CircuitState::Closed);
        assert_eq!(metrics.failure_count, 0);
    }
}

// ============================================================================
// Classification
// ============================================================================

mod classification_tests {
    use super::*;

    #[tokio::test]
    async fn test_400_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/entries"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "title is required"})))
            .expect(1)
            .mount(&server)
            .await;

        let (exec, clock) = executor(&server, ClientConfig::default());
        let err = exec
            .execute(&entries_url(&server), RequestOptions::post(json!({})), 3)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.message, "title is required");
        assert_eq!(err.context.status, Some(400));
        assert_eq!(err.context.method, "POST");
        assert!(clock.sleeps().is_empty());
        assert_eq!(exec.breaker().metrics().failure_count, 0);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/entries"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/entries"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
            .mount(&server)
            .await;

        let (exec, clock) = executor(&server, ClientConfig::default());
        let value = exec
            .execute(&entries_url(&server), RequestOptions::get(), 3)
            .await
            .unwrap();

        assert_eq!(value[0]["id"], 1);
        assert_eq!(clock.sleeps().len(), 2);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_connection_refused_is_network() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = ClientConfig::new(format!("http://127.0.0.1:{port}"));
        let transport = Arc::new(ReqwestTransport::new(&config).unwrap());
        let clock = Arc::new(ManualClock::new());
        let exec = RequestExecutor::new(&config, transport, MemoryStore::shared(), clock.clone());

        let err = exec
            .execute(&format!("http://127.0.0.1:{port}/api/health"), RequestOptions::get(), 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(err.is_retryable());
        assert_eq!(clock.sleeps().len(), 1);
        assert_eq!(exec.breaker().metrics().failure_count, 1);
    }
}

// ============================================================================
// Offline Queue
// ============================================================================

mod offline_tests {
    use super::*;

    #[tokio::test]
    async fn test_queued_requests_replay_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/entries"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ok": true})))
            .expect(3)
            .mount(&server)
            .await;

        let (exec, _) = executor(&server, ClientConfig::default());
        let url = entries_url(&server);
        exec.set_online(false);

        for title in ["A", "B", "C"] {
            let err = exec
                .execute(&url, RequestOptions::post(json!({"title": title})), 3)
                .await
                .unwrap_err();
            assert_eq!(err.kind, ErrorKind::Network);
        }
        assert_eq!(exec.queue().len(), 3);
        assert!(server.received_requests().await.unwrap().is_empty());

        exec.set_online(true);
        tokio::time::timeout(Duration::from_secs(10), async {
            while !exec.queue().is_empty() || exec.queue().is_draining() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let titles: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| {
                let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
                body["title"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_rejected_replay_is_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/entries"))
            .respond_with(ResponseTemplate::new(422))
            .expect(1)
            .mount(&server)
            .await;

        let (exec, _) = executor(&server, ClientConfig::default());
        exec.set_online(false);
        let _ = exec
            .execute(&entries_url(&server), RequestOptions::post(json!({})), 3)
            .await;

        exec.set_online(true);
        tokio::time::timeout(Duration::from_secs(10), async {
            while !exec.queue().is_empty() || exec.queue().is_draining() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(exec.breaker().metrics().failure_count, 0);
    }

    #[tokio::test]
    async fn test_replay_waits_out_open_breaker() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/entries"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let (exec, clock) = executor(&server, ClientConfig::default());
        exec.set_online(false);
        let _ = exec
            .execute(&entries_url(&server), RequestOptions::post(json!({"title": "kept"})), 3)
            .await;
        while exec.queue().is_draining() {
            tokio::task::yield_now().await;
        }

        exec.breaker().force_open();
        exec.connectivity().set_online(true);
        let report = exec.queue().drain().await.unwrap();
        assert_eq!(report.halted, Some(DrainHalt::CircuitOpen));
        assert_eq!(report.dropped, 0);
        assert_eq!(exec.queue().len(), 1);
        assert!(server.received_requests().await.unwrap().is_empty());

        clock.advance(Duration::from_secs(120));
        let report = exec.queue().drain().await.unwrap();
        assert_eq!(report.executed, 1);
        assert!(exec.queue().is_empty());
        assert_eq!(exec.breaker().state(), CircuitState::Closed);
    }
}
