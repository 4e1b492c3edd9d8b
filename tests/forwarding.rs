//! End-to-end tests through the forwarding server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use gateway_observation::config::GatewayObservationConfig;
use gateway_observation::observability::propagation::{PropagatingSenderHandler, W3cPropagator};
use gateway_observation::observation::ObservationRegistry;
use gateway_observation::http::server::SERVER_OBSERVATION_NAME;
use gateway_observation::HttpServer;
use tower::ServiceExt;

mod common;

use common::RecordingHandler;

fn config(upstream: SocketAddr) -> GatewayObservationConfig {
    let mut config = GatewayObservationConfig::default();
    config.server.upstream = format!("http://{}", upstream);
    config.metrics.enabled = false;
    config
}

#[tokio::test]
async fn test_forwarded_request_is_observed() {
    let backend_addr: SocketAddr = "127.0.0.1:28481".parse().unwrap();
    common::start_echo_backend(backend_addr, "200 OK").await;

    let recorder = Arc::new(RecordingHandler::default());
    let registry = ObservationRegistry::new()
        .with_handler(Arc::new(PropagatingSenderHandler::new(Arc::new(W3cPropagator))))
        .with_handler(recorder.clone());
    let server = HttpServer::new(config(backend_addr), registry).unwrap();

    let request = Request::builder()
        .uri("/get")
        .header("X-A", "aValue")
        .body(Body::empty())
        .unwrap();
    let response = server.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let echoed = String::from_utf8_lossy(&body).to_lowercase();
    assert!(echoed.contains("x-a: avalue"), "{}", echoed);
    assert!(echoed.contains("traceparent: 00-"), "{}", echoed);

    let stopped = recorder.stopped();
    assert_eq!(stopped.len(), 2);
    assert_eq!(stopped[0].name, "http.client.requests");
    assert_eq!(stopped[0].contextual_name.as_deref(), Some("HTTP GET"));
    assert_eq!(stopped[0].tags.get("method"), Some("GET"));
    assert_eq!(stopped[0].tags.get("status"), Some("200"));
    assert_eq!(
        stopped[0].tags.get("uri"),
        Some(format!("http://{}/get", backend_addr).as_str())
    );
    assert!(stopped[0].error.is_none());

    // The client observation is a child of the inbound server observation
    assert_eq!(stopped[1].name, SERVER_OBSERVATION_NAME);
    assert!(stopped[0].parent.is_some());
    assert_eq!(stopped[0].parent, Some(stopped[1].id));
    assert!(stopped[1].error.is_none());
}

#[tokio::test]
async fn test_upstream_failure_closes_observation() {
    // Nothing listens here
    let backend_addr: SocketAddr = "127.0.0.1:28482".parse().unwrap();

    let recorder = Arc::new(RecordingHandler::default());
    let registry = ObservationRegistry::new().with_handler(recorder.clone());
    let server = HttpServer::new(config(backend_addr), registry).unwrap();

    let request = Request::builder().uri("/get").body(Body::empty()).unwrap();
    let response = server.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let stopped = recorder.stopped();
    assert_eq!(stopped.len(), 2);
    assert_eq!(stopped[0].error.as_deref(), Some("upstream_unavailable"));
    assert!(stopped[0].tags.get("status").is_none());
    assert_eq!(stopped[1].name, SERVER_OBSERVATION_NAME);
    assert_eq!(stopped[1].error.as_deref(), Some("upstream_unavailable"));
}

#[tokio::test]
async fn test_path_uri_mode() {
    let backend_addr: SocketAddr = "127.0.0.1:28483".parse().unwrap();
    common::start_echo_backend(backend_addr, "404 Not Found").await;

    let recorder = Arc::new(RecordingHandler::default());
    let registry = ObservationRegistry::new().with_handler(recorder.clone());
    let mut config = config(backend_addr);
    config.convention.uri_tag = gateway_observation::config::UriTagMode::Path;
    let server = HttpServer::new(config, registry).unwrap();

    let request = Request::builder()
        .uri("/items/42?verbose=1")
        .body(Body::empty())
        .unwrap();
    let response = server.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let _ = axum::body::to_bytes(response.into_body(), usize::MAX).await;

    let stopped = recorder.stopped();
    assert_eq!(stopped[0].tags.get("uri"), Some("/items/42"));
    assert_eq!(stopped[0].tags.get("status"), Some("404"));
}

#[tokio::test]
async fn test_hop_by_hop_headers_not_forwarded() {
    let backend_addr: SocketAddr = "127.0.0.1:28484".parse().unwrap();
    common::start_echo_backend(backend_addr, "200 OK").await;

    let server = HttpServer::new(config(backend_addr), ObservationRegistry::noop()).unwrap();

    let request = Request::builder()
        .uri("/get")
        .header("connection", "x-secret")
        .header("x-secret", "leak")
        .header("keep-alive", "timeout=5")
        .header("proxy-authorization", "Basic abc")
        .header("x-a", "aValue")
        .body(Body::empty())
        .unwrap();
    let response = server.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("connection").is_none());

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let echoed = String::from_utf8_lossy(&body).to_lowercase();
    assert!(echoed.contains("x-a: avalue"), "{}", echoed);
    assert!(!echoed.contains("x-secret"), "{}", echoed);
    assert!(!echoed.contains("keep-alive"), "{}", echoed);
    assert!(!echoed.contains("proxy-authorization"), "{}", echoed);
}

#[tokio::test]
async fn test_inbound_trace_continues_through_server_observation() {
    let backend_addr: SocketAddr = "127.0.0.1:28485".parse().unwrap();
    common::start_echo_backend(backend_addr, "200 OK").await;

    let registry = ObservationRegistry::new()
        .with_handler(Arc::new(PropagatingSenderHandler::new(Arc::new(W3cPropagator))));
    let server = HttpServer::new(config(backend_addr), registry).unwrap();

    let request = Request::builder()
        .uri("/get")
        .header(
            "traceparent",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        )
        .body(Body::empty())
        .unwrap();
    let response = server.router().oneshot(request).await.unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let echoed = String::from_utf8_lossy(&body).to_lowercase();

    assert!(
        echoed.contains("traceparent: 00-4bf92f3577b34da6a3ce929d0e0e4736-"),
        "{}",
        echoed
    );
    assert!(!echoed.contains("00f067aa0ba902b7"), "{}", echoed);
}
