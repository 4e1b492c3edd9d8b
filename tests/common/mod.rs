//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use axum::http::HeaderValue;
use gateway_observation::observation::{KeyValues, Observation, ObservationHandler, ObservationId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Header the stub propagation handler injects.
#[allow(dead_code)]
pub const INJECTED_HEADER: &str = "x-stub-trace";

/// Injects a fixed header into the carrier on start, like a real propagator.
#[allow(dead_code)]
pub struct StubPropagationHandler;

impl ObservationHandler for StubPropagationHandler {
    fn on_start(&self, observation: &Observation) {
        if let Some(ctx) = observation.context() {
            let value = HeaderValue::from_str(&observation.id().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("invalid"));
            ctx.with_carrier(|headers| headers.insert(INJECTED_HEADER, value));
        }
    }

    fn on_stop(&self, _observation: &Observation) {}
}

/// What a stopped observation looked like.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct StoppedObservation {
    pub id: ObservationId,
    pub name: String,
    pub contextual_name: Option<String>,
    pub tags: KeyValues,
    pub parent: Option<ObservationId>,
    pub error: Option<String>,
}

/// Records every observation at stop time.
#[derive(Default)]
pub struct RecordingHandler {
    started: Mutex<Vec<ObservationId>>,
    stopped: Mutex<Vec<StoppedObservation>>,
}

#[allow(dead_code)]
impl RecordingHandler {
    pub fn started(&self) -> Vec<ObservationId> {
        self.started.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<StoppedObservation> {
        self.stopped.lock().unwrap().clone()
    }
}

impl ObservationHandler for RecordingHandler {
    fn on_start(&self, observation: &Observation) {
        self.started.lock().unwrap().push(observation.id());
    }

    fn on_stop(&self, observation: &Observation) {
        self.stopped.lock().unwrap().push(StoppedObservation {
            id: observation.id(),
            name: observation.name().to_string(),
            contextual_name: observation.contextual_name(),
            tags: observation.low_cardinality_key_values(),
            parent: observation.parent().map(Observation::id),
            error: observation.error_message(),
        });
    }
}

/// Start a backend that answers `status` with the received request head as
/// body, so tests can see the forwarded headers.
#[allow(dead_code)]
pub async fn start_echo_backend(addr: SocketAddr, status: &'static str) {
    let listener = TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut head = Vec::new();
                        let mut buf = [0u8; 1024];
                        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                            match socket.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => head.extend_from_slice(&buf[..n]),
                            }
                        }
                        let body = String::from_utf8_lossy(&head).to_string();
                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}
