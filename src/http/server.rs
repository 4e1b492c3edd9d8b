//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with a catch-all forwarding handler
//! - Wire up middleware (tracing, timeout)
//! - Open a server observation per inbound request as the parent of the
//!   client observation
//! - Run the header filter chain around every upstream call
//! - Forward requests to the configured upstream
//! - Close dangling observations when a request is cancelled
//!
//! # Design Decisions
//! - Hop-by-hop headers stripped in both directions, including every header
//!   named in `Connection`

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, uri::InvalidUri, HeaderMap, HeaderName, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use url::Url;

use crate::config::GatewayObservationConfig;
use crate::exchange::{Exchange, RequestInfo, PARENT_OBSERVATION_ATTRIBUTE};
use crate::filter::{
    HeadersFilterChain, ObservedRequestHttpHeadersFilter, ObservedResponseHttpHeadersFilter,
};
use crate::observability::propagation::ReceivedHeaders;
use crate::observation::{DefaultGatewayObservationConvention, Observation, ObservationRegistry};

/// Name of the per-request server observation.
pub const SERVER_OBSERVATION_NAME: &str = "http.server.requests";

/// Headers that only apply to a single connection.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<Url>,
    pub registry: ObservationRegistry,
    pub client: Client<HttpConnector, Body>,
    pub filters: HeadersFilterChain,
}

/// Forwarding server hosting the observed header filters.
pub struct HttpServer {
    router: Router,
    config: GatewayObservationConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration and registry.
    pub fn new(
        config: GatewayObservationConfig,
        registry: ObservationRegistry,
    ) -> Result<Self, url::ParseError> {
        let upstream = Arc::new(Url::parse(&config.server.upstream)?);

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        let convention = DefaultGatewayObservationConvention::new(config.convention.uri_tag);
        let filters = HeadersFilterChain::new()
            .with_filter(Arc::new(ObservedRequestHttpHeadersFilter::with_convention(
                registry.clone(),
                Arc::new(convention),
            )))
            .with_filter(Arc::new(ObservedResponseHttpHeadersFilter::new()));

        let state = AppState {
            upstream,
            registry,
            client,
            filters,
        };

        let router = Self::build_router(&config, state);
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayObservationConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.server.request_timeout_secs,
            )))
            .layer(TraceLayer::new_for_http())
    }

    /// The configured router, e.g. for in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.server.upstream,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayObservationConfig {
        &self.config
    }
}

/// Resolve the inbound path and query against the upstream base URL.
pub fn upstream_uri(upstream: &Url, inbound: &Uri) -> Result<Uri, InvalidUri> {
    let mut url = upstream.clone();
    let path = format!("{}{}", upstream.path().trim_end_matches('/'), inbound.path());
    url.set_path(&path);
    url.set_query(inbound.query());
    url.as_str().parse()
}

/// Remove hop-by-hop headers and the headers listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Closes the observations of one exchange when the handler returns or its
/// future is dropped (timeouts, client disconnects).
struct CompletionGuard {
    exchange: Exchange,
    server: Observation,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if ObservedResponseHttpHeadersFilter::close_with_error(&mut self.exchange, "cancelled") {
            self.server.error("cancelled");
            tracing::debug!("Closed client observation of a cancelled exchange");
        }
        if let Err(e) = self.server.stop() {
            tracing::warn!(error = %e, "Failed to stop server observation");
        }
    }
}

/// Main proxy handler. Forwards every request to the upstream.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (mut parts, body) = request.into_parts();

    let uri = match upstream_uri(&state.upstream, &parts.uri) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(uri = %parts.uri, error = %e, "Cannot build upstream URI");
            return (StatusCode::BAD_REQUEST, "Invalid request URI").into_response();
        }
    };
    strip_hop_by_hop(&mut parts.headers);

    let server = Observation::create_not_started(SERVER_OBSERVATION_NAME, &state.registry);
    server.insert_extension(ReceivedHeaders(parts.headers.clone()));
    if let Err(e) = server.start() {
        tracing::warn!(error = %e, "Failed to start server observation");
    }

    let mut info = RequestInfo::from(&parts);
    info.uri = uri.clone();
    let mut exchange = Exchange::new(info);
    exchange
        .attributes_mut()
        .insert(PARENT_OBSERVATION_ATTRIBUTE, server.clone());
    let mut guard = CompletionGuard { exchange, server };

    tracing::debug!(method = %parts.method, uri = %uri, "Forwarding request");

    let mut headers = state.filters.filter_request(&parts.headers, &mut guard.exchange);
    headers.remove(header::HOST);

    let mut req = Request::new(body);
    *req.method_mut() = parts.method;
    *req.uri_mut() = uri;
    *req.headers_mut() = headers;

    match state.client.request(req).await {
        Ok(response) => {
            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            let exchange = &mut guard.exchange;
            exchange.response_mut().set_status(parts.status);
            exchange.response_mut().headers = parts.headers.clone();
            parts.headers = state.filters.filter_response(&parts.headers, exchange);
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(error = %e, "Upstream error");
            ObservedResponseHttpHeadersFilter::close_with_error(
                &mut guard.exchange,
                "upstream_unavailable",
            );
            guard.server.error("upstream_unavailable");
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_uri_join() {
        let base = Url::parse("http://127.0.0.1:3000").unwrap();
        let uri = upstream_uri(&base, &Uri::from_static("/get?x=1")).unwrap();
        assert_eq!(uri, "http://127.0.0.1:3000/get?x=1");

        let prefixed = Url::parse("http://backend/api/").unwrap();
        let uri = upstream_uri(&prefixed, &Uri::from_static("/items")).unwrap();
        assert_eq!(uri, "http://backend/api/items");
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "keep-alive, X-Secret".parse().unwrap());
        headers.insert("keep-alive", "timeout=5".parse().unwrap());
        headers.insert("x-secret", "leak".parse().unwrap());
        headers.insert("proxy-authorization", "Basic abc".parse().unwrap());
        headers.insert("transfer-encoding", "chunked".parse().unwrap());
        headers.insert("x-a", "aValue".parse().unwrap());

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-a").unwrap(), "aValue");
    }

    #[test]
    fn test_new_rejects_bad_upstream() {
        let mut config = GatewayObservationConfig::default();
        config.server.upstream = "::nope".into();
        assert!(HttpServer::new(config, ObservationRegistry::noop()).is_err());
    }
}
