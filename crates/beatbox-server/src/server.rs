//! `BeatboxServer`: axum HTTP + WebSocket server hosting beatbox endpoints.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use beatbox_core::{Endpoint, HandlerDescription, HandlerRegistry, OutboundFrame};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::transport::{AxumTransport, SessionShared};
use crate::websocket::topics::TopicHub;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Bound endpoints.
    pub endpoints: Arc<[Arc<Endpoint>]>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics: PrometheusHandle,
}

/// `/count` response body.
#[derive(Debug, Clone, Serialize)]
pub struct CountResponse {
    /// Open connections across every endpoint.
    pub count: usize,
    /// Open connections per endpoint path.
    pub endpoints: BTreeMap<String, usize>,
}

/// The beatbox server.
pub struct BeatboxServer {
    config: ServerConfig,
    transport: AxumTransport,
    endpoints: Vec<Arc<Endpoint>>,
    topics: Arc<TopicHub>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl BeatboxServer {
    /// Create a server with no endpoints.
    pub fn new(config: ServerConfig, metrics: PrometheusHandle) -> Self {
        Self {
            config,
            transport: AxumTransport::new(),
            endpoints: Vec::new(),
            topics: Arc::new(TopicHub::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Bind `endpoint` to this server. An endpoint already bound at the same
    /// path is replaced.
    pub fn add_endpoint(&mut self, endpoint: Endpoint) -> Arc<Endpoint> {
        endpoint.bind(&mut self.transport);
        self.endpoints.retain(|e| e.path() != endpoint.path());
        let endpoint = Arc::new(endpoint);
        self.endpoints.push(Arc::clone(&endpoint));
        endpoint
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            endpoints: self.endpoints.iter().cloned().collect(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };
        let shared = SessionShared {
            hub: Arc::clone(&self.topics),
            outbound_queue: self.config.outbound_queue,
            shutdown: self.shutdown.token(),
        };

        Router::new()
            .route("/introspect", get(introspect_actions))
            .route("/introspect/events", get(introspect_events))
            .route("/count", get(count_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .merge(self.transport.router(&shared))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and serve in a background task until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the server task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener.local_addr()?;

        let app = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let served = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(token.cancelled_owned())
            .await;
            if let Err(e) = served {
                error!(error = %e, "server stopped with error");
            }
        });

        info!(
            addr = %local,
            paths = ?self.transport.paths(),
            "beatbox server listening"
        );
        Ok((local, handle))
    }

    /// Serve until the shutdown coordinator fires.
    pub async fn serve(&self) -> Result<(), ServerError> {
        let (_, handle) = self.listen().await?;
        if let Err(e) = handle.await {
            error!(error = %e, "server task failed");
        }
        Ok(())
    }

    /// Pub/sub topics shared by every endpoint.
    pub fn topics(&self) -> &Arc<TopicHub> {
        &self.topics
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bound endpoints, in binding order.
    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }
}

type Descriptions = BTreeMap<String, Vec<HandlerDescription>>;

/// Merge one description table per endpoint. Names bound on several
/// endpoints list one description per endpoint.
fn merge_descriptions(
    endpoints: &[Arc<Endpoint>],
    describe: impl Fn(&HandlerRegistry) -> Descriptions,
) -> Descriptions {
    let mut merged = Descriptions::new();
    for endpoint in endpoints {
        for (name, descriptions) in describe(endpoint.handlers()) {
            merged.entry(name).or_default().extend(descriptions);
        }
    }
    merged
}

/// GET /introspect
async fn introspect_actions(State(state): State<AppState>) -> Json<Descriptions> {
    Json(merge_descriptions(&state.endpoints, HandlerRegistry::describe_actions))
}

/// GET /introspect/events
async fn introspect_events(State(state): State<AppState>) -> Json<Descriptions> {
    Json(merge_descriptions(&state.endpoints, HandlerRegistry::describe_events))
}

/// GET /count
///
/// Also sends the current Unix time to every open socket.
async fn count_handler(State(state): State<AppState>) -> Json<CountResponse> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    let frame = OutboundFrame::Text(now.to_string());

    let mut endpoints = BTreeMap::new();
    for endpoint in state.endpoints.iter() {
        let connections = endpoint.connections();
        let accepted = connections.broadcast(&frame);
        debug!(path = endpoint.path(), accepted, "count broadcast");
        let _ = endpoints.insert(endpoint.path().to_owned(), connections.len());
    }
    Json(CountResponse {
        count: endpoints.values().sum(),
        endpoints,
    })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state
        .endpoints
        .iter()
        .map(|e| e.connections().len())
        .sum();
    Json(health::health_check(
        state.start_time,
        connections,
        state.endpoints.len(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    metrics::render(&state.metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use beatbox_core::testing::RecordingSocket;
    use beatbox_core::{Behavior, HandlerError, Invocation, Signature, SocketEvents};
    use serde_json::Value;
    use tower::ServiceExt;

    fn endpoint(path: &str, action: &str) -> Endpoint {
        let mut handlers = HandlerRegistry::new();
        let _ = handlers
            .register_action(
                action,
                &format!("doc for {action}"),
                &Signature::new().arg::<i64>("x"),
                |_inv: Invocation| async { Ok::<(), HandlerError>(()) },
            )
            .unwrap();
        Endpoint::new(path, &Behavior::default(), handlers).unwrap()
    }

    fn make_server() -> BeatboxServer {
        let mut server = BeatboxServer::new(ServerConfig::default(), metrics::detached_handle());
        let _ = server.add_endpoint(endpoint("ws", "test"));
        server
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (status, body) = get_json(make_server().router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["endpoints"], 1);
    }

    #[tokio::test]
    async fn introspect_lists_actions() {
        let (status, body) = get_json(make_server().router(), "/introspect").await;
        assert_eq!(status, StatusCode::OK);
        let test = &body["test"];
        assert_eq!(test.as_array().unwrap().len(), 1);
        assert_eq!(test[0]["doc"], "doc for test");
        assert_eq!(test[0]["fullargspec"]["positionalArgs"][0], "x");
        assert_eq!(test[0]["fullargspec"]["annotations"]["x"], "int");
    }

    #[tokio::test]
    async fn introspect_merges_endpoints() {
        let mut server = make_server();
        let _ = server.add_endpoint(endpoint("other", "test"));
        let (_, body) = get_json(server.router(), "/introspect").await;
        assert_eq!(body["test"].as_array().unwrap().len(), 2);

        let (_, events) = get_json(server.router(), "/introspect/events").await;
        assert_eq!(events, serde_json::json!({}));
    }

    #[tokio::test]
    async fn count_reports_and_broadcasts() {
        let server = make_server();
        let socket = RecordingSocket::new("c1");
        server.endpoints()[0]
            .dispatcher()
            .on_open(Arc::clone(&socket) as beatbox_core::SocketRef);

        let (status, body) = get_json(server.router(), "/count").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["endpoints"]["ws"], 1);
        assert_eq!(socket.sent().len(), 1);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_text() {
        let resp = make_server()
            .router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (status, _) = get_json(make_server().router(), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn rebinding_a_path_replaces_endpoint() {
        let mut server = make_server();
        let _ = server.add_endpoint(endpoint("ws", "other"));
        assert_eq!(server.endpoints().len(), 1);
        assert!(server.endpoints()[0].handlers().action("other").is_some());
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops_on_shutdown() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let config = ServerConfig {
            host: "256.0.0.1".into(),
            ..ServerConfig::default()
        };
        let server = BeatboxServer::new(config, metrics::detached_handle());
        let err = server.listen().await.unwrap_err();
        assert_eq!(err.kind(), "bind");
    }
}
