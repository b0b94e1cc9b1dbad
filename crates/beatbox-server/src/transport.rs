//! axum implementation of the core [`Transport`] contract.
//!
//! Every bound endpoint becomes `GET /{path}` with a WebSocket upgrade. The
//! handshake headers go to `on_upgrade` before the upgrade completes, and the
//! returned sub-protocol is the only one the server accepts. axum derives the
//! accept key itself and does not negotiate extensions, so those fields of the
//! upgrade response are informational.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::header::{SEC_WEBSOCKET_EXTENSIONS, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL};
use axum::http::{Extensions, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use beatbox_core::{
    Compression, ConnectionId, SocketEvents, Transport, TransportConfig, UpgradeRequest,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::websocket::session::{SessionParams, run_ws_session};
use crate::websocket::topics::TopicHub;

/// One path registered by an endpoint.
struct WsRoute {
    path: String,
    config: TransportConfig,
    events: Arc<dyn SocketEvents>,
}

/// Server-wide pieces every session shares.
#[derive(Clone, Debug)]
pub struct SessionShared {
    /// Pub/sub topics.
    pub hub: Arc<TopicHub>,
    /// Per-connection outbound queue length.
    pub outbound_queue: usize,
    /// Cancelled on server shutdown.
    pub shutdown: CancellationToken,
}

#[derive(Clone)]
struct RouteState {
    route: Arc<WsRoute>,
    shared: SessionShared,
}

/// Collects endpoint registrations and turns them into WebSocket routes.
#[derive(Default)]
pub struct AxumTransport {
    routes: BTreeMap<String, Arc<WsRoute>>,
}

impl AxumTransport {
    /// Transport with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    /// Configuration registered for `path`.
    pub fn config(&self, path: &str) -> Option<&TransportConfig> {
        self.routes.get(path).map(|route| &route.config)
    }

    /// Router serving every registered path.
    pub fn router(&self, shared: &SessionShared) -> Router {
        self.routes
            .values()
            .fold(Router::new(), |router, route| {
                let state = RouteState {
                    route: Arc::clone(route),
                    shared: shared.clone(),
                };
                router.route(&format!("/{}", route.path), get(ws_upgrade).with_state(state))
            })
    }
}

impl Transport for AxumTransport {
    fn register(&mut self, path: &str, config: TransportConfig, events: Arc<dyn SocketEvents>) {
        if config.compression != Compression::Disabled {
            debug!(
                path,
                compression = ?config.compression,
                "per-message compression is not negotiated by this transport"
            );
        }
        let route = Arc::new(WsRoute {
            path: path.to_owned(),
            config,
            events,
        });
        if self.routes.insert(path.to_owned(), route).is_some() {
            warn!(path, "endpoint path registered twice, replacing previous binding");
        }
    }
}

impl std::fmt::Debug for AxumTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AxumTransport")
            .field("paths", &self.paths())
            .finish()
    }
}

fn header(headers: &HeaderMap, name: &axum::http::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Build the core's view of a handshake request.
fn upgrade_request(path: &str, headers: &HeaderMap, extensions: &Extensions) -> UpgradeRequest {
    UpgradeRequest {
        path: path.to_owned(),
        key: header(headers, &SEC_WEBSOCKET_KEY),
        protocol: header(headers, &SEC_WEBSOCKET_PROTOCOL),
        extensions: header(headers, &SEC_WEBSOCKET_EXTENSIONS),
        remote_addr: extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr),
    }
}

/// Split a `sec-websocket-protocol` value into its offered names.
fn offered_protocols(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_owned)
        .collect()
}

/// GET /{path}
async fn ws_upgrade(
    State(state): State<RouteState>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    extensions: Extensions,
) -> Response {
    let RouteState { route, shared } = state;
    let request = upgrade_request(&route.path, &headers, &extensions);
    let response = route.events.on_upgrade(&request);

    let mut ws = ws
        .max_message_size(route.config.max_payload_length)
        .max_frame_size(route.config.max_payload_length);
    if let Some(protocol) = response.protocol.as_deref() {
        ws = ws.protocols(offered_protocols(protocol));
    }

    let params = SessionParams {
        id: ConnectionId::new(),
        path: route.path.clone(),
        config: route.config.clone(),
        events: Arc::clone(&route.events),
        hub: shared.hub,
        outbound_queue: shared.outbound_queue,
        user_data: response.user_data,
        shutdown: shared.shutdown,
    };
    ws.on_upgrade(move |socket| run_ws_session(socket, params))
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use beatbox_core::{
        Behavior, DispatchError, FrameKind, Routed, SocketRef, SubscriptionChange,
        UpgradeResponse,
    };
    use tower::ServiceExt;

    struct Silent;

    #[async_trait]
    impl SocketEvents for Silent {
        fn on_upgrade(&self, _request: &UpgradeRequest) -> UpgradeResponse {
            UpgradeResponse::default()
        }
        fn on_open(&self, _socket: SocketRef) {}
        async fn on_message(
            &self,
            socket: &SocketRef,
            _payload: &[u8],
            _kind: FrameKind,
        ) -> Result<Routed, DispatchError> {
            Err(DispatchError::NotOpen(socket.id().clone()))
        }
        fn on_drain(&self, _socket: &SocketRef) {}
        fn on_subscription(&self, _socket: &SocketRef, _change: &SubscriptionChange) {}
        fn on_close(&self, _socket: &SocketRef, _code: u16, _reason: &str) {}
    }

    fn shared() -> SessionShared {
        SessionShared {
            hub: Arc::new(TopicHub::new()),
            outbound_queue: 8,
            shutdown: CancellationToken::new(),
        }
    }

    fn config() -> TransportConfig {
        TransportConfig::from(&Behavior::default())
    }

    #[test]
    fn register_records_paths() {
        let mut transport = AxumTransport::new();
        transport.register("b", config(), Arc::new(Silent));
        transport.register("a/ws", config(), Arc::new(Silent));
        assert_eq!(transport.paths(), vec!["a/ws".to_owned(), "b".to_owned()]);
        assert!(transport.config("b").is_some());
        assert!(transport.config("c").is_none());
    }

    #[test]
    fn duplicate_path_replaces() {
        let mut transport = AxumTransport::new();
        let mut small = config();
        small.max_payload_length = 10;
        transport.register("ws", config(), Arc::new(Silent));
        transport.register("ws", small, Arc::new(Silent));
        assert_eq!(transport.paths().len(), 1);
        assert_eq!(transport.config("ws").unwrap().max_payload_length, 10);
    }

    #[test]
    fn protocol_list_is_split() {
        assert_eq!(
            offered_protocols("chat, superchat ,,"),
            vec!["chat".to_owned(), "superchat".to_owned()]
        );
        assert!(offered_protocols("").is_empty());
    }

    #[test]
    fn upgrade_request_reads_headers() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(SEC_WEBSOCKET_KEY, "abc==".parse().unwrap());
        let _ = headers.insert(SEC_WEBSOCKET_PROTOCOL, "chat".parse().unwrap());
        let mut extensions = Extensions::new();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let _ = extensions.insert(ConnectInfo(addr));

        let request = upgrade_request("ws", &headers, &extensions);
        assert_eq!(request.path, "ws");
        assert_eq!(request.key.as_deref(), Some("abc=="));
        assert_eq!(request.protocol.as_deref(), Some("chat"));
        assert_eq!(request.extensions, None);
        assert_eq!(request.remote_addr, Some(addr));
    }

    #[tokio::test]
    async fn plain_get_is_not_upgraded() {
        let mut transport = AxumTransport::new();
        transport.register("ws", config(), Arc::new(Silent));
        let app = transport.router(&shared());

        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(resp.status().is_client_error());

        let resp = app
            .oneshot(Request::builder().uri("/other").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
