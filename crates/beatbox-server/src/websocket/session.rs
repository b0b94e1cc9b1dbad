//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.
//!
//! 1. Wrap the connection in a [`WsSocket`] and fire `on_open`
//! 2. Feed every text/binary frame to `on_message`, awaiting each in turn,
//!    with `on_drain` delivered between frames
//! 3. Write queued frames and keep-alive pings from a separate task
//! 4. On any ending, fire `on_close` exactly once, even if a callback panicked

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use beatbox_core::{
    ConnectionId, FrameKind, OutboundFrame, SocketEvents, SocketRef, TransportConfig, UserData,
};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{FutureExt, SinkExt, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use super::socket::{SocketParts, WsSocket};
use super::topics::TopicHub;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
    WS_IDLE_TIMEOUTS_TOTAL,
};

/// Ping interval when the idle timeout is disabled.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long the writer gets to flush after the session ends.
const WRITER_GRACE: Duration = Duration::from_secs(5);

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Server going away (idle timeout, shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Peer closed without a status code.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Server hit an unexpected condition.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Inputs for one session.
pub(crate) struct SessionParams {
    pub id: ConnectionId,
    pub path: String,
    pub config: TransportConfig,
    pub events: Arc<dyn SocketEvents>,
    pub hub: Arc<TopicHub>,
    pub outbound_queue: usize,
    pub user_data: UserData,
    pub shutdown: CancellationToken,
}

/// How a session ended.
#[derive(Debug, PartialEq, Eq)]
enum Ending {
    /// The peer closed or vanished; no close frame is sent.
    Remote { code: u16, reason: String },
    /// The server closes; a close frame is sent.
    Local { code: u16, reason: String },
}

impl Ending {
    fn local(code: u16, reason: &str) -> Self {
        Self::Local {
            code,
            reason: reason.to_owned(),
        }
    }

    fn code_and_reason(&self) -> (u16, &str) {
        match self {
            Self::Remote { code, reason } | Self::Local { code, reason } => (*code, reason),
        }
    }

    fn close_frame(&self) -> Option<CloseFrame> {
        match self {
            Self::Local { code, reason } => Some(CloseFrame {
                code: *code,
                reason: reason.clone().into(),
            }),
            Self::Remote { .. } => None,
        }
    }
}

/// Keep-alive ping period for `config`.
pub fn ping_interval(config: &TransportConfig) -> Option<Duration> {
    if !config.send_pings_automatically {
        return None;
    }
    Some(config.idle_timeout.map_or(DEFAULT_PING_INTERVAL, |idle| idle / 2))
}

/// Run a WebSocket session until it ends for any reason.
#[instrument(skip_all, fields(conn_id = %params.id, path = %params.path))]
pub(crate) async fn run_ws_session(ws: WebSocket, params: SessionParams) {
    let SessionParams {
        id,
        path,
        config,
        events,
        hub,
        outbound_queue,
        user_data,
        shutdown,
    } = params;

    let (sink, mut stream) = ws.split();
    let (socket, outbound) = WsSocket::new(SocketParts {
        id: id.clone(),
        queue: outbound_queue,
        max_backpressure: config.max_backpressure,
        user_data,
        events: Arc::clone(&events),
        hub,
    });
    let handle: SocketRef = Arc::clone(&socket) as SocketRef;

    let started = std::time::Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL, "path" => path.clone()).increment(1);
    let mut guard = CloseGuard {
        socket: &socket,
        handle: &handle,
        events: &events,
        armed: true,
    };
    events.on_open(Arc::clone(&handle));

    let (finish_tx, finish_rx) = oneshot::channel();
    let writer = tokio::spawn(write_loop(
        sink,
        outbound,
        Arc::clone(&socket),
        ping_interval(&config),
        finish_rx,
    ));

    let ending = read_loop(&mut stream, &handle, &socket, &events, &config, &shutdown).await;

    guard.armed = false;
    socket.shut();
    let _ = finish_tx.send(ending.close_frame());
    socket.unsubscribe_all();

    let (code, reason) = ending.code_and_reason();
    events.on_close(&handle, code, reason);

    info!(code, reason, dropped = socket.drop_count(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL, "path" => path.clone()).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS, "path" => path)
        .record(started.elapsed().as_secs_f64());

    if tokio::time::timeout(WRITER_GRACE, writer).await.is_err() {
        debug!("writer did not finish in time");
    }
}

/// Runs the close path if the session unwinds before reaching it.
struct CloseGuard<'a> {
    socket: &'a WsSocket,
    handle: &'a SocketRef,
    events: &'a Arc<dyn SocketEvents>,
    armed: bool,
}

impl Drop for CloseGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        error!("session unwound, closing connection");
        self.socket.shut();
        self.socket.unsubscribe_all();
        self.events.on_close(self.handle, CLOSE_INTERNAL_ERROR, "internal error");
    }
}

async fn read_loop(
    stream: &mut SplitStream<WebSocket>,
    handle: &SocketRef,
    socket: &WsSocket,
    events: &Arc<dyn SocketEvents>,
    config: &TransportConfig,
    shutdown: &CancellationToken,
) -> Ending {
    let mut idle_deadline = config.idle_timeout.map(|t| Instant::now() + t);
    let lifetime_deadline = config.max_lifetime.map(|t| Instant::now() + t);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                return Ending::local(CLOSE_GOING_AWAY, "server shutting down");
            }
            () = socket.closing().cancelled() => {
                let (code, reason) = socket
                    .take_close_request()
                    .unwrap_or((CLOSE_NORMAL, String::new()));
                return Ending::Local { code, reason };
            }
            () = sleep_until(idle_deadline) => {
                counter!(WS_IDLE_TIMEOUTS_TOTAL).increment(1);
                debug!("idle timeout");
                return Ending::local(CLOSE_GOING_AWAY, "idle timeout");
            }
            () = sleep_until(lifetime_deadline) => {
                return Ending::local(CLOSE_GOING_AWAY, "max lifetime reached");
            }
            () = socket.drained().notified() => {
                events.on_drain(handle);
            }
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        return Ending::Remote { code: CLOSE_ABNORMAL, reason: e.to_string() };
                    }
                    None => {
                        return Ending::Remote {
                            code: CLOSE_ABNORMAL,
                            reason: "connection lost".into(),
                        };
                    }
                };
                if let Some(timeout) = config.idle_timeout {
                    idle_deadline = Some(Instant::now() + timeout);
                }
                let delivered = match msg {
                    Message::Text(text) => {
                        deliver(events, handle, text.as_str().as_bytes(), FrameKind::Text).await
                    }
                    Message::Binary(data) => deliver(events, handle, &data, FrameKind::Binary).await,
                    Message::Close(frame) => {
                        let (code, reason) = frame.map_or((CLOSE_NO_STATUS, String::new()), |f| {
                            (f.code, f.reason.as_str().to_owned())
                        });
                        return Ending::Remote { code, reason };
                    }
                    Message::Ping(_) | Message::Pong(_) => true,
                };
                if !delivered {
                    return Ending::local(CLOSE_INTERNAL_ERROR, "internal error");
                }
            }
        }
    }
}

/// Hand one data frame to `on_message`. Returns `false` if it panicked.
async fn deliver(
    events: &Arc<dyn SocketEvents>,
    handle: &SocketRef,
    payload: &[u8],
    kind: FrameKind,
) -> bool {
    match AssertUnwindSafe(events.on_message(handle, payload, kind))
        .catch_unwind()
        .await
    {
        Ok(_) => true,
        Err(_) => {
            error!(kind = kind.as_str(), "message callback panicked, closing connection");
            false
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    socket: Arc<WsSocket>,
    ping_every: Option<Duration>,
    mut finish: oneshot::Receiver<Option<CloseFrame>>,
) {
    let mut pings = ping_every.map(|period| tokio::time::interval_at(Instant::now() + period, period));

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if !write_frame(&mut sink, &socket, frame).await {
                    return;
                }
            }
            () = tick(&mut pings) => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    return;
                }
            }
            close = &mut finish => {
                while let Ok(frame) = outbound.try_recv() {
                    if !write_frame(&mut sink, &socket, frame).await {
                        return;
                    }
                }
                if let Ok(Some(frame)) = close {
                    let _ = sink.send(Message::Close(Some(frame))).await;
                }
                break;
            }
        }
    }
    let _ = sink.close().await;
}

async fn write_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    socket: &WsSocket,
    frame: OutboundFrame,
) -> bool {
    let len = frame.len();
    let message = match frame {
        OutboundFrame::Text(text) => Message::Text(text.into()),
        OutboundFrame::Binary(data) => Message::Binary(data),
    };
    let ok = sink.send(message).await.is_ok();
    socket.written(len);
    ok
}
