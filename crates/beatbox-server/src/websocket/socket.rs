//! [`Socket`] implementation backed by an axum WebSocket session.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use beatbox_core::{
    ConnectionId, OutboundFrame, SendStatus, Socket, SocketEvents, SocketRef, UserData,
};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::topics::TopicHub;
use crate::metrics::WS_SEND_DROPS_TOTAL;

/// Per-connection handle given to the core.
///
/// Frames go through a bounded queue drained by the session's writer task.
/// Queued-but-unwritten bytes are tracked so sends can report backpressure.
/// Once the peer catches up the writer raises [`WsSocket::drained`], and the
/// session's read loop delivers `on_drain` between inbound frames.
pub struct WsSocket {
    id: ConnectionId,
    tx: mpsc::Sender<OutboundFrame>,
    buffered: AtomicUsize,
    max_backpressure: usize,
    backpressured: AtomicBool,
    drained: Notify,
    dropped: AtomicU64,
    user_data: UserData,
    events: Arc<dyn SocketEvents>,
    hub: Arc<TopicHub>,
    subscriptions: Mutex<BTreeSet<String>>,
    close_request: Mutex<Option<(u16, String)>>,
    closing: CancellationToken,
    me: Weak<WsSocket>,
}

/// Everything needed to build a [`WsSocket`].
pub(crate) struct SocketParts {
    pub id: ConnectionId,
    pub queue: usize,
    pub max_backpressure: usize,
    pub user_data: UserData,
    pub events: Arc<dyn SocketEvents>,
    pub hub: Arc<TopicHub>,
}

impl WsSocket {
    /// Create the socket and the receiving end of its outbound queue.
    pub(crate) fn new(parts: SocketParts) -> (Arc<Self>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(parts.queue.max(1));
        let socket = Arc::new_cyclic(|me| Self {
            id: parts.id,
            tx,
            buffered: AtomicUsize::new(0),
            max_backpressure: parts.max_backpressure,
            backpressured: AtomicBool::new(false),
            drained: Notify::new(),
            dropped: AtomicU64::new(0),
            user_data: parts.user_data,
            events: parts.events,
            hub: parts.hub,
            subscriptions: Mutex::new(BTreeSet::new()),
            close_request: Mutex::new(None),
            closing: CancellationToken::new(),
            me: me.clone(),
        });
        (socket, rx)
    }

    fn handle(&self) -> Option<SocketRef> {
        self.me.upgrade().map(|s| s as SocketRef)
    }

    /// Cancelled once the application asks to close or the session ends.
    pub(crate) fn closing(&self) -> &CancellationToken {
        &self.closing
    }

    /// The first close requested through [`Socket::close`], if any.
    pub(crate) fn take_close_request(&self) -> Option<(u16, String)> {
        self.close_request.lock().take()
    }

    /// Stop accepting frames.
    pub(crate) fn shut(&self) {
        self.closing.cancel();
    }

    /// Raised once per backpressure episode when the queue drains.
    pub(crate) fn drained(&self) -> &Notify {
        &self.drained
    }

    /// Account for `len` bytes handed to the peer.
    ///
    /// Raises [`WsSocket::drained`] when a backpressured socket falls back to
    /// the limit. Nothing is raised once the socket is closing.
    pub(crate) fn written(&self, len: usize) {
        let remaining = self.buffered.fetch_sub(len, Ordering::AcqRel).saturating_sub(len);
        if remaining <= self.max_backpressure
            && self.backpressured.swap(false, Ordering::AcqRel)
            && !self.closing.is_cancelled()
        {
            self.drained.notify_one();
        }
    }

    /// Leave every topic, firing a subscription change for each.
    pub(crate) fn unsubscribe_all(&self) {
        let topics = std::mem::take(&mut *self.subscriptions.lock());
        let Some(me) = self.handle() else { return };
        for topic in topics {
            if let Some(change) = self.hub.unsubscribe(&self.id, &topic) {
                self.events.on_subscription(&me, &change);
            }
        }
    }

    /// Frames refused since the session opened.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn refuse(&self) -> SendStatus {
        let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
        counter!(WS_SEND_DROPS_TOTAL).increment(1);
        SendStatus::Dropped
    }
}

impl Socket for WsSocket {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, frame: OutboundFrame) -> SendStatus {
        if self.closing.is_cancelled() {
            return self.refuse();
        }
        let len = frame.len();
        let buffered = self.buffered.fetch_add(len, Ordering::AcqRel) + len;
        if self.tx.try_send(frame).is_err() {
            let _ = self.buffered.fetch_sub(len, Ordering::AcqRel);
            debug!(conn_id = %self.id, "outbound queue full or closed, dropping frame");
            return self.refuse();
        }
        if buffered > self.max_backpressure {
            self.backpressured.store(true, Ordering::Release);
            SendStatus::Backpressure
        } else {
            SendStatus::Sent
        }
    }

    fn close(&self, code: u16, reason: &str) {
        {
            let mut request = self.close_request.lock();
            if request.is_none() && !self.closing.is_cancelled() {
                *request = Some((code, reason.to_owned()));
            }
        }
        self.closing.cancel();
    }

    fn user_data(&self) -> &UserData {
        &self.user_data
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    fn subscribe(&self, topic: &str) -> bool {
        let Some(me) = self.handle() else { return false };
        if self.closing.is_cancelled() {
            return false;
        }
        match self.hub.subscribe(&me, topic) {
            Some(change) => {
                let _ = self.subscriptions.lock().insert(topic.to_owned());
                self.events.on_subscription(&me, &change);
                true
            }
            None => false,
        }
    }

    fn unsubscribe(&self, topic: &str) -> bool {
        let Some(me) = self.handle() else { return false };
        match self.hub.unsubscribe(&self.id, topic) {
            Some(change) => {
                let _ = self.subscriptions.lock().remove(topic);
                self.events.on_subscription(&me, &change);
                true
            }
            None => false,
        }
    }
}
