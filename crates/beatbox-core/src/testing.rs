//! In-memory [`Socket`] for tests of code built on the core.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::ids::ConnectionId;
use crate::socket::{OutboundFrame, SendStatus, Socket, SocketRef, UserData};

/// Socket that records what is sent to it.
#[derive(Debug)]
pub struct RecordingSocket {
    id: ConnectionId,
    sent: Mutex<Vec<OutboundFrame>>,
    closed: Mutex<Option<(u16, String)>>,
    status: Mutex<SendStatus>,
    topics: Mutex<BTreeSet<String>>,
    user_data: UserData,
}

impl RecordingSocket {
    /// New socket with the given identity.
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::from(id),
            sent: Mutex::new(Vec::new()),
            closed: Mutex::new(None),
            status: Mutex::new(SendStatus::Sent),
            topics: Mutex::new(BTreeSet::new()),
            user_data: UserData::default(),
        })
    }

    /// New socket already erased to a [`SocketRef`].
    pub fn shared(id: &str) -> SocketRef {
        Self::new(id)
    }

    /// Status returned by subsequent sends. `Dropped` frames are not recorded.
    pub fn set_status(&self, status: SendStatus) {
        *self.status.lock() = status;
    }

    /// Frames accepted so far.
    pub fn sent(&self) -> Vec<OutboundFrame> {
        self.sent.lock().clone()
    }

    /// Close code and reason, if `close` was called.
    pub fn closed(&self) -> Option<(u16, String)> {
        self.closed.lock().clone()
    }

    /// Topics currently subscribed.
    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().iter().cloned().collect()
    }
}

impl Socket for RecordingSocket {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, frame: OutboundFrame) -> SendStatus {
        let status = *self.status.lock();
        if status.is_accepted() {
            self.sent.lock().push(frame);
        }
        status
    }

    fn close(&self, code: u16, reason: &str) {
        *self.closed.lock() = Some((code, reason.to_owned()));
    }

    fn user_data(&self) -> &UserData {
        &self.user_data
    }

    fn subscribe(&self, topic: &str) -> bool {
        self.topics.lock().insert(topic.to_owned())
    }

    fn unsubscribe(&self, topic: &str) -> bool {
        self.topics.lock().remove(topic)
    }
}
