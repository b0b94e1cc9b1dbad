//! Live connection registry.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::ids::ConnectionId;
use crate::socket::{OutboundFrame, SocketRef};

/// Open connections of one endpoint, keyed by identity.
///
/// An identity is present from its open transition until its close
/// transition. The lock is only held for map operations, never while a
/// socket method or handler runs.
#[derive(Default)]
pub struct ConnectionRegistry {
    sockets: RwLock<HashMap<ConnectionId, SocketRef>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a socket. If its identity is already present the existing entry
    /// is kept and `false` is returned.
    pub fn insert(&self, socket: SocketRef) -> bool {
        let mut sockets = self.sockets.write();
        if sockets.contains_key(socket.id()) {
            warn!(conn_id = %socket.id(), "connection already registered, keeping existing entry");
            return false;
        }
        let _ = sockets.insert(socket.id().clone(), socket);
        true
    }

    /// Stop tracking an identity. Absent identities are ignored.
    pub fn remove(&self, id: &ConnectionId) -> Option<SocketRef> {
        let removed = self.sockets.write().remove(id);
        if removed.is_none() {
            debug!(conn_id = %id, "remove for unknown connection ignored");
        }
        removed
    }

    /// Socket for an identity.
    pub fn get(&self, id: &ConnectionId) -> Option<SocketRef> {
        self.sockets.read().get(id).cloned()
    }

    /// Whether an identity is open.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.sockets.read().contains_key(id)
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.sockets.read().len()
    }

    /// Whether no connection is open.
    pub fn is_empty(&self) -> bool {
        self.sockets.read().is_empty()
    }

    /// Open identities, sorted.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.sockets.read().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Clone of every open socket.
    pub fn snapshot(&self) -> Vec<SocketRef> {
        self.sockets.read().values().cloned().collect()
    }

    /// Send a frame to every open socket. Returns how many accepted it.
    pub fn broadcast(&self, frame: &OutboundFrame) -> usize {
        let sockets = self.snapshot();
        let accepted = sockets
            .iter()
            .filter(|s| s.send(frame.clone()).is_accepted())
            .count();
        debug!(recipients = sockets.len(), accepted, "broadcast frame");
        accepted
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::SendStatus;
    use crate::testing::RecordingSocket;
    use std::sync::Arc;

    #[test]
    fn insert_and_lookup() {
        let reg = ConnectionRegistry::new();
        let socket = RecordingSocket::shared("c1");
        assert!(reg.insert(socket));
        assert!(reg.contains(&"c1".into()));
        assert!(reg.get(&"c1".into()).is_some());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn insert_is_first_write_wins() {
        let reg = ConnectionRegistry::new();
        let first = RecordingSocket::new("c1");
        let first_ref: SocketRef = first.clone();
        assert!(reg.insert(first_ref));
        assert!(!reg.insert(RecordingSocket::shared("c1")));
        assert_eq!(reg.len(), 1);

        let kept = reg.get(&"c1".into()).unwrap();
        let _ = kept.send("hi".into());
        assert_eq!(first.sent().len(), 1);
    }

    #[test]
    fn remove_absent_is_noop() {
        let reg = ConnectionRegistry::new();
        assert!(reg.insert(RecordingSocket::shared("c1")));
        assert!(reg.remove(&"c1".into()).is_some());
        assert!(reg.remove(&"c1".into()).is_none());
        assert!(reg.remove(&"never".into()).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn ids_are_sorted() {
        let reg = ConnectionRegistry::new();
        for id in ["b", "c", "a"] {
            assert!(reg.insert(RecordingSocket::shared(id)));
        }
        let ids: Vec<String> = reg.ids().iter().map(|i| i.as_str().to_owned()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn broadcast_counts_accepted() {
        let reg = ConnectionRegistry::new();
        let open = RecordingSocket::new("open");
        let full = RecordingSocket::new("full");
        full.set_status(SendStatus::Dropped);
        assert!(reg.insert(open.clone()));
        assert!(reg.insert(full.clone()));

        assert_eq!(reg.broadcast(&OutboundFrame::from("tick")), 1);
        assert_eq!(open.sent(), vec![OutboundFrame::from("tick")]);
        assert!(full.sent().is_empty());
    }

    #[test]
    fn snapshot_outlives_removal() {
        let reg = ConnectionRegistry::new();
        assert!(reg.insert(RecordingSocket::shared("c1")));
        let snap = reg.snapshot();
        let _ = reg.remove(&"c1".into());
        assert_eq!(snap.len(), 1);
        assert_eq!(Arc::strong_count(&snap[0]), 1);
    }
}
