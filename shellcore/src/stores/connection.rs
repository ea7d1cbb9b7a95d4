//! Connection store (spec 4.4, data model 3.1): a shadow record of every
//! peer known to the transport manager, plus overall signaling status.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use shellcore_proto::ids::PeerId;

use super::now_ms;
use crate::events::{EventBus, SubscriptionHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingStatus {
    Disconnected,
    Connecting,
    Connected,
    Dormant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub status: PeerStatus,
    pub initiator: bool,
    pub reconnect_attempts: u32,
    pub created_at: u64,
    pub connected_at: Option<u64>,
    pub disconnected_at: Option<u64>,
    pub last_error: Option<String>,
}

impl PeerRecord {
    fn new(peer_id: PeerId, initiator: bool) -> Self {
        Self {
            peer_id,
            status: PeerStatus::Connecting,
            initiator,
            reconnect_attempts: 0,
            created_at: now_ms(),
            connected_at: None,
            disconnected_at: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub signaling_status: SignalingStatus,
    pub peers: HashMap<PeerId, PeerRecord>,
    pub active_peer_id: Option<PeerId>,
    pub last_signaling_error: Option<String>,
    pub reconnect_attempts: u32,
}

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    SignalingStatusChanged(SignalingStatus),
    PeerAdded(PeerRecord),
    PeerUpdated(PeerRecord),
    /// A peer was removed; all sessions mapped to it must be closed by
    /// the orchestrator (spec 3.1: peer removal cascades).
    PeerRemoved(PeerId),
    ActivePeerChanged(Option<PeerId>),
}

struct State {
    signaling_status: SignalingStatus,
    peers: HashMap<PeerId, PeerRecord>,
    active_peer_id: Option<PeerId>,
    last_signaling_error: Option<String>,
    reconnect_attempts: u32,
}

pub struct ConnectionStore {
    state: Mutex<State>,
    events: Arc<EventBus<ConnectionEvent>>,
}

impl Default for ConnectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                signaling_status: SignalingStatus::Disconnected,
                peers: HashMap::new(),
                active_peer_id: None,
                last_signaling_error: None,
                reconnect_attempts: 0,
            }),
            events: Arc::new(EventBus::new()),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        let s = self.state.lock();
        ConnectionSnapshot {
            signaling_status: s.signaling_status,
            peers: s.peers.clone(),
            active_peer_id: s.active_peer_id.clone(),
            last_signaling_error: s.last_signaling_error.clone(),
            reconnect_attempts: s.reconnect_attempts,
        }
    }

    pub fn set_signaling_status(&self, status: SignalingStatus) {
        self.state.lock().signaling_status = status;
        self.events.emit(&ConnectionEvent::SignalingStatusChanged(status));
    }

    pub fn set_signaling_error(&self, error: Option<String>) {
        self.state.lock().last_signaling_error = error;
    }

    pub fn set_reconnect_attempts(&self, attempts: u32) {
        self.state.lock().reconnect_attempts = attempts;
    }

    /// Creates a peer record if absent (spec 3.1: created on `peer_joined`
    /// or on an inbound offer). Returns the resulting record either way.
    pub fn upsert_peer(&self, peer_id: PeerId, initiator: bool) -> PeerRecord {
        let mut s = self.state.lock();
        if let Some(existing) = s.peers.get(&peer_id) {
            return existing.clone();
        }
        let record = PeerRecord::new(peer_id.clone(), initiator);
        s.peers.insert(peer_id, record.clone());
        drop(s);
        self.events.emit(&ConnectionEvent::PeerAdded(record.clone()));
        record
    }

    /// Updates a peer's status. On a transition to `Connected`, if no peer
    /// is currently active, this peer is auto-promoted to
    /// `active_peer_id` — the file/transfer routing in the orchestrator
    /// (spec 4.9 item 6: "to the currently selected peer") otherwise has
    /// no peer to target, since nothing else in this system calls
    /// `set_active_peer`.
    pub fn set_peer_status(&self, peer_id: &PeerId, status: PeerStatus, error: Option<String>) {
        let (record, newly_active) = {
            let mut s = self.state.lock();
            let Some(record) = s.peers.get_mut(peer_id) else {
                tracing::warn!(%peer_id, "set_peer_status on unknown peer");
                return;
            };
            record.status = status;
            match status {
                PeerStatus::Connected => record.connected_at = Some(now_ms()),
                PeerStatus::Disconnected | PeerStatus::Failed => {
                    record.disconnected_at = Some(now_ms());
                }
                PeerStatus::Connecting => {}
            }
            if let Some(error) = error {
                record.last_error = Some(error);
            }
            let record = record.clone();

            let newly_active = status == PeerStatus::Connected && s.active_peer_id.is_none();
            if newly_active {
                s.active_peer_id = Some(peer_id.clone());
            }
            (record, newly_active)
        };
        self.events.emit(&ConnectionEvent::PeerUpdated(record));
        if newly_active {
            self.events.emit(&ConnectionEvent::ActivePeerChanged(Some(peer_id.clone())));
        }
    }

    /// Removes a peer entirely (explicit `peer_left` or teardown). If the
    /// removed peer was active, promotes another connected peer (if any)
    /// so the file/transfer routing keeps a target.
    pub fn remove_peer(&self, peer_id: &PeerId) {
        let (removed, active_changed, new_active) = {
            let mut s = self.state.lock();
            let removed = s.peers.remove(peer_id).is_some();
            let was_active = s.active_peer_id.as_ref() == Some(peer_id);
            let new_active = if was_active {
                s.peers
                    .values()
                    .find(|p| p.status == PeerStatus::Connected)
                    .map(|p| p.peer_id.clone())
            } else {
                None
            };
            if was_active {
                s.active_peer_id = new_active.clone();
            }
            (removed, was_active, new_active)
        };
        if removed {
            self.events.emit(&ConnectionEvent::PeerRemoved(peer_id.clone()));
            if active_changed {
                self.events.emit(&ConnectionEvent::ActivePeerChanged(new_active));
            }
        }
    }

    pub fn set_active_peer(&self, peer_id: Option<PeerId>) {
        self.state.lock().active_peer_id = peer_id.clone();
        self.events.emit(&ConnectionEvent::ActivePeerChanged(peer_id));
    }

    pub fn subscribe(
        &self,
        handler: impl Fn(&ConnectionEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle<ConnectionEvent> {
        self.events.subscribe(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_peer_is_idempotent() {
        let store = ConnectionStore::new();
        let a = store.upsert_peer(PeerId::new("p1"), true);
        let b = store.upsert_peer(PeerId::new("p1"), false);
        assert_eq!(a.initiator, b.initiator);
        assert_eq!(store.snapshot().peers.len(), 1);
    }

    #[test]
    fn set_peer_status_connected_stamps_connected_at() {
        let store = ConnectionStore::new();
        store.upsert_peer(PeerId::new("p1"), true);
        store.set_peer_status(&PeerId::new("p1"), PeerStatus::Connected, None);
        let snap = store.snapshot();
        assert!(snap.peers[&PeerId::new("p1")].connected_at.is_some());
    }

    #[test]
    fn remove_peer_clears_active_if_it_was_active() {
        let store = ConnectionStore::new();
        store.upsert_peer(PeerId::new("p1"), true);
        store.set_active_peer(Some(PeerId::new("p1")));
        store.remove_peer(&PeerId::new("p1"));
        assert_eq!(store.snapshot().active_peer_id, None);
    }

    #[test]
    fn removing_unknown_peer_does_not_emit() {
        let store = ConnectionStore::new();
        let count = Arc::new(Mutex::new(0));
        let c = Arc::clone(&count);
        store.subscribe(move |_| *c.lock() += 1);
        store.remove_peer(&PeerId::new("ghost"));
        assert_eq!(*count.lock(), 0);
    }

    /// Nothing else in the assembled system calls `set_active_peer`, so
    /// the first peer to connect must become active on its own, or the
    /// file/transfer routing has no target to send to.
    #[test]
    fn first_peer_to_connect_is_auto_promoted_to_active() {
        let store = ConnectionStore::new();
        store.upsert_peer(PeerId::new("p1"), true);
        assert_eq!(store.snapshot().active_peer_id, None);
        store.set_peer_status(&PeerId::new("p1"), PeerStatus::Connected, None);
        assert_eq!(store.snapshot().active_peer_id, Some(PeerId::new("p1")));
    }

    #[test]
    fn a_second_connecting_peer_does_not_steal_active_from_the_first() {
        let store = ConnectionStore::new();
        store.upsert_peer(PeerId::new("p1"), true);
        store.upsert_peer(PeerId::new("p2"), false);
        store.set_peer_status(&PeerId::new("p1"), PeerStatus::Connected, None);
        store.set_peer_status(&PeerId::new("p2"), PeerStatus::Connected, None);
        assert_eq!(store.snapshot().active_peer_id, Some(PeerId::new("p1")));
    }

    #[test]
    fn removing_the_active_peer_promotes_another_connected_peer() {
        let store = ConnectionStore::new();
        store.upsert_peer(PeerId::new("p1"), true);
        store.upsert_peer(PeerId::new("p2"), false);
        store.set_peer_status(&PeerId::new("p1"), PeerStatus::Connected, None);
        store.set_peer_status(&PeerId::new("p2"), PeerStatus::Connected, None);
        store.remove_peer(&PeerId::new("p1"));
        assert_eq!(store.snapshot().active_peer_id, Some(PeerId::new("p2")));
    }
}
