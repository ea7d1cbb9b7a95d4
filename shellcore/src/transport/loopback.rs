//! In-process [`TransportManager`] test double.
//!
//! Mirrors the teacher's `LoopbackTransport::create_pair` (in-process
//! `mpsc`-backed transport for tests), generalized to a small named "hub"
//! so more than two peers can be wired together — needed for scenarios
//! like spec 8's S6 (one local side, two independently connected peers).
//! There is no real negotiation: `create_connection` transitions straight
//! to `connected` once the named peer is present in the hub, which is
//! exactly the simplification a test double should make.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use shellcore_proto::ids::PeerId;

use super::{Channel, PeerState, TransportError, TransportManager};
use crate::events::EventBus;
use crate::transport::TransportEvent;

/// A shared registry of named loopback endpoints. Two
/// [`LoopbackTransportManager`]s sharing a hub and calling
/// `create_connection` with each other's id become connected.
#[derive(Default)]
pub struct LoopbackHub {
    nodes: Mutex<HashMap<PeerId, Weak<LoopbackTransportManager>>>,
}

impl LoopbackHub {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, id: PeerId, manager: &Arc<LoopbackTransportManager>) {
        self.nodes.lock().insert(id, Arc::downgrade(manager));
    }

    fn lookup(&self, id: &PeerId) -> Option<Arc<LoopbackTransportManager>> {
        self.nodes.lock().get(id).and_then(Weak::upgrade)
    }
}

pub struct LoopbackTransportManager {
    local_id: PeerId,
    hub: Arc<LoopbackHub>,
    events: Arc<EventBus<TransportEvent>>,
    peers: Mutex<HashMap<PeerId, PeerState>>,
}

impl LoopbackTransportManager {
    /// Creates a manager registered under `local_id` on `hub`. Other
    /// managers sharing the same hub can now `create_connection` with
    /// `local_id` and vice versa.
    #[must_use]
    pub fn new(local_id: PeerId, hub: Arc<LoopbackHub>) -> Arc<Self> {
        let manager = Arc::new(Self {
            local_id: local_id.clone(),
            hub: Arc::clone(&hub),
            events: Arc::new(EventBus::new()),
            peers: Mutex::new(HashMap::new()),
        });
        hub.register(local_id, &manager);
        manager
    }

    fn set_state(&self, peer_id: &PeerId, state: PeerState) {
        self.peers.lock().insert(peer_id.clone(), state);
        self.events.emit(&TransportEvent::StateChange {
            peer_id: peer_id.clone(),
            new_state: state,
        });
    }

    fn deliver(&self, peer_id: &PeerId, bytes: Vec<u8>, channel: Channel) -> bool {
        let connected = self.peers.lock().get(peer_id) == Some(&PeerState::Connected);
        if !connected {
            return false;
        }
        self.events.emit(&TransportEvent::Data {
            peer_id: peer_id.clone(),
            bytes,
            channel,
        });
        true
    }
}

impl TransportManager for LoopbackTransportManager {
    async fn create_connection(
        &self,
        peer_id: PeerId,
        _initiator: bool,
        _ice_servers: Option<Vec<String>>,
    ) -> Result<(), TransportError> {
        if self.hub.lookup(&peer_id).is_none() {
            return Err(TransportError::Negotiation(
                peer_id,
                "no such peer registered on the loopback hub".into(),
            ));
        }
        self.set_state(&peer_id, PeerState::Connecting);
        self.set_state(&peer_id, PeerState::Connected);
        self.events.emit(&TransportEvent::Connect {
            peer_id: peer_id.clone(),
        });
        Ok(())
    }

    async fn signal(&self, _peer_id: &PeerId, _datagram: Value) -> Result<(), TransportError> {
        // The loopback double never needs out-of-band negotiation datagrams.
        Ok(())
    }

    async fn send(&self, peer_id: &PeerId, bytes: &[u8], channel: Channel) -> bool {
        let Some(state) = self.peers.lock().get(peer_id).copied() else {
            return false;
        };
        if state != PeerState::Connected {
            return false;
        }
        let Some(remote) = self.hub.lookup(peer_id) else {
            return false;
        };
        remote.deliver(&self.local_id, bytes.to_vec(), channel)
    }

    async fn destroy(&self, peer_id: &PeerId) {
        if self.peers.lock().remove(peer_id).is_some() {
            self.events.emit(&TransportEvent::Close {
                peer_id: peer_id.clone(),
            });
            self.events.emit(&TransportEvent::StateChange {
                peer_id: peer_id.clone(),
                new_state: PeerState::Closed,
            });
        }
    }

    async fn destroy_all(&self) {
        let ids: Vec<PeerId> = self.peers.lock().keys().cloned().collect();
        for id in ids {
            self.destroy(&id).await;
        }
    }

    fn events(&self) -> &Arc<EventBus<TransportEvent>> {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn two_peers_on_the_same_hub_can_connect_and_exchange_data() {
        let hub = LoopbackHub::new();
        let a = LoopbackTransportManager::new(PeerId::new("a"), Arc::clone(&hub));
        let b = LoopbackTransportManager::new(PeerId::new("b"), hub);

        a.create_connection(PeerId::new("b"), true, None)
            .await
            .unwrap();
        b.create_connection(PeerId::new("a"), false, None)
            .await
            .unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&received);
        b.subscribe(move |event| {
            if let TransportEvent::Data { bytes, .. } = event {
                r.lock().push(bytes.clone());
            }
        });

        let delivered = a.send(&PeerId::new("b"), b"hello", Channel::Terminal).await;
        assert!(delivered);
        assert_eq!(received.lock().as_slice(), [b"hello".to_vec()]);
    }

    #[tokio::test]
    async fn send_to_unconnected_peer_returns_false() {
        let hub = LoopbackHub::new();
        let a = LoopbackTransportManager::new(PeerId::new("a"), hub);
        assert!(!a.send(&PeerId::new("ghost"), b"x", Channel::Control).await);
    }

    #[tokio::test]
    async fn create_connection_to_unregistered_peer_errors() {
        let hub = LoopbackHub::new();
        let a = LoopbackTransportManager::new(PeerId::new("a"), hub);
        let err = a
            .create_connection(PeerId::new("nobody"), true, None)
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn destroy_removes_peer_and_emits_close() {
        let hub = LoopbackHub::new();
        let a = LoopbackTransportManager::new(PeerId::new("a"), Arc::clone(&hub));
        let b = LoopbackTransportManager::new(PeerId::new("b"), hub);
        a.create_connection(PeerId::new("b"), true, None)
            .await
            .unwrap();

        let closed = Arc::new(Mutex::new(false));
        let c = Arc::clone(&closed);
        a.subscribe(move |event| {
            if matches!(event, TransportEvent::Close { .. }) {
                *c.lock() = true;
            }
        });
        a.destroy(&PeerId::new("b")).await;
        assert!(*closed.lock());
        assert!(!a.send(&PeerId::new("b"), b"x", Channel::Files).await);
        let _ = b; // keep b alive for the duration of the test
    }
}
