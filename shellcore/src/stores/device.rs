//! Device store (spec 4.8): paired devices and their bounded connection
//! history, keyed by peer id once a device has actually connected.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use shellcore_proto::ids::PeerId;

use super::now_ms;
use crate::events::{EventBus, SubscriptionHandle};

/// History entries beyond this count are dropped oldest-first (spec 4.8:
/// "bounded append-only history").
const MAX_HISTORY_ENTRIES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Paired,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Connected,
    Disconnected,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHistoryEntry {
    pub at: u64,
    pub outcome: ConnectionOutcome,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub peer_id: PeerId,
    pub label: String,
    pub status: DeviceStatus,
    pub paired_at: u64,
    pub last_seen_at: Option<u64>,
    pub history: Vec<ConnectionHistoryEntry>,
}

#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Paired(Device),
    StatusChanged { peer_id: PeerId, status: DeviceStatus },
    HistoryAppended { peer_id: PeerId, entry: ConnectionHistoryEntry },
    Forgotten { peer_id: PeerId },
}

struct State {
    devices: HashMap<PeerId, Device>,
}

pub struct DeviceStore {
    state: Mutex<State>,
    events: Arc<EventBus<DeviceEvent>>,
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State { devices: HashMap::new() }),
            events: Arc::new(EventBus::new()),
        }
    }

    #[must_use]
    pub fn get(&self, peer_id: &PeerId) -> Option<Device> {
        self.state.lock().devices.get(peer_id).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<Device> {
        self.state.lock().devices.values().cloned().collect()
    }

    /// Records a newly-paired device. Idempotent: pairing an already-known
    /// peer id just refreshes its label.
    pub fn pair(&self, peer_id: PeerId, label: String) -> Device {
        let device = {
            let mut s = self.state.lock();
            if let Some(existing) = s.devices.get_mut(&peer_id) {
                existing.label = label;
                return existing.clone();
            }
            let device = Device {
                peer_id: peer_id.clone(),
                label,
                status: DeviceStatus::Paired,
                paired_at: now_ms(),
                last_seen_at: None,
                history: Vec::new(),
            };
            s.devices.insert(peer_id, device.clone());
            device
        };
        self.events.emit(&DeviceEvent::Paired(device.clone()));
        device
    }

    pub fn mark_connected(&self, peer_id: &PeerId) {
        self.transition(peer_id, DeviceStatus::Connected, ConnectionOutcome::Connected, None);
    }

    pub fn mark_disconnected(&self, peer_id: &PeerId, detail: Option<String>) {
        self.transition(peer_id, DeviceStatus::Disconnected, ConnectionOutcome::Disconnected, detail);
    }

    pub fn mark_failed(&self, peer_id: &PeerId, detail: Option<String>) {
        self.transition(peer_id, DeviceStatus::Disconnected, ConnectionOutcome::Failed, detail);
    }

    fn transition(
        &self,
        peer_id: &PeerId,
        status: DeviceStatus,
        outcome: ConnectionOutcome,
        detail: Option<String>,
    ) {
        let entry = ConnectionHistoryEntry { at: now_ms(), outcome, detail };
        {
            let mut s = self.state.lock();
            let Some(device) = s.devices.get_mut(peer_id) else {
                tracing::warn!(%peer_id, "status transition on unknown device");
                return;
            };
            device.status = status;
            device.last_seen_at = Some(entry.at);
            device.history.push(entry.clone());
            if device.history.len() > MAX_HISTORY_ENTRIES {
                let overflow = device.history.len() - MAX_HISTORY_ENTRIES;
                device.history.drain(0..overflow);
            }
        }
        self.events.emit(&DeviceEvent::StatusChanged { peer_id: peer_id.clone(), status });
        self.events.emit(&DeviceEvent::HistoryAppended { peer_id: peer_id.clone(), entry });
    }

    pub fn forget(&self, peer_id: &PeerId) {
        let removed = self.state.lock().devices.remove(peer_id).is_some();
        if removed {
            self.events.emit(&DeviceEvent::Forgotten { peer_id: peer_id.clone() });
        }
    }

    pub fn subscribe(
        &self,
        handler: impl Fn(&DeviceEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle<DeviceEvent> {
        self.events.subscribe(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_twice_is_idempotent_and_updates_label() {
        let store = DeviceStore::new();
        store.pair(PeerId::new("p1"), "old".to_string());
        let device = store.pair(PeerId::new("p1"), "new".to_string());
        assert_eq!(device.label, "new");
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn mark_connected_appends_history_and_updates_status() {
        let store = DeviceStore::new();
        store.pair(PeerId::new("p1"), "device".to_string());
        store.mark_connected(&PeerId::new("p1"));
        let device = store.get(&PeerId::new("p1")).unwrap();
        assert_eq!(device.status, DeviceStatus::Connected);
        assert_eq!(device.history.len(), 1);
        assert_eq!(device.history[0].outcome, ConnectionOutcome::Connected);
    }

    #[test]
    fn history_is_bounded_to_max_entries() {
        let store = DeviceStore::new();
        store.pair(PeerId::new("p1"), "device".to_string());
        for _ in 0..(MAX_HISTORY_ENTRIES + 10) {
            store.mark_connected(&PeerId::new("p1"));
        }
        let device = store.get(&PeerId::new("p1")).unwrap();
        assert_eq!(device.history.len(), MAX_HISTORY_ENTRIES);
    }

    #[test]
    fn forget_removes_device_and_is_idempotent() {
        let store = DeviceStore::new();
        store.pair(PeerId::new("p1"), "device".to_string());
        store.forget(&PeerId::new("p1"));
        assert!(store.get(&PeerId::new("p1")).is_none());
        store.forget(&PeerId::new("p1"));
    }
}
