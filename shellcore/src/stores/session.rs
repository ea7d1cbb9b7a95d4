//! Session store (spec 4.5, data model 3.2): terminal session bookkeeping,
//! tab order, and the two write events the orchestrator drains onto the
//! wire (`session:input`, `session:resize`).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use shellcore_proto::ids::{PeerId, SessionId};

use super::now_ms;
use crate::events::{EventBus, SubscriptionHandle};
use crate::flow_control::{self, FlowSignal};

/// Default terminal receive watermarks (spec 8 scenario S2): pause above
/// 400 KiB of undelivered output, resume at or below 150 KiB.
pub const DEFAULT_HIGH_WATERMARK: u64 = 400 * 1024;
pub const DEFAULT_LOW_WATERMARK: u64 = 150 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    Running,
    Paused,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: SessionId,
    pub peer_id: PeerId,
    pub status: SessionStatus,
    pub flow_control: FlowControl,
    pub cols: u16,
    pub rows: u16,
    pub title: String,
    pub created_at: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} is not connected")]
    NotConnected(SessionId),
    #[error("session {0} is paused")]
    Paused(SessionId),
    #[error("session {0} is unknown")]
    Unknown(SessionId),
}

/// Events emitted by [`SessionStore`]. `Input`/`Resize` are the write
/// events the orchestrator consumes to drive the wire (spec 4.5); the
/// rest mirror store-state transitions for UI consumption.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Created(Session),
    Closed { session_id: SessionId },
    ActiveChanged(Option<SessionId>),
    StatusChanged {
        session_id: SessionId,
        status: SessionStatus,
        error: Option<String>,
    },
    TitleChanged { session_id: SessionId, title: String },
    Reordered(Vec<SessionId>),
    Output { session_id: SessionId, text: Vec<u8> },
    /// The receive watermark gate crossed (spec 8 invariant 9, scenario
    /// S2): `paused = true` on a high-watermark crossing, `false` on a
    /// low-watermark crossing. Fires at most once per crossing.
    FlowControlChanged { session_id: SessionId, paused: bool },
    /// Write event: send as `SessionData(stream=Stdin)` on `terminal`.
    Input { session_id: SessionId, text: Vec<u8> },
    /// Write event: send as `SessionResize(...)` on `terminal`.
    Resize { session_id: SessionId, cols: u16, rows: u16 },
}

/// A session's receive watermark gate plus the undelivered-output backlog
/// it is tracking (spec 8 invariant 9: `feed` takes the *absolute*
/// buffered-byte count, not a delta).
struct FlowState {
    gate: flow_control::FlowControl,
    buffered: u64,
}

struct State {
    sessions: HashMap<SessionId, Session>,
    active_session_id: Option<SessionId>,
    session_order: Vec<SessionId>,
    flow: HashMap<SessionId, FlowState>,
}

pub struct SessionStore {
    state: Mutex<State>,
    events: Arc<EventBus<SessionEvent>>,
    high_watermark: u64,
    low_watermark: u64,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_watermarks(DEFAULT_HIGH_WATERMARK, DEFAULT_LOW_WATERMARK)
    }

    /// Builds a store with caller-chosen receive watermarks (spec 4.6
    /// config surface: `high_watermark`/`low_watermark` are configured,
    /// not hardcoded).
    #[must_use]
    pub fn with_watermarks(high_watermark: u64, low_watermark: u64) -> Self {
        Self {
            state: Mutex::new(State {
                sessions: HashMap::new(),
                active_session_id: None,
                session_order: Vec::new(),
                flow: HashMap::new(),
            }),
            events: Arc::new(EventBus::new()),
            high_watermark,
            low_watermark,
        }
    }

    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.state.lock().sessions.get(&id).cloned()
    }

    #[must_use]
    pub fn session_order(&self) -> Vec<SessionId> {
        self.state.lock().session_order.clone()
    }

    #[must_use]
    pub fn active_session_id(&self) -> Option<SessionId> {
        self.state.lock().active_session_id
    }

    pub fn create_session(
        &self,
        peer_id: PeerId,
        title: Option<String>,
        cols: Option<u16>,
        rows: Option<u16>,
    ) -> SessionId {
        let session = Session {
            session_id: SessionId::new(),
            peer_id,
            status: SessionStatus::Connecting,
            flow_control: FlowControl::Running,
            cols: cols.unwrap_or(80),
            rows: rows.unwrap_or(24),
            title: title.unwrap_or_default(),
            created_at: now_ms(),
            last_error: None,
        };
        let id = session.session_id;
        {
            let mut s = self.state.lock();
            s.session_order.push(id);
            s.sessions.insert(id, session.clone());
            s.flow.insert(
                id,
                FlowState {
                    gate: flow_control::FlowControl::new(self.high_watermark, self.low_watermark),
                    buffered: 0,
                },
            );
        }
        self.events.emit(&SessionEvent::Created(session));
        id
    }

    /// Closes a session. If it was active, activation jumps to the next
    /// entry in `session_order`, else the previous, else `null` (spec 3.2).
    pub fn close_session(&self, id: SessionId) {
        let new_active = {
            let mut s = self.state.lock();
            if s.sessions.remove(&id).is_none() {
                return;
            }
            s.flow.remove(&id);
            let Some(idx) = s.session_order.iter().position(|sid| *sid == id) else {
                return;
            };
            s.session_order.remove(idx);

            if s.active_session_id != Some(id) {
                None
            } else {
                let next = s
                    .session_order
                    .get(idx)
                    .copied()
                    .or_else(|| idx.checked_sub(1).and_then(|i| s.session_order.get(i).copied()));
                s.active_session_id = next;
                Some(next)
            }
        };
        self.events.emit(&SessionEvent::Closed { session_id: id });
        if let Some(new_active) = new_active {
            self.events.emit(&SessionEvent::ActiveChanged(new_active));
        }
    }

    pub fn set_active(&self, id: Option<SessionId>) {
        self.state.lock().active_session_id = id;
        self.events.emit(&SessionEvent::ActiveChanged(id));
    }

    /// Rejects input when the session is not `connected` or is `paused`
    /// (spec 4.5 policy). On success, emits the `Input` write event for
    /// the orchestrator.
    pub fn send_input(&self, id: SessionId, text: Vec<u8>) -> Result<(), SessionError> {
        {
            let s = self.state.lock();
            let session = s.sessions.get(&id).ok_or(SessionError::Unknown(id))?;
            if session.status != SessionStatus::Connected {
                return Err(SessionError::NotConnected(id));
            }
            if session.flow_control == FlowControl::Paused {
                return Err(SessionError::Paused(id));
            }
        }
        self.events.emit(&SessionEvent::Input { session_id: id, text });
        Ok(())
    }

    pub fn resize(&self, id: SessionId, cols: u16, rows: u16) {
        {
            let mut s = self.state.lock();
            let Some(session) = s.sessions.get_mut(&id) else {
                return;
            };
            session.cols = cols;
            session.rows = rows;
        }
        self.events.emit(&SessionEvent::Resize { session_id: id, cols, rows });
    }

    pub fn pause(&self, id: SessionId) {
        self.set_flow_control(id, FlowControl::Paused);
    }

    pub fn resume(&self, id: SessionId) {
        self.set_flow_control(id, FlowControl::Running);
    }

    fn set_flow_control(&self, id: SessionId, fc: FlowControl) {
        let mut s = self.state.lock();
        if let Some(session) = s.sessions.get_mut(&id) {
            session.flow_control = fc;
        }
    }

    pub fn set_status(&self, id: SessionId, status: SessionStatus, error: Option<String>) {
        {
            let mut s = self.state.lock();
            let Some(session) = s.sessions.get_mut(&id) else {
                return;
            };
            session.status = status;
            if let Some(ref error) = error {
                session.last_error = Some(error.clone());
            }
        }
        self.events.emit(&SessionEvent::StatusChanged {
            session_id: id,
            status,
            error,
        });
    }

    pub fn set_title(&self, id: SessionId, title: String) {
        {
            let mut s = self.state.lock();
            let Some(session) = s.sessions.get_mut(&id) else {
                return;
            };
            session.title.clone_from(&title);
        }
        self.events.emit(&SessionEvent::TitleChanged { session_id: id, title });
    }

    pub fn reorder(&self, from_idx: usize, to_idx: usize) {
        let order = {
            let mut s = self.state.lock();
            if from_idx >= s.session_order.len() || to_idx >= s.session_order.len() {
                return;
            }
            let id = s.session_order.remove(from_idx);
            s.session_order.insert(to_idx, id);
            s.session_order.clone()
        };
        self.events.emit(&SessionEvent::Reordered(order));
    }

    /// Closes every session mapped to `peer_id` (spec 3.1: peer removal
    /// cascades). Called by the orchestrator on `peer_left`/peer failure.
    pub fn close_by_peer(&self, peer_id: &PeerId) {
        let ids: Vec<SessionId> = {
            let s = self.state.lock();
            s.sessions
                .values()
                .filter(|sess| &sess.peer_id == peer_id)
                .map(|sess| sess.session_id)
                .collect()
        };
        for id in ids {
            self.close_session(id);
        }
    }

    /// Appends inbound output. A warning is logged (not an error) when the
    /// session id is unknown, per spec 4.5.
    ///
    /// Feeds the receive watermark gate (spec 3.2, invariant 9): once the
    /// undelivered backlog crosses the high watermark, the session flips
    /// to `paused` and this and subsequent chunks are not delivered until
    /// [`SessionStore::mark_consumed`] drains the backlog back to the low
    /// watermark. Terminal data is best-effort (spec 1 Non-goals), so a
    /// chunk dropped while paused is never replayed.
    pub fn write_output(&self, id: SessionId, text: Vec<u8>) {
        let (was_running, signal) = {
            let mut s = self.state.lock();
            let Some(session) = s.sessions.get(&id) else {
                drop(s);
                tracing::warn!(%id, "write_output on unknown session id");
                return;
            };
            let was_running =
                session.status == SessionStatus::Connected && session.flow_control == FlowControl::Running;
            let signal = s.flow.get_mut(&id).and_then(|flow| {
                flow.buffered += text.len() as u64;
                flow.gate.feed(flow.buffered)
            });
            (was_running, signal)
        };

        if was_running {
            self.events.emit(&SessionEvent::Output { session_id: id, text });
        }
        self.apply_flow_signal(id, signal);
    }

    /// Reports that `drained_bytes` worth of previously-buffered output
    /// has been consumed by the renderer, lowering the gate's tracked
    /// backlog and potentially firing a resume (spec 8 S2: "drain to
    /// 100 KiB").
    pub fn mark_consumed(&self, id: SessionId, drained_bytes: u64) {
        let signal = {
            let mut s = self.state.lock();
            s.flow.get_mut(&id).and_then(|flow| {
                flow.buffered = flow.buffered.saturating_sub(drained_bytes);
                flow.gate.feed(flow.buffered)
            })
        };
        self.apply_flow_signal(id, signal);
    }

    fn apply_flow_signal(&self, id: SessionId, signal: Option<FlowSignal>) {
        let Some(signal) = signal else {
            return;
        };
        let paused = signal == FlowSignal::Pause;
        self.set_flow_control(id, if paused { FlowControl::Paused } else { FlowControl::Running });
        self.events.emit(&SessionEvent::FlowControlChanged { session_id: id, paused });
    }

    pub fn subscribe(
        &self,
        handler: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle<SessionEvent> {
        self.events.subscribe(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_close_session_promotes_next_active() {
        let store = SessionStore::new();
        let peer = PeerId::new("p1");
        let a = store.create_session(peer.clone(), None, None, None);
        let b = store.create_session(peer.clone(), None, None, None);
        store.set_active(Some(a));
        store.close_session(a);
        assert_eq!(store.active_session_id(), Some(b));
    }

    #[test]
    fn send_input_rejected_when_not_connected() {
        let store = SessionStore::new();
        let id = store.create_session(PeerId::new("p1"), None, None, None);
        let err = store.send_input(id, b"hi".to_vec());
        assert!(matches!(err, Err(SessionError::NotConnected(_))));
    }

    #[test]
    fn send_input_rejected_when_paused() {
        let store = SessionStore::new();
        let id = store.create_session(PeerId::new("p1"), None, None, None);
        store.set_status(id, SessionStatus::Connected, None);
        store.pause(id);
        let err = store.send_input(id, b"hi".to_vec());
        assert!(matches!(err, Err(SessionError::Paused(_))));
    }

    #[test]
    fn send_input_accepted_when_connected_and_running() {
        let store = SessionStore::new();
        let id = store.create_session(PeerId::new("p1"), None, None, None);
        store.set_status(id, SessionStatus::Connected, None);
        assert!(store.send_input(id, b"hi".to_vec()).is_ok());
    }

    #[test]
    fn close_by_peer_closes_all_matching_sessions() {
        let store = SessionStore::new();
        let peer_a = PeerId::new("a");
        let peer_b = PeerId::new("b");
        store.create_session(peer_a.clone(), None, None, None);
        store.create_session(peer_a.clone(), None, None, None);
        store.create_session(peer_b, None, None, None);
        store.close_by_peer(&peer_a);
        assert_eq!(store.session_order().len(), 1);
    }

    #[test]
    fn reorder_moves_entry_to_target_index() {
        let store = SessionStore::new();
        let peer = PeerId::new("p1");
        let a = store.create_session(peer.clone(), None, None, None);
        let b = store.create_session(peer.clone(), None, None, None);
        let c = store.create_session(peer, None, None, None);
        store.reorder(0, 2);
        assert_eq!(store.session_order(), vec![b, c, a]);
    }

    /// Mirrors spec 8 scenario S2 at the store level: feed 500 KiB of
    /// output, observe exactly one pause; drain to 100 KiB, observe
    /// exactly one resume.
    #[test]
    fn write_output_pauses_and_mark_consumed_resumes() {
        let store = SessionStore::with_watermarks(400 * 1024, 150 * 1024);
        let id = store.create_session(PeerId::new("p1"), None, None, None);
        store.set_status(id, SessionStatus::Connected, None);

        let pauses = Arc::new(Mutex::new(0));
        let resumes = Arc::new(Mutex::new(0));
        let p = Arc::clone(&pauses);
        let r = Arc::clone(&resumes);
        store.subscribe(move |event| {
            if let SessionEvent::FlowControlChanged { paused, .. } = event {
                if *paused {
                    *p.lock() += 1;
                } else {
                    *r.lock() += 1;
                }
            }
        });

        store.write_output(id, vec![0u8; 500 * 1024]);
        assert_eq!(*pauses.lock(), 1);
        assert_eq!(store.get(id).unwrap().flow_control, FlowControl::Paused);

        store.mark_consumed(id, 400 * 1024);
        assert_eq!(*resumes.lock(), 1);
        assert_eq!(store.get(id).unwrap().flow_control, FlowControl::Running);
    }

    #[test]
    fn output_not_delivered_to_subscribers_while_paused() {
        let store = SessionStore::with_watermarks(400 * 1024, 150 * 1024);
        let id = store.create_session(PeerId::new("p1"), None, None, None);
        store.set_status(id, SessionStatus::Connected, None);
        store.pause(id);

        let delivered = Arc::new(Mutex::new(0));
        let d = Arc::clone(&delivered);
        store.subscribe(move |event| {
            if matches!(event, SessionEvent::Output { .. }) {
                *d.lock() += 1;
            }
        });

        store.write_output(id, b"dropped while paused".to_vec());
        assert_eq!(*delivered.lock(), 0);
    }
}
