//! Per-peer transport manager (spec 4.3).
//!
//! Owns one negotiated connection per peer with three logical channels
//! distinguished by ordering/reliability semantics. Two backends implement
//! [`TransportManager`]: [`webrtc::WebrtcTransportManager`] (real data
//! channels, used in production) and [`loopback::LoopbackTransportManager`]
//! (in-process, used in tests — mirrors the teacher's own loopback test
//! double).

pub mod loopback;
pub mod webrtc;

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use shellcore_proto::ids::PeerId;

use crate::events::{EventBus, SubscriptionHandle};

/// One of the three logical channels multiplexed over a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Ordered, lossless. Handshakes, RPC, device exchange.
    Control,
    /// Unordered, best-effort. Keystrokes and tty output.
    Terminal,
    /// Ordered, lossless. List/download/upload.
    Files,
}

impl Channel {
    /// The data channel label a responder uses to identify which internal
    /// slot an incoming channel should bind to.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Terminal => "terminal",
            Self::Files => "files",
        }
    }

    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "control" => Some(Self::Control),
            "terminal" => Some(Self::Terminal),
            "files" => Some(Self::Files),
            _ => None,
        }
    }

    #[must_use]
    pub const fn ordered(self) -> bool {
        !matches!(self, Self::Terminal)
    }
}

/// The per-peer connection state machine (spec 4.3): `new -> connecting ->
/// connected -> (disconnected | failed) -> closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events emitted by a [`TransportManager`] (spec 4.3).
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Outbound negotiation datagram, to be forwarded through signaling.
    Signal { peer_id: PeerId, datagram: Value },
    Connect { peer_id: PeerId },
    Close { peer_id: PeerId },
    Data {
        peer_id: PeerId,
        bytes: Vec<u8>,
        channel: Channel,
    },
    Error { peer_id: PeerId, message: String },
    StateChange { peer_id: PeerId, new_state: PeerState },
}

/// Errors a [`TransportManager`] implementation can raise from its async
/// operations. `send` itself never returns an error — undeliverable sends
/// return `false` (spec 4.3: "It never blocks; backpressure observable to
/// callers is a return-false signal").
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer {0} is unknown to this transport manager")]
    UnknownPeer(PeerId),

    #[error("negotiation failed for peer {0}: {1}")]
    Negotiation(PeerId, String),

    #[error("data channel label {0:?} is not one of control/terminal/files")]
    UnknownChannelLabel(String),

    #[error("backend I/O error: {0}")]
    Io(String),
}

/// Per-peer negotiation state machine with three logical channels
/// (spec 4.3). Implemented by [`webrtc::WebrtcTransportManager`] (real
/// backend) and [`loopback::LoopbackTransportManager`] (test double).
///
/// RPITIT methods, not `async_trait`, matching the teacher's own
/// `Transport` trait shape — this is generic-dispatched, never boxed as a
/// trait object.
pub trait TransportManager: Send + Sync {
    /// Creates a new peer connection. If `initiator` is true, the local
    /// side is expected to emit the first offer once signal-level
    /// negotiation starts; the secondary channels (`terminal`, `files`)
    /// open as soon as the connection reaches `connected`. If responder,
    /// the channels appear when the remote peer opens them.
    fn create_connection(
        &self,
        peer_id: PeerId,
        initiator: bool,
        ice_servers: Option<Vec<String>>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Delivers an inbound negotiation datagram (offer/answer/ICE
    /// candidate) to the peer's connection.
    fn signal(
        &self,
        peer_id: &PeerId,
        datagram: Value,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Sends `bytes` on `channel` to `peer_id`. Returns `false` — never an
    /// error — if the peer isn't `connected`, the channel isn't open yet,
    /// or the underlying channel isn't currently writable.
    fn send(
        &self,
        peer_id: &PeerId,
        bytes: &[u8],
        channel: Channel,
    ) -> impl Future<Output = bool> + Send;

    /// Tears down one peer's connection and all its channels.
    fn destroy(&self, peer_id: &PeerId) -> impl Future<Output = ()> + Send;

    /// Tears down every peer connection.
    fn destroy_all(&self) -> impl Future<Output = ()> + Send;

    /// The event bus subscribers attach to for [`TransportEvent`]s.
    fn events(&self) -> &Arc<EventBus<TransportEvent>>;

    /// Convenience wrapper over `events().subscribe`.
    fn subscribe(
        &self,
        handler: impl Fn(&TransportEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle<TransportEvent> {
        self.events().subscribe(handler)
    }
}
