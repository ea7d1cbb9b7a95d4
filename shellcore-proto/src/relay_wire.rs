//! The relay-facing JSON signaling wire (spec 6).
//!
//! Distinct from the peer-facing binary protocol in [`crate::codec`]: the
//! signaling relay only ever sees these JSON-shaped introduction and
//! ICE-style negotiation datagrams, never application payload. The core is
//! tolerant to field additions on this wire — an internally tagged enum
//! with an `Unknown` fallback variant means a relay that starts sending an
//! unrecognized `type` degrades to a no-op instead of a parse failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One relay-facing signaling datagram, discriminated by its JSON `type`
/// field and a `peerId` field present on every peer-scoped variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayMessage {
    /// Outbound: ask the relay to join a room, with this client's
    /// self-chosen display identity if set.
    Join { room_id: String },

    /// Outbound: leave the current room cleanly (no reconnection follows).
    Leave,

    /// Inbound: acknowledges `Join`, assigning the local peer its relay id
    /// and listing peers already present in the room. Not named in the
    /// minimal relay type list but required to carry the ack payload the
    /// signaling client's `connected` event needs (spec 4.2).
    Joined {
        #[serde(rename = "peerId")]
        peer_id: String,
        existing_peers: Vec<String>,
    },

    /// Inbound: a new peer joined the room.
    #[serde(rename = "peer-joined")]
    PeerJoined {
        #[serde(rename = "peerId")]
        peer_id: String,
    },

    /// Inbound: a peer left the room (explicit leave or relay-detected drop).
    #[serde(rename = "peer-left")]
    PeerLeft {
        #[serde(rename = "peerId")]
        peer_id: String,
    },

    /// Bidirectional: an SDP-style offer, routed by the relay to `peer_id`.
    Offer {
        #[serde(rename = "peerId")]
        peer_id: String,
        desc: Value,
    },

    /// Bidirectional: an SDP-style answer, routed by the relay to `peer_id`.
    Answer {
        #[serde(rename = "peerId")]
        peer_id: String,
        desc: Value,
    },

    /// Bidirectional: an ICE candidate, routed by the relay to `peer_id`.
    Ice {
        #[serde(rename = "peerId")]
        peer_id: String,
        candidate: Value,
    },

    /// Inbound: a relay-side error not tied to a specific peer.
    Error { message: String },

    /// Catch-all for any `type` this client doesn't recognize. Preserves
    /// forward compatibility with a relay that adds new datagram kinds.
    #[serde(other)]
    Unknown,
}

/// Errors encoding or decoding a [`RelayMessage`].
#[derive(Debug, thiserror::Error)]
pub enum RelayWireError {
    #[error("relay JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes a [`RelayMessage`] to its JSON wire form.
///
/// # Errors
///
/// Returns [`RelayWireError`] if the message cannot be serialized (should
/// not happen for well-formed values of this enum).
pub fn encode(message: &RelayMessage) -> Result<Vec<u8>, RelayWireError> {
    Ok(serde_json::to_vec(message)?)
}

/// Parses a [`RelayMessage`] from its JSON wire form.
///
/// Unknown fields on a recognized variant are silently ignored; an
/// unrecognized `type` decodes as [`RelayMessage::Unknown`] rather than
/// failing, per the relay wire's tolerance-to-additions contract.
///
/// # Errors
///
/// Returns [`RelayWireError`] if the bytes are not valid JSON at all.
pub fn decode(bytes: &[u8]) -> Result<RelayMessage, RelayWireError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_round_trips() {
        let msg = RelayMessage::Join {
            room_id: "d1".into(),
        };
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn peer_joined_uses_kebab_case_type_tag() {
        let msg = RelayMessage::PeerJoined {
            peer_id: "p1".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"peer-joined\""));
    }

    #[test]
    fn unknown_type_decodes_as_unknown_not_error() {
        let raw = br#"{"type":"future-feature","whatever":1}"#;
        let decoded = decode(raw).unwrap();
        assert_eq!(decoded, RelayMessage::Unknown);
    }

    #[test]
    fn extra_fields_on_known_variant_are_tolerated() {
        let raw = br#"{"type":"peer-joined","peerId":"p1","extra":"field"}"#;
        let decoded = decode(raw).unwrap();
        assert_eq!(
            decoded,
            RelayMessage::PeerJoined {
                peer_id: "p1".into()
            }
        );
    }

    #[test]
    fn offer_uses_peer_id_camel_case_field() {
        let msg = RelayMessage::Offer {
            peer_id: "p1".into(),
            desc: serde_json::json!({"sdp": "v=0"}),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"peerId\":\"p1\""));
    }

    #[test]
    fn invalid_json_is_an_error_not_a_panic() {
        assert!(decode(b"not json").is_err());
    }
}
