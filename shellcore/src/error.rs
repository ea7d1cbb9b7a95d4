//! The crate-wide error taxonomy (spec 7).
//!
//! Every kind here is surfaced through orchestrator state, a store field
//! (`error`/`last_error`), or a notification — never by unwinding through
//! an unrelated call path. `CoreError` exists for the handful of call
//! sites (mainly `Core::connect`/`Core::initialize`) that need one
//! `Result` type to return; most internal failures are handled locally per
//! the policy table below and never escape as a `CoreError` at all.
//!
//! | Kind | Policy |
//! |---|---|
//! | `ProtocolDecode` | log, drop message, keep channel alive |
//! | `ProtocolSemantic` | log warning, drop |
//! | `TransferInvariant` | fail transfer with explicit reason |
//! | `PeerFailure` | degrade peer to `failed`, close its sessions |
//! | `SignalingFailure` | degrade signaling to `disconnected`, leave peers alone |
//! | `Cancellation` | idempotent, terminal state sticky |
//! | `PairingError` | return parse-result failure, never crash |
//! | `SubscriberError` | catch, log, continue dispatching ([`crate::events`]) |

use shellcore_proto::codec::DecodeError;
use shellcore_proto::pairing::PairingError;

use crate::signaling::SignalingError;
use crate::transport::TransportError;

/// Top-level error type for fallible `Core` operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("wire decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("{0}")]
    Other(String),
}
