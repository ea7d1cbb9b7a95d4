//! Shared wire protocol for the shellcore remote-shell client.
//!
//! Three distinct wires live here, each with the codec its external
//! format actually requires:
//!
//! - [`message`] / [`envelope`] / [`codec`] — the peer-facing array-tagged
//!   binary protocol (daemon <-> client).
//! - [`relay_wire`] — the relay-facing JSON signaling protocol.
//! - [`pairing`] — the QR pairing payload, also JSON.

pub mod codec;
pub mod envelope;
pub mod ids;
pub mod message;
pub mod pairing;
pub mod relay_wire;

pub use codec::DecodeError;
pub use envelope::Envelope;
pub use message::Message;
