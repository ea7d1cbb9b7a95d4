//! The versioned outer record enclosing every peer-facing message (spec 3.5).

use crate::message::Message;

/// Exact-match major version exchanged in every envelope (spec 6:
/// "Compatibility rule: exact-match on major version; additions go to end
/// of field tuple").
pub const PROTOCOL_VERSION: u32 = 1;

/// `(version, sequence, payload)` — a 3-element sequence on the wire.
///
/// `sequence` is a monotonically increasing counter per local sender,
/// starting at 0 and incremented prior to each send. The core does not use
/// it for ordering; it exists for debugging and future out-of-order
/// recovery (spec 3.5).
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub version: u32,
    pub sequence: u64,
    pub payload: Message,
}

impl Envelope {
    /// Build an envelope at the current protocol version.
    #[must_use]
    pub const fn new(sequence: u64, payload: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            payload,
        }
    }
}

/// Assigns strictly increasing `sequence` numbers to outbound envelopes for
/// one local sender.
///
/// Assignment happens at send time, not at intent time (spec 5): callers
/// construct the [`Message`] first and only call [`SequenceCounter::next`]
/// when actually handing the envelope to the transport.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: u64,
}

impl SequenceCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Build the next envelope for `payload`, consuming one sequence number.
    pub fn next(&mut self, payload: Message) -> Envelope {
        let seq = self.next;
        self.next += 1;
        Envelope::new(seq, payload)
    }
}
