//! The five application state stores (spec 4.4-4.8).
//!
//! Each store owns one `Mutex`-guarded state struct plus an
//! [`crate::events::EventBus`] of its own event type, following the
//! uniform `{ state, mutators, subscribe }` shape the design notes call
//! for. None of this has a teacher counterpart — `ChatManager` keeps a
//! single flat struct and a single `mpsc::Sender`, not five independently
//! subscribable domain stores — so the shape here generalizes that
//! pattern rather than copying it verbatim.

pub mod connection;
pub mod device;
pub mod file;
pub mod notification;
pub mod session;

/// Milliseconds since the Unix epoch, used for every store timestamp
/// field. Saturates to 0 rather than panicking if the clock is somehow
/// set before the epoch.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
