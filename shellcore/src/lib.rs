//! Client-side connection core for an encrypted peer-to-peer remote shell.

pub mod config;
pub mod error;
pub mod events;
pub mod file_engine;
pub mod flow_control;
pub mod orchestrator;
pub mod signaling;
pub mod stores;
pub mod transport;

pub use error::CoreError;
