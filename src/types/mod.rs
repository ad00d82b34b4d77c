//! Core types module

mod config;
mod peer;


pub use config::{TimeSyncConfig, TimeSyncConfigBuilder};
pub use peer::{ParsePeerIdError, PeerId};
