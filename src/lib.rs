//! # meshtime
//!
//! Two-way timestamp clock synchronization for small wireless meshes.
//!
//! ## Features
//!
//! - Master/client offset estimation over a star topology
//! - Exponential smoothing and threshold-based sync acquisition
//! - Periodic output pulses aligned to the synchronized epoch
//! - UDP transport and deterministic in-memory test collaborators
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use meshtime::{ClockSyncEngine, MonotonicClock, PeerId, SyncRole, TimeSyncConfig, UdpTransport};
//!
//! # async fn example() -> Result<(), meshtime::TimeSyncError> {
//! let transport = Arc::new(UdpTransport::bind("0.0.0.0:4210".parse().unwrap()).await?);
//! let engine = ClockSyncEngine::new(transport.clone(), Arc::new(MonotonicClock::new()));
//!
//! let master: PeerId = "C0:A8:04:01:10:72".parse().unwrap();
//! engine.initialize(SyncRole::Client, Some(master), TimeSyncConfig::default())?;
//! engine.start();
//!
//! let (_shutdown_tx, shutdown) = tokio::sync::watch::channel(false);
//! let rx = transport.clone();
//! tokio::spawn(async move { rx.run(shutdown).await });
//!
//! loop {
//!     engine.tick().await;
//!     tokio::time::sleep(Duration::from_millis(10)).await;
//! }
//! # }
//! ```
//!
//! # Architecture
//!
//! The library is organized into layers:
//!
//! - **Sync**: [`ClockSyncEngine`] - exchange, estimation, state
//! - **Pulse**: [`PeriodicPulseScheduler`] - output driven by a [`SyncSource`]
//! - **Host**: [`Transport`], [`ClockSource`], [`Scheduler`] and
//!   [`DigitalOutput`] seams with tokio-backed implementations

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
/// Error types
pub mod error;
/// Core types
pub mod types;

/// Testing utilities
pub mod testing;

pub mod net;
pub mod protocol;
pub mod pulse;

// Re-exports
pub use error::{
    ConfigError, InitError, MessageError, PulseError, TimeSyncError, TransportError,
};
pub use net::{ReceiveHandler, Transport, UdpTransport};
pub use protocol::sync::{
    ClockSource, ClockSyncEngine, MonotonicClock, SYNC_THRESHOLD, SyncOutcome, SyncRole,
    SyncSource, SyncState, SyncStatistics,
};
pub use pulse::{
    DigitalOutput, LatchedOutput, Level, PeriodicPulseScheduler, Scheduler, TokioScheduler,
};
pub use types::{PeerId, TimeSyncConfig, TimeSyncConfigBuilder};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports
///
/// Convenient re-exports
pub mod prelude {
    pub use crate::{
        ClockSyncEngine, MonotonicClock, PeerId, PeriodicPulseScheduler, SyncRole, SyncSource,
        SyncState, TimeSyncConfig, TimeSyncError, TokioScheduler, UdpTransport,
    };
}
