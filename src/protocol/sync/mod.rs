//! Two-way timestamp clock synchronization.
//!
//! One master node is the time reference; clients synchronize to it
//! directly over a star topology. Each exchange gives the client four
//! timestamps:
//!
//! ```text
//! Client                          Master
//!   |--- TimeRequest (t1) ---------->|  t2_recv
//!   |<-- TimeResponse -------------- |  t3_send
//!   t4                               |
//!
//!   round_trip = t4 - t1
//!   delay      = (round_trip - (t3_send - t2_recv)) / 2
//!   offset     = t2_recv + delay - t1
//! ```
//!
//! Offsets are smoothed with an exponential moving average and trusted
//! after [`SYNC_THRESHOLD`] successes.

pub mod clock;
pub mod engine;
pub mod estimator;
pub mod message;


// Re-exports for convenient access.
pub use clock::{ClockSource, MonotonicClock};
pub use engine::{
    ClockSyncEngine, SYNC_THRESHOLD, SyncEventCallback, SyncOutcome, SyncRole, SyncSource,
    SyncState, SyncStatusCallback,
};
pub use estimator::{OffsetSmoother, SyncAttempt, SyncStatistics};
pub use message::{TimeRequest, TimeResponse};
