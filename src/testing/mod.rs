//! Deterministic collaborators for tests and simulations.
//!
//! Everything here runs on a shared simulated timeline ([`SimClock`]) so
//! multi-node scenarios are reproducible: per-node clocks are skewed views
//! of the same true time, the loopback network advances that time by its
//! link delay, and the manual scheduler fires timers as time is advanced.

mod loopback;
mod manual_scheduler;
mod manual_sync;
pub mod network_sim;
mod recording_output;
mod sim_clock;


pub use loopback::{LoopbackEndpoint, LoopbackNetwork};
pub use manual_scheduler::ManualScheduler;
pub use manual_sync::ManualSyncSource;
pub use network_sim::NetworkSimulator;
pub use recording_output::{RecordingOutput, Transition};
pub use sim_clock::{NodeClock, SimClock};
