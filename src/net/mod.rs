//! Transport abstraction layer
//!
//! The synchronization engine only needs best-effort delivery of small
//! datagrams to named peers. [`Transport`] captures that contract; the
//! radio driver on a device or [`UdpTransport`] on a host implements it.

mod traits;
mod udp;

#[cfg(test)]
mod tests;

pub use traits::{ReceiveHandler, Transport};
pub use udp::UdpTransport;
