//! In-memory transport connecting endpoints in one process.
//!
//! Delivery is synchronous: `send` runs the destination's receive handler
//! before returning, after advancing the shared [`SimClock`] by the
//! simulated one-way delay. A request/response exchange therefore
//! completes entirely inside the client's `send` call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use super::network_sim::NetworkSimulator;
use super::sim_clock::SimClock;
use crate::error::TransportError;
use crate::net::{ReceiveHandler, Transport};
use crate::types::PeerId;

#[derive(Default)]
struct NetworkInner {
    handlers: Mutex<HashMap<PeerId, ReceiveHandler>>,
    clock: Option<SimClock>,
    conditions: Mutex<NetworkSimulator>,
    partitioned: AtomicBool,
    drop_next: AtomicU32,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl NetworkInner {
    fn deliver(&self, from: PeerId, to: PeerId, bytes: &[u8]) {
        if self.partitioned.load(Ordering::Acquire) || self.take_scheduled_drop() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let delay_us = {
            let conditions = self.conditions.lock();
            if conditions.should_drop() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            conditions.get_delay_us()
        };
        if let Some(clock) = &self.clock {
            clock.advance(delay_us);
        }

        let handler = self.handlers.lock().get(&to).cloned();
        if let Some(handler) = handler {
            self.delivered.fetch_add(1, Ordering::Relaxed);
            handler(from, bytes);
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn take_scheduled_drop(&self) -> bool {
        self.drop_next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// A shared medium that [`LoopbackEndpoint`]s attach to.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

impl LoopbackNetwork {
    /// Instant, lossless network with no notion of time.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Network that advances `clock` by each datagram's delay.
    #[must_use]
    pub fn with_clock(clock: SimClock, conditions: NetworkSimulator) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                clock: Some(clock),
                conditions: Mutex::new(conditions),
                ..NetworkInner::default()
            }),
        }
    }

    /// Attach a new endpoint with identity `id`.
    #[must_use]
    pub fn endpoint(&self, id: PeerId) -> Arc<LoopbackEndpoint> {
        Arc::new(LoopbackEndpoint {
            id,
            network: Arc::clone(&self.inner),
            peers: Mutex::new(HashSet::new()),
            fail_bring_up: AtomicBool::new(false),
            reject_peers: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            up: AtomicBool::new(false),
            sent: AtomicU64::new(0),
        })
    }

    /// Replace the link conditions.
    pub fn set_conditions(&self, conditions: NetworkSimulator) {
        *self.inner.conditions.lock() = conditions;
    }

    /// Drop every datagram while `partitioned` is set.
    pub fn set_partitioned(&self, partitioned: bool) {
        self.inner.partitioned.store(partitioned, Ordering::Release);
    }

    /// Drop the next `count` datagrams, whichever direction they travel.
    pub fn drop_next(&self, count: u32) {
        self.inner.drop_next.store(count, Ordering::Release);
    }

    /// Hand raw bytes to `to`'s handler as if sent by `from`, bypassing
    /// peer registration and link conditions.
    pub fn inject(&self, from: PeerId, to: PeerId, bytes: &[u8]) {
        let handler = self.inner.handlers.lock().get(&to).cloned();
        if let Some(handler) = handler {
            handler(from, bytes);
        }
    }

    /// Datagrams handed to a receiver.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    /// Datagrams lost to partitions, scheduled drops, loss or absent receivers.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for LoopbackNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackNetwork")
            .field("endpoints", &self.inner.handlers.lock().len())
            .field("delivered", &self.delivered())
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

/// One node's view of a [`LoopbackNetwork`].
pub struct LoopbackEndpoint {
    id: PeerId,
    network: Arc<NetworkInner>,
    peers: Mutex<HashSet<PeerId>>,
    fail_bring_up: AtomicBool,
    reject_peers: AtomicBool,
    fail_sends: AtomicBool,
    up: AtomicBool,
    sent: AtomicU64,
}

impl LoopbackEndpoint {
    /// This endpoint's identity.
    #[must_use]
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Make subsequent `bring_up` calls fail.
    pub fn fail_bring_up(&self, fail: bool) {
        self.fail_bring_up.store(fail, Ordering::Release);
    }

    /// Make subsequent `add_peer` calls fail.
    pub fn reject_peers(&self, reject: bool) {
        self.reject_peers.store(reject, Ordering::Release);
    }

    /// Make subsequent `send` calls report failure without transmitting.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Release);
    }

    /// Datagrams accepted by `send`.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Registered peers.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<_> = self.peers.lock().iter().copied().collect();
        peers.sort_unstable();
        peers
    }
}

impl Transport for LoopbackEndpoint {
    fn bring_up(&self, channel: u8) -> Result<(), TransportError> {
        if self.fail_bring_up.load(Ordering::Acquire) {
            return Err(TransportError::Setup {
                message: format!("simulated radio failure on channel {channel}"),
            });
        }
        self.up.store(true, Ordering::Release);
        Ok(())
    }

    fn set_receive_handler(&self, handler: ReceiveHandler) {
        self.network.handlers.lock().insert(self.id, handler);
    }

    fn add_peer(&self, peer: PeerId) -> bool {
        if self.reject_peers.load(Ordering::Acquire) {
            return false;
        }
        self.peers.lock().insert(peer);
        true
    }

    fn peer_exists(&self, peer: &PeerId) -> bool {
        self.peers.lock().contains(peer)
    }

    fn send(&self, peer: &PeerId, bytes: &[u8]) -> bool {
        if !self.up.load(Ordering::Acquire)
            || self.fail_sends.load(Ordering::Acquire)
            || !self.peer_exists(peer)
        {
            return false;
        }
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.network.deliver(self.id, *peer, bytes);
        true
    }
}

impl std::fmt::Debug for LoopbackEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackEndpoint")
            .field("id", &self.id)
            .field("peers", &self.peers.lock().len())
            .field("sent", &self.sent())
            .finish_non_exhaustive()
    }
}
