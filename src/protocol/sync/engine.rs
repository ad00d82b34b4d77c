//! Two-way exchange synchronization engine.
//!
//! A client periodically sends a [`TimeRequest`] to the master and waits,
//! bounded by the response timeout, for the matching [`TimeResponse`]. Each
//! completed exchange yields an offset sample that is smoothed into the
//! correction applied by [`ClockSyncEngine::synced_time_us`]. The master only
//! answers requests; its own clock is the reference.
//!
//! ```text
//! Client                              Master
//!   |--- TimeRequest (t1) ------------->|  (master records t2_recv)
//!   |<-- TimeResponse (t1, t2, t3) -----|  (t3_send at reply)
//!   |  (client records t4)              |
//! ```
//!
//! Inbound datagrams arrive on the transport's execution context. The only
//! state shared with that path is the response slot, published through an
//! atomic flag after its payload is written.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use super::clock::ClockSource;
use super::estimator::{OffsetSmoother, SyncAttempt, SyncStatistics};
use super::message::{TimeRequest, TimeResponse};
use crate::error::{ConfigError, InitError};
use crate::net::Transport;
use crate::types::{PeerId, TimeSyncConfig};

/// Successful exchanges needed before an offset is trusted.
pub const SYNC_THRESHOLD: u64 = 3;

/// Role of this node, fixed at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRole {
    /// Time reference; answers requests.
    Master,
    /// Follower; estimates its offset to the master.
    Client,
}

/// Whether the offset can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not enough recent exchanges.
    Unsynchronized,
    /// Offset established.
    Synchronized,
}

/// Called on every `Unsynchronized` <-> `Synchronized` edge with the new
/// state and the current offset.
pub type SyncStatusCallback = Arc<dyn Fn(bool, i64) + Send + Sync>;

/// Called after each successful exchange while synchronized, with the
/// synced time.
pub type SyncEventCallback = Arc<dyn Fn(i64) + Send + Sync>;

/// A synchronized clock that consumers can read and observe.
pub trait SyncSource: Send + Sync {
    /// Local clock plus the current offset, in microseconds.
    fn synced_time_us(&self) -> i64;

    /// Whether the offset is currently trusted.
    fn is_synchronized(&self) -> bool;

    /// Register for synchronization edges.
    fn subscribe_status(&self, callback: SyncStatusCallback);
}

/// Result of one synchronization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A response arrived in time.
    Completed(SyncAttempt),
    /// No response within the timeout.
    TimedOut,
    /// The transport refused the request.
    SendFailed,
}

#[derive(Debug, Clone, Copy)]
struct Setup {
    role: SyncRole,
    master: Option<PeerId>,
}

/// Per-session mutable state, touched only from the caller's context.
#[derive(Debug)]
struct Session {
    stats: SyncStatistics,
    smoother: OffsetSmoother,
    last_attempt_us: u64,
    consecutive_misses: u32,
    acquired: u64,
}

impl Session {
    fn new(alpha: f32) -> Self {
        Self {
            stats: SyncStatistics::default(),
            smoother: OffsetSmoother::new(alpha),
            last_attempt_us: 0,
            consecutive_misses: 0,
            acquired: 0,
        }
    }

    fn restart(&mut self, alpha: f32, now_us: u64) {
        *self = Self::new(alpha);
        self.last_attempt_us = now_us;
    }
}

/// Single-slot mailbox for the outstanding response.
///
/// The receive path writes the payload words, then publishes `ready` with
/// release ordering; the waiter only reads the payload after observing
/// `ready` with acquire ordering.
#[derive(Debug, Default)]
struct ResponseSlot {
    awaiting: AtomicBool,
    expected_t1: AtomicU64,
    ready: AtomicBool,
    t1: AtomicU64,
    t2_recv: AtomicU64,
    t3_send: AtomicU64,
    t4: AtomicU64,
    notify: Notify,
}

impl ResponseSlot {
    fn arm(&self, t1: u64) {
        self.ready.store(false, Ordering::Release);
        self.expected_t1.store(t1, Ordering::Relaxed);
        self.awaiting.store(true, Ordering::Release);
    }

    fn disarm(&self) {
        self.awaiting.store(false, Ordering::Release);
    }

    /// Accept `response` if it answers the outstanding request.
    fn publish(&self, response: &TimeResponse, t4: u64) -> bool {
        if !self.awaiting.load(Ordering::Acquire)
            || self.expected_t1.load(Ordering::Relaxed) != response.t1
        {
            return false;
        }
        // Claim the slot so a duplicate cannot overwrite the payload.
        if self
            .awaiting
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.t1.store(response.t1, Ordering::Relaxed);
        self.t2_recv.store(response.t2_recv, Ordering::Relaxed);
        self.t3_send.store(response.t3_send, Ordering::Relaxed);
        self.t4.store(t4, Ordering::Relaxed);
        self.ready.store(true, Ordering::Release);
        self.notify.notify_one();
        true
    }

    fn take(&self) -> Option<(TimeResponse, u64)> {
        if !self.ready.swap(false, Ordering::Acquire) {
            return None;
        }
        let response = TimeResponse {
            t1: self.t1.load(Ordering::Relaxed),
            t2_recv: self.t2_recv.load(Ordering::Relaxed),
            t3_send: self.t3_send.load(Ordering::Relaxed),
        };
        Some((response, self.t4.load(Ordering::Relaxed)))
    }
}

/// Clears the in-flight flag when an attempt ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Option<Self> {
        (!flag.swap(true, Ordering::AcqRel)).then_some(Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Clock synchronization engine for one node.
///
/// Shared as `Arc<ClockSyncEngine>`: [`initialize`](Self::initialize)
/// hands the transport a receive closure holding a weak reference, so any
/// number of engines can coexist in a process.
pub struct ClockSyncEngine {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn ClockSource>,
    setup: OnceLock<Setup>,
    config: RwLock<TimeSyncConfig>,
    running: AtomicBool,
    synchronized: AtomicBool,
    current_offset: AtomicI64,
    in_flight: AtomicBool,
    session: Mutex<Session>,
    response: ResponseSlot,
    peers: Mutex<Vec<PeerId>>,
    status_callbacks: RwLock<Vec<SyncStatusCallback>>,
    event_callbacks: RwLock<Vec<SyncEventCallback>>,
}

impl ClockSyncEngine {
    /// Create an uninitialized engine.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, clock: Arc<dyn ClockSource>) -> Arc<Self> {
        let config = TimeSyncConfig::default();
        Arc::new(Self {
            transport,
            clock,
            setup: OnceLock::new(),
            session: Mutex::new(Session::new(config.smoothing_alpha)),
            config: RwLock::new(config),
            running: AtomicBool::new(false),
            synchronized: AtomicBool::new(false),
            current_offset: AtomicI64::new(0),
            in_flight: AtomicBool::new(false),
            response: ResponseSlot::default(),
            peers: Mutex::new(Vec::new()),
            status_callbacks: RwLock::new(Vec::new()),
            event_callbacks: RwLock::new(Vec::new()),
        })
    }

    /// Bring up the transport and fix the role.
    ///
    /// A client must name its master, which is registered as a peer. On
    /// failure nothing is retained and the call may be repeated.
    ///
    /// # Errors
    /// - [`InitError::AlreadyInitialized`] on a second successful call
    /// - [`InitError::InvalidConfig`] if `config` fails validation
    /// - [`InitError::MissingPeer`] for a client without `master`
    /// - [`InitError::TransportSetup`] if the link cannot be brought up
    /// - [`InitError::PeerRegistration`] if the master cannot be registered
    pub fn initialize(
        self: &Arc<Self>,
        role: SyncRole,
        master: Option<PeerId>,
        config: TimeSyncConfig,
    ) -> Result<(), InitError> {
        if self.setup.get().is_some() {
            return Err(InitError::AlreadyInitialized);
        }
        config.validate()?;

        let master = match role {
            SyncRole::Client => Some(master.ok_or(InitError::MissingPeer)?),
            SyncRole::Master => None,
        };

        if let Err(e) = self.transport.bring_up(config.channel) {
            if config.enable_logging {
                tracing::warn!(error = %e, "TimeSync: transport bring-up failed");
            }
            return Err(e.into());
        }

        if let Some(peer) = master {
            if !self.transport.add_peer(peer) {
                if config.enable_logging {
                    tracing::warn!(%peer, "TimeSync: failed to add master peer");
                }
                return Err(InitError::PeerRegistration { peer });
            }
        }

        let enable_logging = config.enable_logging;
        self.session.lock().smoother.set_alpha(config.smoothing_alpha);
        *self.config.write() = config;
        if self.setup.set(Setup { role, master }).is_err() {
            return Err(InitError::AlreadyInitialized);
        }

        let weak = Arc::downgrade(self);
        self.transport
            .set_receive_handler(Arc::new(move |sender: PeerId, data: &[u8]| {
                if let Some(engine) = weak.upgrade() {
                    engine.handle_incoming(sender, data);
                }
            }));

        if enable_logging {
            match master {
                Some(peer) => tracing::info!(master = %peer, "TimeSync: initialized as CLIENT"),
                None => tracing::info!("TimeSync: initialized as MASTER"),
            }
        }
        Ok(())
    }

    /// Replace the configuration snapshot.
    ///
    /// # Errors
    /// Returns [`ConfigError::Running`] while a session is active, or a
    /// validation error.
    pub fn set_config(&self, config: TimeSyncConfig) -> Result<(), ConfigError> {
        if self.is_running() {
            return Err(ConfigError::Running);
        }
        config.validate()?;
        self.session.lock().smoother.set_alpha(config.smoothing_alpha);
        *self.config.write() = config;
        Ok(())
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> TimeSyncConfig {
        self.config.read().clone()
    }

    /// Start a sync session. No-op if uninitialized or already running.
    ///
    /// A master is synchronized immediately with offset 0. A client starts
    /// from fresh statistics and smoothing; its first attempt is due one
    /// interval from now.
    pub fn start(&self) {
        let Some(setup) = self.setup.get() else {
            return;
        };
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let alpha = self.config.read().smoothing_alpha;
        self.session.lock().restart(alpha, self.clock.now_us());

        if setup.role == SyncRole::Master {
            self.current_offset.store(0, Ordering::Release);
            self.set_synchronized(true);
        }

        if self.logging() {
            tracing::info!(role = ?setup.role, "TimeSync: sync started");
        }
    }

    /// Halt attempts and drop to unsynchronized.
    ///
    /// An exchange in flight is abandoned: its response is no longer
    /// accepted and its completion cannot change the state.
    pub fn stop(&self) {
        let (was_running, lost) = {
            let _session = self.session.lock();
            (
                self.running.swap(false, Ordering::AcqRel),
                self.swap_synchronized(false),
            )
        };
        self.response.disarm();
        self.response.notify.notify_one();
        if lost {
            self.notify_status(false);
        }

        if was_running && self.logging() {
            tracing::info!("TimeSync: sync stopped");
        }
    }

    /// Drive the client cadence; call at least once per sync interval.
    ///
    /// Performs one attempt when the interval since the previous attempt
    /// has elapsed: the sync interval while synchronized, the resync
    /// interval otherwise. Returns `None` when nothing was due, on a
    /// master, or while another attempt is in flight.
    pub async fn tick(&self) -> Option<SyncOutcome> {
        let setup = self.setup.get()?;
        if !self.is_running() || setup.role != SyncRole::Client {
            return None;
        }
        let master = setup.master?;

        let interval_us = {
            let config = self.config.read();
            let interval_ms = if self.is_synchronized() {
                config.sync_interval_ms
            } else {
                config.resync_interval_ms
            };
            u64::from(interval_ms) * 1_000
        };
        let now = self.clock.now_us();
        if now.saturating_sub(self.session.lock().last_attempt_us) < interval_us {
            return None;
        }

        let _guard = InFlight::enter(&self.in_flight)?;
        let outcome = self.perform_sync(master).await;
        self.session.lock().last_attempt_us = self.clock.now_us();
        Some(outcome)
    }

    /// Run one exchange against `master`, waiting at most the response
    /// timeout.
    async fn perform_sync(&self, master: PeerId) -> SyncOutcome {
        let timeout = self.config.read().response_timeout();

        let t1 = self.clock.now_us();
        self.response.arm(t1);
        if !self.transport.send(&master, &TimeRequest { t1 }.encode()) {
            self.response.disarm();
            if self.logging() {
                tracing::warn!(%master, "TimeSync: request send failed");
            }
            self.record_miss();
            return SyncOutcome::SendFailed;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let received = loop {
            if let Some(received) = self.response.take() {
                break Some(received);
            }
            if !self.is_running() {
                break None;
            }
            if tokio::time::timeout_at(deadline, self.response.notify.notified())
                .await
                .is_err()
            {
                break self.response.take();
            }
        };
        self.response.disarm();

        match received {
            Some((response, t4)) => {
                let attempt = SyncAttempt::calculate(
                    response.t1,
                    response.t2_recv,
                    response.t3_send,
                    t4,
                );
                self.record_success(&attempt);
                SyncOutcome::Completed(attempt)
            }
            None => {
                self.record_miss();
                SyncOutcome::TimedOut
            }
        }
    }

    /// State changes are decided under the session lock, which `stop()`
    /// also holds while clearing `running`.
    fn record_success(&self, attempt: &SyncAttempt) {
        let (stats, smoothed, was_synchronized, acquired) = {
            let mut session = self.session.lock();
            let running = self.is_running();
            let was_synchronized = running && self.is_synchronized();
            let smoothed = session.smoother.update(attempt.offset_us);
            let offset = session.smoother.offset_us();
            self.current_offset.store(offset, Ordering::Release);
            session.stats.record_success(attempt);
            session.consecutive_misses = 0;
            session.acquired += 1;
            let acquired = running
                && !was_synchronized
                && session.acquired >= SYNC_THRESHOLD
                && self.swap_synchronized(true);
            (session.stats, smoothed, was_synchronized, acquired)
        };

        if was_synchronized {
            let synced = self.synced_time_us();
            let callbacks = self.event_callbacks.read().clone();
            for callback in &callbacks {
                callback(synced);
            }
        } else if acquired {
            self.notify_status(true);
        }

        let config = self.config.read();
        if config.enable_logging && stats.sync_count % u64::from(config.log_interval_syncs) == 0 {
            tracing::info!(
                sync = stats.sync_count,
                offset_us = stats.last_offset_us,
                smoothed_us = smoothed,
                rtt_us = stats.last_rtt_us,
                success_rate = stats.success_rate,
                synced_time_us = self.synced_time_us(),
                "TimeSync: stats"
            );
        }
    }

    fn record_miss(&self) {
        let max_missed = self.config.read().max_missed_responses;
        let (stats, lost) = {
            let mut session = self.session.lock();
            session.stats.record_timeout();
            session.consecutive_misses += 1;
            let lost = self.is_running()
                && max_missed > 0
                && session.consecutive_misses >= max_missed
                && self.swap_synchronized(false);
            if lost {
                session.acquired = 0;
            }
            (session.stats, lost)
        };

        if self.logging() {
            tracing::warn!(
                fail = stats.fail_count,
                success_rate = stats.success_rate,
                "TimeSync: timeout"
            );
        }
        if lost {
            if self.logging() {
                tracing::warn!(max_missed, "TimeSync: too many missed responses, sync lost");
            }
            self.notify_status(false);
        }
    }

    /// Dispatch an inbound datagram by role.
    ///
    /// Called by the transport. A master treats any 8-byte payload as a
    /// request; a client treats any 24-byte payload as a response.
    /// Anything else, and any response that does not answer the
    /// outstanding request, is dropped.
    pub fn handle_incoming(&self, sender: PeerId, data: &[u8]) {
        let Some(setup) = self.setup.get() else {
            return;
        };
        match setup.role {
            SyncRole::Master => self.handle_request(sender, data),
            SyncRole::Client => self.handle_response(data),
        }
    }

    fn handle_request(&self, sender: PeerId, data: &[u8]) {
        let t2_recv = self.clock.now_us();
        let Ok(request) = TimeRequest::decode(data) else {
            if self.logging() {
                tracing::debug!(%sender, len = data.len(), "TimeSync: dropping malformed request");
            }
            return;
        };

        self.register_peer(sender);

        let response = TimeResponse {
            t1: request.t1,
            t2_recv,
            t3_send: self.clock.now_us(),
        };
        if !self.transport.send(&sender, &response.encode()) && self.logging() {
            tracing::debug!(%sender, "TimeSync: response send failed");
        }
    }

    fn handle_response(&self, data: &[u8]) {
        let t4 = self.clock.now_us();
        if let Ok(response) = TimeResponse::decode(data) {
            self.response.publish(&response, t4);
        }
    }

    fn register_peer(&self, peer: PeerId) {
        if !self.transport.peer_exists(&peer) && !self.transport.add_peer(peer) {
            if self.logging() {
                tracing::warn!(%peer, "TimeSync: could not add peer");
            }
            return;
        }
        let mut peers = self.peers.lock();
        if !peers.contains(&peer) {
            peers.push(peer);
        }
    }

    fn set_synchronized(&self, synchronized: bool) {
        if self.swap_synchronized(synchronized) {
            self.notify_status(synchronized);
        }
    }

    /// Store the new state; true if this was an edge.
    fn swap_synchronized(&self, synchronized: bool) -> bool {
        self.synchronized.swap(synchronized, Ordering::AcqRel) != synchronized
    }

    fn notify_status(&self, synchronized: bool) {
        let offset = self.offset_us();
        let callbacks = self.status_callbacks.read().clone();
        for callback in &callbacks {
            callback(synchronized, offset);
        }
    }

    fn logging(&self) -> bool {
        self.config.read().enable_logging
    }

    /// Local clock plus the current offset.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn synced_time_us(&self) -> i64 {
        (self.clock.now_us() as i64).wrapping_add(self.offset_us())
    }

    /// Current offset applied to the local clock, in microseconds.
    #[must_use]
    pub fn offset_us(&self) -> i64 {
        self.current_offset.load(Ordering::Acquire)
    }

    /// Unrounded smoothed offset, `None` before the first success.
    #[must_use]
    pub fn smoothed_offset(&self) -> Option<f64> {
        self.session.lock().smoother.value()
    }

    /// Whether the offset is trusted.
    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        self.synchronized.load(Ordering::Acquire)
    }

    /// Current synchronization state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        if self.is_synchronized() {
            SyncState::Synchronized
        } else {
            SyncState::Unsynchronized
        }
    }

    /// Snapshot of the session statistics.
    #[must_use]
    pub fn statistics(&self) -> SyncStatistics {
        self.session.lock().stats
    }

    /// Zero the statistics. The next success re-seeds the smoothed offset;
    /// the synchronization state is unchanged.
    ///
    /// Acquisition progress and the missed-response count are session
    /// state and survive the reset, so `sync_count` no longer tracks the
    /// threshold afterwards.
    pub fn reset_statistics(&self) {
        let mut session = self.session.lock();
        session.stats = SyncStatistics::default();
        session.smoother.reset();
    }

    /// Register for synchronization edges.
    pub fn on_sync_status<F>(&self, callback: F)
    where
        F: Fn(bool, i64) + Send + Sync + 'static,
    {
        self.status_callbacks.write().push(Arc::new(callback));
    }

    /// Register for per-success events while synchronized.
    pub fn on_sync_event<F>(&self, callback: F)
    where
        F: Fn(i64) + Send + Sync + 'static,
    {
        self.event_callbacks.write().push(Arc::new(callback));
    }

    /// Role, once initialized.
    #[must_use]
    pub fn role(&self) -> Option<SyncRole> {
        self.setup.get().map(|s| s.role)
    }

    /// Master identity for a client.
    #[must_use]
    pub fn master(&self) -> Option<PeerId> {
        self.setup.get().and_then(|s| s.master)
    }

    /// Whether [`initialize`](Self::initialize) has succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.setup.get().is_some()
    }

    /// Whether a session is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clients a master has heard from, in order of first contact.
    #[must_use]
    pub fn known_peers(&self) -> Vec<PeerId> {
        self.peers.lock().clone()
    }
}

impl SyncSource for ClockSyncEngine {
    fn synced_time_us(&self) -> i64 {
        ClockSyncEngine::synced_time_us(self)
    }

    fn is_synchronized(&self) -> bool {
        ClockSyncEngine::is_synchronized(self)
    }

    fn subscribe_status(&self, callback: SyncStatusCallback) {
        self.status_callbacks.write().push(callback);
    }
}

impl std::fmt::Debug for ClockSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockSyncEngine")
            .field("role", &self.role())
            .field("running", &self.is_running())
            .field("state", &self.state())
            .field("offset_us", &self.offset_us())
            .field("stats", &self.statistics())
            .finish_non_exhaustive()
    }
}
