//! End-to-end synchronization over the in-memory mesh.
//!
//! One master and several skewed clients share a simulated timeline; the
//! loopback network advances it by each datagram's link delay.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use meshtime::protocol::sync::SyncOutcome;
use meshtime::testing::{LoopbackEndpoint, LoopbackNetwork, NetworkSimulator, SimClock};
use meshtime::{ClockSyncEngine, PeerId, SyncRole, SyncState, TimeSyncConfig};

const MASTER: PeerId = PeerId::new([0x02, 0x4D, 0x00, 0x00, 0x00, 0x01]);

/// Poll cadence of the host loop.
const STEP_US: u64 = 50_000;

struct Node {
    engine: Arc<ClockSyncEngine>,
    link: Arc<LoopbackEndpoint>,
    skew_us: i64,
}

struct Mesh {
    clock: SimClock,
    network: LoopbackNetwork,
    master: Node,
    clients: Vec<Node>,
}

impl Mesh {
    fn new(conditions: NetworkSimulator, skews: &[i64], config: &TimeSyncConfig) -> Self {
        let clock = SimClock::new(10_000_000);
        let network = LoopbackNetwork::with_clock(clock.clone(), conditions);

        let master = spawn_node(&clock, &network, MASTER, 0);
        master
            .engine
            .initialize(SyncRole::Master, None, config.clone())
            .unwrap();
        master.engine.start();

        let clients = skews
            .iter()
            .zip(1u8..)
            .map(|(&skew, n)| {
                let node = spawn_node(&clock, &network, PeerId::new([0x02, 0x4D, 0, 0, 1, n]), skew);
                node.engine
                    .initialize(SyncRole::Client, Some(MASTER), config.clone())
                    .unwrap();
                node.engine.start();
                node
            })
            .collect();

        Self {
            clock,
            network,
            master,
            clients,
        }
    }

    /// Run the host loop for `duration_us` of simulated time.
    async fn run_for(&self, duration_us: u64) {
        let until = self.clock.now() + duration_us;
        while self.clock.now() < until {
            self.clock.advance(STEP_US);
            for client in &self.clients {
                client.engine.tick().await;
            }
        }
    }

    fn all_synchronized(&self) -> bool {
        self.clients.iter().all(|c| c.engine.is_synchronized())
    }
}

fn spawn_node(clock: &SimClock, network: &LoopbackNetwork, id: PeerId, skew_us: i64) -> Node {
    let link = network.endpoint(id);
    let engine = ClockSyncEngine::new(link.clone(), Arc::new(clock.node(skew_us)));
    Node {
        engine,
        link,
        skew_us,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test(start_paused = true)]
async fn test_star_converges_on_perfect_link() {
    let mesh = Mesh::new(
        NetworkSimulator::perfect(),
        &[-5_000, 12_000, 3_600_000_000],
        &TimeSyncConfig::default(),
    );
    mesh.run_for(2_000_000).await;

    assert!(mesh.all_synchronized());
    let reference = mesh.master.engine.synced_time_us();
    for client in &mesh.clients {
        assert_eq!(client.engine.offset_us(), -client.skew_us);
        assert_eq!(client.engine.synced_time_us(), reference);
        assert_eq!(client.engine.state(), SyncState::Synchronized);
    }

    let mut heard = mesh.master.engine.known_peers();
    heard.sort();
    let mut expected: Vec<PeerId> = mesh.clients.iter().map(|c| c.link.id()).collect();
    expected.sort();
    assert_eq!(heard, expected);
}

#[tokio::test(start_paused = true)]
async fn test_short_range_link_stays_within_delay_bias() {
    init_tracing();
    let config = TimeSyncConfig::builder()
        .enable_logging(true)
        .log_interval_syncs(5)
        .build();
    let mesh = Mesh::new(NetworkSimulator::short_range(), &[-40_000, 25_000], &config);
    mesh.run_for(15_000_000).await;

    assert!(mesh.all_synchronized());
    for client in &mesh.clients {
        // Each leg costs 400..600us; the estimate absorbs 1.5 legs.
        let error = client.engine.offset_us() + client.skew_us;
        assert!((600..=1_800).contains(&error), "offset error {error}us");

        let stats = client.engine.statistics();
        assert!(stats.sync_count >= 10);
        assert!(stats.success_rate > 90.0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_partition_loses_and_regains_sync() {
    let mesh = Mesh::new(
        NetworkSimulator::perfect(),
        &[7_000],
        &TimeSyncConfig::default(),
    );
    let client = &mesh.clients[0].engine;

    let edges = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&edges);
    client.on_sync_status(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    mesh.run_for(1_000_000).await;
    assert!(client.is_synchronized());

    mesh.network.set_partitioned(true);
    mesh.run_for(5_000_000).await;
    assert!(!client.is_synchronized());
    // Offset survives the outage.
    assert_eq!(client.offset_us(), -7_000);

    mesh.network.set_partitioned(false);
    mesh.run_for(1_000_000).await;
    assert!(client.is_synchronized());
    assert_eq!(edges.load(Ordering::SeqCst), 3);

    let stats = client.statistics();
    assert!(stats.fail_count >= 3);
    assert_eq!(stats.last_offset_us, -7_000);
}

#[tokio::test(start_paused = true)]
async fn test_events_follow_each_synchronized_exchange() {
    let mesh = Mesh::new(
        NetworkSimulator::perfect(),
        &[-1_000],
        &TimeSyncConfig::default(),
    );
    let client = &mesh.clients[0].engine;
    let events = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&events);
    client.on_sync_event(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    mesh.run_for(5_000_000).await;

    let stats = client.statistics();
    assert_eq!(
        events.load(Ordering::SeqCst) as u64,
        stats.sync_count - meshtime::SYNC_THRESHOLD
    );
}

#[tokio::test(start_paused = true)]
async fn test_config_loaded_from_json() {
    let config = TimeSyncConfig::from_json_str(
        r#"{ "sync_interval_ms": 250, "resync_interval_ms": 100, "smoothing_alpha": 0.5 }"#,
    )
    .unwrap();
    let mesh = Mesh::new(NetworkSimulator::perfect(), &[2_000], &config);
    mesh.run_for(1_000_000).await;

    let stats = mesh.clients[0].engine.statistics();
    // Three exchanges 100ms apart, then 250ms apart.
    assert_eq!(stats.sync_count, 5);
    assert!(mesh.all_synchronized());
}

#[tokio::test(start_paused = true)]
async fn test_statistics_export_as_json() {
    let mesh = Mesh::new(
        NetworkSimulator::fixed_delay(250),
        &[-3_000],
        &TimeSyncConfig::default(),
    );
    let client = &mesh.clients[0].engine;
    mesh.run_for(1_000_000).await;

    let json = serde_json::to_value(client.statistics()).unwrap();
    assert_eq!(json["last_rtt_us"], 500);
    assert_eq!(json["last_offset_us"], 3_000 + 500);
    assert_eq!(json["success_rate"], 100.0);
}

#[tokio::test(start_paused = true)]
async fn test_manual_tick_reports_outcome() {
    let mesh = Mesh::new(
        NetworkSimulator::perfect(),
        &[0],
        &TimeSyncConfig::default(),
    );
    let client = &mesh.clients[0].engine;
    mesh.clock.advance(200_000);

    let outcome = client.tick().await;
    let Some(SyncOutcome::Completed(attempt)) = outcome else {
        panic!("expected a completed exchange, got {outcome:?}");
    };
    assert_eq!(attempt.round_trip_us, 0);
    assert_eq!(attempt.offset_us, 0);
}
