//! Metadata persistence: coalescing, CAS conflicts, degraded reads

use fleetcoord::store::{
    CoordinationStore, CreateMode, MemoryStore, StoreConnector, StoreEvent, VersionedValue,
};
use fleetcoord::{
    BincodeBundleCodec, Config, CoordinationListener, Error, MemoryConnector, MetadataCoordinator,
    Result, VoteSnapshot, WantedState,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

#[derive(Default)]
struct CountingListener {
    disconnects: AtomicUsize,
}

impl CountingListener {
    fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl CoordinationListener for CountingListener {
    fn on_disconnected(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_vote_snapshot(&self, _snapshot: &VoteSnapshot) {}
}

fn single_replica(
    connector: &Arc<MemoryConnector>,
) -> (MetadataCoordinator, Arc<CountingListener>) {
    let mut config = Config::new("content", 0);
    config.fleet_size = 1;
    config.coordinator.retry_period_ms = 0;
    let listener = Arc::new(CountingListener::default());
    let coordinator = MetadataCoordinator::new(
        &config,
        connector.clone(),
        Arc::new(BincodeBundleCodec),
        listener.clone(),
    );
    (coordinator, listener)
}

fn raw_session(connector: &Arc<MemoryConnector>) -> Arc<dyn CoordinationStore> {
    let (tx, _rx) = unbounded_channel();
    connector.connect(tx).unwrap()
}

/// Store double that fails a budgeted number of `set` calls on one path.
struct FlakyConnector {
    inner: MemoryConnector,
    fail_path: String,
    set_failures: Arc<AtomicUsize>,
}

impl FlakyConnector {
    fn new(fail_path: &str, set_failures: usize) -> Self {
        Self {
            inner: MemoryConnector::new(),
            fail_path: fail_path.to_string(),
            set_failures: Arc::new(AtomicUsize::new(set_failures)),
        }
    }

    fn store(&self) -> &MemoryStore {
        self.inner.store()
    }
}

impl StoreConnector for FlakyConnector {
    fn connect(&self, events: UnboundedSender<StoreEvent>) -> Result<Arc<dyn CoordinationStore>> {
        let session = self.inner.connect(events)?;
        Ok(Arc::new(FlakySession {
            inner: session,
            fail_path: self.fail_path.clone(),
            set_failures: self.set_failures.clone(),
        }))
    }
}

struct FlakySession {
    inner: Arc<dyn CoordinationStore>,
    fail_path: String,
    set_failures: Arc<AtomicUsize>,
}

impl CoordinationStore for FlakySession {
    fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<()> {
        self.inner.create(path, data, mode)
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.inner.delete(path)
    }

    fn get(&self, path: &str, watch: bool) -> Result<Option<VersionedValue>> {
        self.inner.get(path, watch)
    }

    fn set(&self, path: &str, data: &[u8], expected: Option<u64>) -> Result<u64> {
        if path == self.fail_path && self.set_failures.load(Ordering::SeqCst) > 0 {
            self.set_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::ConnectionFailed("injected transport fault".into()));
        }
        self.inner.set(path, data, expected)
    }

    fn children(&self, path: &str, watch: bool) -> Result<Vec<String>> {
        self.inner.children(path, watch)
    }

    fn close(&self) {
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[test]
fn repeated_master_vote_writes_once() {
    let connector = Arc::new(MemoryConnector::new());
    let (mut coordinator, _) = single_replica(&connector);
    coordinator.tick();

    // ensure_namespace created the entry (version 0) voting for self
    let (_, v0) = connector.store().peek("/fleetcoord/content/votes/0").unwrap();
    assert_eq!(v0, 0);

    coordinator.set_master_vote(3);
    coordinator.set_master_vote(3);

    let (data, version) = connector.store().peek("/fleetcoord/content/votes/0").unwrap();
    assert_eq!(&data[..], b"3");
    assert_eq!(version, 1, "exactly one write reached the store");
}

#[test]
fn cas_conflict_resets_and_rereads_before_retry() {
    let connector = Arc::new(MemoryConnector::new());
    let (mut coordinator, listener) = single_replica(&connector);
    coordinator.tick();

    coordinator.save_latest_state_version(5);
    let (data, _) = connector.store().peek("/fleetcoord/content/latest-version").unwrap();
    assert_eq!(&data[..], b"5");

    // another writer moves the entry; our CAS token is now stale
    let intruder = raw_session(&connector);
    intruder
        .set("/fleetcoord/content/latest-version", b"6", None)
        .unwrap();

    coordinator.save_latest_state_version(7);
    assert_eq!(listener.disconnects(), 1, "authority loss signalled");
    assert!(!coordinator.is_connected(), "session state fully reset");

    // reconnect and write again: a fresh read precedes the store
    coordinator.tick();
    assert!(coordinator.is_connected());
    assert_eq!(
        coordinator.get_latest_state_version().unwrap(),
        6,
        "post-conflict read sees the intruder's value"
    );
    coordinator.save_latest_state_version(8);
    let (data, _) = connector.store().peek("/fleetcoord/content/latest-version").unwrap();
    assert_eq!(&data[..], b"8");
}

#[test]
fn cas_conflict_discards_pending_write() {
    let connector = Arc::new(MemoryConnector::new());
    let (mut coordinator, listener) = single_replica(&connector);
    coordinator.tick();

    coordinator.save_latest_state_version(5);
    let intruder = raw_session(&connector);
    intruder
        .set("/fleetcoord/content/latest-version", b"6", None)
        .unwrap();

    coordinator.save_latest_state_version(7);
    assert_eq!(listener.disconnects(), 1);

    // a CAS-caused reset does not preserve the losing write
    coordinator.tick();
    let (data, _) = connector.store().peek("/fleetcoord/content/latest-version").unwrap();
    assert_eq!(&data[..], b"6", "the conflicting value 7 was never retried");
}

#[test]
fn deleted_version_entry_is_staleness_not_a_wedge() {
    let connector = Arc::new(MemoryConnector::new());
    let (mut coordinator, listener) = single_replica(&connector);
    coordinator.tick();

    coordinator.save_latest_state_version(5);

    // another actor removes the entry outright
    let intruder = raw_session(&connector);
    intruder.delete("/fleetcoord/content/latest-version").unwrap();

    coordinator.save_latest_state_version(7);
    assert_eq!(listener.disconnects(), 1, "vanished entry voids authority");
    assert!(!coordinator.is_connected());

    // reconnect, fresh read, and the next write recreates the entry
    coordinator.tick();
    assert!(coordinator.is_connected());
    assert_eq!(coordinator.get_latest_state_version().unwrap(), 0);
    coordinator.save_latest_state_version(8);
    let (data, _) = connector.store().peek("/fleetcoord/content/latest-version").unwrap();
    assert_eq!(&data[..], b"8");
}

#[test]
fn transient_write_failure_keeps_pending_and_blocks_later_items() {
    let connector = Arc::new(FlakyConnector::new(
        "/fleetcoord/content/latest-version",
        2,
    ));
    let mut config = Config::new("content", 0);
    config.fleet_size = 1;
    config.coordinator.retry_period_ms = 0;
    let listener = Arc::new(CountingListener::default());
    let mut coordinator = MetadataCoordinator::new(
        &config,
        connector.clone(),
        Arc::new(BincodeBundleCodec),
        listener.clone(),
    );
    coordinator.tick();

    // first store creates the entry; only `set` calls are sabotaged
    coordinator.save_latest_state_version(5);
    let (data, _) = connector.store().peek("/fleetcoord/content/latest-version").unwrap();
    assert_eq!(&data[..], b"5");

    coordinator.save_latest_state_version(6);
    let mut map = BTreeMap::new();
    map.insert("storage.0".to_string(), WantedState::Down);
    coordinator.save_wanted_states(map);

    // both flush attempts hit the fault: the version write stays pending
    // and the lower-priority wanted-state write waits behind it
    let (data, _) = connector.store().peek("/fleetcoord/content/latest-version").unwrap();
    assert_eq!(&data[..], b"5");
    let (wanted, _) = connector.store().peek("/fleetcoord/content/wanted-states").unwrap();
    assert!(wanted.is_empty());
    assert!(coordinator.is_connected(), "transient failure keeps the session");
    assert_eq!(listener.disconnects(), 0);

    // fault budget exhausted: the next tick lands both writes in order
    coordinator.tick();
    let (data, _) = connector.store().peek("/fleetcoord/content/latest-version").unwrap();
    assert_eq!(&data[..], b"6");
    let (wanted, _) = connector.store().peek("/fleetcoord/content/wanted-states").unwrap();
    assert_eq!(&wanted[..], b"storage.0:down\n");
}

#[test]
fn getters_surface_unavailable_when_disconnected() {
    let connector = Arc::new(MemoryConnector::new());
    let (mut coordinator, _) = single_replica(&connector);

    // never ticked, so no session exists yet
    assert!(!coordinator.is_connected());
    assert!(matches!(
        coordinator.get_latest_state_version(),
        Err(Error::Unavailable(_))
    ));
    assert!(matches!(
        coordinator.get_latest_published_bundle(),
        Err(Error::Unavailable(_))
    ));
    assert!(matches!(
        coordinator.load_wanted_states(&["storage.0".to_string()]),
        Err(Error::Unavailable(_))
    ));
    assert!(matches!(
        coordinator.load_start_timestamps(&["storage.0".to_string()]),
        Err(Error::Unavailable(_))
    ));
}

#[test]
fn absent_version_entry_reads_as_zero() {
    let connector = Arc::new(MemoryConnector::new());
    let (mut coordinator, _) = single_replica(&connector);
    coordinator.tick();

    // entry genuinely never written: 0 is a fact, not a fallback
    assert_eq!(coordinator.get_latest_state_version().unwrap(), 0);
    assert_eq!(coordinator.get_latest_published_bundle().unwrap(), None);
}

#[test]
fn wanted_states_reconcile_against_registry() {
    let connector = Arc::new(MemoryConnector::new());
    let (mut coordinator, _) = single_replica(&connector);
    coordinator.tick();

    let mut map = BTreeMap::new();
    map.insert("storage.0".to_string(), WantedState::Maintenance);
    map.insert("storage.9".to_string(), WantedState::Down);
    coordinator.save_wanted_states(map);

    let registry = vec!["storage.0".to_string(), "storage.1".to_string()];
    let (reconciled, changed) = coordinator.load_wanted_states(&registry).unwrap();
    assert!(changed);
    assert_eq!(reconciled["storage.0"], WantedState::Maintenance);
    assert_eq!(reconciled["storage.1"], WantedState::Up);
    assert!(!reconciled.contains_key("storage.9"));
}

#[test]
fn start_timestamps_round_trip_with_defaults() {
    let connector = Arc::new(MemoryConnector::new());
    let (mut coordinator, _) = single_replica(&connector);
    coordinator.tick();

    let mut map = BTreeMap::new();
    map.insert("storage.0".to_string(), 1_700_000_000u64);
    coordinator.save_start_timestamps(map);

    let registry = vec!["storage.0".to_string(), "storage.1".to_string()];
    let (reconciled, changed) = coordinator.load_start_timestamps(&registry).unwrap();
    assert!(changed);
    assert_eq!(reconciled["storage.0"], 1_700_000_000);
    assert_eq!(reconciled["storage.1"], 0);
}
