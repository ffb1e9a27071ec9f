//! Metadata coordination state machine
//!
//! The coordinator owns the pending/confirmed pair for every tracked
//! metadata item and drives all store work from `tick()`, called once per
//! scheduling round by the owning controller (or by the background task
//! from [`start_coordinator_tasks`]). Store callbacks never reach the
//! owner directly; they land in the event mailbox and are consumed here.
//!
//! Tick order:
//! 1. consume a queued session-loss event (owner told, stale snapshot
//!    dropped)
//! 2. forward a queued vote snapshot, injecting our own vote if absent
//! 3. reconnect if the session is closed, throttled by the retry period
//! 4. flush pending writes in fixed priority order, one pass per tick
//!
//! A CAS conflict anywhere means this replica's view is stale: all local
//! session state is reset and the owner is told to drop any leadership
//! assumption.

use super::adapter::PersistentStoreAdapter;
use super::aggregator::{MasterVoteAggregator, VoteSnapshot};
use super::bundle::{BundleCodec, ClusterStateBundle};
use super::mailbox::EventMailbox;
use super::paths::PathScheme;
use super::CoordinationListener;
use crate::common::{Config, CoordinatorConfig, Error, Result, WantedState};
use crate::store::{StoreConnector, StoreEvent};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// Pending/confirmed pair for one tracked metadata value
///
/// `pending` is locally decided but not yet confirmed durable; `stored`
/// is the last value confirmed read from or written to the store in the
/// current session.
#[derive(Debug)]
struct TrackedItem<T> {
    pending: Option<T>,
    stored: Option<T>,
}

impl<T> Default for TrackedItem<T> {
    fn default() -> Self {
        Self {
            pending: None,
            stored: None,
        }
    }
}

impl<T: PartialEq + Clone> TrackedItem<T> {
    /// Record a new desired value unless it matches what we already have
    /// pending (or, with nothing pending, what is confirmed stored).
    /// Repeated proposals before a flush coalesce into the latest value.
    fn propose(&mut self, value: T) -> bool {
        if self.effective_ref() == Some(&value) {
            return false;
        }
        self.pending = Some(value);
        true
    }

    /// A write of the pending value was confirmed durable.
    fn promote(&mut self) {
        if let Some(value) = self.pending.take() {
            self.stored = Some(value);
        }
    }

    fn clear(&mut self) {
        self.pending = None;
        self.stored = None;
    }

    fn clear_stored(&mut self) {
        self.stored = None;
    }

    fn effective_ref(&self) -> Option<&T> {
        self.pending.as_ref().or(self.stored.as_ref())
    }
}

/// The coordination layer of one controller replica
pub struct MetadataCoordinator {
    node_index: u16,
    paths: PathScheme,
    config: CoordinatorConfig,
    connector: Arc<dyn StoreConnector>,
    codec: Arc<dyn BundleCodec>,
    listener: Arc<dyn CoordinationListener>,
    mailbox: Arc<EventMailbox>,
    aggregator: MasterVoteAggregator,
    session: Option<PersistentStoreAdapter>,
    events: Option<UnboundedReceiver<StoreEvent>>,
    master_vote: TrackedItem<u16>,
    latest_version: TrackedItem<u64>,
    start_timestamps: TrackedItem<BTreeMap<String, u64>>,
    wanted_states: TrackedItem<BTreeMap<String, WantedState>>,
    published_bundle: TrackedItem<ClusterStateBundle>,
    last_connect_attempt: Option<Instant>,
}

impl MetadataCoordinator {
    pub fn new(
        config: &Config,
        connector: Arc<dyn StoreConnector>,
        codec: Arc<dyn BundleCodec>,
        listener: Arc<dyn CoordinationListener>,
    ) -> Self {
        let paths = PathScheme::new(&config.cluster);
        let mailbox = Arc::new(EventMailbox::default());
        let aggregator = MasterVoteAggregator::new(paths.clone(), mailbox.clone());
        Self {
            node_index: config.node_index,
            paths,
            config: config.coordinator.clone(),
            connector,
            codec,
            listener,
            mailbox,
            aggregator,
            session: None,
            events: None,
            master_vote: TrackedItem::default(),
            latest_version: TrackedItem::default(),
            start_timestamps: TrackedItem::default(),
            wanted_states: TrackedItem::default(),
            published_bundle: TrackedItem::default(),
            last_connect_attempt: None,
        }
    }

    /// Is there a usable store session right now?
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().map(|s| !s.is_closed()).unwrap_or(false)
    }

    /// One cooperative scheduling round. Never blocks except for the
    /// throttled reconnect attempt.
    pub fn tick(&mut self) {
        self.drain_store_events();

        // 1. session loss supersedes anything else queued
        if self.mailbox.take_session_lost() {
            self.mailbox.clear_snapshot();
            self.close_session();
            tracing::warn!("Coordination session lost");
            self.listener.on_disconnected();
        }

        // 2. forward a queued vote snapshot with our own vote injected
        if let Some(mut snapshot) = self.mailbox.take_snapshot() {
            if snapshot.vote_of(self.node_index).is_none() {
                if let Some(&own) = self.master_vote.effective_ref() {
                    snapshot.insert(self.node_index, own);
                }
            }
            self.listener.on_vote_snapshot(&snapshot);
        }

        // 3. reconnect, throttled to one attempt per retry period
        if !self.is_connected() {
            if !self.retry_elapsed() {
                return;
            }
            self.reconnect();
            if !self.is_connected() {
                return;
            }
        }

        // 4. flush pending writes; a CAS conflict voids our authority
        if let Err(e) = self.flush_pending() {
            tracing::warn!(error = %e, "CAS conflict, resetting coordination state");
            self.reset_after_conflict();
            self.listener.on_disconnected();
        }
    }

    // === Setters ===
    //
    // Each setter records a pending value and ticks immediately so a
    // connected session flushes without waiting for the next scheduled
    // round.

    pub fn set_master_vote(&mut self, vote: u16) {
        if self.master_vote.propose(vote) {
            tracing::debug!(vote, "Master vote updated");
            self.tick();
        }
    }

    pub fn save_latest_state_version(&mut self, version: u64) {
        if self.latest_version.propose(version) {
            tracing::debug!(version, "Latest state version updated");
            self.tick();
        }
    }

    pub fn save_latest_published_bundle(&mut self, bundle: ClusterStateBundle) {
        if self.published_bundle.propose(bundle) {
            self.tick();
        }
    }

    pub fn save_wanted_states(&mut self, map: BTreeMap<String, WantedState>) {
        if self.wanted_states.propose(map) {
            self.tick();
        }
    }

    pub fn save_start_timestamps(&mut self, map: BTreeMap<String, u64>) {
        if self.start_timestamps.propose(map) {
            self.tick();
        }
    }

    // === Getters ===
    //
    // Reads prefer the local pending-else-stored value, read through to
    // the store when connected, and surface `Error::Unavailable` when
    // disconnected with nothing locally confirmed. No value is ever
    // fabricated for an unreachable store.

    pub fn get_latest_state_version(&mut self) -> Result<u64> {
        if let Some(&version) = self.latest_version.effective_ref() {
            return Ok(version);
        }
        if !self.is_connected() {
            return Err(Error::Unavailable(
                "latest state version unknown while disconnected".into(),
            ));
        }
        if let Some(adapter) = self.session.as_mut() {
            match adapter.load_latest_version()? {
                Some(version) => {
                    self.latest_version.stored = Some(version);
                    return Ok(version);
                }
                // Entry never written: version 0 is a fact, not a guess.
                None => return Ok(0),
            }
        }
        Err(Error::SessionClosed)
    }

    pub fn get_latest_published_bundle(&mut self) -> Result<Option<ClusterStateBundle>> {
        if let Some(bundle) = self.published_bundle.effective_ref() {
            return Ok(Some(bundle.clone()));
        }
        if !self.is_connected() {
            return Err(Error::Unavailable(
                "published bundle unknown while disconnected".into(),
            ));
        }
        if let Some(adapter) = self.session.as_mut() {
            let loaded = adapter.load_published_bundle()?;
            if let Some(bundle) = &loaded {
                self.published_bundle.stored = Some(bundle.clone());
            }
            return Ok(loaded);
        }
        Err(Error::SessionClosed)
    }

    /// Load wanted states and reconcile them against the live node
    /// registry: entries for unknown nodes are pruned, registry nodes
    /// without an entry default to `Up`. The flag reports whether the
    /// result differs from an all-default map.
    pub fn load_wanted_states(
        &mut self,
        registry: &[String],
    ) -> Result<(BTreeMap<String, WantedState>, bool)> {
        let loaded = self.read_through(
            |adapter| adapter.load_wanted_states(),
            |c| &mut c.wanted_states,
            "wanted states",
        )?;
        Ok(reconcile(loaded, registry, WantedState::default()))
    }

    /// Same contract as [`Self::load_wanted_states`] for per-node start
    /// timestamps; missing nodes default to 0.
    pub fn load_start_timestamps(
        &mut self,
        registry: &[String],
    ) -> Result<(BTreeMap<String, u64>, bool)> {
        let loaded = self.read_through(
            |adapter| adapter.load_start_timestamps(),
            |c| &mut c.start_timestamps,
            "start timestamps",
        )?;
        Ok(reconcile(loaded, registry, 0u64))
    }

    fn read_through<T: Clone + PartialEq>(
        &mut self,
        load: impl Fn(&mut PersistentStoreAdapter) -> Result<T>,
        item: impl Fn(&mut Self) -> &mut TrackedItem<T>,
        what: &str,
    ) -> Result<T> {
        if self.is_connected() {
            if let Some(adapter) = self.session.as_mut() {
                let loaded = load(adapter)?;
                item(self).stored = Some(loaded.clone());
                return Ok(loaded);
            }
        }
        match item(self).effective_ref() {
            Some(value) => Ok(value.clone()),
            None => Err(Error::Unavailable(format!(
                "{} unknown while disconnected",
                what
            ))),
        }
    }

    // === Internals ===

    /// Route buffered store events. Session transitions only set mailbox
    /// flags; watch notifications drive the aggregator.
    fn drain_store_events(&mut self) {
        let mut events = Vec::new();
        if let Some(rx) = self.events.as_mut() {
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }
        for event in events {
            match event {
                StoreEvent::Connected => tracing::debug!("Store session connected"),
                StoreEvent::Disconnected | StoreEvent::SessionExpired => {
                    self.mailbox.mark_session_lost();
                }
                StoreEvent::ChildrenChanged(path) => {
                    if path != self.paths.vote_root() {
                        continue;
                    }
                    if let Some(adapter) = &self.session {
                        if let Err(e) = self.aggregator.handle_children_changed(adapter.session())
                        {
                            tracing::warn!(error = %e, "Vote re-listing failed");
                        }
                    }
                }
                StoreEvent::DataChanged(path) => {
                    let Some(index) = self.paths.vote_entry_index(&path) else {
                        continue;
                    };
                    if let Some(adapter) = &self.session {
                        self.aggregator.handle_entry_changed(adapter.session(), index);
                    }
                }
            }
        }
    }

    fn retry_elapsed(&self) -> bool {
        match self.last_connect_attempt {
            Some(at) => at.elapsed() >= self.config.retry_period(),
            None => true,
        }
    }

    /// One reconnect attempt. Non-write-critical local state is rebuilt
    /// from the new session; pending latest-version and published-bundle
    /// writes survive, since dropping them would let the owner believe
    /// durable work exists when it does not.
    fn reconnect(&mut self) {
        self.last_connect_attempt = Some(Instant::now());
        self.close_session();

        self.master_vote.clear();
        self.wanted_states.clear();
        self.start_timestamps.clear();
        self.latest_version.clear_stored();
        self.published_bundle.clear_stored();

        let (tx, rx) = unbounded_channel();
        let session = match self.connector.connect(tx) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Store connect failed");
                return;
            }
        };
        let mut adapter = PersistentStoreAdapter::new(
            session,
            self.paths.clone(),
            self.node_index,
            self.codec.clone(),
        );
        if let Err(e) = adapter.ensure_namespace() {
            tracing::warn!(error = %e, "Namespace setup failed");
            adapter.close();
            return;
        }
        // The fresh ephemeral vote entry votes for self.
        self.master_vote.stored = Some(self.node_index);

        if let Err(e) = self.aggregator.restart(adapter.session()) {
            tracing::warn!(error = %e, "Vote aggregation restart failed");
            adapter.close();
            return;
        }
        self.session = Some(adapter);
        self.events = Some(rx);
        tracing::info!(index = self.node_index, "Coordination session established");
    }

    fn close_session(&mut self) {
        if let Some(adapter) = self.session.take() {
            adapter.close();
        }
        self.events = None;
    }

    /// Full reset after a CAS conflict: every pending and stored value
    /// goes, the session is closed, and a fresh read-before-write cycle
    /// is forced on reconnect.
    fn reset_after_conflict(&mut self) {
        self.master_vote.clear();
        self.latest_version.clear();
        self.wanted_states.clear();
        self.start_timestamps.clear();
        self.published_bundle.clear();
        self.mailbox.clear_snapshot();
        self.close_session();
    }

    /// Flush pending writes, one item at a time, in fixed priority order,
    /// stopping at the first item whose write does not yet succeed.
    /// Returns `Err` only for a CAS conflict; generic failures leave the
    /// item pending for a later tick.
    fn flush_pending(&mut self) -> Result<()> {
        let adapter = match self.session.as_mut() {
            Some(adapter) => adapter,
            None => return Ok(()),
        };

        if let Some(vote) = self.master_vote.pending {
            match adapter.store_master_vote(vote) {
                Ok(()) => {
                    tracing::debug!(vote, "Master vote stored");
                    self.master_vote.promote();
                }
                Err(e) if e.is_cas_conflict() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "Master vote write failed, will retry");
                    return Ok(());
                }
            }
        }

        if let Some(version) = self.latest_version.pending {
            if !adapter.latest_version_observed() {
                if let Err(e) = adapter.load_latest_version() {
                    tracing::warn!(error = %e, "Latest-version read failed, will retry");
                    return Ok(());
                }
            }
            match adapter.store_latest_version(version) {
                Ok(()) => {
                    tracing::debug!(version, "Latest state version stored");
                    self.latest_version.promote();
                }
                Err(e) if e.is_cas_conflict() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "Latest-version write failed, will retry");
                    return Ok(());
                }
            }
        }

        if let Some(map) = self.start_timestamps.pending.clone() {
            match adapter.store_start_timestamps(&map) {
                Ok(()) => self.start_timestamps.promote(),
                Err(e) if e.is_cas_conflict() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "Start-timestamp write failed, will retry");
                    return Ok(());
                }
            }
        }

        if let Some(map) = self.wanted_states.pending.clone() {
            match adapter.store_wanted_states(&map) {
                Ok(()) => self.wanted_states.promote(),
                Err(e) if e.is_cas_conflict() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "Wanted-state write failed, will retry");
                    return Ok(());
                }
            }
        }

        if let Some(bundle) = self.published_bundle.pending.clone() {
            if !adapter.published_bundle_observed() {
                if let Err(e) = adapter.load_published_bundle() {
                    tracing::warn!(error = %e, "Published-bundle read failed, will retry");
                    return Ok(());
                }
            }
            match adapter.store_published_bundle(&bundle) {
                Ok(()) => {
                    tracing::debug!(version = bundle.version, "Published bundle stored");
                    self.published_bundle.promote();
                }
                Err(e) if e.is_cas_conflict() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "Published-bundle write failed, will retry");
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

/// Reconcile a loaded per-node map against the live node registry.
///
/// The result contains exactly the registry's nodes; loaded entries for
/// unknown nodes are pruned and missing nodes take the default. The flag
/// is true when any registry node carries a non-default value or any
/// entry was pruned.
fn reconcile<V: Clone + PartialEq>(
    loaded: BTreeMap<String, V>,
    registry: &[String],
    default: V,
) -> (BTreeMap<String, V>, bool) {
    let mut changed = loaded
        .keys()
        .any(|node| !registry.iter().any(|r| r == node));
    let mut out = BTreeMap::new();
    for node in registry {
        match loaded.get(node) {
            Some(value) => {
                if *value != default {
                    changed = true;
                }
                out.insert(node.clone(), value.clone());
            }
            None => {
                out.insert(node.clone(), default.clone());
            }
        }
    }
    (out, changed)
}

/// Start the background tick loop, the owner's stand-in when it has no
/// scheduling round of its own.
pub fn start_coordinator_tasks(
    coordinator: Arc<Mutex<MetadataCoordinator>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = coordinator.lock().unwrap().config.tick_interval();
        loop {
            tokio::time::sleep(interval).await;
            coordinator.lock().unwrap().tick();
        }
    })
}
