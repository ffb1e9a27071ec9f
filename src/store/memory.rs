//! In-memory coordination store
//!
//! A session-faithful implementation of [`CoordinationStore`]: entries
//! carry versions, ephemeral entries die with their owning session, and
//! one-shot watches fire on child-set and value changes. Serves as the
//! embedded store for single-process deployments and as the test double
//! for the coordinator, with explicit disconnect/expire fault hooks.

use super::{CoordinationStore, CreateMode, StoreConnector, StoreEvent, VersionedValue};
use crate::common::{CoordinatorConfig, Error, Result};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

type SessionId = u64;

#[derive(Debug, Clone)]
struct Entry {
    data: Bytes,
    version: u64,
    ephemeral_owner: Option<SessionId>,
}

struct SessionState {
    events: UnboundedSender<StoreEvent>,
    alive: Arc<AtomicBool>,
}

#[derive(Default)]
struct Namespace {
    entries: BTreeMap<String, Entry>,
    child_watches: HashMap<String, Vec<SessionId>>,
    data_watches: HashMap<String, Vec<SessionId>>,
    sessions: HashMap<SessionId, SessionState>,
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

fn child_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

impl Namespace {
    fn deliver(&self, watchers: Vec<SessionId>, event: StoreEvent) {
        for id in watchers {
            if let Some(session) = self.sessions.get(&id) {
                // Receiver may be gone; a dead listener is not our problem.
                let _ = session.events.send(event.clone());
            }
        }
    }

    fn fire_data_watch(&mut self, path: &str) {
        if let Some(watchers) = self.data_watches.remove(path) {
            self.deliver(watchers, StoreEvent::DataChanged(path.to_string()));
        }
    }

    fn fire_child_watch(&mut self, parent: &str) {
        if parent.is_empty() {
            return;
        }
        if let Some(watchers) = self.child_watches.remove(parent) {
            self.deliver(watchers, StoreEvent::ChildrenChanged(parent.to_string()));
        }
    }

    /// Remove every ephemeral entry owned by `id`, firing watches.
    fn drop_ephemerals(&mut self, id: SessionId) {
        let owned: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.ephemeral_owner == Some(id))
            .map(|(p, _)| p.clone())
            .collect();
        for path in owned {
            self.entries.remove(&path);
            self.fire_data_watch(&path);
            self.fire_child_watch(parent_of(&path));
        }
    }
}

/// Shared in-memory namespace
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Namespace>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_session(&self, events: UnboundedSender<StoreEvent>) -> MemorySession {
        let id = rand::random::<SessionId>();
        let alive = Arc::new(AtomicBool::new(true));
        let mut ns = self.inner.lock().unwrap();
        ns.sessions.insert(
            id,
            SessionState {
                events: events.clone(),
                alive: alive.clone(),
            },
        );
        MemorySession {
            inner: self.inner.clone(),
            id,
            alive,
        }
    }

    /// Fault hook: signal transport loss to every live session.
    ///
    /// Sessions and their ephemeral entries survive, mirroring a network
    /// blip rather than a session expiry.
    pub fn disconnect_all(&self) {
        let ns = self.inner.lock().unwrap();
        for session in ns.sessions.values() {
            let _ = session.events.send(StoreEvent::Disconnected);
        }
    }

    /// Fault hook: expire every live session, dropping their ephemeral
    /// entries and firing the resulting watches.
    pub fn expire_all(&self) {
        let mut ns = self.inner.lock().unwrap();
        let ids: Vec<SessionId> = ns.sessions.keys().copied().collect();
        for id in ids {
            if let Some(session) = ns.sessions.get(&id) {
                session.alive.store(false, Ordering::SeqCst);
                let _ = session.events.send(StoreEvent::SessionExpired);
            }
            ns.drop_ephemerals(id);
            ns.sessions.remove(&id);
        }
    }

    /// Raw read of an entry's bytes, bypassing any session (test hook).
    pub fn peek(&self, path: &str) -> Option<(Bytes, u64)> {
        let ns = self.inner.lock().unwrap();
        ns.entries.get(path).map(|e| (e.data.clone(), e.version))
    }

    /// Number of live sessions (test hook).
    pub fn session_count(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }
}

/// One session against a [`MemoryStore`]
pub struct MemorySession {
    inner: Arc<Mutex<Namespace>>,
    id: SessionId,
    alive: Arc<AtomicBool>,
}

impl MemorySession {
    fn ensure_open(&self) -> Result<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::SessionClosed)
        }
    }
}

impl CoordinationStore for MemorySession {
    fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<()> {
        self.ensure_open()?;
        if !path.starts_with('/') || path.ends_with('/') {
            return Err(Error::Internal(format!("malformed path: {}", path)));
        }
        let mut ns = self.inner.lock().unwrap();
        if ns.entries.contains_key(path) {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        let parent = parent_of(path);
        if !parent.is_empty() && !ns.entries.contains_key(parent) {
            return Err(Error::NotFound(parent.to_string()));
        }
        ns.entries.insert(
            path.to_string(),
            Entry {
                data: Bytes::copy_from_slice(data),
                version: 0,
                ephemeral_owner: match mode {
                    CreateMode::Ephemeral => Some(self.id),
                    CreateMode::Persistent => None,
                },
            },
        );
        ns.fire_data_watch(path);
        ns.fire_child_watch(parent_of(path));
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.ensure_open()?;
        let mut ns = self.inner.lock().unwrap();
        if ns.entries.remove(path).is_none() {
            return Err(Error::NotFound(path.to_string()));
        }
        ns.fire_data_watch(path);
        ns.fire_child_watch(parent_of(path));
        Ok(())
    }

    fn get(&self, path: &str, watch: bool) -> Result<Option<VersionedValue>> {
        self.ensure_open()?;
        let mut ns = self.inner.lock().unwrap();
        if watch {
            ns.data_watches
                .entry(path.to_string())
                .or_default()
                .push(self.id);
        }
        Ok(ns.entries.get(path).map(|e| VersionedValue {
            data: e.data.clone(),
            version: e.version,
        }))
    }

    fn set(&self, path: &str, data: &[u8], expected: Option<u64>) -> Result<u64> {
        self.ensure_open()?;
        let mut ns = self.inner.lock().unwrap();
        let entry = ns
            .entries
            .get_mut(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        if let Some(exp) = expected {
            if entry.version != exp {
                return Err(Error::CasConflict {
                    path: path.to_string(),
                    expected: exp,
                    actual: entry.version,
                });
            }
        }
        entry.data = Bytes::copy_from_slice(data);
        entry.version += 1;
        let version = entry.version;
        ns.fire_data_watch(path);
        Ok(version)
    }

    fn children(&self, path: &str, watch: bool) -> Result<Vec<String>> {
        self.ensure_open()?;
        let mut ns = self.inner.lock().unwrap();
        if watch {
            ns.child_watches
                .entry(path.to_string())
                .or_default()
                .push(self.id);
        }
        Ok(ns
            .entries
            .keys()
            .filter(|p| parent_of(p) == path)
            .map(|p| child_name(p).to_string())
            .collect())
    }

    fn close(&self) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut ns = self.inner.lock().unwrap();
        ns.drop_ephemerals(self.id);
        ns.sessions.remove(&self.id);
    }

    fn is_closed(&self) -> bool {
        !self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Session factory over a shared [`MemoryStore`]
#[derive(Clone)]
pub struct MemoryConnector {
    store: MemoryStore,
    session_timeout: Duration,
}

impl MemoryConnector {
    /// Connector with default settings, for embedded and test use.
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            session_timeout: CoordinatorConfig::default().session_timeout(),
        }
    }

    /// Build a connector from coordinator config, validating that the
    /// configured address actually names the memory scheme.
    pub fn from_config(config: &CoordinatorConfig) -> Result<Self> {
        if config.store_addr != "memory:" && !config.store_addr.starts_with("memory://") {
            return Err(Error::InvalidConfig(format!(
                "unsupported store address: {}",
                config.store_addr
            )));
        }
        Ok(Self {
            store: MemoryStore::new(),
            session_timeout: config.session_timeout(),
        })
    }

    /// The shared namespace behind every session from this connector.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreConnector for MemoryConnector {
    fn connect(&self, events: UnboundedSender<StoreEvent>) -> Result<Arc<dyn CoordinationStore>> {
        let session = self.store.open_session(events.clone());
        tracing::debug!(timeout = ?self.session_timeout, "Memory store session opened");
        let _ = events.send(StoreEvent::Connected);
        Ok(Arc::new(session))
    }
}
