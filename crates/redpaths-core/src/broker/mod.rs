//! Per-run event/log broker.
//!
//! ## Architecture
//!
//! ```text
//!   RunLogger ──► RunBroker::record ──► in-memory store (seq-ordered)
//!                        │                     │
//!                        │                     └──► backlog snapshot on register_client
//!                        ├──► LogRepository (best effort)
//!                        └──► bounded event queue ──► dispatcher task ──► client queues
//! ```
//!
//! Every entry gets a per-run sequence number under the store lock. A client registering
//! records the last sequence it saw in the backlog (its watermark); the dispatcher skips
//! anything at or below it, so backfill and live delivery never overlap or reorder.
//! Producers never block: a full event queue drops the entry for live delivery, a full client
//! queue evicts that client.

mod hub;
mod logger;
mod stream;

pub use hub::BrokerHub;
pub use logger::{EventBuilder, RunLogger};
pub use stream::{frame_stream, StreamFrame};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::model::{EventType, LogEntry, LogLevel, LogPage, LogQuery, SYSTEM_PROJECT};
use crate::store::LogRepository;

/// Run id used when a producer has none.
pub const SYSTEM_RUN: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub event_queue_capacity: usize,
    pub client_queue_capacity: usize,
    pub max_entries: usize,
    pub prune_size: usize,
    pub prune_interval: Duration,
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: 100,
            client_queue_capacity: 50,
            max_entries: 10_000,
            prune_size: 2_000,
            prune_interval: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

struct EntryLog {
    entries: VecDeque<LogEntry>,
    next_seq: u64,
}

struct ClientSlot {
    tx: mpsc::Sender<LogEntry>,
    min_level: LogLevel,
    /// Highest sequence already handed over as backlog.
    watermark: u64,
}

struct BrokerInner {
    run_id: String,
    /// Replaceable while it is still the default project, see [`RunBroker::adopt_project`].
    project_uid: RwLock<String>,
    config: BrokerConfig,
    log: RwLock<EntryLog>,
    clients: DashMap<u64, ClientSlot>,
    events_tx: mpsc::Sender<LogEntry>,
    next_client: AtomicU64,
    log_store: Option<Arc<dyn LogRepository>>,
    last_active: Mutex<Instant>,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to one run's broker. Cloning shares the same broker.
///
/// Must be created inside a Tokio runtime: construction spawns the dispatcher and pruner.
#[derive(Clone)]
pub struct RunBroker {
    inner: Arc<BrokerInner>,
}

impl RunBroker {
    pub fn new(
        run_id: impl Into<String>,
        project_uid: impl Into<String>,
        config: BrokerConfig,
        log_store: Option<Arc<dyn LogRepository>>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity.max(1));
        let prune_interval = config.prune_interval;
        let inner = Arc::new(BrokerInner {
            run_id: run_id.into(),
            project_uid: RwLock::new(project_uid.into()),
            config,
            log: RwLock::new(EntryLog {
                entries: VecDeque::new(),
                next_seq: 1,
            }),
            clients: DashMap::new(),
            events_tx,
            next_client: AtomicU64::new(1),
            log_store,
            last_active: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });

        let dispatcher = tokio::spawn(dispatch_loop(Arc::downgrade(&inner), events_rx));
        let pruner = tokio::spawn(prune_loop(Arc::downgrade(&inner), prune_interval));
        lock(&inner.tasks).extend([dispatcher, pruner]);

        debug!(target: "redpaths::broker", run_id = %inner.run_id, "Run broker created");
        Self { inner }
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn project_uid(&self) -> String {
        read(&self.inner.project_uid).clone()
    }

    /// Attributes the run to `project_uid` if it still carries the default project, which
    /// happens when a stream subscribed before the run started. Returns the project in effect.
    pub fn adopt_project(&self, project_uid: &str) -> String {
        let mut current = write(&self.inner.project_uid);
        if !project_uid.is_empty() && project_uid != *current && *current == SYSTEM_PROJECT {
            debug!(target: "redpaths::broker", run_id = %self.inner.run_id, project_uid, "Broker adopted project");
            *current = project_uid.to_string();
        }
        current.clone()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Root logger for this run (no module tag).
    pub fn logger(&self) -> RunLogger {
        RunLogger::new(self.clone(), None)
    }

    pub fn log(
        &self,
        module_key: Option<&str>,
        level: LogLevel,
        message: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> LogEntry {
        self.record(module_key, Some(level), None, message.into(), payload)
    }

    pub fn event(
        &self,
        module_key: Option<&str>,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> LogEntry {
        let message = event_type.as_str().to_string();
        self.record(module_key, None, Some(event_type), message, Some(payload))
    }

    fn record(
        &self,
        module_key: Option<&str>,
        level: Option<LogLevel>,
        event_type: Option<EventType>,
        message: String,
        payload: Option<serde_json::Value>,
    ) -> LogEntry {
        let inner = &self.inner;
        inner.touch();

        let mut entry = LogEntry {
            id: 0,
            project_uid: read(&inner.project_uid).clone(),
            run_uid: inner.run_id.clone(),
            module_key: module_key.map(str::to_string),
            level,
            event_type,
            message,
            payload,
            timestamp: Utc::now(),
        };

        {
            // Sequence, append and enqueue under one lock so live order matches store order.
            let mut log = write(&inner.log);
            entry.id = log.next_seq;
            log.next_seq += 1;
            log.entries.push_back(entry.clone());

            if inner.closed.load(Ordering::Acquire) {
                debug!(target: "redpaths::broker", run_id = %inner.run_id, "Broker closed, entry kept for history only");
            } else {
                match inner.events_tx.try_send(entry.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(dropped)) => {
                        warn!(target: "redpaths::broker", run_id = %inner.run_id, entry_id = dropped.id, "Event queue full, dropping live delivery");
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(target: "redpaths::broker", run_id = %inner.run_id, "Event queue closed");
                    }
                }
            }
        }

        mirror(&entry);

        if let Some(ref store) = inner.log_store {
            if let Err(e) = store.insert_log(&entry) {
                warn!(target: "redpaths::broker", run_id = %inner.run_id, error = %e, "Failed to persist log entry");
            }
        }

        entry
    }

    /// Registers a client. The returned subscription yields the filtered backlog first, then
    /// live entries in emission order.
    pub fn register_client(&self, min_level: LogLevel) -> Subscription {
        let inner = &self.inner;
        inner.touch();
        let id = inner.next_client.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(inner.config.client_queue_capacity.max(1));

        let backlog: VecDeque<LogEntry> = {
            // Read lock blocks appends, so the snapshot and the watermark agree.
            let log = read(&inner.log);
            let watermark = log.next_seq - 1;
            if !inner.closed.load(Ordering::Acquire) {
                inner.clients.insert(
                    id,
                    ClientSlot {
                        tx,
                        min_level,
                        watermark,
                    },
                );
            }
            log.entries
                .iter()
                .filter(|e| e.severity() >= min_level)
                .cloned()
                .collect()
        };

        info!(target: "redpaths::broker", run_id = %inner.run_id, client_id = id, min_level = %min_level, backlog = backlog.len(), "Client registered");
        Subscription {
            id,
            min_level,
            backlog,
            rx,
            broker: Arc::downgrade(inner),
        }
    }

    pub fn unregister_client(&self, client_id: u64) -> bool {
        let removed = self.inner.clients.remove(&client_id).is_some();
        if removed {
            info!(target: "redpaths::broker", run_id = %self.inner.run_id, client_id, "Client unregistered");
        }
        removed
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }

    pub fn entry_count(&self) -> usize {
        read(&self.inner.log).entries.len()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        read(&self.inner.log).entries.iter().cloned().collect()
    }

    pub fn query(&self, query: &LogQuery) -> LogPage {
        query.page(read(&self.inner.log).entries.iter())
    }

    /// Drops the oldest block once the store exceeds `max_entries`. Returns how many went.
    pub fn prune(&self) -> usize {
        self.inner.prune()
    }

    pub fn last_active(&self) -> Instant {
        *lock(&self.inner.last_active)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stops background tasks and closes every client queue. Entries stay readable.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for task in lock(&self.inner.tasks).drain(..) {
            task.abort();
        }
        self.inner.clients.clear();
        info!(target: "redpaths::broker", run_id = %self.inner.run_id, "Run broker closed");
    }
}

impl BrokerInner {
    fn touch(&self) {
        *lock(&self.last_active) = Instant::now();
    }

    fn fan_out(&self, entry: &LogEntry) {
        let severity = entry.severity();
        let mut evicted = Vec::new();
        for slot in self.clients.iter() {
            if entry.id <= slot.watermark || severity < slot.min_level {
                continue;
            }
            match slot.tx.try_send(entry.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(target: "redpaths::broker", run_id = %self.run_id, client_id = *slot.key(), "Client queue full, evicting slow consumer");
                    evicted.push(*slot.key());
                }
                Err(TrySendError::Closed(_)) => evicted.push(*slot.key()),
            }
        }
        for id in evicted {
            self.clients.remove(&id);
        }
    }

    fn prune(&self) -> usize {
        let mut log = write(&self.log);
        let len = log.entries.len();
        if len <= self.config.max_entries {
            return 0;
        }
        let remove = self
            .config
            .prune_size
            .max(len - self.config.max_entries)
            .min(len);
        log.entries.drain(..remove);
        debug!(target: "redpaths::broker", run_id = %self.run_id, removed = remove, remaining = log.entries.len(), "Pruned run log");
        remove
    }
}

async fn dispatch_loop(broker: Weak<BrokerInner>, mut rx: mpsc::Receiver<LogEntry>) {
    while let Some(entry) = rx.recv().await {
        let Some(inner) = broker.upgrade() else {
            break;
        };
        inner.fan_out(&entry);
    }
}

async fn prune_loop(broker: Weak<BrokerInner>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = broker.upgrade() else {
            break;
        };
        inner.prune();
    }
}

fn mirror(entry: &LogEntry) {
    let module = entry.module_key.as_deref().unwrap_or("-");
    match (entry.level, &entry.event_type) {
        (Some(LogLevel::Debug), _) => {
            debug!(target: "redpaths::run", run_id = %entry.run_uid, module_key = %module, "{}", entry.message)
        }
        (Some(LogLevel::Info), _) => {
            info!(target: "redpaths::run", run_id = %entry.run_uid, module_key = %module, "{}", entry.message)
        }
        (Some(LogLevel::Warning), _) => {
            warn!(target: "redpaths::run", run_id = %entry.run_uid, module_key = %module, "{}", entry.message)
        }
        (Some(LogLevel::Error), _) => {
            error!(target: "redpaths::run", run_id = %entry.run_uid, module_key = %module, "{}", entry.message)
        }
        (None, Some(event)) => {
            info!(target: "redpaths::run", run_id = %entry.run_uid, module_key = %module, event = %event, "Event emitted")
        }
        (None, None) => {}
    }
}

// Poisoning only happens if a holder panicked mid-update; the guarded data stays usable.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn read<T>(l: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(l: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// One client's view of a run: backlog first, then its live queue. Dropping it unregisters.
pub struct Subscription {
    id: u64,
    min_level: LogLevel,
    backlog: VecDeque<LogEntry>,
    rx: mpsc::Receiver<LogEntry>,
    broker: Weak<BrokerInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    pub fn pending_backlog(&self) -> usize {
        self.backlog.len()
    }

    /// Next entry, or `None` once the client was evicted or the broker closed.
    pub async fn recv(&mut self) -> Option<LogEntry> {
        if let Some(entry) = self.backlog.pop_front() {
            return Some(entry);
        }
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LogEntry> {
        self.backlog.pop_front().or_else(|| self.rx.try_recv().ok())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.broker.upgrade() {
            inner.clients.remove(&self.id);
        }
    }
}
