use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{BrokerConfig, RunBroker, RunLogger, SYSTEM_RUN};
use crate::model::SYSTEM_PROJECT;
use crate::store::LogRepository;

struct HubInner {
    brokers: DashMap<String, RunBroker>,
    config: BrokerConfig,
    log_store: Option<Arc<dyn LogRepository>>,
}

/// Cache of run brokers keyed by run id, shared by producers and stream handlers.
#[derive(Clone)]
pub struct BrokerHub {
    inner: Arc<HubInner>,
}

impl BrokerHub {
    pub fn new(config: BrokerConfig, log_store: Option<Arc<dyn LogRepository>>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                brokers: DashMap::new(),
                config,
                log_store,
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Broker for `run_id`, created on first use. Empty ids map to the `system` run.
    ///
    /// An existing broker still on the default project takes a non-empty `project_uid`.
    pub fn broker(&self, run_id: &str, project_uid: &str) -> RunBroker {
        let run_id = if run_id.is_empty() { SYSTEM_RUN } else { run_id };
        if let Some(existing) = self.inner.brokers.get(run_id) {
            if !existing.is_closed() {
                let broker = existing.clone();
                drop(existing);
                broker.adopt_project(project_uid);
                return broker;
            }
        }
        let project = if project_uid.is_empty() {
            SYSTEM_PROJECT
        } else {
            project_uid
        };
        self.inner
            .brokers
            .entry(run_id.to_string())
            .and_modify(|b| {
                if b.is_closed() {
                    *b = RunBroker::new(
                        run_id,
                        project,
                        self.inner.config.clone(),
                        self.inner.log_store.clone(),
                    );
                }
            })
            .or_insert_with(|| {
                RunBroker::new(
                    run_id,
                    project,
                    self.inner.config.clone(),
                    self.inner.log_store.clone(),
                )
            })
            .clone()
    }

    pub fn logger(&self, run_id: &str, project_uid: &str) -> RunLogger {
        self.broker(run_id, project_uid).logger()
    }

    pub fn get(&self, run_id: &str) -> Option<RunBroker> {
        let run_id = if run_id.is_empty() { SYSTEM_RUN } else { run_id };
        self.inner.brokers.get(run_id).map(|b| b.clone())
    }

    pub fn run_ids(&self) -> Vec<String> {
        self.inner.brokers.iter().map(|b| b.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.brokers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.brokers.is_empty()
    }

    /// Closes and drops every broker idle longer than `idle_timeout` as of `now`.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        let idle_timeout = self.inner.config.idle_timeout;
        let stale: Vec<String> = self
            .inner
            .brokers
            .iter()
            .filter(|b| now.saturating_duration_since(b.last_active()) > idle_timeout)
            .map(|b| b.key().clone())
            .collect();

        for run_id in &stale {
            if let Some((_, broker)) = self.inner.brokers.remove(run_id) {
                broker.close();
            }
        }
        if !stale.is_empty() {
            info!(target: "redpaths::broker", removed = stale.len(), remaining = self.len(), "Swept idle run brokers");
        }
        stale.len()
    }

    /// Periodic idle sweep. The task ends once every hub handle is dropped.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let hub: Weak<HubInner> = Arc::downgrade(&self.inner);
        let every = self.inner.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = hub.upgrade() else {
                    break;
                };
                let removed = BrokerHub { inner }.sweep_idle(Instant::now());
                debug!(target: "redpaths::broker", removed, "Sweeper tick");
            }
        })
    }

    /// Closes every broker.
    pub fn shutdown(&self) {
        let ids = self.run_ids();
        for run_id in ids {
            if let Some((_, broker)) = self.inner.brokers.remove(&run_id) {
                broker.close();
            }
        }
    }
}
