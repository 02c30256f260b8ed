//! Plugin registry with deferred, two-phase initialization.
//!
//! Modules can register before storage exists. They wait in a pending buffer until
//! `complete_registration` persists them. The registry moves through
//! `Uninitialized -> Accepting -> Completing -> Ready`. Completing again from `Ready` is only
//! legal while late registrations are pending.
//!
//! The lock guards map updates only; service construction, persistence and the
//! recommendation hand-off all run outside it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::broker::RunLogger;
use crate::config::ModuleCatalog;
use crate::error::{RegistryError, RegistryResult, StoreError};
use crate::model::{Module, ModuleDependency, Parameter};
use crate::plugin::{RedPathsModule, ServiceFactory};
use crate::recommend::RecommendationEngine;
use crate::store::{EdgeSource, ModuleRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryState {
    Uninitialized,
    Accepting,
    Completing,
    Ready,
}

impl fmt::Display for RegistryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegistryState::Uninitialized => "uninitialized",
            RegistryState::Accepting => "accepting",
            RegistryState::Completing => "completing",
            RegistryState::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// Outcome of one `complete_registration` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrationReport {
    pub services_injected: usize,
    pub modules_persisted: Vec<String>,
    pub duplicate_modules: Vec<String>,
    pub edges_persisted: usize,
    pub edges_skipped: usize,
    pub failures: Vec<String>,
    pub recommender_registered: usize,
}

/// Runs a module by key. The runner depends on this seam, not on the registry type.
#[async_trait]
pub trait ModuleExecutor: Send + Sync {
    async fn execute_module(
        &self,
        key: &str,
        params: &Parameter,
        logger: &RunLogger,
    ) -> RegistryResult<()>;
}

struct PendingModule {
    module: Module,
    edges: Vec<ModuleDependency>,
}

struct Backend {
    store: Arc<dyn ModuleRepository>,
    services: ServiceFactory,
    recommender: Arc<RecommendationEngine>,
}

impl Clone for Backend {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            services: Arc::clone(&self.services),
            recommender: Arc::clone(&self.recommender),
        }
    }
}

struct Inner {
    state: RegistryState,
    modules: BTreeMap<String, Module>,
    implementations: HashMap<String, Arc<dyn RedPathsModule>>,
    pending: BTreeMap<String, PendingModule>,
    backend: Option<Backend>,
}

/// Constructor list entry for startup registration.
pub type ModuleConstructor = fn() -> Arc<dyn RedPathsModule>;

pub struct Registry {
    catalog: ModuleCatalog,
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new(catalog: ModuleCatalog) -> Self {
        Self {
            catalog,
            inner: Mutex::new(Inner {
                state: RegistryState::Uninitialized,
                modules: BTreeMap::new(),
                implementations: HashMap::new(),
                pending: BTreeMap::new(),
                backend: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> RegistryState {
        self.lock().state
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Stores the implementation and its catalogue descriptor and queues it for persistence.
    /// Once initialized, the implementation gets its services immediately.
    pub fn register_plugin(&self, implementation: Arc<dyn RedPathsModule>) -> RegistryResult<()> {
        let key = implementation.config_key().to_string();
        let (mut module, edges) = match self.catalog.module_from_config(&key) {
            Ok(found) => found,
            Err(e) => {
                error!(target: "redpaths::registry", module_key = %key, error = %e, "Module configuration missing, skipping registration");
                return Err(e.into());
            }
        };

        let meta = implementation.metadata();
        module.category = meta.category;
        module.risk = meta.risk;
        module.stealth = meta.stealth;
        module.complexity = meta.complexity;
        if module.description.is_empty() {
            module.description = meta.description;
        }

        let services = {
            let mut inner = self.lock();
            inner.modules.insert(key.clone(), module.clone());
            inner
                .implementations
                .insert(key.clone(), Arc::clone(&implementation));
            inner.pending.insert(key.clone(), PendingModule { module, edges });
            match inner.state {
                RegistryState::Uninitialized => None,
                _ => inner.backend.as_ref().map(|b| Arc::clone(&b.services)),
            }
        };

        if let Some(factory) = services {
            implementation.set_services(factory());
        }
        info!(target: "redpaths::registry", module_key = %key, "Module registered");
        Ok(())
    }

    /// Registers every constructor. Failures are logged and skipped; returns the keys that
    /// made it in.
    pub fn register_all(&self, constructors: &[ModuleConstructor]) -> Vec<String> {
        let mut registered = Vec::new();
        for construct in constructors {
            let implementation = construct();
            let key = implementation.config_key().to_string();
            match self.register_plugin(implementation) {
                Ok(()) => registered.push(key),
                Err(e) => warn!(target: "redpaths::registry", module_key = %key, error = %e, "Registration skipped"),
            }
        }
        registered
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Supplies storage and the service factory. A second call is a logged no-op.
    pub fn initialize<S>(&self, store: Arc<S>, services: ServiceFactory) -> Arc<RecommendationEngine>
    where
        S: ModuleRepository + 'static,
    {
        let mut inner = self.lock();
        if let Some(ref backend) = inner.backend {
            info!(target: "redpaths::registry", state = %inner.state, "Registry already initialized");
            return Arc::clone(&backend.recommender);
        }
        let edges: Arc<dyn EdgeSource> = store.clone();
        let recommender = Arc::new(RecommendationEngine::new(Some(edges)));
        inner.backend = Some(Backend {
            store,
            services,
            recommender: Arc::clone(&recommender),
        });
        inner.state = RegistryState::Accepting;
        info!(target: "redpaths::registry", pending = inner.pending.len(), "Registry initialized");
        recommender
    }

    /// Persists pending modules and edges and wires every implementation up.
    #[instrument(skip(self), target = "redpaths::registry")]
    pub fn complete_registration(&self) -> RegistryResult<RegistrationReport> {
        let (backend, implementations, pending_keys) = {
            let mut inner = self.lock();
            match inner.state {
                RegistryState::Uninitialized => return Err(RegistryError::NotInitialized),
                RegistryState::Completing => return Err(RegistryError::AlreadyCompleting),
                RegistryState::Ready if inner.pending.is_empty() => {
                    return Err(RegistryError::AlreadyCompleted)
                }
                RegistryState::Accepting | RegistryState::Ready => {}
            }
            let backend = inner.backend.clone().ok_or(RegistryError::NotInitialized)?;
            inner.state = RegistryState::Completing;
            let implementations: Vec<(String, Arc<dyn RedPathsModule>)> = inner
                .implementations
                .iter()
                .map(|(k, v)| (k.clone(), Arc::clone(v)))
                .collect();
            let pending_keys: Vec<String> = inner.pending.keys().cloned().collect();
            (backend, implementations, pending_keys)
        };

        let mut report = RegistrationReport::default();

        // Phase 1: runtime services.
        for (_, implementation) in &implementations {
            implementation.set_services((backend.services)());
            report.services_injected += 1;
        }
        debug!(target: "redpaths::registry", count = report.services_injected, "Services injected");

        // Phase 2: module descriptors.
        let pending: Vec<(Module, Vec<ModuleDependency>)> = {
            let inner = self.lock();
            pending_keys
                .iter()
                .filter_map(|k| inner.pending.get(k))
                .map(|p| (p.module.clone(), p.edges.clone()))
                .collect()
        };
        for (module, _) in &pending {
            match backend.store.insert_module(module) {
                Ok(()) => report.modules_persisted.push(module.key.clone()),
                Err(StoreError::Duplicate { .. }) => {
                    info!(target: "redpaths::registry", module_key = %module.key, "Module already persisted, skipping");
                    report.duplicate_modules.push(module.key.clone());
                }
                Err(e) => {
                    error!(target: "redpaths::registry", module_key = %module.key, error = %e, "Failed to persist module");
                    report.failures.push(format!("{}: {}", module.key, e));
                }
            }
        }

        // Phase 3: dependency edges, unique by (previous, next).
        let mut seen: HashSet<ModuleDependency> = HashSet::new();
        for edge in pending.iter().flat_map(|(_, edges)| edges.iter()) {
            if !seen.insert(edge.clone()) {
                report.edges_skipped += 1;
                continue;
            }
            match persist_edge(backend.store.as_ref(), edge) {
                Ok(true) => report.edges_persisted += 1,
                Ok(false) => report.edges_skipped += 1,
                Err(e) => {
                    error!(target: "redpaths::registry", previous = %edge.previous_module, next = %edge.next_module, error = %e, "Failed to persist dependency edge");
                    report.failures.push(format!(
                        "{}->{}: {}",
                        edge.previous_module, edge.next_module, e
                    ));
                }
            }
        }

        // Phase 4: recommendation engine.
        for (key, implementation) in &implementations {
            backend.recommender.register(key, Arc::clone(implementation));
            report.recommender_registered += 1;
        }

        {
            let mut inner = self.lock();
            for key in &pending_keys {
                inner.pending.remove(key);
            }
            inner.state = RegistryState::Ready;
        }

        info!(
            target: "redpaths::registry",
            persisted = report.modules_persisted.len(),
            duplicates = report.duplicate_modules.len(),
            edges = report.edges_persisted,
            failures = report.failures.len(),
            "Registration completed"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn modules(&self) -> Vec<Module> {
        self.lock().modules.values().cloned().collect()
    }

    pub fn module(&self, key: &str) -> Option<Module> {
        self.lock().modules.get(key).cloned()
    }

    pub fn implementation(&self, key: &str) -> Option<Arc<dyn RedPathsModule>> {
        self.lock().implementations.get(key).cloned()
    }

    pub fn pending_keys(&self) -> Vec<String> {
        self.lock().pending.keys().cloned().collect()
    }

    pub fn recommender(&self) -> Option<Arc<RecommendationEngine>> {
        self.lock()
            .backend
            .as_ref()
            .map(|b| Arc::clone(&b.recommender))
    }
}

fn persist_edge(store: &dyn ModuleRepository, edge: &ModuleDependency) -> Result<bool, StoreError> {
    if store.dependency_exists(edge)? {
        return Ok(false);
    }
    match store.insert_dependency(edge) {
        Ok(()) => Ok(true),
        Err(StoreError::Duplicate { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ModuleExecutor for Registry {
    async fn execute_module(
        &self,
        key: &str,
        params: &Parameter,
        logger: &RunLogger,
    ) -> RegistryResult<()> {
        let implementation = self
            .implementation(key)
            .ok_or_else(|| RegistryError::UnknownImplementation(key.to_string()))?;
        implementation
            .execute(params, logger)
            .await
            .map_err(|source| RegistryError::Execution {
                key: key.to_string(),
                source,
            })
    }
}
