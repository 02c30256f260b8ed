//! Storage seams for modules, dependency edges, run records and log entries.
//!
//! Graph traversal only needs [`EdgeSource`], so algorithms stay independent of the backend.
//! [`MemoryStore`] backs tests and storage-less runs; [`SledStore`] persists to named trees.

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::model::{LogEntry, LogPage, LogQuery, Module, ModuleDependency, ModuleRun, VectorRun};

/// Which way to follow dependency edges from a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    /// Edges whose `next_module` is the key (towards ancestors).
    Upstream,
    /// Edges whose `previous_module` is the key (towards descendants).
    Downstream,
}

pub trait EdgeSource: Send + Sync {
    fn fetch_edges(&self, direction: EdgeDirection, key: &str) -> StoreResult<Vec<ModuleDependency>>;
}

pub trait ModuleRepository: EdgeSource {
    /// Persists a module and its options. Fails with `StoreError::Duplicate` if the key exists.
    fn insert_module(&self, module: &Module) -> StoreResult<()>;

    fn module_exists(&self, key: &str) -> StoreResult<bool>;

    /// Module with its options attached.
    fn get_module(&self, key: &str) -> StoreResult<Option<Module>>;

    /// Batch lookup. Unknown keys are skipped; order follows `keys`.
    fn modules_by_keys(&self, keys: &[String]) -> StoreResult<Vec<Module>>;

    fn all_modules(&self) -> StoreResult<Vec<Module>>;

    fn dependency_exists(&self, edge: &ModuleDependency) -> StoreResult<bool>;

    /// Fails with `StoreError::Duplicate` if the edge exists.
    fn insert_dependency(&self, edge: &ModuleDependency) -> StoreResult<()>;

    fn all_dependencies(&self) -> StoreResult<Vec<ModuleDependency>>;
}

pub trait RunRepository: Send + Sync {
    /// Fails with `StoreError::Duplicate` if a vector run with the same uid exists.
    fn insert_vector_run(&self, run: &VectorRun) -> StoreResult<()>;

    fn vector_run_exists(&self, run_uid: &str) -> StoreResult<bool>;

    fn vector_runs(&self, project_uid: &str) -> StoreResult<Vec<VectorRun>>;

    fn insert_module_run(&self, run: &ModuleRun) -> StoreResult<()>;

    fn module_runs(&self, project_uid: &str) -> StoreResult<Vec<ModuleRun>>;

    /// Module runs of one vector run, in creation order.
    fn module_runs_for_vector(&self, vector_run_uid: &str) -> StoreResult<Vec<ModuleRun>>;
}

pub trait LogRepository: Send + Sync {
    fn insert_log(&self, entry: &LogEntry) -> StoreResult<()>;

    fn logs_for_run(&self, run_uid: &str) -> StoreResult<Vec<LogEntry>>;

    fn logs_for_project(&self, project_uid: &str, query: &LogQuery) -> StoreResult<LogPage>;
}

/// Everything the orchestration core persists.
pub trait RedPathsStore: ModuleRepository + RunRepository + LogRepository {}

impl<T: ModuleRepository + RunRepository + LogRepository> RedPathsStore for T {}
