//! Error taxonomy for the orchestration core.
//!
//! Each concern owns one enum. Configuration errors are fatal to a single module's
//! registration, duplicates are reported but treated as benign by callers, execution errors
//! abort the enclosing vector run, and persistence errors on audit records are logged only.

use thiserror::Error;

/// Opaque error returned by a module's execution entry point.
pub type ModuleError = Box<dyn std::error::Error + Send + Sync>;

pub type StoreResult<T> = Result<T, StoreError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type GraphResult<T> = Result<T, GraphError>;
pub type RegistryResult<T> = Result<T, RegistryError>;
pub type RunResult<T> = Result<T, RunError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{kind} with key {key} already exists")]
    Duplicate { kind: &'static str, key: String },

    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("module with key {0} not found in catalogue")]
    UnknownModule(String),

    #[error("failed to read module catalogue: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse module catalogue: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("unknown option type: {0}")]
    InvalidOptionType(String),
}

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("dependency cycle detected around module {0}")]
    Cycle(String),

    #[error("module {0} not found")]
    ModuleNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry has not been initialized")]
    NotInitialized,

    #[error("registration completion is already in progress")]
    AlreadyCompleting,

    #[error("registration already completed and nothing is pending")]
    AlreadyCompleted,

    #[error("no implementation registered for module {0}")]
    UnknownImplementation(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("module {key} failed: {source}")]
    Execution {
        key: String,
        #[source]
        source: ModuleError,
    },
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to execute module {module_key} in vector run {vector_run_uid}: {source}")]
    ModuleFailed {
        module_key: String,
        vector_run_uid: String,
        #[source]
        source: RegistryError,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("vector run {0} already exists")]
    DuplicateRun(String),

    #[error("invalid run record: {0}")]
    InvalidRecord(String),
}

#[derive(Error, Debug)]
pub enum InputError {
    #[error("input {0} not found")]
    Missing(String),

    #[error("input {key} has type {actual}, expected {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("malformed parameter bundle: {0}")]
    Malformed(#[from] serde_json::Error),
}
