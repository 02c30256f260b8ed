//! redpaths-core: module orchestration engine for red-team attack vectors.
//!
//! Modules register with a deferred two-phase [`Registry`], their dependency edges form a
//! DAG, and the [`AttackVectorRunner`] executes `ancestors ++ [target]` in order, aborting on
//! the first failure. Every run gets its own [`RunBroker`] that records, filters and streams
//! log entries and milestone events to any number of subscribers.

mod config;
mod error;
mod plugin;
mod recommend;
mod registry;
mod runner;
mod service;
pub mod broker;
pub mod graph;
pub mod model;
pub mod store;

// Errors
pub use error::{
    ConfigError, ConfigResult, GraphError, GraphResult, InputError, ModuleError, RegistryError,
    RegistryResult, RunError, RunResult, StoreError, StoreResult,
};

// Configuration and module catalogue
pub use self::config::{
    BrokerSettings, ModuleCatalog, ModuleSettings, RedPathsConfig, RunnerSettings, ServerSettings,
    StorageSettings,
};

// Plugin contract
pub use plugin::{
    Capability, ModuleMetadata, Prerequisite, PrerequisiteKind, RedPathsModule, ServiceFactory,
    Services,
};

// Registry, runner, recommendations
pub use recommend::{Recommendation, RecommendationEngine};
pub use registry::{
    ModuleConstructor, ModuleExecutor, RegistrationReport, Registry, RegistryState,
};
pub use runner::{AttackVectorRunner, ModuleExecution, RunPhase, VectorRunReport, DEFAULT_SNAPSHOT_DEPTH};
pub use service::ModuleService;

// Broker
pub use broker::{
    frame_stream, BrokerConfig, BrokerHub, EventBuilder, RunBroker, RunLogger, StreamFrame,
    Subscription, SYSTEM_RUN,
};

// Graph and storage
pub use graph::GraphDirection;
pub use store::{
    EdgeDirection, EdgeSource, LogRepository, MemoryStore, ModuleRepository, RedPathsStore,
    RunRepository, SledStore,
};
