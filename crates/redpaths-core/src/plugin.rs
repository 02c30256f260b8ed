//! Module implementation contract.
//!
//! A plugin supplies a stable config key, a metadata descriptor (prerequisites, provided
//! capabilities, risk/stealth/complexity), a hook to receive runtime service handles and an
//! async execution entry point. Plugins are opaque to the core: it only orders, runs and
//! records them.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::broker::{BrokerHub, RunLogger};
use crate::error::ModuleError;
use crate::model::Parameter;
use crate::store::RedPathsStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrerequisiteKind {
    Credentials,
    NetworkAccess,
    Privilege,
    Knowledge,
    Tool,
    /// Names another module key that should have run first.
    Module,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prerequisite {
    #[serde(rename = "type")]
    pub kind: PrerequisiteKind,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub conditions: String,
}

impl Prerequisite {
    pub fn new(kind: PrerequisiteKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            description: String::new(),
            required: false,
            conditions: String::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn when(mut self, conditions: impl Into<String>) -> Self {
        self.conditions = conditions.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Capability {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, confidence: f64) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            description: String::new(),
            confidence,
            metadata: HashMap::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    pub name: String,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
    #[serde(default)]
    pub provides: Vec<Capability>,
    pub risk: u8,
    pub stealth: u8,
    pub complexity: u8,
}

/// Runtime handles given to every implementation once the registry is initialized.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn RedPathsStore>,
    pub brokers: BrokerHub,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

/// Builds a fresh service bundle per implementation.
pub type ServiceFactory = Arc<dyn Fn() -> Arc<Services> + Send + Sync>;

#[async_trait::async_trait]
pub trait RedPathsModule: Send + Sync {
    /// Catalogue key; also the module key.
    fn config_key(&self) -> &str;

    fn metadata(&self) -> ModuleMetadata;

    fn set_services(&self, services: Arc<Services>);

    async fn execute(&self, params: &Parameter, logger: &RunLogger) -> Result<(), ModuleError>;
}
