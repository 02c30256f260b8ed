//! Process configuration and the module catalogue.
//!
//! `RedPathsConfig::load()` layers defaults, an optional TOML file (`REDPATHS_CONFIG`, else
//! `config/redpaths.toml`) and `REDPATHS__SECTION__KEY` environment overrides.
//!
//! The module catalogue (`config/modules.toml`) declares the static part of each module:
//!
//! ```toml
//! [enumeration.NetworkExplorer]
//! name = "Network Exploration"
//! inherits = ["DNSExplorer"]
//!
//! [enumeration.NetworkExplorer.options.range]
//! type = "textInput"
//! label = "Target range"
//! required = true
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::broker::BrokerConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::model::{Module, ModuleDependency, ModuleOption, ModuleOptionType, ModuleType};

const DEFAULT_CONFIG_PATH: &str = "config/redpaths.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    pub path: String,
    /// Skip sled and keep everything in process memory.
    pub in_memory: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSettings {
    pub catalogue: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerSettings {
    pub event_queue_capacity: usize,
    pub client_queue_capacity: usize,
    pub max_entries: usize,
    pub prune_size: usize,
    pub prune_interval_secs: u64,
    pub heartbeat_secs: u64,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl BrokerSettings {
    pub fn to_broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            event_queue_capacity: self.event_queue_capacity,
            client_queue_capacity: self.client_queue_capacity,
            max_entries: self.max_entries,
            prune_size: self.prune_size,
            prune_interval: Duration::from_secs(self.prune_interval_secs.max(1)),
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs.max(1)),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Depth of the downstream graph snapshot stored with each vector run.
    pub snapshot_depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedPathsConfig {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub modules: ModuleSettings,
    pub broker: BrokerSettings,
    pub runner: RunnerSettings,
}

impl RedPathsConfig {
    /// Load config from file and environment. Precedence: env > file > defaults.
    pub fn load() -> ConfigResult<Self> {
        let path = std::env::var("REDPATHS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let broker = BrokerConfig::default();
        let builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080_i64)?
            .set_default("storage.path", "./data/redpaths")?
            .set_default("storage.in_memory", false)?
            .set_default("modules.catalogue", "config/modules.toml")?
            .set_default("broker.event_queue_capacity", broker.event_queue_capacity as i64)?
            .set_default("broker.client_queue_capacity", broker.client_queue_capacity as i64)?
            .set_default("broker.max_entries", broker.max_entries as i64)?
            .set_default("broker.prune_size", broker.prune_size as i64)?
            .set_default("broker.prune_interval_secs", broker.prune_interval.as_secs() as i64)?
            .set_default("broker.heartbeat_secs", broker.heartbeat_interval.as_secs() as i64)?
            .set_default("broker.idle_timeout_secs", broker.idle_timeout.as_secs() as i64)?
            .set_default("broker.sweep_interval_secs", broker.sweep_interval.as_secs() as i64)?
            .set_default("runner.snapshot_depth", 10_i64)?;

        let builder = if path.exists() {
            debug!(target: "redpaths::config", path = %path.display(), "Loading config file");
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("REDPATHS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(built.try_deserialize()?)
    }
}

// ---------------------------------------------------------------------------
// Module catalogue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
struct OptionEntry {
    #[serde(rename = "type", default)]
    option_type: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    placeholder: String,
    #[serde(default)]
    required: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CatalogEntry {
    #[serde(default)]
    attack_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    execution_metric: String,
    #[serde(default)]
    loot_path: String,
    #[serde(default)]
    inherits: Vec<String>,
    #[serde(default)]
    options: BTreeMap<String, OptionEntry>,
}

/// Static module declarations, keyed by config key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleCatalog {
    #[serde(default)]
    enumeration: BTreeMap<String, CatalogEntry>,
    #[serde(default)]
    attack: BTreeMap<String, CatalogEntry>,
}

impl ModuleCatalog {
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.enumeration
            .keys()
            .chain(self.attack.keys())
            .map(String::as_str)
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.enumeration.contains_key(key) || self.attack.contains_key(key)
    }

    /// Descriptor and inherited edges (`previous -> key`) for one module.
    pub fn module_from_config(&self, key: &str) -> ConfigResult<(Module, Vec<ModuleDependency>)> {
        let (entry, module_type) = if let Some(e) = self.enumeration.get(key) {
            (e, ModuleType::Enumeration)
        } else if let Some(e) = self.attack.get(key) {
            (e, ModuleType::Attack)
        } else {
            return Err(ConfigError::UnknownModule(key.to_string()));
        };

        let mut module = Module::new(key, module_type);
        if !entry.name.is_empty() {
            module.name = entry.name.clone();
        }
        module.attack_id = entry.attack_id.clone();
        module.version = entry.version.clone();
        module.description = entry.description.clone();
        module.author = entry.author.clone();
        module.execution_metric = entry.execution_metric.clone();
        module.loot_path = entry.loot_path.clone();
        module.options = build_options(key, &entry.options);

        let edges = entry
            .inherits
            .iter()
            .map(|previous| ModuleDependency::new(previous.clone(), key))
            .collect();
        Ok((module, edges))
    }
}

fn build_options(module_key: &str, options: &BTreeMap<String, OptionEntry>) -> Vec<ModuleOption> {
    options
        .iter()
        .filter_map(|(key, opt)| match opt.option_type.parse::<ModuleOptionType>() {
            Ok(option_type) => Some(ModuleOption {
                key: key.clone(),
                option_type,
                required: opt.required,
                module_key: module_key.to_string(),
                label: opt.label.clone(),
                placeholder: opt.placeholder.clone(),
            }),
            Err(e) => {
                warn!(target: "redpaths::config", module_key = %module_key, option = %key, error = %e, "Skipping module option");
                None
            }
        })
        .collect()
}
