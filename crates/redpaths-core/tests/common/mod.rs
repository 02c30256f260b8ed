//! Shared fixtures: a configurable fake module and a small catalogue.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use redpaths_core::model::Parameter;
use redpaths_core::{
    BrokerConfig, BrokerHub, LogRepository, MemoryStore, ModuleCatalog, ModuleError, ModuleMetadata,
    RedPathsModule, RedPathsStore, RunLogger, ServiceFactory, Services,
};

/// A -> B -> C, plus D hanging off C.
pub const CATALOGUE: &str = r#"
[enumeration.A]
name = "Alpha"

[enumeration.A.options.domain]
type = "textInput"
label = "Domain"

[enumeration.B]
name = "Bravo"
inherits = ["A"]

[enumeration.B.options.range]
type = "textInput"
label = "Range"

[attack.C]
name = "Charlie"
inherits = ["B"]

[attack.D]
name = "Delta"
inherits = ["C"]
"#;

pub fn catalog() -> ModuleCatalog {
    ModuleCatalog::from_toml_str(CATALOGUE).unwrap()
}

pub struct FakeModule {
    key: &'static str,
    fail: bool,
    calls: Arc<Mutex<Vec<String>>>,
    services: AtomicUsize,
}

impl FakeModule {
    pub fn new(key: &'static str, calls: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            key,
            fail: false,
            calls,
            services: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn services_received(&self) -> usize {
        self.services.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RedPathsModule for FakeModule {
    fn config_key(&self) -> &str {
        self.key
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            name: self.key.to_string(),
            category: "fake".into(),
            risk: 1,
            stealth: 5,
            complexity: 1,
            ..Default::default()
        }
    }

    fn set_services(&self, _services: Arc<Services>) {
        self.services.fetch_add(1, Ordering::SeqCst);
    }

    async fn execute(&self, _params: &Parameter, logger: &RunLogger) -> Result<(), ModuleError> {
        self.calls.lock().unwrap().push(self.key.to_string());
        logger.info(format!("{} working", self.key));
        if self.fail {
            return Err(format!("{} blew up", self.key).into());
        }
        Ok(())
    }
}

pub fn hub(store: &Arc<MemoryStore>) -> BrokerHub {
    let logs: Arc<dyn LogRepository> = store.clone();
    BrokerHub::new(BrokerConfig::default(), Some(logs))
}

pub fn service_factory(store: Arc<MemoryStore>, brokers: BrokerHub) -> ServiceFactory {
    Arc::new(move || {
        let store: Arc<dyn RedPathsStore> = store.clone();
        Arc::new(Services {
            store,
            brokers: brokers.clone(),
        })
    })
}
