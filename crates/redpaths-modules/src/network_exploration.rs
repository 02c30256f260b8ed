//! NetworkExplorer: host and service discovery over the operator's target range.
//!
//! Targets come from the `range` text input (a CIDR or address list) and any target
//! inputs. Each resolves to one `host_discovered` milestone.

use std::sync::{Arc, RwLock};

use redpaths_core::model::{EventType, Parameter};
use redpaths_core::{
    Capability, EventBuilder, InputError, ModuleError, ModuleMetadata, Prerequisite, PrerequisiteKind,
    RedPathsModule, RunLogger, Services,
};
use serde_json::json;
use tracing::info;

pub const KEY: &str = "NetworkExplorer";

const PORT_RANGE: &str = "1-1024";

#[derive(Default)]
pub struct NetworkExplorer {
    services: RwLock<Option<Arc<Services>>>,
}

impl NetworkExplorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constructor() -> Arc<dyn RedPathsModule> {
        Arc::new(Self::new())
    }
}

/// `(address, cidr)` pairs from the range input and target inputs, in input order.
fn scan_targets(params: &Parameter) -> Result<Vec<(String, String)>, InputError> {
    let mut out = Vec::new();
    match params.text_input("range") {
        Ok(range) => {
            for part in range.split([',', ' ']).map(str::trim).filter(|p| !p.is_empty()) {
                let cidr = if part.contains('/') { part.to_string() } else { String::new() };
                out.push((part.to_string(), cidr));
            }
        }
        Err(InputError::Missing(_)) => {}
        Err(e) => return Err(e),
    }
    for target in params.all_targets() {
        let address = if target.ip.is_empty() { target.cidr.clone() } else { target.ip.clone() };
        if !address.is_empty() {
            out.push((address, target.cidr));
        }
    }
    Ok(out)
}

#[async_trait::async_trait]
impl RedPathsModule for NetworkExplorer {
    fn config_key(&self) -> &str {
        KEY
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            name: "NetworkEnumeration".into(),
            category: "enumeration".into(),
            description: "Performs network-wide enumeration to identify live hosts, open ports and services".into(),
            prerequisites: vec![
                Prerequisite::new(PrerequisiteKind::NetworkAccess, "Network Reachability")
                    .describe("Target network must be reachable from the scanning interface")
                    .required()
                    .when("network.reachable = true"),
                Prerequisite::new(PrerequisiteKind::Knowledge, "Target Network Range")
                    .describe("CIDR or IP range to scan")
                    .required()
                    .when("target.cidr != null"),
                Prerequisite::new(PrerequisiteKind::Knowledge, "infrastructure_mapping")
                    .describe("Known infrastructure narrows the scan"),
            ],
            provides: vec![
                Capability::new("network_discovery", "Host Discovery", 0.95)
                    .describe("Discovers live hosts in the target network")
                    .with_meta("method", json!("icmp,tcp,syn")),
                Capability::new("service_enumeration", "Service & Port Enumeration", 0.9)
                    .describe("Identifies open ports, protocols and running services")
                    .with_meta("ports", json!("1-65535"))
                    .with_meta("versions", json!(true)),
                Capability::new("os_fingerprinting", "Operating System Detection", 0.75)
                    .describe("Attempts to identify the operating system of discovered hosts"),
            ],
            risk: 3,
            stealth: 2,
            complexity: 3,
        }
    }

    fn set_services(&self, services: Arc<Services>) {
        let mut slot = self.services.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(services);
    }

    async fn execute(&self, params: &Parameter, logger: &RunLogger) -> Result<(), ModuleError> {
        let targets = scan_targets(params)?;
        if targets.is_empty() {
            logger.error("No target network supplied");
            return Err("no target network: set the range input or select targets".into());
        }

        let earlier = crate::successful_runs(&self.services, &params.project_uid, KEY);
        if earlier > 0 {
            logger.debug(format!("{} earlier network enumerations in this project", earlier));
        }

        EventBuilder::new(EventType::ScanStart)
            .with_data("target_network", json!(targets.iter().map(|(a, _)| a).collect::<Vec<_>>()))
            .with_data("ports", PORT_RANGE)
            .emit(logger);

        let total = targets.len();
        for (index, (address, cidr)) in targets.iter().enumerate() {
            EventBuilder::new(EventType::HostDiscovered)
                .with_data("ip", address.as_str())
                .with_data("cidr", cidr.as_str())
                .emit(logger);
            EventBuilder::new(EventType::ScanProgress)
                .with_data("completed", index + 1)
                .with_data("total", total)
                .emit(logger);
        }
        info!(target: "redpaths::modules::network", run_id = %logger.run_id(), hosts = total, "Network enumeration finished");

        EventBuilder::new(EventType::ScanComplete)
            .with_data("hosts", total)
            .with_data("timestamp", chrono::Utc::now().timestamp())
            .emit(logger);
        Ok(())
    }
}
