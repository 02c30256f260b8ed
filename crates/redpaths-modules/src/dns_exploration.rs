//! DNSExplorer: domain enumeration entry point of most attack vectors.

use std::sync::{Arc, RwLock};

use redpaths_core::model::{EventType, Parameter};
use redpaths_core::{
    Capability, EventBuilder, ModuleError, ModuleMetadata, Prerequisite, PrerequisiteKind,
    RedPathsModule, RunLogger, Services,
};
use serde_json::json;
use tracing::debug;

pub const KEY: &str = "DNSExplorer";

const RECORD_TYPES: [&str; 6] = ["A", "AAAA", "MX", "NS", "TXT", "SRV"];

#[derive(Default)]
pub struct DnsExplorer {
    services: RwLock<Option<Arc<Services>>>,
}

impl DnsExplorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constructor() -> Arc<dyn RedPathsModule> {
        Arc::new(Self::new())
    }
}

#[async_trait::async_trait]
impl RedPathsModule for DnsExplorer {
    fn config_key(&self) -> &str {
        KEY
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            name: "DNSExploration".into(),
            category: "enumeration".into(),
            description: "Performs DNS enumeration to discover domains, subdomains, records and infrastructure relationships".into(),
            prerequisites: vec![
                Prerequisite::new(PrerequisiteKind::Knowledge, "Target Domain")
                    .describe("Fully qualified domain name to enumerate")
                    .required()
                    .when("domain.fqdn != null"),
                Prerequisite::new(PrerequisiteKind::NetworkAccess, "DNS Resolution")
                    .describe("Ability to perform DNS queries against recursive or authoritative resolvers")
                    .required()
                    .when("dns.resolution = allowed"),
            ],
            provides: vec![
                Capability::new("dns_enumeration", "DNS Record Enumeration", 0.95)
                    .describe("Enumerates common DNS record types (A, AAAA, MX, NS, TXT, SRV)")
                    .with_meta("record_types", json!(RECORD_TYPES)),
                Capability::new("subdomain_discovery", "Subdomain Discovery", 0.85)
                    .describe("Discovers subdomains via brute-force and passive techniques")
                    .with_meta("methods", json!(["bruteforce", "zone_transfer", "passive"])),
                Capability::new("infrastructure_mapping", "Infrastructure Mapping", 0.8)
                    .describe("Maps DNS data to underlying hosts and services"),
            ],
            risk: 2,
            stealth: 6,
            complexity: 2,
        }
    }

    fn set_services(&self, services: Arc<Services>) {
        let mut slot = self.services.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(services);
    }

    async fn execute(&self, params: &Parameter, logger: &RunLogger) -> Result<(), ModuleError> {
        let domain = params.text_input("domain")?.trim().to_string();
        if domain.is_empty() {
            return Err("domain input is empty".into());
        }
        let earlier = crate::successful_runs(&self.services, &params.project_uid, KEY);
        debug!(target: "redpaths::modules::dns", run_id = %logger.run_id(), domain = %domain, earlier, "DNS enumeration started");

        EventBuilder::new(EventType::ScanStart)
            .with_data("domain", domain.as_str())
            .with_data("record_types", json!(RECORD_TYPES))
            .emit(logger);

        logger.info(format!("Enumerating {} record types for {}", RECORD_TYPES.len(), domain));
        EventBuilder::new(EventType::DomainDiscovered)
            .with_data("domain", domain.as_str())
            .with_data("source", "operator_input")
            .emit(logger);

        EventBuilder::new(EventType::ScanComplete)
            .with_data("domain", domain.as_str())
            .with_data("timestamp", chrono::Utc::now().timestamp())
            .emit(logger);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redpaths_core::model::InputValue;
    use redpaths_core::{BrokerConfig, BrokerHub};

    #[tokio::test]
    async fn test_emits_domain_milestones() {
        let hub = BrokerHub::new(BrokerConfig::default(), None);
        let logger = hub.logger("run-dns", "proj").for_module(KEY);
        let params = Parameter::new("proj").with_input(
            "domain",
            InputValue::TextInput {
                value: "corp.local".into(),
            },
        );

        DnsExplorer::new().execute(&params, &logger).await.unwrap();

        let entries = hub.get("run-dns").unwrap().entries();
        let tags: Vec<&str> = entries.iter().map(|e| e.stream_event()).collect();
        assert_eq!(tags, vec!["scan_start", "log", "domain_discovered", "scan_complete"]);
        assert_eq!(entries[2].payload.as_ref().unwrap()["domain"], "corp.local");
        assert!(entries.iter().all(|e| e.module_key.as_deref() == Some(KEY)));
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_missing_domain_fails() {
        let hub = BrokerHub::new(BrokerConfig::default(), None);
        let logger = hub.logger("run-dns", "proj");
        let result = DnsExplorer::new().execute(&Parameter::new("proj"), &logger).await;
        assert!(result.is_err());
        hub.shutdown();
    }
}
