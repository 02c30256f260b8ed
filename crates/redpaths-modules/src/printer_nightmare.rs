//! PrinterNightmare: CVE-2021-34527 exploit simulation.
//!
//! Nothing is sent to the targets. Each selected host gets a `vulnerability_analyzed`
//! milestone describing the preconditions an operator would need to confirm.

use std::sync::{Arc, RwLock};

use redpaths_core::model::{EventType, Parameter};
use redpaths_core::{
    Capability, EventBuilder, InputError, ModuleError, ModuleMetadata, Prerequisite,
    PrerequisiteKind, RedPathsModule, RunLogger, Services,
};
use serde_json::json;

pub const KEY: &str = "PrinterNightmare";

const CVE: &str = "CVE-2021-34527";
const SMB_PORT: u16 = 445;

#[derive(Default)]
pub struct PrinterNightmare {
    services: RwLock<Option<Arc<Services>>>,
}

impl PrinterNightmare {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constructor() -> Arc<dyn RedPathsModule> {
        Arc::new(Self::new())
    }
}

#[async_trait::async_trait]
impl RedPathsModule for PrinterNightmare {
    fn config_key(&self) -> &str {
        KEY
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            name: "PrinterNightmare".into(),
            category: "exploit simulation".into(),
            description: "Simulates the exploit of CVE-2021-34527 (PrintNightmare) to gain SYSTEM privileges by generating system events".into(),
            prerequisites: vec![
                Prerequisite::new(PrerequisiteKind::NetworkAccess, "SMB Access")
                    .describe("SMB port (445) must be accessible to a network interface")
                    .required()
                    .when("service.port = 445"),
                Prerequisite::new(PrerequisiteKind::Knowledge, "Target IP")
                    .describe("IP address of the target host")
                    .when("host.os = windows"),
                Prerequisite::new(PrerequisiteKind::Credentials, "Low-Privilege User")
                    .describe("Valid user with low privileges")
                    .when("user.access >= low"),
                Prerequisite::new(PrerequisiteKind::Knowledge, "service_enumeration")
                    .describe("Open SMB service identified by an earlier scan"),
                Prerequisite::new(PrerequisiteKind::Module, "NetworkExplorer")
                    .describe("Host discovery on the target range"),
            ],
            provides: vec![
                Capability::new("privilege_escalation", "SYSTEM Access", 0.85)
                    .describe("Escalates privileges to SYSTEM on target")
                    .with_meta("privilege_level", json!("SYSTEM"))
                    .with_meta("persistence", json!(false)),
                Capability::new("code_execution", "Remote Code Execution", 0.85)
                    .describe("Allows remote code execution on the target"),
            ],
            risk: 7,
            stealth: 4,
            complexity: 5,
        }
    }

    fn set_services(&self, services: Arc<Services>) {
        let mut slot = self.services.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(services);
    }

    async fn execute(&self, params: &Parameter, logger: &RunLogger) -> Result<(), ModuleError> {
        let dry_run = match params.checkbox("dry_run") {
            Ok(flag) => flag,
            Err(InputError::Missing(_)) => true,
            Err(e) => return Err(e.into()),
        };

        let discoveries = crate::successful_runs(&self.services, &params.project_uid, "NetworkExplorer");
        if discoveries == 0 {
            logger.warning("No successful network enumeration recorded for this project");
        }

        let targets = params.all_targets();
        if targets.is_empty() {
            logger.warning("No targets selected, nothing to analyze");
            return Ok(());
        }

        EventBuilder::new(EventType::ScanStart)
            .with_data("cve", CVE)
            .with_data("targets", targets.len())
            .with_data("dry_run", dry_run)
            .emit(logger);

        for target in &targets {
            let host = if target.ip.is_empty() { &target.name } else { &target.ip };
            logger.info(format!("Analyzing {} for {}", host, CVE));
            EventBuilder::new(EventType::VulnerabilityAnalyzed)
                .with_data("cve", CVE)
                .with_data("host", host.as_str())
                .with_data("port", SMB_PORT)
                .with_data("requires", json!(["spooler_running", "point_and_print_enabled"]))
                .with_data("simulated", true)
                .emit(logger);
        }

        EventBuilder::new(EventType::ScanComplete)
            .with_data("cve", CVE)
            .with_data("timestamp", chrono::Utc::now().timestamp())
            .emit(logger);
        Ok(())
    }
}
