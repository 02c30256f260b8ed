//! Built-in RedPaths modules.
//!
//! Registration is explicit: the host hands [`BUILTIN`] to `Registry::register_all`.

mod dns_exploration;
mod network_exploration;
mod printer_nightmare;

use std::sync::{Arc, RwLock};

use redpaths_core::{ModuleConstructor, Services};
use tracing::warn;

pub use dns_exploration::DnsExplorer;
pub use network_exploration::NetworkExplorer;
pub use printer_nightmare::PrinterNightmare;

pub const BUILTIN: &[ModuleConstructor] = &[
    DnsExplorer::constructor,
    NetworkExplorer::constructor,
    PrinterNightmare::constructor,
];

pub fn keys() -> [&'static str; 3] {
    [
        dns_exploration::KEY,
        network_exploration::KEY,
        printer_nightmare::KEY,
    ]
}

/// Successful earlier runs of `module_key` in `project_uid`; 0 when services are not wired yet.
fn successful_runs(services: &RwLock<Option<Arc<Services>>>, project_uid: &str, module_key: &str) -> usize {
    let services = services.read().unwrap_or_else(|e| e.into_inner()).clone();
    let Some(services) = services else {
        return 0;
    };
    match services.store.module_runs(project_uid) {
        Ok(runs) => runs
            .iter()
            .filter(|r| r.module_key == module_key && r.was_successful)
            .count(),
        Err(e) => {
            warn!(target: "redpaths::modules", module_key = %module_key, error = %e, "Could not read module run history");
            0
        }
    }
}
