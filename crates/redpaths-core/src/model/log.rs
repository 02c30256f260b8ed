use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SYSTEM_PROJECT: &str = "SYSTEM";

/// Severity, ordered `Debug < Info < Warning < Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// Milestone tags carried by event entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    ScanStart,
    ScanProgress,
    ScanComplete,
    ScanError,
    ModuleStart,
    ModuleComplete,
    ModuleError,
    DomainDiscovered,
    HostDiscovered,
    PortFound,
    ServiceDetected,
    VulnerabilityFound,
    VulnerabilityAnalyzed,
    Recommendation,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::ScanStart => "scan_start",
            EventType::ScanProgress => "scan_progress",
            EventType::ScanComplete => "scan_complete",
            EventType::ScanError => "scan_error",
            EventType::ModuleStart => "module_start",
            EventType::ModuleComplete => "module_complete",
            EventType::ModuleError => "module_error",
            EventType::DomainDiscovered => "domain_discovered",
            EventType::HostDiscovered => "host_discovered",
            EventType::PortFound => "port_found",
            EventType::ServiceDetected => "service_detected",
            EventType::VulnerabilityFound => "vulnerability_found",
            EventType::VulnerabilityAnalyzed => "vulnerability_analyzed",
            EventType::Recommendation => "recommendation",
            EventType::Custom(s) => s,
        }
    }

    /// Severity used when filtering event entries for subscribers.
    pub fn implied_level(&self) -> LogLevel {
        if self.as_str().ends_with("_error") {
            LogLevel::Error
        } else {
            LogLevel::Info
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "scan_start" => EventType::ScanStart,
            "scan_progress" => EventType::ScanProgress,
            "scan_complete" => EventType::ScanComplete,
            "scan_error" => EventType::ScanError,
            "module_start" => EventType::ModuleStart,
            "module_complete" => EventType::ModuleComplete,
            "module_error" => EventType::ModuleError,
            "domain_discovered" => EventType::DomainDiscovered,
            "host_discovered" => EventType::HostDiscovered,
            "port_found" => EventType::PortFound,
            "service_detected" => EventType::ServiceDetected,
            "vulnerability_found" => EventType::VulnerabilityFound,
            "vulnerability_analyzed" => EventType::VulnerabilityAnalyzed,
            "recommendation" => EventType::Recommendation,
            _ => EventType::Custom(s),
        }
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        EventType::from(s.to_string())
    }
}

impl From<EventType> for String {
    fn from(e: EventType) -> Self {
        e.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only run log record. Either `level` or `event_type` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub project_uid: String,
    pub run_uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<EventType>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn severity(&self) -> LogLevel {
        match (&self.level, &self.event_type) {
            (Some(level), _) => *level,
            (None, Some(event)) => event.implied_level(),
            (None, None) => LogLevel::Info,
        }
    }

    /// Stream event name: `log` for plain entries, the tag for events.
    pub fn stream_event(&self) -> &str {
        match &self.event_type {
            Some(event) => event.as_str(),
            None => "log",
        }
    }

    pub fn is_event(&self) -> bool {
        self.event_type.is_some()
    }
}

/// Filter and paging over log entries.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub min_level: Option<LogLevel>,
    #[serde(default)]
    pub module_key: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl LogQuery {
    pub const DEFAULT_LIMIT: usize = 100;
    pub const MAX_LIMIT: usize = 1000;

    pub fn effective_limit(&self) -> usize {
        match self.limit {
            Some(0) | None => Self::DEFAULT_LIMIT,
            Some(n) => n.min(Self::MAX_LIMIT),
        }
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(min) = self.min_level {
            if entry.severity() < min {
                return false;
            }
        }
        if let Some(ref module) = self.module_key {
            if entry.module_key.as_deref() != Some(module.as_str()) {
                return false;
            }
        }
        if let Some(ref kind) = self.event_type {
            if entry.stream_event() != kind.as_str() {
                return false;
            }
        }
        true
    }

    /// Applies filters, then offset and limit, preserving input order.
    pub fn page<'a>(&self, entries: impl IntoIterator<Item = &'a LogEntry>) -> LogPage {
        let matching: Vec<&LogEntry> = entries.into_iter().filter(|e| self.matches(e)).collect();
        let total = matching.len();
        let limit = self.effective_limit();
        let logs: Vec<LogEntry> = matching
            .into_iter()
            .skip(self.offset)
            .take(limit)
            .cloned()
            .collect();
        LogPage {
            count: logs.len(),
            logs,
            total,
            offset: self.offset,
            limit,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogPage {
    pub logs: Vec<LogEntry>,
    pub count: usize,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}
