use serde_json::{Map, Value};

use super::RunBroker;
use crate::model::{EventType, LogEntry, LogLevel};

/// Producer handle for a run. Child loggers share the broker and only change the module tag.
#[derive(Clone)]
pub struct RunLogger {
    broker: RunBroker,
    module_key: Option<String>,
}

impl RunLogger {
    pub(super) fn new(broker: RunBroker, module_key: Option<String>) -> Self {
        Self { broker, module_key }
    }

    pub fn for_module(&self, module_key: impl Into<String>) -> RunLogger {
        RunLogger {
            broker: self.broker.clone(),
            module_key: Some(module_key.into()),
        }
    }

    pub fn run_id(&self) -> &str {
        self.broker.run_id()
    }

    pub fn project_uid(&self) -> String {
        self.broker.project_uid()
    }

    pub fn module_key(&self) -> Option<&str> {
        self.module_key.as_deref()
    }

    pub fn broker(&self) -> &RunBroker {
        &self.broker
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, payload: Option<Value>) -> LogEntry {
        self.broker
            .log(self.module_key.as_deref(), level, message, payload)
    }

    pub fn debug(&self, message: impl Into<String>) -> LogEntry {
        self.log(LogLevel::Debug, message, None)
    }

    pub fn info(&self, message: impl Into<String>) -> LogEntry {
        self.log(LogLevel::Info, message, None)
    }

    pub fn warning(&self, message: impl Into<String>) -> LogEntry {
        self.log(LogLevel::Warning, message, None)
    }

    pub fn error(&self, message: impl Into<String>) -> LogEntry {
        self.log(LogLevel::Error, message, None)
    }

    pub fn event(&self, event_type: EventType, payload: Value) -> LogEntry {
        self.broker
            .event(self.module_key.as_deref(), event_type, payload)
    }
}

/// Fluent construction of an event payload.
///
/// ```ignore
/// EventBuilder::new(EventType::HostDiscovered)
///     .with_data("ip", "10.0.0.5")
///     .emit(&logger);
/// ```
pub struct EventBuilder {
    event_type: EventType,
    payload: Map<String, Value>,
}

impl EventBuilder {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            payload: Map::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn emit(self, logger: &RunLogger) -> LogEntry {
        logger.event(self.event_type, Value::Object(self.payload))
    }
}
