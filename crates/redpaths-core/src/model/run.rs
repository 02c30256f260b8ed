use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::input::{InputValue, Target};
use super::module::InheritanceGraph;
use crate::error::{RunError, RunResult};

/// Execution record for one module invocation inside a vector run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRun {
    pub module_key: String,
    pub run_uid: String,
    pub vector_run_uid: String,
    pub project_uid: String,
    pub ran_at: DateTime<Utc>,
    pub was_successful: bool,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub parameters: HashMap<String, InputValue>,
}

impl ModuleRun {
    pub fn builder() -> ModuleRunBuilder {
        ModuleRunBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct ModuleRunBuilder {
    module_key: Option<String>,
    run_uid: Option<String>,
    vector_run_uid: String,
    project_uid: Option<String>,
    ran_at: Option<DateTime<Utc>>,
    was_successful: bool,
    targets: Vec<Target>,
    parameters: HashMap<String, InputValue>,
}

impl ModuleRunBuilder {
    pub fn module_key(mut self, key: impl Into<String>) -> Self {
        self.module_key = Some(key.into());
        self
    }

    pub fn run_uid(mut self, uid: impl Into<String>) -> Self {
        self.run_uid = Some(uid.into());
        self
    }

    pub fn vector_run_uid(mut self, uid: impl Into<String>) -> Self {
        self.vector_run_uid = uid.into();
        self
    }

    pub fn project_uid(mut self, uid: impl Into<String>) -> Self {
        self.project_uid = Some(uid.into());
        self
    }

    pub fn ran_at(mut self, at: DateTime<Utc>) -> Self {
        self.ran_at = Some(at);
        self
    }

    pub fn successful(mut self, ok: bool) -> Self {
        self.was_successful = ok;
        self
    }

    pub fn targets(mut self, targets: Vec<Target>) -> Self {
        self.targets = targets;
        self
    }

    pub fn parameters(mut self, parameters: HashMap<String, InputValue>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn build(self) -> RunResult<ModuleRun> {
        let module_key = required(self.module_key, "module_key")?;
        let run_uid = required(self.run_uid, "run_uid")?;
        let project_uid = required(self.project_uid, "project_uid")?;
        Ok(ModuleRun {
            module_key,
            run_uid,
            vector_run_uid: self.vector_run_uid,
            project_uid,
            ran_at: self.ran_at.unwrap_or_else(Utc::now),
            was_successful: self.was_successful,
            targets: self.targets,
            parameters: self.parameters,
        })
    }
}

/// One end-to-end attack vector execution with its graph snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRun {
    pub run_uid: String,
    pub project_uid: String,
    pub ran_at: DateTime<Utc>,
    pub target_module: String,
    pub graph: InheritanceGraph,
}

impl VectorRun {
    pub fn builder() -> VectorRunBuilder {
        VectorRunBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct VectorRunBuilder {
    run_uid: Option<String>,
    project_uid: Option<String>,
    target_module: Option<String>,
    ran_at: Option<DateTime<Utc>>,
    graph: InheritanceGraph,
}

impl VectorRunBuilder {
    pub fn run_uid(mut self, uid: impl Into<String>) -> Self {
        self.run_uid = Some(uid.into());
        self
    }

    pub fn project_uid(mut self, uid: impl Into<String>) -> Self {
        self.project_uid = Some(uid.into());
        self
    }

    pub fn target_module(mut self, key: impl Into<String>) -> Self {
        self.target_module = Some(key.into());
        self
    }

    pub fn ran_at(mut self, at: DateTime<Utc>) -> Self {
        self.ran_at = Some(at);
        self
    }

    pub fn graph(mut self, graph: InheritanceGraph) -> Self {
        self.graph = graph;
        self
    }

    pub fn build(self) -> RunResult<VectorRun> {
        Ok(VectorRun {
            run_uid: required(self.run_uid, "run_uid")?,
            project_uid: required(self.project_uid, "project_uid")?,
            target_module: required(self.target_module, "target_module")?,
            ran_at: self.ran_at.unwrap_or_else(Utc::now),
            graph: self.graph,
        })
    }
}

fn required(value: Option<String>, field: &str) -> RunResult<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(RunError::InvalidRecord(format!("{} is required", field))),
    }
}
