//! Read-side queries over the module catalogue and run history.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{GraphError, GraphResult, StoreResult};
use crate::graph::{self, GraphDirection};
use crate::model::{InheritanceGraph, Module, ModuleOption, ModuleRun, VectorRun};
use crate::store::RedPathsStore;

#[derive(Clone)]
pub struct ModuleService {
    store: Arc<dyn RedPathsStore>,
}

impl ModuleService {
    pub fn new(store: Arc<dyn RedPathsStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RedPathsStore> {
        &self.store
    }

    /// All modules, each carrying its ordered ancestor keys.
    pub fn modules(&self) -> GraphResult<Vec<Module>> {
        let mut modules = self.store.all_modules()?;
        for module in modules.iter_mut() {
            module.dependency_vector = self.dependency_vector(&module.key);
        }
        Ok(modules)
    }

    pub fn module(&self, key: &str) -> GraphResult<Module> {
        let mut module = self
            .store
            .get_module(key)?
            .ok_or_else(|| GraphError::ModuleNotFound(key.to_string()))?;
        module.dependency_vector = self.dependency_vector(key);
        Ok(module)
    }

    pub fn inheritance_graph(&self) -> GraphResult<InheritanceGraph> {
        graph::inheritance_graph(self.store.as_ref())
    }

    pub fn subgraph(
        &self,
        key: &str,
        direction: GraphDirection,
        max_depth: Option<usize>,
    ) -> GraphResult<InheritanceGraph> {
        if !self.store.module_exists(key)? {
            return Err(GraphError::ModuleNotFound(key.to_string()));
        }
        graph::inheritance_subgraph(self.store.as_ref(), key, direction, max_depth)
    }

    /// Options a caller must fill to run `key` as an attack vector. First declaration of an
    /// option key wins, in execution order.
    pub fn attack_vector_options(&self, key: &str) -> GraphResult<Vec<ModuleOption>> {
        if !self.store.module_exists(key)? {
            return Err(GraphError::ModuleNotFound(key.to_string()));
        }
        let mut chain = graph::ordered_dependencies(self.store.as_ref(), key)?;
        chain.push(key.to_string());

        let mut seen = HashSet::new();
        let options: Vec<ModuleOption> = self
            .store
            .modules_by_keys(&chain)?
            .into_iter()
            .flat_map(|m| m.options)
            .filter(|opt| seen.insert(opt.key.clone()))
            .collect();
        debug!(target: "redpaths::service", module_key = %key, chain = chain.len(), options = options.len(), "Attack vector options resolved");
        Ok(options)
    }

    pub fn module_runs(&self, project_uid: &str) -> StoreResult<Vec<ModuleRun>> {
        self.store.module_runs(project_uid)
    }

    pub fn vector_runs(&self, project_uid: &str) -> StoreResult<Vec<VectorRun>> {
        self.store.vector_runs(project_uid)
    }

    pub fn module_runs_for_vector(&self, vector_run_uid: &str) -> StoreResult<Vec<ModuleRun>> {
        self.store.module_runs_for_vector(vector_run_uid)
    }

    fn dependency_vector(&self, key: &str) -> Vec<String> {
        graph::ordered_dependencies(self.store.as_ref(), key).unwrap_or_else(|e| {
            warn!(target: "redpaths::service", module_key = %key, error = %e, "Could not resolve dependency vector");
            Vec::new()
        })
    }
}
