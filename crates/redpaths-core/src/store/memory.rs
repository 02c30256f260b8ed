use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{EdgeDirection, EdgeSource, LogRepository, ModuleRepository, RunRepository};
use crate::error::{StoreError, StoreResult};
use crate::model::{
    LogEntry, LogPage, LogQuery, Module, ModuleDependency, ModuleOption, ModuleRun, VectorRun,
};

#[derive(Default)]
struct Tables {
    modules: BTreeMap<String, Module>,
    options: HashMap<String, Vec<ModuleOption>>,
    edges: Vec<ModuleDependency>,
    vector_runs: Vec<VectorRun>,
    module_runs: Vec<ModuleRun>,
    logs: Vec<LogEntry>,
}

/// In-process store. Insertion order is preserved for edges, runs and logs.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with edges only, for graph queries.
    pub fn with_edges(edges: impl IntoIterator<Item = ModuleDependency>) -> Self {
        let store = Self::default();
        if let Ok(mut t) = store.tables.write() {
            t.edges.extend(edges);
        }
        store
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }

    fn attach_options(t: &Tables, module: &Module) -> Module {
        let mut m = module.clone();
        m.options = t.options.get(&m.key).cloned().unwrap_or_default();
        m
    }
}

impl EdgeSource for MemoryStore {
    fn fetch_edges(&self, direction: EdgeDirection, key: &str) -> StoreResult<Vec<ModuleDependency>> {
        let t = self.read()?;
        Ok(t.edges
            .iter()
            .filter(|e| match direction {
                EdgeDirection::Upstream => e.next_module == key,
                EdgeDirection::Downstream => e.previous_module == key,
            })
            .cloned()
            .collect())
    }
}

impl ModuleRepository for MemoryStore {
    fn insert_module(&self, module: &Module) -> StoreResult<()> {
        let mut t = self.write()?;
        if t.modules.contains_key(&module.key) {
            return Err(StoreError::Duplicate {
                kind: "module",
                key: module.key.clone(),
            });
        }
        t.options.insert(module.key.clone(), module.options.clone());
        t.modules.insert(module.key.clone(), module.stored());
        Ok(())
    }

    fn module_exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.read()?.modules.contains_key(key))
    }

    fn get_module(&self, key: &str) -> StoreResult<Option<Module>> {
        let t = self.read()?;
        Ok(t.modules.get(key).map(|m| Self::attach_options(&t, m)))
    }

    fn modules_by_keys(&self, keys: &[String]) -> StoreResult<Vec<Module>> {
        let t = self.read()?;
        Ok(keys
            .iter()
            .filter_map(|k| t.modules.get(k))
            .map(|m| Self::attach_options(&t, m))
            .collect())
    }

    fn all_modules(&self) -> StoreResult<Vec<Module>> {
        let t = self.read()?;
        Ok(t.modules.values().map(|m| Self::attach_options(&t, m)).collect())
    }

    fn dependency_exists(&self, edge: &ModuleDependency) -> StoreResult<bool> {
        Ok(self.read()?.edges.contains(edge))
    }

    fn insert_dependency(&self, edge: &ModuleDependency) -> StoreResult<()> {
        let mut t = self.write()?;
        if t.edges.contains(edge) {
            return Err(StoreError::Duplicate {
                kind: "dependency",
                key: format!("{}->{}", edge.previous_module, edge.next_module),
            });
        }
        t.edges.push(edge.clone());
        Ok(())
    }

    fn all_dependencies(&self) -> StoreResult<Vec<ModuleDependency>> {
        Ok(self.read()?.edges.clone())
    }
}

impl RunRepository for MemoryStore {
    fn insert_vector_run(&self, run: &VectorRun) -> StoreResult<()> {
        let mut t = self.write()?;
        if t.vector_runs.iter().any(|r| r.run_uid == run.run_uid) {
            return Err(StoreError::Duplicate {
                kind: "vector run",
                key: run.run_uid.clone(),
            });
        }
        t.vector_runs.push(run.clone());
        Ok(())
    }

    fn vector_run_exists(&self, run_uid: &str) -> StoreResult<bool> {
        Ok(self.read()?.vector_runs.iter().any(|r| r.run_uid == run_uid))
    }

    fn vector_runs(&self, project_uid: &str) -> StoreResult<Vec<VectorRun>> {
        let t = self.read()?;
        Ok(t.vector_runs
            .iter()
            .filter(|r| r.project_uid == project_uid)
            .cloned()
            .collect())
    }

    fn insert_module_run(&self, run: &ModuleRun) -> StoreResult<()> {
        self.write()?.module_runs.push(run.clone());
        Ok(())
    }

    fn module_runs(&self, project_uid: &str) -> StoreResult<Vec<ModuleRun>> {
        let t = self.read()?;
        Ok(t.module_runs
            .iter()
            .filter(|r| r.project_uid == project_uid)
            .cloned()
            .collect())
    }

    fn module_runs_for_vector(&self, vector_run_uid: &str) -> StoreResult<Vec<ModuleRun>> {
        let t = self.read()?;
        Ok(t.module_runs
            .iter()
            .filter(|r| r.vector_run_uid == vector_run_uid)
            .cloned()
            .collect())
    }
}

impl LogRepository for MemoryStore {
    fn insert_log(&self, entry: &LogEntry) -> StoreResult<()> {
        self.write()?.logs.push(entry.clone());
        Ok(())
    }

    fn logs_for_run(&self, run_uid: &str) -> StoreResult<Vec<LogEntry>> {
        let t = self.read()?;
        Ok(t.logs.iter().filter(|e| e.run_uid == run_uid).cloned().collect())
    }

    fn logs_for_project(&self, project_uid: &str, query: &LogQuery) -> StoreResult<LogPage> {
        let t = self.read()?;
        Ok(query.page(t.logs.iter().filter(|e| e.project_uid == project_uid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModuleType;

    fn module(key: &str) -> Module {
        Module::new(key, ModuleType::Enumeration)
    }

    #[test]
    fn test_duplicate_module_and_edge_rejected() {
        let store = MemoryStore::new();
        store.insert_module(&module("A")).unwrap();
        assert!(matches!(
            store.insert_module(&module("A")),
            Err(StoreError::Duplicate { kind: "module", .. })
        ));

        let edge = ModuleDependency::new("A", "B");
        store.insert_dependency(&edge).unwrap();
        assert!(store.insert_dependency(&edge).is_err());
        assert_eq!(store.all_dependencies().unwrap().len(), 1);
    }

    #[test]
    fn test_fetch_edges_by_direction() {
        let store = MemoryStore::with_edges(vec![
            ModuleDependency::new("A", "B"),
            ModuleDependency::new("B", "C"),
        ]);
        let up = store.fetch_edges(EdgeDirection::Upstream, "B").unwrap();
        assert_eq!(up, vec![ModuleDependency::new("A", "B")]);
        let down = store.fetch_edges(EdgeDirection::Downstream, "B").unwrap();
        assert_eq!(down, vec![ModuleDependency::new("B", "C")]);
    }
}
