use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionResult};
use sled::Transactional;

use super::{EdgeDirection, EdgeSource, LogRepository, ModuleRepository, RunRepository};
use crate::error::{StoreError, StoreResult};
use crate::model::{
    LogEntry, LogPage, LogQuery, Module, ModuleDependency, ModuleOption, ModuleRun, VectorRun,
};

const TREE_MODULES: &str = "modules";
const TREE_OPTIONS: &str = "module_options";
const TREE_EDGES: &str = "module_dependencies";
/// Same edges keyed `next\0previous` for upstream prefix scans.
const TREE_EDGES_REV: &str = "module_dependencies_rev";
const TREE_MODULE_RUNS: &str = "module_runs";
const TREE_VECTOR_RUNS: &str = "vector_runs";
/// Vector run uid to its key in `vector_runs`.
const TREE_VECTOR_RUN_IDS: &str = "vector_run_ids";
const TREE_LOGS: &str = "logs";

const KEY_SEP: u8 = 0;

/// Sled-backed store. Values are JSON; run and log keys come from `generate_id` so tree
/// order equals insertion order.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open_path<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Throwaway store that is removed on drop.
    pub fn temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn tree(&self, name: &str) -> StoreResult<sled::Tree> {
        Ok(self.db.open_tree(name)?)
    }

    fn next_key(&self) -> StoreResult<[u8; 8]> {
        Ok(self.db.generate_id()?.to_be_bytes())
    }

    fn scan_values<T: DeserializeOwned>(tree: &sled::Tree) -> StoreResult<Vec<T>> {
        let mut out = Vec::new();
        for item in tree.iter() {
            let (_, v) = item?;
            out.push(serde_json::from_slice(&v)?);
        }
        Ok(out)
    }

    fn scan_prefix_values<T: DeserializeOwned>(tree: &sled::Tree, prefix: &[u8]) -> StoreResult<Vec<T>> {
        let mut out = Vec::new();
        for item in tree.scan_prefix(prefix) {
            let (_, v) = item?;
            out.push(serde_json::from_slice(&v)?);
        }
        Ok(out)
    }

    fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn options_for(&self, key: &str) -> StoreResult<Vec<ModuleOption>> {
        match self.tree(TREE_OPTIONS)?.get(key.as_bytes())? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn with_options(&self, mut module: Module) -> StoreResult<Module> {
        module.options = self.options_for(&module.key)?;
        Ok(module)
    }
}

/// Paired writes go through a multi-tree transaction; an abort carries the store error.
fn finish<T>(result: TransactionResult<T, StoreError>) -> StoreResult<T> {
    result.map_err(|e| match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::Sled(e),
    })
}

fn pair_key(a: &str, b: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(a.len() + b.len() + 1);
    k.extend_from_slice(a.as_bytes());
    k.push(KEY_SEP);
    k.extend_from_slice(b.as_bytes());
    k
}

fn prefix_key(a: &str) -> Vec<u8> {
    let mut k = a.as_bytes().to_vec();
    k.push(KEY_SEP);
    k
}

impl EdgeSource for SledStore {
    fn fetch_edges(&self, direction: EdgeDirection, key: &str) -> StoreResult<Vec<ModuleDependency>> {
        let tree = match direction {
            EdgeDirection::Downstream => self.tree(TREE_EDGES)?,
            EdgeDirection::Upstream => self.tree(TREE_EDGES_REV)?,
        };
        Self::scan_prefix_values(&tree, &prefix_key(key))
    }
}

impl ModuleRepository for SledStore {
    fn insert_module(&self, module: &Module) -> StoreResult<()> {
        let modules = self.tree(TREE_MODULES)?;
        let options = self.tree(TREE_OPTIONS)?;
        let value = Self::encode(&module.stored())?;
        let option_value = Self::encode(&module.options)?;
        let key = module.key.as_bytes();

        finish((&modules, &options).transaction(|(modules, options)| {
            if modules.get(key)?.is_some() {
                return Err(ConflictableTransactionError::Abort(StoreError::Duplicate {
                    kind: "module",
                    key: module.key.clone(),
                }));
            }
            modules.insert(key, value.clone())?;
            options.insert(key, option_value.clone())?;
            Ok(())
        }))
    }

    fn module_exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.tree(TREE_MODULES)?.contains_key(key.as_bytes())?)
    }

    fn get_module(&self, key: &str) -> StoreResult<Option<Module>> {
        match self.tree(TREE_MODULES)?.get(key.as_bytes())? {
            Some(raw) => Ok(Some(self.with_options(serde_json::from_slice(&raw)?)?)),
            None => Ok(None),
        }
    }

    fn modules_by_keys(&self, keys: &[String]) -> StoreResult<Vec<Module>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(m) = self.get_module(key)? {
                out.push(m);
            }
        }
        Ok(out)
    }

    fn all_modules(&self) -> StoreResult<Vec<Module>> {
        let modules: Vec<Module> = Self::scan_values(&self.tree(TREE_MODULES)?)?;
        modules.into_iter().map(|m| self.with_options(m)).collect()
    }

    fn dependency_exists(&self, edge: &ModuleDependency) -> StoreResult<bool> {
        let key = pair_key(&edge.previous_module, &edge.next_module);
        Ok(self.tree(TREE_EDGES)?.contains_key(key)?)
    }

    fn insert_dependency(&self, edge: &ModuleDependency) -> StoreResult<()> {
        let edges = self.tree(TREE_EDGES)?;
        let reverse = self.tree(TREE_EDGES_REV)?;
        let value = Self::encode(edge)?;
        let forward_key = pair_key(&edge.previous_module, &edge.next_module);
        let reverse_key = pair_key(&edge.next_module, &edge.previous_module);

        finish((&edges, &reverse).transaction(|(edges, reverse)| {
            if edges.get(forward_key.as_slice())?.is_some() {
                return Err(ConflictableTransactionError::Abort(StoreError::Duplicate {
                    kind: "dependency",
                    key: format!("{}->{}", edge.previous_module, edge.next_module),
                }));
            }
            edges.insert(forward_key.as_slice(), value.clone())?;
            reverse.insert(reverse_key.as_slice(), value.clone())?;
            Ok(())
        }))
    }

    fn all_dependencies(&self) -> StoreResult<Vec<ModuleDependency>> {
        Self::scan_values(&self.tree(TREE_EDGES)?)
    }
}

impl RunRepository for SledStore {
    fn insert_vector_run(&self, run: &VectorRun) -> StoreResult<()> {
        let ids = self.tree(TREE_VECTOR_RUN_IDS)?;
        let runs = self.tree(TREE_VECTOR_RUNS)?;
        let key = self.next_key()?;
        let value = Self::encode(run)?;
        let uid = run.run_uid.as_bytes();

        finish((&ids, &runs).transaction(|(ids, runs)| {
            if ids.get(uid)?.is_some() {
                return Err(ConflictableTransactionError::Abort(StoreError::Duplicate {
                    kind: "vector run",
                    key: run.run_uid.clone(),
                }));
            }
            ids.insert(uid, &key[..])?;
            runs.insert(&key[..], value.clone())?;
            Ok(())
        }))
    }

    fn vector_run_exists(&self, run_uid: &str) -> StoreResult<bool> {
        Ok(self.tree(TREE_VECTOR_RUN_IDS)?.contains_key(run_uid.as_bytes())?)
    }

    fn vector_runs(&self, project_uid: &str) -> StoreResult<Vec<VectorRun>> {
        let all: Vec<VectorRun> = Self::scan_values(&self.tree(TREE_VECTOR_RUNS)?)?;
        Ok(all.into_iter().filter(|r| r.project_uid == project_uid).collect())
    }

    fn insert_module_run(&self, run: &ModuleRun) -> StoreResult<()> {
        let key = self.next_key()?;
        self.tree(TREE_MODULE_RUNS)?.insert(key, Self::encode(run)?)?;
        Ok(())
    }

    fn module_runs(&self, project_uid: &str) -> StoreResult<Vec<ModuleRun>> {
        let all: Vec<ModuleRun> = Self::scan_values(&self.tree(TREE_MODULE_RUNS)?)?;
        Ok(all.into_iter().filter(|r| r.project_uid == project_uid).collect())
    }

    fn module_runs_for_vector(&self, vector_run_uid: &str) -> StoreResult<Vec<ModuleRun>> {
        let all: Vec<ModuleRun> = Self::scan_values(&self.tree(TREE_MODULE_RUNS)?)?;
        Ok(all
            .into_iter()
            .filter(|r| r.vector_run_uid == vector_run_uid)
            .collect())
    }
}

impl LogRepository for SledStore {
    fn insert_log(&self, entry: &LogEntry) -> StoreResult<()> {
        let key = self.next_key()?;
        self.tree(TREE_LOGS)?.insert(key, Self::encode(entry)?)?;
        Ok(())
    }

    fn logs_for_run(&self, run_uid: &str) -> StoreResult<Vec<LogEntry>> {
        let all: Vec<LogEntry> = Self::scan_values(&self.tree(TREE_LOGS)?)?;
        Ok(all.into_iter().filter(|e| e.run_uid == run_uid).collect())
    }

    fn logs_for_project(&self, project_uid: &str, query: &LogQuery) -> StoreResult<LogPage> {
        let all: Vec<LogEntry> = Self::scan_values(&self.tree(TREE_LOGS)?)?;
        Ok(query.page(all.iter().filter(|e| e.project_uid == project_uid)))
    }
}
