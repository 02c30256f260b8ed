//! Integration test: attack vector execution.
//!
//! ## Scenarios
//! 1. A successful run executes ancestors first, records one module run per module and emits
//!    a recommendation for the downstream module.
//! 2. A failing middle module aborts the run; later modules never execute.
//! 3. Recorded parameters are limited to the options each module declares.
//! 4. An unknown target fails before anything runs.
//! 5. A stream subscribed before the run still records entries under the run's project.
//! 6. A reused vector run id is rejected without touching the earlier run.
//! 7. A failing graph snapshot is reported on the run's stream.

mod common;

use std::sync::{Arc, Mutex};

use common::{catalog, hub, service_factory, FakeModule};
use redpaths_core::model::{
    EventType, InputValue, LogEntry, LogLevel, LogPage, LogQuery, Module, ModuleDependency,
    ModuleRun, Parameter, Target, VectorRun,
};
use redpaths_core::{
    AttackVectorRunner, BrokerHub, EdgeDirection, EdgeSource, GraphError, LogRepository,
    MemoryStore, ModuleRepository, Registry, RunError, RunPhase, RunRepository, StoreError,
    StoreResult,
};

struct Harness {
    store: Arc<MemoryStore>,
    runner: AttackVectorRunner,
    calls: Arc<Mutex<Vec<String>>>,
    registry: Arc<Registry>,
    brokers: BrokerHub,
}

fn harness(failing: &[&str]) -> Harness {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::new(Registry::new(catalog()));
    for key in ["A", "B", "C", "D"] {
        let module = FakeModule::new(key, calls.clone());
        let module = if failing.contains(&key) { module.failing() } else { module };
        registry.register_plugin(Arc::new(module)).unwrap();
    }

    let store = Arc::new(MemoryStore::new());
    let brokers = hub(&store);
    let recommender = registry.initialize(store.clone(), service_factory(store.clone(), brokers.clone()));
    registry.complete_registration().unwrap();

    let runner = AttackVectorRunner::new(store.clone(), registry.clone(), brokers.clone())
        .with_recommender(recommender);
    Harness {
        store,
        runner,
        calls,
        registry,
        brokers,
    }
}

fn params() -> Parameter {
    Parameter::new("proj-1")
        .with_input(
            "domain",
            InputValue::TextInput {
                value: "corp.local".into(),
            },
        )
        .with_input(
            "range",
            InputValue::TextInput {
                value: "10.0.0.0/24".into(),
            },
        )
        .with_input(
            "hosts",
            InputValue::TargetInput {
                value: vec![Target {
                    ip: "10.0.0.5".into(),
                    ..Default::default()
                }],
            },
        )
}

// ===========================================================================
// 1. Happy path
// ===========================================================================

#[tokio::test]
async fn test_successful_vector_runs_in_dependency_order() {
    let h = harness(&[]);
    let report = h.runner.run("C", params()).await.unwrap();

    assert_eq!(report.chain, vec!["A", "B", "C"]);
    assert_eq!(report.phase, RunPhase::Done);
    assert_eq!(*h.calls.lock().unwrap(), vec!["A", "B", "C"]);
    assert!(report.executed.iter().all(|e| e.success));

    let runs = h.store.module_runs_for_vector(&report.vector_run_uid).unwrap();
    let keys: Vec<&str> = runs.iter().map(|r| r.module_key.as_str()).collect();
    assert_eq!(keys, vec!["A", "B", "C"], "module runs recorded in execution order");
    assert!(runs.iter().all(|r| r.was_successful));
    assert!(runs.iter().all(|r| r.project_uid == "proj-1"));
    assert_eq!(runs[0].targets.len(), 1);

    let vector_runs = h.store.vector_runs("proj-1").unwrap();
    assert_eq!(vector_runs.len(), 1);
    assert_eq!(vector_runs[0].target_module, "C");
    assert!(
        vector_runs[0].graph.edges.iter().any(|e| e.next_module == "D"),
        "snapshot holds the downstream neighborhood"
    );

    let recommendation = report.recommendation.expect("downstream module recommended");
    assert_eq!(recommendation.module_key, "D");

    let broker = h.runner.brokers().get(&report.vector_run_uid).unwrap();
    let entries = broker.entries();
    assert!(entries
        .iter()
        .any(|e| e.event_type == Some(EventType::Recommendation)));
    let started: Vec<&str> = entries
        .iter()
        .filter(|e| e.event_type == Some(EventType::ModuleStart))
        .filter_map(|e| e.module_key.as_deref())
        .collect();
    assert_eq!(started, vec!["A", "B", "C"]);
}

// ===========================================================================
// 2. Abort on failure
// ===========================================================================

#[tokio::test]
async fn test_failure_aborts_remaining_modules() {
    let h = harness(&["B"]);
    let err = h.runner.run("C", params()).await.unwrap_err();

    let vector_run_uid = match err {
        RunError::ModuleFailed {
            ref module_key,
            ref vector_run_uid,
            ..
        } => {
            assert_eq!(module_key, "B");
            vector_run_uid.clone()
        }
        other => panic!("expected ModuleFailed, got {other:?}"),
    };
    assert_eq!(*h.calls.lock().unwrap(), vec!["A", "B"], "C never invoked");

    let runs = h.store.module_runs_for_vector(&vector_run_uid).unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs[0].was_successful);
    assert!(!runs[1].was_successful);

    let broker = h.runner.brokers().get(&vector_run_uid).unwrap();
    let errors: Vec<_> = broker
        .entries()
        .into_iter()
        .filter(|e| e.event_type == Some(EventType::ModuleError))
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].severity(), LogLevel::Error);
    assert_eq!(errors[0].module_key.as_deref(), Some("B"));
}

// ===========================================================================
// 3. Recorded parameters
// ===========================================================================

#[tokio::test]
async fn test_module_runs_record_declared_options_only() {
    let h = harness(&[]);
    let report = h.runner.run("B", params()).await.unwrap();
    let runs = h.store.module_runs_for_vector(&report.vector_run_uid).unwrap();

    let a = &runs[0];
    assert_eq!(a.module_key, "A");
    assert!(a.parameters.contains_key("domain"));
    assert!(!a.parameters.contains_key("range"));

    let b = &runs[1];
    assert!(b.parameters.contains_key("range"));
    assert!(!b.parameters.contains_key("domain"));
}

// ===========================================================================
// 4. Unknown target
// ===========================================================================

#[tokio::test]
async fn test_unknown_target_is_rejected() {
    let h = harness(&[]);
    let err = h.runner.run("Zulu", params()).await.unwrap_err();
    assert!(matches!(err, RunError::Graph(GraphError::ModuleNotFound(_))));
    assert!(h.calls.lock().unwrap().is_empty());
    assert!(h.store.vector_runs("proj-1").unwrap().is_empty());
}

// ===========================================================================
// 5. Stream opened before the run
// ===========================================================================

#[tokio::test]
async fn test_early_subscriber_keeps_run_project() {
    let h = harness(&[]);
    let mut sub = h.brokers.broker("run-x", "").register_client(LogLevel::Info);

    h.runner
        .run_with_id("run-x".to_string(), "B", params())
        .await
        .unwrap();

    let persisted = h.store.logs_for_run("run-x").unwrap();
    assert!(!persisted.is_empty());
    assert!(
        persisted.iter().all(|e| e.project_uid == "proj-1"),
        "entries belong to the run's project, not the default one"
    );
    let page = h.store.logs_for_project("proj-1", &LogQuery::default()).unwrap();
    assert_eq!(page.total, persisted.len());

    let first = sub.recv().await.unwrap();
    assert_eq!(first.project_uid, "proj-1");
}

// ===========================================================================
// 6. Reused run id
// ===========================================================================

#[tokio::test]
async fn test_reused_run_id_is_rejected() {
    let h = harness(&[]);
    h.runner
        .run_with_id("run-fixed".to_string(), "B", params())
        .await
        .unwrap();

    let err = h
        .runner
        .run_with_id("run-fixed".to_string(), "C", params())
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::DuplicateRun(ref id) if id == "run-fixed"));

    assert_eq!(*h.calls.lock().unwrap(), vec!["A", "B"], "second run never executes");
    assert_eq!(h.store.vector_runs("proj-1").unwrap().len(), 1);
    let keys: Vec<String> = h
        .store
        .module_runs_for_vector("run-fixed")
        .unwrap()
        .into_iter()
        .map(|r| r.module_key)
        .collect();
    assert_eq!(keys, vec!["A", "B"]);
}

// ===========================================================================
// 7. Snapshot failure
// ===========================================================================

/// Delegates to a populated store but cannot read edges.
struct EdgelessStore(Arc<MemoryStore>);

impl EdgeSource for EdgelessStore {
    fn fetch_edges(&self, _direction: EdgeDirection, _key: &str) -> StoreResult<Vec<ModuleDependency>> {
        Err(StoreError::Poisoned)
    }
}

impl ModuleRepository for EdgelessStore {
    fn insert_module(&self, module: &Module) -> StoreResult<()> {
        self.0.insert_module(module)
    }
    fn module_exists(&self, key: &str) -> StoreResult<bool> {
        self.0.module_exists(key)
    }
    fn get_module(&self, key: &str) -> StoreResult<Option<Module>> {
        self.0.get_module(key)
    }
    fn modules_by_keys(&self, keys: &[String]) -> StoreResult<Vec<Module>> {
        self.0.modules_by_keys(keys)
    }
    fn all_modules(&self) -> StoreResult<Vec<Module>> {
        self.0.all_modules()
    }
    fn dependency_exists(&self, edge: &ModuleDependency) -> StoreResult<bool> {
        self.0.dependency_exists(edge)
    }
    fn insert_dependency(&self, edge: &ModuleDependency) -> StoreResult<()> {
        self.0.insert_dependency(edge)
    }
    fn all_dependencies(&self) -> StoreResult<Vec<ModuleDependency>> {
        self.0.all_dependencies()
    }
}

impl RunRepository for EdgelessStore {
    fn insert_vector_run(&self, run: &VectorRun) -> StoreResult<()> {
        self.0.insert_vector_run(run)
    }
    fn vector_run_exists(&self, run_uid: &str) -> StoreResult<bool> {
        self.0.vector_run_exists(run_uid)
    }
    fn vector_runs(&self, project_uid: &str) -> StoreResult<Vec<VectorRun>> {
        self.0.vector_runs(project_uid)
    }
    fn insert_module_run(&self, run: &ModuleRun) -> StoreResult<()> {
        self.0.insert_module_run(run)
    }
    fn module_runs(&self, project_uid: &str) -> StoreResult<Vec<ModuleRun>> {
        self.0.module_runs(project_uid)
    }
    fn module_runs_for_vector(&self, vector_run_uid: &str) -> StoreResult<Vec<ModuleRun>> {
        self.0.module_runs_for_vector(vector_run_uid)
    }
}

impl LogRepository for EdgelessStore {
    fn insert_log(&self, entry: &LogEntry) -> StoreResult<()> {
        self.0.insert_log(entry)
    }
    fn logs_for_run(&self, run_uid: &str) -> StoreResult<Vec<LogEntry>> {
        self.0.logs_for_run(run_uid)
    }
    fn logs_for_project(&self, project_uid: &str, query: &LogQuery) -> StoreResult<LogPage> {
        self.0.logs_for_project(project_uid, query)
    }
}

#[tokio::test]
async fn test_snapshot_failure_is_reported_on_stream() {
    let h = harness(&[]);
    let runner = AttackVectorRunner::new(
        Arc::new(EdgelessStore(h.store.clone())),
        h.registry.clone(),
        h.brokers.clone(),
    );

    let err = runner
        .run_with_id("run-broken".to_string(), "B", params())
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Graph(GraphError::Store(_))));
    assert!(h.calls.lock().unwrap().is_empty());
    assert!(h.store.vector_runs("proj-1").unwrap().is_empty());

    let entries = h.brokers.get("run-broken").unwrap().entries();
    assert!(entries
        .iter()
        .any(|e| e.level == Some(LogLevel::Error) && e.message.contains("snapshot")));
    assert!(entries
        .iter()
        .any(|e| e.event_type == Some(EventType::ScanError)));
}
