//! Integration test: two-phase plugin registration.
//!
//! ## Scenarios
//! 1. Completing before initialization is rejected.
//! 2. Modules registered before initialization are persisted with their edges on completion.
//! 3. Completing twice with nothing pending is rejected; initializing twice is a no-op.
//! 4. Late registrations get services immediately and persist on the next completion.
//! 5. A module missing from the catalogue is skipped without affecting the others.
//! 6. A module already in storage is reported as duplicate, not as a failure.
//! 7. Registrations racing from several threads all land in the pending buffer.

mod common;

use std::sync::{Arc, Mutex};

use common::{catalog, hub, service_factory, FakeModule};
use redpaths_core::model::{ModuleDependency, ModuleType};
use redpaths_core::{
    MemoryStore, ModuleConstructor, ModuleRepository, RedPathsModule, Registry, RegistryError,
    RegistryState,
};

fn calls() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn initialized(registry: &Registry) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let brokers = hub(&store);
    registry.initialize(store.clone(), service_factory(store.clone(), brokers));
    store
}

// ===========================================================================
// 1. Lifecycle errors
// ===========================================================================

#[tokio::test]
async fn test_complete_before_initialize_is_rejected() {
    let registry = Registry::new(catalog());
    registry
        .register_plugin(Arc::new(FakeModule::new("A", calls())))
        .unwrap();
    assert_eq!(registry.state(), RegistryState::Uninitialized);
    assert!(matches!(
        registry.complete_registration(),
        Err(RegistryError::NotInitialized)
    ));
    assert_eq!(registry.pending_keys(), vec!["A"], "pending buffer kept for later");
}

// ===========================================================================
// 2. Deferred persistence
// ===========================================================================

#[tokio::test]
async fn test_pending_modules_persist_on_completion() {
    let registry = Registry::new(catalog());
    let a = Arc::new(FakeModule::new("A", calls()));
    let b = Arc::new(FakeModule::new("B", calls()));
    registry.register_plugin(a.clone()).unwrap();
    registry.register_plugin(b.clone()).unwrap();
    assert_eq!(a.services_received(), 0, "no services before initialization");

    let store = initialized(&registry);
    assert_eq!(registry.state(), RegistryState::Accepting);
    assert!(!store.module_exists("A").unwrap(), "nothing persisted before completion");

    let report = registry.complete_registration().unwrap();
    assert_eq!(registry.state(), RegistryState::Ready);
    assert_eq!(report.modules_persisted, vec!["A", "B"]);
    assert_eq!(report.edges_persisted, 1);
    assert_eq!(report.recommender_registered, 2);
    assert!(report.failures.is_empty());
    assert_eq!(a.services_received(), 1);
    assert_eq!(b.services_received(), 1);

    let stored = store.get_module("B").unwrap().unwrap();
    assert_eq!(stored.module_type, ModuleType::Enumeration);
    assert_eq!(stored.name, "Bravo");
    assert_eq!(stored.category, "fake", "implementation metadata merged");
    assert_eq!(stored.options.len(), 1);
    assert!(store
        .dependency_exists(&ModuleDependency::new("A", "B"))
        .unwrap());
    assert!(registry.pending_keys().is_empty());
}

// ===========================================================================
// 3. Idempotence
// ===========================================================================

#[tokio::test]
async fn test_second_completion_and_initialization() {
    let registry = Registry::new(catalog());
    registry
        .register_plugin(Arc::new(FakeModule::new("A", calls())))
        .unwrap();
    let store = Arc::new(MemoryStore::new());
    let brokers = hub(&store);
    let first = registry.initialize(store.clone(), service_factory(store.clone(), brokers.clone()));
    let second = registry.initialize(store.clone(), service_factory(store.clone(), brokers));
    assert!(Arc::ptr_eq(&first, &second), "second initialize returns the existing engine");

    registry.complete_registration().unwrap();
    assert!(matches!(
        registry.complete_registration(),
        Err(RegistryError::AlreadyCompleted)
    ));
    assert_eq!(registry.state(), RegistryState::Ready);
}

// ===========================================================================
// 4. Late registration
// ===========================================================================

#[tokio::test]
async fn test_late_registration_after_ready() {
    let registry = Registry::new(catalog());
    registry
        .register_plugin(Arc::new(FakeModule::new("A", calls())))
        .unwrap();
    let store = initialized(&registry);
    registry.complete_registration().unwrap();

    let late = Arc::new(FakeModule::new("B", calls()));
    registry.register_plugin(late.clone()).unwrap();
    assert_eq!(late.services_received(), 1, "services injected on registration");
    assert_eq!(registry.pending_keys(), vec!["B"]);

    let report = registry.complete_registration().unwrap();
    assert_eq!(report.modules_persisted, vec!["B"]);
    assert!(report.duplicate_modules.is_empty(), "A was not re-persisted");
    assert!(store.module_exists("B").unwrap());
    assert_eq!(registry.state(), RegistryState::Ready);
}

// ===========================================================================
// 5. Missing configuration
// ===========================================================================

fn fake_a() -> Arc<dyn RedPathsModule> {
    Arc::new(FakeModule::new("A", Arc::new(Mutex::new(Vec::new()))))
}

fn fake_unknown() -> Arc<dyn RedPathsModule> {
    Arc::new(FakeModule::new("Kerberoast", Arc::new(Mutex::new(Vec::new()))))
}

#[tokio::test]
async fn test_unconfigured_module_is_skipped() {
    let registry = Registry::new(catalog());
    let constructors: Vec<ModuleConstructor> = vec![fake_unknown, fake_a];
    let registered = registry.register_all(&constructors);
    assert_eq!(registered, vec!["A"]);
    assert!(registry.module("Kerberoast").is_none());
    assert!(matches!(
        registry.register_plugin(fake_unknown()),
        Err(RegistryError::Config(_))
    ));
}

// ===========================================================================
// 6. Already persisted
// ===========================================================================

#[tokio::test]
async fn test_existing_module_is_benign_duplicate() {
    let registry = Registry::new(catalog());
    registry
        .register_plugin(Arc::new(FakeModule::new("A", calls())))
        .unwrap();
    let store = initialized(&registry);
    let (existing, _) = catalog().module_from_config("A").unwrap();
    store.insert_module(&existing).unwrap();

    let report = registry.complete_registration().unwrap();
    assert_eq!(report.duplicate_modules, vec!["A"]);
    assert!(report.modules_persisted.is_empty());
    assert!(report.failures.is_empty());
    assert_eq!(registry.state(), RegistryState::Ready);
}

// ===========================================================================
// 7. Concurrent self-registration
// ===========================================================================

#[test]
fn test_concurrent_registration_keeps_every_module() {
    let registry = Arc::new(Registry::new(catalog()));
    let handles: Vec<_> = ["A", "B", "C", "D"]
        .into_iter()
        .map(|key| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..25 {
                    registry
                        .register_plugin(Arc::new(FakeModule::new(key, calls())))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registry.pending_keys(), vec!["A", "B", "C", "D"]);
    assert_eq!(registry.modules().len(), 4);
    assert_eq!(registry.state(), RegistryState::Uninitialized);
}
