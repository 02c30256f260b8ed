//! RedPaths gateway: composition root and HTTP surface.
//!
//! Startup order: config, module catalogue, store, broker hub, registry (register built-ins,
//! initialize, complete), runner. The HTTP layer only talks to [`AppState`].

mod routes;
mod stream;

use std::sync::Arc;

use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use redpaths_core::{
    AttackVectorRunner, BrokerHub, LogRepository, MemoryStore, ModuleCatalog, ModuleService,
    RedPathsConfig, RedPathsStore, Registry, RegistryError, ServerSettings, ServiceFactory,
    Services, SledStore,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
pub struct AppState {
    pub service: ModuleService,
    pub runner: Arc<AttackVectorRunner>,
    pub brokers: BrokerHub,
    pub registry: Arc<Registry>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        error!(target: "redpaths::gateway", error = %e, "Gateway stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = RedPathsConfig::load()?;
    let catalog = ModuleCatalog::load(&config.modules.catalogue)?;
    info!(
        target: "redpaths::gateway",
        catalogue = %config.modules.catalogue,
        modules = catalog.keys().len(),
        "Module catalogue loaded"
    );

    if config.storage.in_memory {
        warn!(target: "redpaths::gateway", "In-memory storage: run history is lost on exit");
        let state = compose(Arc::new(MemoryStore::new()), &config, catalog)?;
        serve(state, &config.server).await?;
    } else {
        let store = Arc::new(SledStore::open_path(&config.storage.path)?);
        info!(target: "redpaths::gateway", path = %config.storage.path, "Sled store opened");
        let state = compose(Arc::clone(&store), &config, catalog)?;
        serve(state, &config.server).await?;
        store.flush()?;
    }
    info!(target: "redpaths::gateway", "Graceful shutdown complete");
    Ok(())
}

/// Wires the store, broker hub, registry and runner together.
pub fn compose<S>(
    store: Arc<S>,
    config: &RedPathsConfig,
    catalog: ModuleCatalog,
) -> Result<AppState, RegistryError>
where
    S: RedPathsStore + 'static,
{
    let logs: Arc<dyn LogRepository> = store.clone();
    let brokers = BrokerHub::new(config.broker.to_broker_config(), Some(logs));
    let shared: Arc<dyn RedPathsStore> = store.clone();

    let registry = Arc::new(Registry::new(catalog));
    let registered = registry.register_all(redpaths_modules::BUILTIN);
    info!(target: "redpaths::gateway", registered = registered.len(), "Built-in modules registered");

    let factory: ServiceFactory = {
        let store = Arc::clone(&shared);
        let brokers = brokers.clone();
        Arc::new(move || {
            Arc::new(Services {
                store: Arc::clone(&store),
                brokers: brokers.clone(),
            })
        })
    };
    let recommender = registry.initialize(store, factory);
    let report = registry.complete_registration()?;
    info!(
        target: "redpaths::gateway",
        persisted = report.modules_persisted.len(),
        duplicates = report.duplicate_modules.len(),
        edges = report.edges_persisted,
        failures = report.failures.len(),
        "Registration complete"
    );

    let runner = AttackVectorRunner::new(Arc::clone(&shared), registry.clone(), brokers.clone())
        .with_recommender(recommender)
        .with_snapshot_depth(config.runner.snapshot_depth);

    Ok(AppState {
        service: ModuleService::new(shared),
        runner: Arc::new(runner),
        brokers,
        registry,
    })
}

pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/v1/modules", get(routes::list_modules))
        .route("/api/v1/modules/graph", get(routes::module_graph))
        .route("/api/v1/modules/:key", get(routes::get_module))
        .route("/api/v1/modules/:key/graph", get(routes::module_subgraph))
        .route("/api/v1/modules/:key/options", get(routes::attack_vector_options))
        .route("/api/v1/modules/:key/run", post(routes::run_module))
        .route("/api/v1/runs", get(routes::vector_runs))
        .route("/api/v1/runs/:vector_run/modules", get(routes::vector_run_modules))
        .route("/sse", get(stream::sse_handler))
        .route("/trigger", get(stream::trigger))
        .route("/logs", get(stream::logs))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn serve(state: AppState, server: &ServerSettings) -> std::io::Result<()> {
    let brokers = state.brokers.clone();
    let sweeper = brokers.spawn_sweeper();
    let app = build_app(state);

    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(target: "redpaths::gateway", addr = %addr, "RedPaths gateway listening");

    let closing = brokers.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(target: "redpaths::gateway", error = %e, "Ctrl+C handler failed");
            }
            info!(target: "redpaths::gateway", "Shutdown initiated (Ctrl+C received)");
            // Open event streams end once their broker closes.
            closing.shutdown();
        })
        .await?;

    sweeper.abort();
    Ok(())
}
