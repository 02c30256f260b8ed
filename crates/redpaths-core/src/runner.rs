//! Attack vector runner.
//!
//! One invocation walks `Start -> ResolveChain -> ExecuteModule* -> Recommend -> Done` and
//! ends in `Failed` as soon as a module errors. Modules run strictly one after another on the
//! caller's task. Every executed module leaves exactly one `ModuleRun`, written in execution
//! order. Audit writes that fail are logged and do not stop the run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::broker::{BrokerHub, RunLogger};
use crate::error::{GraphError, RunError, RunResult, StoreError};
use crate::graph::{self, GraphDirection};
use crate::model::{EventType, InputValue, Module, ModuleRun, Parameter, VectorRun, SYSTEM_PROJECT};
use crate::recommend::{Recommendation, RecommendationEngine};
use crate::registry::ModuleExecutor;
use crate::store::RedPathsStore;

pub const DEFAULT_SNAPSHOT_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Start,
    ResolveChain,
    ExecuteModule,
    Recommend,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleExecution {
    pub module_key: String,
    pub run_uid: String,
    pub elapsed_ms: u64,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorRunReport {
    pub vector_run_uid: String,
    pub project_uid: String,
    pub target_module: String,
    pub chain: Vec<String>,
    pub executed: Vec<ModuleExecution>,
    pub recommendation: Option<Recommendation>,
    pub phase: RunPhase,
}

pub struct AttackVectorRunner {
    store: Arc<dyn RedPathsStore>,
    executor: Arc<dyn ModuleExecutor>,
    brokers: BrokerHub,
    recommender: Option<Arc<RecommendationEngine>>,
    snapshot_depth: usize,
}

impl AttackVectorRunner {
    pub fn new(store: Arc<dyn RedPathsStore>, executor: Arc<dyn ModuleExecutor>, brokers: BrokerHub) -> Self {
        Self {
            store,
            executor,
            brokers,
            recommender: None,
            snapshot_depth: DEFAULT_SNAPSHOT_DEPTH,
        }
    }

    pub fn with_recommender(mut self, recommender: Arc<RecommendationEngine>) -> Self {
        self.recommender = Some(recommender);
        self
    }

    pub fn with_snapshot_depth(mut self, depth: usize) -> Self {
        self.snapshot_depth = depth;
        self
    }

    pub fn brokers(&self) -> &BrokerHub {
        &self.brokers
    }

    /// Runs `ancestors ++ [target_key]` with the shared `params` under a fresh vector run id.
    pub async fn run(&self, target_key: &str, params: Parameter) -> RunResult<VectorRunReport> {
        let vector_run_uid = uuid::Uuid::new_v4().to_string();
        self.run_with_id(vector_run_uid, target_key, params).await
    }

    /// Same as [`run`](Self::run) with a caller-chosen id, so a stream can subscribe before
    /// the first entry is emitted.
    #[instrument(skip(self, params), fields(module_key = %target_key), target = "redpaths::runner")]
    pub async fn run_with_id(
        &self,
        vector_run_uid: String,
        target_key: &str,
        mut params: Parameter,
    ) -> RunResult<VectorRunReport> {
        // Start
        let mut phase = RunPhase::Start;
        let vector_run_uid = if vector_run_uid.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            vector_run_uid
        };
        if params.project_uid.is_empty() {
            params.project_uid = SYSTEM_PROJECT.to_string();
        }
        params.run_id = vector_run_uid.clone();
        let project_uid = params.project_uid.clone();

        if self.store.get_module(target_key).map_err(GraphError::from)?.is_none() {
            return Err(GraphError::ModuleNotFound(target_key.to_string()).into());
        }
        // Checked before touching the broker so a reused id never writes into the old run.
        if self.store.vector_run_exists(&vector_run_uid).map_err(GraphError::from)? {
            warn!(target: "redpaths::runner", vector_run = %vector_run_uid, "Vector run id already used");
            return Err(RunError::DuplicateRun(vector_run_uid));
        }

        let logger = self.brokers.logger(&vector_run_uid, &project_uid);
        let snapshot = match graph::inheritance_subgraph(
            self.store.as_ref(),
            target_key,
            GraphDirection::Downstream,
            Some(self.snapshot_depth),
        ) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                logger.error(format!("Failed to snapshot the graph below {}: {}", target_key, e));
                logger.event(EventType::ScanError, json!({ "error": e.to_string() }));
                return Err(e.into());
            }
        };
        self.record_vector_run(&vector_run_uid, &project_uid, target_key, snapshot)?;
        logger.event(
            EventType::ScanStart,
            json!({ "vectorRunId": vector_run_uid, "target": target_key }),
        );

        // ResolveChain
        phase = advance(phase, RunPhase::ResolveChain, &vector_run_uid);
        let mut chain = match graph::ordered_dependencies(self.store.as_ref(), target_key) {
            Ok(ancestors) => ancestors,
            Err(e) => {
                logger.error(format!("Failed to resolve attack vector for {}: {}", target_key, e));
                logger.event(EventType::ScanError, json!({ "error": e.to_string() }));
                return Err(e.into());
            }
        };
        chain.push(target_key.to_string());
        let descriptors: HashMap<String, Module> = self
            .store
            .modules_by_keys(&chain)
            .unwrap_or_else(|e| {
                warn!(target: "redpaths::runner", error = %e, "Could not load module descriptors, recording all inputs");
                Vec::new()
            })
            .into_iter()
            .map(|m| (m.key.clone(), m))
            .collect();
        logger.info(format!("Resolved attack vector: {}", chain.join(" -> ")));

        // ExecuteModule*
        phase = advance(phase, RunPhase::ExecuteModule, &vector_run_uid);
        let total = chain.len();
        let mut executed = Vec::with_capacity(total);
        for (index, key) in chain.iter().enumerate() {
            let module_logger = logger.for_module(key.as_str());
            module_logger.info(format!("Executing module {}/{}: {}", index + 1, total, key));
            module_logger.event(
                EventType::ModuleStart,
                json!({ "moduleKey": key, "position": index + 1, "total": total }),
            );

            let started = Instant::now();
            let result = self.executor.execute_module(key, &params, &module_logger).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let run_uid = uuid::Uuid::new_v4().to_string();
            self.record_module_run(
                &run_uid,
                key,
                &vector_run_uid,
                &params,
                descriptors.get(key),
                result.is_ok(),
            );
            executed.push(ModuleExecution {
                module_key: key.clone(),
                run_uid,
                elapsed_ms,
                success: result.is_ok(),
            });

            if let Err(source) = result {
                advance(phase, RunPhase::Failed, &vector_run_uid);
                module_logger.error(format!("Module {} failed: {}", key, source));
                module_logger.event(
                    EventType::ModuleError,
                    json!({ "moduleKey": key, "error": source.to_string(), "executionTimeMs": elapsed_ms }),
                );
                return Err(RunError::ModuleFailed {
                    module_key: key.clone(),
                    vector_run_uid,
                    source,
                });
            }

            module_logger.event(
                EventType::ModuleComplete,
                json!({ "moduleKey": key, "executionTimeMs": elapsed_ms }),
            );
        }

        // Recommend
        phase = advance(phase, RunPhase::Recommend, &vector_run_uid);
        let recommendation = self.recommend(&logger, &chain);

        phase = advance(phase, RunPhase::Done, &vector_run_uid);
        logger.event(
            EventType::ScanComplete,
            json!({ "vectorRunId": vector_run_uid, "modules": total }),
        );
        info!(target: "redpaths::runner", vector_run = %vector_run_uid, module_key = %target_key, modules = total, "Attack vector completed");

        Ok(VectorRunReport {
            vector_run_uid,
            project_uid,
            target_module: target_key.to_string(),
            chain,
            executed,
            recommendation,
            phase,
        })
    }

    fn recommend(&self, logger: &RunLogger, chain: &[String]) -> Option<Recommendation> {
        let engine = self.recommender.as_ref()?;
        let last = chain.last()?;
        let recommendation = engine.calculate(last, chain)?;
        logger.event(
            EventType::Recommendation,
            json!({
                "moduleKey": recommendation.module_key,
                "after": last,
                "score": recommendation.score,
                "reasons": recommendation.reasons,
            }),
        );
        Some(recommendation)
    }

    /// Only a uid collision stops the run; any other write failure is logged.
    fn record_vector_run(
        &self,
        vector_run_uid: &str,
        project_uid: &str,
        target_key: &str,
        snapshot: crate::model::InheritanceGraph,
    ) -> RunResult<()> {
        let run = VectorRun::builder()
            .run_uid(vector_run_uid)
            .project_uid(project_uid)
            .target_module(target_key)
            .graph(snapshot)
            .build();
        let outcome = match run {
            Ok(run) => self.store.insert_vector_run(&run).map_err(|e| match e {
                StoreError::Duplicate { .. } => RunError::DuplicateRun(vector_run_uid.to_string()),
                other => RunError::InvalidRecord(other.to_string()),
            }),
            Err(e) => Err(e),
        };
        match outcome {
            Err(RunError::DuplicateRun(uid)) => {
                warn!(target: "redpaths::runner", vector_run = %uid, "Vector run id already used");
                Err(RunError::DuplicateRun(uid))
            }
            Err(e) => {
                error!(target: "redpaths::runner", vector_run = %vector_run_uid, error = %e, "Failed to record vector run");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    fn record_module_run(
        &self,
        run_uid: &str,
        key: &str,
        vector_run_uid: &str,
        params: &Parameter,
        descriptor: Option<&Module>,
        success: bool,
    ) {
        let run = ModuleRun::builder()
            .module_key(key)
            .run_uid(run_uid)
            .vector_run_uid(vector_run_uid)
            .project_uid(params.project_uid.clone())
            .successful(success)
            .targets(params.all_targets())
            .parameters(option_values(params, descriptor))
            .build();
        let outcome = run.map_err(|e| e.to_string()).and_then(|run| {
            self.store
                .insert_module_run(&run)
                .map_err(|e| e.to_string())
        });
        if let Err(e) = outcome {
            error!(target: "redpaths::runner", module_key = %key, vector_run = %vector_run_uid, error = %e, "Failed to record module run");
        }
    }
}

/// Inputs matching the module's declared options; all inputs when nothing is declared.
fn option_values(params: &Parameter, descriptor: Option<&Module>) -> HashMap<String, InputValue> {
    let declared: Option<HashSet<&str>> = descriptor
        .filter(|m| !m.options.is_empty())
        .map(|m| m.options.iter().map(|o| o.key.as_str()).collect());
    params
        .inputs
        .iter()
        .filter(|(k, _)| declared.as_ref().map_or(true, |d| d.contains(k.as_str())))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn advance(from: RunPhase, to: RunPhase, vector_run_uid: &str) -> RunPhase {
    debug!(target: "redpaths::runner", vector_run = %vector_run_uid, from = ?from, to = ?to, "Phase transition");
    to
}
