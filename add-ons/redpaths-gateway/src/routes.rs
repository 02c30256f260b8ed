//! Module catalogue, graph and run endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use redpaths_core::graph::GraphDirection;
use redpaths_core::model::{
    InheritanceGraph, Module, ModuleOption, ModuleRun, Parameter, VectorRun, SYSTEM_PROJECT,
};
use redpaths_core::{GraphError, RunError, StoreError};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::AppState;

/// JSON error body: `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        warn!(target: "redpaths::gateway", error = %e, "Store error");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
        }
    }
}

impl From<GraphError> for ApiError {
    fn from(e: GraphError) -> Self {
        let message = e.to_string();
        let status = match e {
            GraphError::ModuleNotFound(_) => StatusCode::NOT_FOUND,
            GraphError::Cycle(_) => StatusCode::CONFLICT,
            GraphError::Store(e) => return e.into(),
        };
        Self { status, message }
    }
}

impl From<RunError> for ApiError {
    fn from(e: RunError) -> Self {
        let message = e.to_string();
        let status = match e {
            RunError::Graph(e) => return e.into(),
            RunError::ModuleFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RunError::DuplicateRun(_) => StatusCode::CONFLICT,
            RunError::InvalidRecord(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, message }
    }
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "registry": state.registry.state(),
        "modules": state.registry.modules().len(),
        "pending": state.registry.pending_keys(),
        "activeRuns": state.brokers.len(),
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

pub async fn list_modules(State(state): State<AppState>) -> Result<Json<Vec<Module>>, ApiError> {
    Ok(Json(state.service.modules()?))
}

pub async fn module_graph(State(state): State<AppState>) -> Result<Json<InheritanceGraph>, ApiError> {
    Ok(Json(state.service.inheritance_graph()?))
}

pub async fn get_module(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Module>, ApiError> {
    Ok(Json(state.service.module(&key)?))
}

#[derive(Debug, Deserialize)]
pub struct GraphParams {
    direction: Option<String>,
    depth: Option<usize>,
}

pub async fn module_subgraph(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<GraphParams>,
) -> Result<Json<InheritanceGraph>, ApiError> {
    let direction = match params.direction.as_deref() {
        None | Some("") => GraphDirection::Both,
        Some(raw) => raw.parse::<GraphDirection>().map_err(ApiError::bad_request)?,
    };
    Ok(Json(state.service.subgraph(&key, direction, params.depth)?))
}

pub async fn attack_vector_options(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Vec<ModuleOption>>, ApiError> {
    Ok(Json(state.service.attack_vector_options(&key)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct RunParams {
    #[serde(default)]
    wait: bool,
}

/// Starts an attack vector ending in `key`.
///
/// By default the run is spawned and `202 {"vectorRunId"}` comes back at once, so the caller
/// can open `/sse?runId=` before the first module finishes. `?wait=true` blocks and returns the
/// run report.
pub async fn run_module(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(run): Query<RunParams>,
    Json(params): Json<Parameter>,
) -> Result<Response, ApiError> {
    if !state.service.store().module_exists(&key)? {
        return Err(GraphError::ModuleNotFound(key).into());
    }
    let vector_run_uid = if params.run_id.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        params.run_id.clone()
    };
    if state.service.store().vector_run_exists(&vector_run_uid)? {
        return Err(RunError::DuplicateRun(vector_run_uid).into());
    }

    if run.wait {
        let report = state.runner.run_with_id(vector_run_uid, &key, params).await?;
        return Ok((StatusCode::OK, Json(report)).into_response());
    }

    let runner = state.runner.clone();
    let spawned_id = vector_run_uid.clone();
    tokio::spawn(async move {
        match runner.run_with_id(spawned_id, &key, params).await {
            Ok(report) => {
                info!(target: "redpaths::gateway", vector_run = %report.vector_run_uid, modules = report.executed.len(), "Background run finished")
            }
            Err(e) => warn!(target: "redpaths::gateway", module_key = %key, error = %e, "Background run failed"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "vectorRunId": vector_run_uid,
            "stream": format!("/sse?runId={}", vector_run_uid),
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct ProjectParams {
    project: Option<String>,
}

pub async fn vector_runs(
    State(state): State<AppState>,
    Query(params): Query<ProjectParams>,
) -> Result<Json<Vec<VectorRun>>, ApiError> {
    let project = params
        .project
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| SYSTEM_PROJECT.to_string());
    Ok(Json(state.service.vector_runs(&project)?))
}

pub async fn vector_run_modules(
    State(state): State<AppState>,
    Path(vector_run): Path<String>,
) -> Result<Json<Vec<ModuleRun>>, ApiError> {
    Ok(Json(state.service.module_runs_for_vector(&vector_run)?))
}
