//! Live run stream, test trigger and log queries.

use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
    Json,
};
use futures_util::{Stream, StreamExt};
use redpaths_core::frame_stream;
use redpaths_core::model::{EventType, LogLevel, LogPage, LogQuery};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::routes::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamParams {
    run_id: Option<String>,
    level: Option<String>,
}

fn parse_level(raw: Option<&str>) -> Result<Option<LogLevel>, ApiError> {
    match raw {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse::<LogLevel>().map(Some).map_err(ApiError::bad_request),
    }
}

/// `GET /sse?runId=&level=`: backlog then live entries for one run, INFO and up by default.
pub async fn sse_handler(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static>, ApiError> {
    let min_level = parse_level(params.level.as_deref())?.unwrap_or(LogLevel::Info);
    let broker = state
        .brokers
        .broker(params.run_id.as_deref().unwrap_or_default(), "");
    let subscription = broker.register_client(min_level);
    info!(
        target: "redpaths::gateway",
        run_id = %broker.run_id(),
        client_id = subscription.id(),
        min_level = %min_level,
        "Stream client connected"
    );

    let frames = frame_stream(
        subscription,
        broker.run_id().to_string(),
        state.brokers.config().heartbeat_interval,
    );
    let events = frames.map(|frame| {
        Ok::<Event, Infallible>(Event::default().event(frame.event).data(frame.data.to_string()))
    });
    Ok(Sse::new(events))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerParams {
    #[serde(rename = "type")]
    kind: Option<String>,
    msg: Option<String>,
    run_id: Option<String>,
}

/// `GET /trigger?type=&msg=&runId=`: a level name logs at that level, anything else emits an
/// event with that tag.
pub async fn trigger(
    State(state): State<AppState>,
    Query(params): Query<TriggerParams>,
) -> Json<Value> {
    let kind = params.kind.filter(|k| !k.is_empty()).unwrap_or_else(|| "info".into());
    let message = params.msg.unwrap_or_else(|| "Test event".into());
    let logger = state
        .brokers
        .logger(params.run_id.as_deref().unwrap_or_default(), "");

    let entry = match kind.parse::<LogLevel>() {
        Ok(level) => logger.log(level, message, None),
        Err(_) => logger.event(
            EventType::from(kind.as_str()),
            json!({ "message": message, "source": "trigger" }),
        ),
    };
    debug!(target: "redpaths::gateway", run_id = %entry.run_uid, id = entry.id, "Triggered entry");
    Json(json!({ "status": "ok", "entry": entry }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogParams {
    run_id: Option<String>,
    project: Option<String>,
    level: Option<String>,
    module: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

/// `GET /logs`: filtered page of one run's entries, or of a project's persisted entries.
///
/// A run with a live broker answers from memory; otherwise the store is consulted.
pub async fn logs(
    State(state): State<AppState>,
    Query(params): Query<LogParams>,
) -> Result<Json<LogPage>, ApiError> {
    let query = LogQuery {
        min_level: parse_level(params.level.as_deref())?,
        module_key: params.module.filter(|m| !m.is_empty()),
        event_type: params.kind.filter(|k| !k.is_empty()),
        limit: params.limit,
        offset: params.offset.unwrap_or(0),
    };
    let store = state.service.store();

    match (params.run_id.filter(|r| !r.is_empty()), params.project.filter(|p| !p.is_empty())) {
        (Some(run_id), _) => match state.brokers.get(&run_id) {
            Some(broker) => Ok(Json(broker.query(&query))),
            None => {
                let persisted = store.logs_for_run(&run_id)?;
                Ok(Json(query.page(persisted.iter())))
            }
        },
        (None, Some(project)) => Ok(Json(store.logs_for_project(&project, &query)?)),
        (None, None) => {
            let broker = state.brokers.broker("", "");
            Ok(Json(broker.query(&query)))
        }
    }
}
