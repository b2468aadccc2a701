//! Non-streaming endpoints

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::api::InvokeRequest;
use crate::pipeline;
use crate::state::AppState;

/// Map refresh for pan/zoom: same pipeline as `/invoke` minus routing and
/// streaming. Client highlights are pinned through the engine so they
/// survive candidate caps.
pub async fn plot_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InvokeRequest>,
) -> Response {
    let result = tokio::task::spawn_blocking(move || {
        let prepared = pipeline::prepare(&state, &req)?;
        let finished = pipeline::finish(&state, &prepared, None, &req, 0.0);
        pipeline::record_telemetry(&state, "/plot", "", &prepared, &finished);
        Ok::<_, anyhow::Error>(finished)
    })
    .await;

    match result {
        Ok(Ok(finished)) => (
            StatusCode::OK,
            [("content-type", "application/json")],
            finished.plot_json,
        )
            .into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "plot pipeline failed");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "plot task panicked");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            )
                .into_response()
        }
    }
}

pub async fn scenarios_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let scenarios: Vec<serde_json::Value> = state
        .registry
        .list()
        .map(|cfg| {
            json!({
                "id": cfg.id,
                "title": cfg.title,
                "defaultView": {
                    "center": {"lat": cfg.default_view.center.lat, "lon": cfg.default_view.center.lon},
                    "zoom": cfg.default_view.zoom,
                },
                "dataSize": cfg.data_size,
                "examplePrompts": cfg.example_prompts,
            })
        })
        .collect();
    Json(json!({
        "scenarios": scenarios,
        "defaultScenarioId": state.registry.default_scenario_id(),
    }))
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "scenarios": state.registry.list().count(),
        "lodCacheSize": state.lod_cache.len(),
        "telemetryEnabled": state.telemetry.is_some(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryQuery {
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub since_ms: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn telemetry_summary_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TelemetryQuery>,
) -> Response {
    let Some(store) = state.telemetry.clone() else {
        return telemetry_disabled();
    };
    let rows = tokio::task::spawn_blocking(move || {
        store.summary(q.engine.as_deref(), q.endpoint.as_deref(), q.since_ms)
    })
    .await;
    match rows {
        Ok(Ok(rows)) => Json(json!({"summary": rows})).into_response(),
        other => telemetry_error(format!("{other:?}")),
    }
}

pub async fn telemetry_slowest_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TelemetryQuery>,
) -> Response {
    let Some(store) = state.telemetry.clone() else {
        return telemetry_disabled();
    };
    let limit = q.limit.unwrap_or(25);
    let rows = tokio::task::spawn_blocking(move || {
        store.slowest(q.engine.as_deref(), q.endpoint.as_deref(), limit)
    })
    .await;
    match rows {
        Ok(Ok(rows)) => Json(json!({"slowest": rows})).into_response(),
        other => telemetry_error(format!("{other:?}")),
    }
}

fn telemetry_disabled() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "telemetry is disabled (set TELEMETRY=1)"})),
    )
        .into_response()
}

fn telemetry_error(detail: String) -> Response {
    error!(detail, "telemetry query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "telemetry query failed"})),
    )
        .into_response()
}
