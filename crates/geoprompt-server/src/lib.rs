//! Geoprompt server
//!
//! Axum app over the backend core. Endpoints:
//! - `POST /invoke` - SSE stream: `append*` (message tokens), one
//!   `plot_data` (map payload), `commit`
//! - `POST /plot` - non-streaming map refresh for pan/zoom
//! - `GET /scenarios` - enabled scenario summaries
//! - `GET /health` - status + cache counters
//! - `GET /telemetry/summary`, `GET /telemetry/slowest`
//!
//! Errors are caught at the orchestration boundary and rendered into the
//! streaming protocol (`append*` + `commit`), never as broken streams.

pub mod api;
pub mod invoke;
pub mod lod_cache;
pub mod pipeline;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/invoke", post(invoke::invoke_handler))
        .route("/plot", post(routes::plot_handler))
        .route("/scenarios", get(routes::scenarios_handler))
        .route("/health", get(routes::health_handler))
        .route("/telemetry/summary", get(routes::telemetry_summary_handler))
        .route("/telemetry/slowest", get(routes::telemetry_slowest_handler))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
