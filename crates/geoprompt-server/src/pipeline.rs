//! Request orchestration
//!
//! The per-request pipeline shared by `/invoke` and `/plot`:
//! engine -> (router) -> LOD cache -> plot build -> serialize, with timing
//! capture at each stage. `/invoke` interleaves message streaming between
//! routing and LOD, so the pipeline is split into three phases.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use geoprompt_agent::{build_road_type_highlights, normalize_road_types, route_prompt, AgentResponse};
use geoprompt_agent::roads::ROAD_HIGHLIGHT_MAX_VERTICES;
use geoprompt_core::{GeometryKind, Highlight, LayerBundle};
use geoprompt_engine::{EngineResult, LayerEngine, MapContext, PinSets};
use geoprompt_lod::{KeepSets, LodBudgets};
use geoprompt_plot::{build_map_plot, PlotOptions};
use geoprompt_scenarios::ScenarioConfig;
use geoprompt_telemetry::TelemetryEvent;

use crate::api::InvokeRequest;
use crate::state::AppState;

/// Phase A output: scenario + engine resolved, AOI bundle fetched.
pub struct Prepared {
    pub scenario: ScenarioConfig,
    pub engine_name: &'static str,
    pub ctx: MapContext,
    pub result: EngineResult,
    pub engine_get_ms: f64,
}

pub fn prepare(state: &AppState, req: &InvokeRequest) -> Result<Prepared, anyhow::Error> {
    let scenario = state.registry.get(req.scenario_id.as_deref()).config.clone();
    let engine: Arc<dyn LayerEngine> = state.engine_for(&scenario, req.engine.as_deref());
    let engine_name = engine.name();

    let ctx = MapContext {
        scenario_id: scenario.id.clone(),
        aoi: req.map.bbox.normalized(),
        view_center: (req.map.view.center.lat, req.map.view.center.lon),
        view_zoom: req.map.view.zoom,
        viewport: req.map.viewport.map(|v| (v.width, v.height)),
    };

    // Client-pinned highlights must survive GeoParquet candidate caps.
    let mut pins = PinSets::new();
    for h in req.client_highlights() {
        pins.entry(h.layer_id.clone())
            .or_insert_with(BTreeSet::new)
            .extend(h.feature_ids.iter().cloned());
    }

    let t0 = Instant::now();
    let result = if pins.is_empty() {
        engine.get(&ctx)?
    } else {
        engine.get_with_pins(&ctx, &pins)?
    };
    let engine_get_ms = t0.elapsed().as_secs_f64() * 1000.0;

    Ok(Prepared {
        scenario,
        engine_name,
        ctx,
        result,
        engine_get_ms,
    })
}

/// Phase B (`/invoke` only): route the prompt on the AOI-sliced bundle.
pub fn route(prepared: &Prepared, prompt: &str) -> (AgentResponse, f64) {
    let t0 = Instant::now();
    let response = route_prompt(
        prompt,
        &prepared.result.layers,
        &prepared.result.index,
        &prepared.ctx.aoi,
        &prepared.scenario.routing,
        Some(prepared.ctx.view_center),
    );
    (response, t0.elapsed().as_secs_f64() * 1000.0)
}

/// Phase C output: the serialized payload plus the telemetry stats that
/// include what the payload deliberately omits (timings, byte size).
pub struct Finished {
    pub plot_json: String,
    pub highlight_requested: u64,
    pub highlight_rendered: u64,
    pub stats_for_telemetry: Value,
}

pub fn finish(
    state: &AppState,
    prepared: &Prepared,
    response: Option<&AgentResponse>,
    req: &InvokeRequest,
    route_ms: f64,
) -> Finished {
    let scenario = &prepared.scenario;
    let cluster_layer_id = scenario.plot.highlight_layer_id.as_str();

    // Highlights: agent overlays win for /invoke; client pins for /plot.
    let mut highlights: Vec<Highlight> = match response {
        Some(r) => r.highlights.clone(),
        None => req.client_highlights(),
    };

    // Road-type filter overlays (map refresh path).
    let road_filter_status = req.road_types.as_ref().map(|raw| {
        let selected = normalize_road_types(raw);
        let roads_layer = roads_layer(&prepared.result.layers);
        let source_capped = roads_layer
            .map(|l| source_cap_reached(prepared.result.stats.as_ref(), &l.id))
            .unwrap_or(false);
        let (road_highlights, status) = build_road_type_highlights(
            roads_layer,
            &selected,
            source_capped,
            ROAD_HIGHLIGHT_MAX_VERTICES,
        );
        highlights.extend(road_highlights);
        status
    });

    let mut keep = KeepSets::new();
    for h in &highlights {
        keep.entry(h.layer_id.clone())
            .or_insert_with(BTreeSet::new)
            .extend(h.feature_ids.iter().cloned());
    }

    let t_lod = Instant::now();
    let ((mut lod_layers, clusters), cache_stats) = state.lod_cache.apply(
        &prepared.result.layers,
        &prepared.ctx.aoi,
        prepared.ctx.view_zoom,
        &scenario.id,
        prepared.engine_name,
        cluster_layer_id,
        &keep,
        &LodBudgets::default(),
    );
    let lod_ms = t_lod.elapsed().as_secs_f64() * 1000.0;

    // Per-layer trace title overrides from the scenario's plot config.
    if let Some(overrides) = scenario.plot.trace_titles.as_ref().filter(|m| !m.is_empty()) {
        for layer in &mut lod_layers.layers {
            if let Some(title) = overrides.get(&layer.id) {
                layer.title = title.clone();
            }
        }
    }

    let t_plot = Instant::now();
    let mut plot = build_map_plot(
        &lod_layers,
        &highlights,
        &prepared.result.layers,
        &PlotOptions {
            aoi: Some(&prepared.ctx.aoi),
            view_center: Some(prepared.ctx.view_center),
            view_zoom: Some(prepared.ctx.view_zoom),
            viewport: prepared.ctx.viewport,
            focus_map: response.map(|r| r.focus_map).unwrap_or(false),
            clusters: clusters.as_deref(),
            cluster_layer_id: Some(cluster_layer_id),
        },
    );
    let plot_ms = t_plot.elapsed().as_secs_f64() * 1000.0;

    // Enrich the payload's stats block before serialization.
    if let Some(stats) = plot
        .pointer_mut("/layout/meta/stats")
        .and_then(Value::as_object_mut)
    {
        stats.insert("cache".to_string(), cache_stats);
        stats.insert("engine".to_string(), json!(prepared.engine_name));
        stats.insert("scenarioId".to_string(), json!(scenario.id));
        stats.insert("scenarioDataSize".to_string(), json!(scenario.data_size));
        if let Some(engine_stats) = &prepared.result.stats {
            stats.insert("engineStats".to_string(), engine_stats.clone());
        }
    }
    if let Some(status) = road_filter_status {
        if let Some(meta) = plot
            .pointer_mut("/layout/meta")
            .and_then(Value::as_object_mut)
        {
            meta.insert(
                "roadFilter".to_string(),
                serde_json::to_value(&status).unwrap_or(Value::Null),
            );
        }
    }

    let t_json = Instant::now();
    let plot_json = serde_json::to_string(&plot).unwrap_or_else(|_| "{}".to_string());
    let json_ms = t_json.elapsed().as_secs_f64() * 1000.0;

    let stats_value = plot
        .pointer("/layout/meta/stats")
        .cloned()
        .unwrap_or_else(|| json!({}));
    let highlight_requested = stats_value
        .get("highlightRequested")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let highlight_rendered = stats_value
        .get("highlightRendered")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    // Timings and payload size go to telemetry only; keeping them out of
    // the streamed payload keeps identical requests byte-identical.
    let mut stats_for_telemetry = stats_value;
    if let Some(obj) = stats_for_telemetry.as_object_mut() {
        obj.insert("payloadBytes".to_string(), json!(plot_json.len()));
        obj.insert(
            "timingsMs".to_string(),
            json!({
                "engineGet": round2(prepared.engine_get_ms),
                "route": round2(route_ms),
                "lod": round2(lod_ms),
                "plot": round2(plot_ms),
                "jsonSerialize": round2(json_ms),
                "total": round2(prepared.engine_get_ms + route_ms + lod_ms + plot_ms + json_ms),
            }),
        );
    }

    Finished {
        plot_json,
        highlight_requested,
        highlight_rendered,
        stats_for_telemetry,
    }
}

/// Best-effort telemetry; never fails the request.
pub fn record_telemetry(
    state: &AppState,
    endpoint: &str,
    prompt: &str,
    prepared: &Prepared,
    finished: &Finished,
) {
    let Some(store) = &state.telemetry else {
        return;
    };
    store.record(TelemetryEvent {
        ts_ms: chrono::Utc::now().timestamp_millis(),
        endpoint: endpoint.to_string(),
        prompt: (!prompt.is_empty()).then(|| prompt.to_string()),
        engine: prepared.engine_name.to_string(),
        view_zoom: prepared.ctx.view_zoom,
        aoi: prepared.ctx.aoi,
        stats: finished.stats_for_telemetry.clone(),
    });
}

fn roads_layer(layers: &LayerBundle) -> Option<&geoprompt_core::Layer> {
    layers
        .layers
        .iter()
        .find(|l| l.kind == GeometryKind::Lines && l.id.contains("road"))
        .or_else(|| layers.layers.iter().find(|l| l.kind == GeometryKind::Lines))
}

/// A layer counts as source-capped when its engine stats report a binding
/// cap and the candidate count reached the effective limit.
fn source_cap_reached(engine_stats: Option<&Value>, layer_id: &str) -> bool {
    let Some(layers) = engine_stats
        .and_then(|s| s.get("layers"))
        .and_then(Value::as_array)
    else {
        return false;
    };
    layers
        .iter()
        .find(|l| l.get("layerId").and_then(Value::as_str) == Some(layer_id))
        .map(|l| {
            let capped = l
                .pointer("/cap/cappedBy")
                .and_then(Value::as_array)
                .map(|a| !a.is_empty())
                .unwrap_or(false);
            let n = l.get("n").and_then(Value::as_u64).unwrap_or(0);
            let limit = l
                .pointer("/cap/effectiveLimit")
                .and_then(Value::as_u64)
                .unwrap_or(u64::MAX);
            capped && n >= limit
        })
        .unwrap_or(false)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
