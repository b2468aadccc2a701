//! Single-layer GeoParquet query
//!
//! The per-layer pipeline of §"query-on-read": detect bbox encoding,
//! select candidates by bbox overlap, apply render policy and safety/hard
//! caps, decode WKB, report stats.

use std::path::Path;
use std::time::Instant;

use duckdb::Connection;
use serde_json::json;

use geoprompt_core::{BBox, GeometryKind, Layer};
use geoprompt_scenarios::LayerConfig;

use crate::{env, EngineError};

use super::bbox::geoparquet_bbox_exprs;
use super::decode::{decode_line_rows, decode_point_rows, decode_polygon_rows};
use super::policy::{
    allowed_classes, choose_by_max_zoom, order_by, safety_limit, HARD_CAP_LINES, HARD_CAP_POLYGONS,
};
use super::sql;
use super::stats::{base_stats, CapMeta, LayerStats};

fn layer_of(cfg: &LayerConfig, features: Vec<geoprompt_core::LayerFeature>) -> Layer {
    Layer {
        id: cfg.id.clone(),
        kind: cfg.kind,
        title: cfg.title.clone(),
        features,
        style: cfg.style.clone(),
    }
}

fn ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

/// Query one GeoParquet layer for an AOI. Returns the decoded layer
/// (subject to caps/policy) and its stats block.
pub fn query_geoparquet_layer_bbox(
    conn: &Connection,
    cfg: &LayerConfig,
    path: &Path,
    aoi: &BBox,
    view_zoom: f64,
) -> Result<(Layer, serde_json::Value), EngineError> {
    let t0 = Instant::now();
    let b = aoi.normalized();
    let bbox = geoparquet_bbox_exprs(conn, path)?;
    let where_sql = bbox.overlap_where_sql();
    let aoi_params = (b.min_lon, b.max_lon, b.min_lat, b.max_lat);
    let path_str = path.display().to_string();

    let opts = cfg.source.geoparquet.clone().unwrap_or_default();
    let id_col = if opts.id_column.is_empty() {
        "osm_id".to_string()
    } else {
        opts.id_column.clone()
    };
    let geom_col = if opts.geometry_column.is_empty() {
        "geometry".to_string()
    } else {
        opts.geometry_column.clone()
    };
    let geom_min_zoom = opts
        .min_zoom_for_geometry
        .unwrap_or_else(env::default_geom_min_zoom);

    let policy = opts.render_policy.as_ref();
    let allow = allowed_classes(policy, view_zoom);
    let order_by_sql = order_by(policy, &bbox);
    let max_candidates = choose_by_max_zoom(
        policy.and_then(|p| p.max_candidates_by_zoom.as_ref()),
        view_zoom,
    );

    let safety = safety_limit(cfg.kind, view_zoom);
    let n_expr = sql::name_expr(opts.name_column.as_deref());
    let c_expr = sql::class_expr(opts.class_column.as_deref());

    if cfg.kind == GeometryKind::Points {
        let mut cand_limit = safety;
        if let Some(max) = max_candidates {
            cand_limit = cand_limit.min(max).max(1);
        }
        let span = (b.max_lon - b.min_lon).max(b.max_lat - b.min_lat);
        let use_sample = max_candidates.map(|m| m < safety).unwrap_or(false) && span > 1.0;

        let cap = CapMeta {
            safety_limit: safety,
            policy_max_candidates: max_candidates,
            hard_cap: None,
            effective_limit: cand_limit,
            capped_by: if max_candidates.map(|m| m < safety).unwrap_or(false) {
                vec!["policyMaxCandidates"]
            } else {
                vec![]
            },
            sampled: use_sample,
        };

        let t_db = Instant::now();
        let rows = if use_sample {
            sql::query_points_rows_sampled(
                conn,
                &path_str,
                &where_sql,
                aoi_params,
                &id_col,
                &bbox.xmin,
                &bbox.ymin,
                opts.name_column.as_deref(),
                opts.class_column.as_deref(),
                cand_limit,
            )?
        } else {
            sql::query_points_rows(
                conn,
                &path_str,
                &where_sql,
                aoi_params,
                &id_col,
                &bbox.xmin,
                &bbox.ymin,
                &n_expr,
                &c_expr,
                cand_limit,
            )?
        };
        let duckdb_ms = ms(t_db);

        let t_dec = Instant::now();
        let feats = decode_point_rows(rows);
        let decode_ms = ms(t_dec);

        let stats = base_stats(&LayerStats {
            layer_id: &cfg.id,
            kind: cfg.kind,
            view_zoom,
            n: feats.len(),
            duckdb_ms,
            decode_ms,
            total_ms: ms(t0),
            cap: Some(&cap),
            policy: None,
            skipped_reason: None,
            geom_min_zoom: None,
        });
        let features = feats
            .into_iter()
            .map(geoprompt_core::LayerFeature::Point)
            .collect();
        return Ok((layer_of(cfg, features), stats));
    }

    // Lines/polygons: below the geometry zoom floor nothing decodes unless
    // the render policy opens classes at this zoom.
    if view_zoom < geom_min_zoom && allow.is_none() {
        let stats = base_stats(&LayerStats {
            layer_id: &cfg.id,
            kind: cfg.kind,
            view_zoom,
            n: 0,
            duckdb_ms: 0.0,
            decode_ms: 0.0,
            total_ms: ms(t0),
            cap: None,
            policy: None,
            skipped_reason: Some("belowMinZoomForGeometry"),
            geom_min_zoom: Some(geom_min_zoom),
        });
        return Ok((layer_of(cfg, Vec::new()), stats));
    }

    let hard_cap = match cfg.kind {
        GeometryKind::Lines => Some(HARD_CAP_LINES),
        GeometryKind::Polygons => Some(HARD_CAP_POLYGONS),
        GeometryKind::Points => None,
    };

    let mut cand_limit = safety;
    if let Some(max) = max_candidates {
        cand_limit = cand_limit.min(max).max(1);
    }
    if let Some(hard) = hard_cap {
        cand_limit = cand_limit.min(hard).max(1);
    }

    // Record only the caps tighter than the safety baseline.
    let mut capped_by = Vec::new();
    if max_candidates.map(|m| m < safety).unwrap_or(false) {
        capped_by.push("policyMaxCandidates");
    }
    if let Some(hard) = hard_cap {
        if hard < safety.min(max_candidates.unwrap_or(safety)) {
            capped_by.push("hardCap");
        }
    }
    let cap = CapMeta {
        safety_limit: safety,
        policy_max_candidates: max_candidates,
        hard_cap,
        effective_limit: cand_limit,
        capped_by,
        sampled: false,
    };

    let policy_enabled = policy.is_some();
    let t_db = Instant::now();
    let rows = if policy_enabled {
        let ids = sql::query_candidate_ids(
            conn,
            &path_str,
            &where_sql,
            aoi_params,
            &id_col,
            opts.class_column.as_deref(),
            allow.as_ref(),
            &order_by_sql,
            cand_limit,
        )?;
        if ids.is_empty() {
            let stats = base_stats(&LayerStats {
                layer_id: &cfg.id,
                kind: cfg.kind,
                view_zoom,
                n: 0,
                duckdb_ms: 0.0,
                decode_ms: 0.0,
                total_ms: ms(t0),
                cap: Some(&cap),
                policy: Some(json!({
                    "enabled": true,
                    "allowedClasses": allow.as_ref().map(|s| s.len()).unwrap_or(0),
                    "candLimit": cand_limit,
                })),
                skipped_reason: None,
                geom_min_zoom: None,
            });
            return Ok((layer_of(cfg, Vec::new()), stats));
        }
        sql::query_geometry_rows_for_ids(
            conn,
            &path_str,
            &where_sql,
            aoi_params,
            &id_col,
            &geom_col,
            &n_expr,
            &c_expr,
            &ids,
            cand_limit,
        )?
    } else {
        sql::query_geometry_rows_no_policy(
            conn,
            &path_str,
            &where_sql,
            aoi_params,
            &id_col,
            &geom_col,
            &n_expr,
            &c_expr,
            cand_limit,
        )?
    };
    let duckdb_ms = ms(t_db);

    let policy_meta = json!({
        "enabled": policy_enabled,
        "allowedClasses": allow.as_ref().map(|s| s.len()).unwrap_or(0),
        "candLimit": cand_limit,
    });

    let t_dec = Instant::now();
    let (features, n) = match cfg.kind {
        GeometryKind::Lines => {
            let feats = decode_line_rows(rows);
            let n = feats.len();
            (
                feats
                    .into_iter()
                    .map(geoprompt_core::LayerFeature::Line)
                    .collect::<Vec<_>>(),
                n,
            )
        }
        _ => {
            let feats = decode_polygon_rows(rows);
            let n = feats.len();
            (
                feats
                    .into_iter()
                    .map(geoprompt_core::LayerFeature::Polygon)
                    .collect::<Vec<_>>(),
                n,
            )
        }
    };
    let decode_ms = ms(t_dec);

    let stats = base_stats(&LayerStats {
        layer_id: &cfg.id,
        kind: cfg.kind,
        view_zoom,
        n,
        duckdb_ms,
        decode_ms,
        total_ms: ms(t0),
        cap: Some(&cap),
        policy: Some(policy_meta),
        skipped_reason: None,
        geom_min_zoom: None,
    });
    Ok((layer_of(cfg, features), stats))
}
