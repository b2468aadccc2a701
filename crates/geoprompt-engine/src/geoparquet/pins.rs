//! Pinned-id fetch
//!
//! Highlighted features must not vanish when zooming out pushes the base
//! layer past its candidate caps. Pins fetch a specific id set for the
//! current AOI, bypassing caps and render policy entirely.

use std::collections::BTreeSet;
use std::path::Path;

use duckdb::Connection;

use geoprompt_core::{BBox, GeometryKind, Layer};
use geoprompt_scenarios::LayerConfig;

use crate::EngineError;

use super::bbox::geoparquet_bbox_exprs;
use super::decode::{decode_line_rows, decode_point_rows, decode_polygon_rows};
use super::sql;

/// Fetch specific features by id for the current AOI.
///
/// Highlight ids may carry multipart suffixes (`osm_id:2`); the query runs
/// on base ids and the multipart explosion re-derives the children.
pub fn query_layer_pinned_ids(
    conn: &Connection,
    cfg: &LayerConfig,
    path: &Path,
    aoi: &BBox,
    ids: &BTreeSet<String>,
) -> Result<Layer, EngineError> {
    let empty = Layer {
        id: cfg.id.clone(),
        kind: cfg.kind,
        title: cfg.title.clone(),
        features: Vec::new(),
        style: cfg.style.clone(),
    };
    if ids.is_empty() {
        return Ok(empty);
    }

    let base_ids: Vec<String> = ids
        .iter()
        .map(String::as_str)
        .filter(|id| !id.is_empty())
        .map(|id| id.split_once(':').map(|(base, _)| base).unwrap_or(id))
        .filter(|base| !base.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if base_ids.is_empty() {
        return Ok(empty);
    }

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
    let n_expr = sql::name_expr(opts.name_column.as_deref());
    let c_expr = sql::class_expr(opts.class_column.as_deref());
    let limit = base_ids.len().max(1);

    let features = match cfg.kind {
        GeometryKind::Points => {
            let rows = sql::query_points_rows_for_ids(
                conn,
                &path_str,
                &where_sql,
                aoi_params,
                &id_col,
                &bbox.xmin,
                &bbox.ymin,
                &n_expr,
                &c_expr,
                &base_ids,
                limit,
            )?;
            decode_point_rows(rows)
                .into_iter()
                .map(geoprompt_core::LayerFeature::Point)
                .collect()
        }
        GeometryKind::Lines | GeometryKind::Polygons => {
            let rows = sql::query_geometry_rows_for_ids(
                conn,
                &path_str,
                &where_sql,
                aoi_params,
                &id_col,
                &geom_col,
                &n_expr,
                &c_expr,
                &base_ids,
                limit,
            )?;
            if cfg.kind == GeometryKind::Lines {
                decode_line_rows(rows)
                    .into_iter()
                    .map(geoprompt_core::LayerFeature::Line)
                    .collect()
            } else {
                decode_polygon_rows(rows)
                    .into_iter()
                    .map(geoprompt_core::LayerFeature::Polygon)
                    .collect()
            }
        }
    };

    Ok(Layer {
        features,
        ..empty
    })
}
