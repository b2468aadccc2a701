//! Covering-bbox detection
//!
//! GeoParquet files carry their per-row covering bbox either as top-level
//! `xmin/ymin/xmax/ymax` columns or as a `geometry_bbox` struct column.
//! Detection runs once per file and is cached process-wide.

use std::path::{Path, PathBuf};

use duckdb::Connection;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use geoprompt_core::BoundedCache;

use crate::EngineError;

const EXPR_CACHE_ITEMS: usize = 64;

/// SQL expressions addressing the covering bbox of one row.
#[derive(Debug, Clone)]
pub struct BBoxExprs {
    pub xmin: String,
    pub ymin: String,
    pub xmax: String,
    pub ymax: String,
}

impl BBoxExprs {
    /// `WHERE` clause for bbox overlap with 4 positional params
    /// `(min_lon, max_lon, min_lat, max_lat)`.
    pub fn overlap_where_sql(&self) -> String {
        format!(
            "{} >= ? AND {} <= ? AND {} >= ? AND {} <= ?",
            self.xmax, self.xmin, self.ymax, self.ymin
        )
    }
}

static EXPR_CACHE: Lazy<Mutex<BoundedCache<PathBuf, BBoxExprs>>> =
    Lazy::new(|| Mutex::new(BoundedCache::new(EXPR_CACHE_ITEMS)));

/// Escape a path for embedding as a SQL string literal.
pub fn sql_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', "''"))
}

pub fn geoparquet_bbox_exprs(conn: &Connection, path: &Path) -> Result<BBoxExprs, EngineError> {
    if let Some(hit) = EXPR_CACHE.lock().get(&path.to_path_buf()) {
        return Ok(hit);
    }

    let describe = format!(
        "DESCRIBE SELECT * FROM read_parquet({})",
        sql_quote(&path.display().to_string())
    );
    let mut stmt = conn.prepare(&describe)?;
    let cols: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<_, _>>()?;

    let exprs = if ["xmin", "ymin", "xmax", "ymax"]
        .iter()
        .all(|c| cols.iter().any(|col| col == c))
    {
        BBoxExprs {
            xmin: "xmin".to_string(),
            ymin: "ymin".to_string(),
            xmax: "xmax".to_string(),
            ymax: "ymax".to_string(),
        }
    } else if cols.iter().any(|col| col == "geometry_bbox") {
        BBoxExprs {
            xmin: "geometry_bbox.xmin".to_string(),
            ymin: "geometry_bbox.ymin".to_string(),
            xmax: "geometry_bbox.xmax".to_string(),
            ymax: "geometry_bbox.ymax".to_string(),
        }
    } else {
        return Err(EngineError::GeoParquetBBox {
            path: path.display().to_string(),
        });
    };

    EXPR_CACHE.lock().put(path.to_path_buf(), exprs.clone());
    Ok(exprs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_escapes_single_quotes() {
        assert_eq!(sql_quote("a'b"), "'a''b'");
        assert_eq!(sql_quote("plain"), "'plain'");
    }

    #[test]
    fn overlap_clause_orders_params_min_max() {
        let exprs = BBoxExprs {
            xmin: "xmin".into(),
            ymin: "ymin".into(),
            xmax: "xmax".into(),
            ymax: "ymax".into(),
        };
        assert_eq!(
            exprs.overlap_where_sql(),
            "xmax >= ? AND xmin <= ? AND ymax >= ? AND ymin <= ?"
        );
    }
}
