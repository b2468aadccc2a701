//! GeoParquet SQL queries
//!
//! All queries go through `read_parquet` with the file path bound as a
//! parameter and the AOI as four positional floats. Id lists are inlined
//! as quoted literals (DuckDB prepared statements cannot bind lists).

use std::collections::BTreeSet;

use duckdb::{params, Connection};

use crate::EngineError;

use super::bbox::sql_quote;

pub type PointRow = (String, f64, f64, Option<String>, Option<String>);
pub type GeomRow = (String, Option<Vec<u8>>, Option<String>, Option<String>);

pub fn name_expr(name_col: Option<&str>) -> String {
    match name_col {
        Some(col) => format!("CAST({col} AS VARCHAR)"),
        None => "NULL".to_string(),
    }
}

pub fn class_expr(class_col: Option<&str>) -> String {
    match class_col {
        Some(col) => format!("CAST({col} AS VARCHAR)"),
        None => "NULL".to_string(),
    }
}

fn id_list_sql(ids: &[String]) -> String {
    let quoted: Vec<String> = ids.iter().map(|id| sql_quote(id)).collect();
    quoted.join(", ")
}

type AoiParams = (f64, f64, f64, f64);

fn query_point_rows_sql(
    conn: &Connection,
    sql: &str,
    path: &str,
    aoi: AoiParams,
) -> Result<Vec<PointRow>, EngineError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![path, aoi.0, aoi.1, aoi.2, aoi.3], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, f64>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<String>>(4)?,
        ))
    })?;
    rows.collect::<Result<_, _>>().map_err(EngineError::from)
}

fn query_geom_rows_sql(
    conn: &Connection,
    sql: &str,
    path: &str,
    aoi: AoiParams,
) -> Result<Vec<GeomRow>, EngineError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![path, aoi.0, aoi.1, aoi.2, aoi.3], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<Vec<u8>>>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
        ))
    })?;
    rows.collect::<Result<_, _>>().map_err(EngineError::from)
}

pub fn query_points_rows(
    conn: &Connection,
    path: &str,
    where_sql: &str,
    aoi: AoiParams,
    id_col: &str,
    xmin_expr: &str,
    ymin_expr: &str,
    name_expr: &str,
    class_expr: &str,
    limit: usize,
) -> Result<Vec<PointRow>, EngineError> {
    let sql = format!(
        "SELECT CAST({id_col} AS VARCHAR) AS id,
                CAST({xmin_expr} AS DOUBLE) AS lon,
                CAST({ymin_expr} AS DOUBLE) AS lat,
                {name_expr} AS name,
                {class_expr} AS fclass
           FROM read_parquet(?)
          WHERE {where_sql}
          LIMIT {limit}"
    );
    query_point_rows_sql(conn, &sql, path, aoi)
}

/// Sample points *after* the AOI filter: a plain LIMIT returns whatever
/// comes first in the file, which looks spatially biased on wide AOIs.
/// Sampling gives a representative overview without a global ORDER BY.
pub fn query_points_rows_sampled(
    conn: &Connection,
    path: &str,
    where_sql: &str,
    aoi: AoiParams,
    id_col: &str,
    xmin_expr: &str,
    ymin_expr: &str,
    name_col: Option<&str>,
    class_col: Option<&str>,
    limit: usize,
) -> Result<Vec<PointRow>, EngineError> {
    let name_raw = name_col.unwrap_or("NULL");
    let class_raw = class_col.unwrap_or("NULL");
    let name_sel = if name_col.is_some() {
        "CAST(name_raw AS VARCHAR)"
    } else {
        "NULL"
    };
    let class_sel = if class_col.is_some() {
        "CAST(class_raw AS VARCHAR)"
    } else {
        "NULL"
    };

    let sql = format!(
        "SELECT CAST(id_raw AS VARCHAR) AS id,
                CAST(lon_raw AS DOUBLE) AS lon,
                CAST(lat_raw AS DOUBLE) AS lat,
                {name_sel} AS name,
                {class_sel} AS fclass
           FROM (
                 SELECT {id_col} AS id_raw,
                        {xmin_expr} AS lon_raw,
                        {ymin_expr} AS lat_raw,
                        {name_raw} AS name_raw,
                        {class_raw} AS class_raw
                   FROM read_parquet(?)
                  WHERE {where_sql}
                )
          USING SAMPLE {limit} ROWS"
    );
    query_point_rows_sql(conn, &sql, path, aoi)
}

pub fn query_geometry_rows_no_policy(
    conn: &Connection,
    path: &str,
    where_sql: &str,
    aoi: AoiParams,
    id_col: &str,
    geom_col: &str,
    name_expr: &str,
    class_expr: &str,
    limit: usize,
) -> Result<Vec<GeomRow>, EngineError> {
    let sql = format!(
        "SELECT CAST({id_col} AS VARCHAR) AS id,
                CAST({geom_col} AS BLOB) AS geom_wkb,
                {name_expr} AS name,
                {class_expr} AS fclass
           FROM read_parquet(?)
          WHERE {where_sql}
          LIMIT {limit}"
    );
    query_geom_rows_sql(conn, &sql, path, aoi)
}

/// Step one of the policy path: pick candidate ids under the class filter
/// and ranking, without touching geometry.
pub fn query_candidate_ids(
    conn: &Connection,
    path: &str,
    where_sql: &str,
    aoi: AoiParams,
    id_col: &str,
    class_col: Option<&str>,
    allow_classes: Option<&BTreeSet<String>>,
    order_by_sql: &str,
    limit: usize,
) -> Result<Vec<String>, EngineError> {
    let class_filter = match (allow_classes, class_col) {
        (Some(allow), Some(col)) if !allow.is_empty() => {
            let list = id_list_sql(&allow.iter().cloned().collect::<Vec<_>>());
            format!(" AND CAST({col} AS VARCHAR) IN ({list})")
        }
        _ => String::new(),
    };
    let order_clause = if order_by_sql.trim().is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", order_by_sql.trim())
    };

    let sql = format!(
        "SELECT CAST({id_col} AS VARCHAR) AS id
           FROM read_parquet(?)
          WHERE {where_sql}{class_filter}{order_clause}
          LIMIT {limit}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![path, aoi.0, aoi.1, aoi.2, aoi.3], |row| {
        row.get::<_, Option<String>>(0)
    })?;
    let mut out = Vec::new();
    for row in rows {
        if let Some(id) = row? {
            if !id.is_empty() {
                out.push(id);
            }
        }
    }
    Ok(out)
}

/// Step two of the policy path: fetch WKB for the chosen ids.
pub fn query_geometry_rows_for_ids(
    conn: &Connection,
    path: &str,
    where_sql: &str,
    aoi: AoiParams,
    id_col: &str,
    geom_col: &str,
    name_expr: &str,
    class_expr: &str,
    ids: &[String],
    limit: usize,
) -> Result<Vec<GeomRow>, EngineError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT CAST({id_col} AS VARCHAR) AS id,
                CAST({geom_col} AS BLOB) AS geom_wkb,
                {name_expr} AS name,
                {class_expr} AS fclass
           FROM read_parquet(?)
          WHERE {where_sql}
            AND CAST({id_col} AS VARCHAR) IN ({})
          LIMIT {limit}",
        id_list_sql(ids)
    );
    query_geom_rows_sql(conn, &sql, path, aoi)
}

pub fn query_points_rows_for_ids(
    conn: &Connection,
    path: &str,
    where_sql: &str,
    aoi: AoiParams,
    id_col: &str,
    xmin_expr: &str,
    ymin_expr: &str,
    name_expr: &str,
    class_expr: &str,
    ids: &[String],
    limit: usize,
) -> Result<Vec<PointRow>, EngineError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT CAST({id_col} AS VARCHAR) AS id,
                CAST({xmin_expr} AS DOUBLE) AS lon,
                CAST({ymin_expr} AS DOUBLE) AS lat,
                {name_expr} AS name,
                {class_expr} AS fclass
           FROM read_parquet(?)
          WHERE {where_sql}
            AND CAST({id_col} AS VARCHAR) IN ({})
          LIMIT {limit}",
        id_list_sql(ids)
    );
    query_point_rows_sql(conn, &sql, path, aoi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expressions_fall_back_to_null() {
        assert_eq!(name_expr(None), "NULL");
        assert_eq!(name_expr(Some("name")), "CAST(name AS VARCHAR)");
        assert_eq!(class_expr(Some("fclass")), "CAST(fclass AS VARCHAR)");
    }

    #[test]
    fn id_lists_are_quoted_and_joined() {
        let ids = vec!["a".to_string(), "b'c".to_string()];
        assert_eq!(id_list_sql(&ids), "'a', 'b''c'");
    }
}
