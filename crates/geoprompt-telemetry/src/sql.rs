//! Telemetry SQL

pub const CREATE_EVENTS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS events (
  ts_ms BIGINT,
  endpoint TEXT,
  prompt TEXT,
  engine TEXT,
  view_zoom DOUBLE,
  aoi_min_lon DOUBLE,
  aoi_min_lat DOUBLE,
  aoi_max_lon DOUBLE,
  aoi_max_lat DOUBLE,
  stats_json TEXT
);
"#;

pub const INSERT_EVENT_SQL: &str =
    "INSERT INTO events VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

/// Aggregates per (engine, endpoint); `{where_sql}` is interpolated.
pub const SUMMARY_SQL_TEMPLATE: &str = r#"
SELECT engine,
       endpoint,
       COUNT(*) AS n,
       AVG(CAST(json_extract(stats_json, '$.timingsMs.total') AS DOUBLE)) AS avg_ms,
       quantile_cont(CAST(json_extract(stats_json, '$.timingsMs.total') AS DOUBLE), 0.5) AS p50,
       quantile_cont(CAST(json_extract(stats_json, '$.timingsMs.total') AS DOUBLE), 0.95) AS p95,
       quantile_cont(CAST(json_extract(stats_json, '$.timingsMs.total') AS DOUBLE), 0.99) AS p99,
       AVG(CAST(json_extract(stats_json, '$.payloadBytes') AS DOUBLE)) AS avg_bytes,
       AVG(CASE WHEN json_extract_string(stats_json, '$.cache.cacheHit') = 'true' THEN 1.0 ELSE 0.0 END) AS hit_rate
  FROM events
 {where_sql}
 GROUP BY engine, endpoint
 ORDER BY engine, endpoint
"#;

/// Slowest requests by total ms; `{where_sql}` is interpolated, limit is a
/// trailing parameter.
pub const SLOWEST_SQL_TEMPLATE: &str = r#"
SELECT ts_ms,
       engine,
       endpoint,
       CAST(json_extract(stats_json, '$.timingsMs.total') AS DOUBLE) AS total_ms,
       CAST(json_extract(stats_json, '$.payloadBytes') AS DOUBLE) AS payload_bytes,
       prompt,
       view_zoom
  FROM events
 WHERE {where_sql}
 ORDER BY total_ms DESC
 LIMIT ?
"#;
