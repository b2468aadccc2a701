//! Telemetry store
//!
//! One writer thread owns the insert path; the connection sits behind a
//! mutex so read queries can run from request handlers without racing the
//! writer. Events are batched: the writer drains whatever is queued before
//! inserting.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use duckdb::{params, Connection};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use geoprompt_core::BBox;

use crate::sql::{
    CREATE_EVENTS_TABLE_SQL, INSERT_EVENT_SQL, SLOWEST_SQL_TEMPLATE, SUMMARY_SQL_TEMPLATE,
};

const QUEUE_CAPACITY: usize = 1_024;

#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    pub ts_ms: i64,
    pub endpoint: String,
    pub prompt: Option<String>,
    pub engine: String,
    pub view_zoom: f64,
    pub aoi: BBox,
    pub stats: Value,
}

enum Msg {
    Record(Box<TelemetryEvent>),
    Flush(Sender<()>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRow {
    pub engine: String,
    pub endpoint: String,
    pub n: i64,
    pub avg_total_ms: Option<f64>,
    pub p50_total_ms: Option<f64>,
    pub p95_total_ms: Option<f64>,
    pub p99_total_ms: Option<f64>,
    pub avg_payload_kb: Option<f64>,
    pub cache_hit_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowRow {
    pub ts_ms: i64,
    pub engine: String,
    pub endpoint: String,
    pub total_ms: Option<f64>,
    pub payload_bytes: Option<f64>,
    pub prompt: Option<String>,
    pub view_zoom: f64,
}

pub struct TelemetryStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
    tx: Sender<Msg>,
    worker: Option<JoinHandle<()>>,
}

impl TelemetryStore {
    /// Open (or create) the telemetry database and start the writer.
    pub fn open(path: &Path) -> Result<Self, duckdb::Error> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_EVENTS_TABLE_SQL)?;
        let conn = Arc::new(Mutex::new(conn));

        let (tx, rx) = bounded(QUEUE_CAPACITY);
        let worker_conn = conn.clone();
        let worker = std::thread::Builder::new()
            .name("telemetry-writer".to_string())
            .spawn(move || writer_loop(&rx, &worker_conn))
            .expect("spawn telemetry writer");

        Ok(Self {
            path: path.to_path_buf(),
            conn,
            tx,
            worker: Some(worker),
        })
    }

    /// Open from `TELEMETRY` / `TELEMETRY_PATH`; `None` when disabled or
    /// the database cannot be opened (telemetry never blocks startup).
    pub fn from_env() -> Option<Arc<TelemetryStore>> {
        if !crate::telemetry_enabled() {
            return None;
        }
        let path = crate::telemetry_path();
        match TelemetryStore::open(&path) {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "telemetry disabled: cannot open store");
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Non-blocking enqueue; drops the event when the queue is full.
    pub fn record(&self, event: TelemetryEvent) {
        if self.tx.try_send(Msg::Record(Box::new(event))).is_err() {
            debug!("telemetry queue full, dropping event");
        }
    }

    /// Wait until all queued events are written (used by tests).
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = bounded(1);
        if self.tx.send(Msg::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv_timeout(std::time::Duration::from_secs(2));
        }
    }

    pub fn summary(
        &self,
        engine: Option<&str>,
        endpoint: Option<&str>,
        since_ms: Option<i64>,
    ) -> Result<Vec<SummaryRow>, duckdb::Error> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut params_vec: Vec<Box<dyn duckdb::ToSql>> = Vec::new();
        if let Some(engine) = engine {
            clauses.push("engine = ?");
            params_vec.push(Box::new(engine.to_string()));
        }
        if let Some(endpoint) = endpoint {
            clauses.push("endpoint = ?");
            params_vec.push(Box::new(endpoint.to_string()));
        }
        if let Some(since) = since_ms {
            clauses.push("ts_ms >= ?");
            params_vec.push(Box::new(since));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = SUMMARY_SQL_TEMPLATE.replace("{where_sql}", &where_sql);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let refs: Vec<&dyn duckdb::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(refs.as_slice(), |row| {
            Ok(SummaryRow {
                engine: row.get(0)?,
                endpoint: row.get(1)?,
                n: row.get(2)?,
                avg_total_ms: row.get(3)?,
                p50_total_ms: row.get(4)?,
                p95_total_ms: row.get(5)?,
                p99_total_ms: row.get(6)?,
                avg_payload_kb: row.get::<_, Option<f64>>(7)?.map(|b| b / 1024.0),
                cache_hit_rate: row.get(8)?,
            })
        })?;
        rows.collect()
    }

    pub fn slowest(
        &self,
        engine: Option<&str>,
        endpoint: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SlowRow>, duckdb::Error> {
        let mut clauses: Vec<&str> =
            vec!["json_extract(stats_json, '$.timingsMs.total') IS NOT NULL"];
        let mut params_vec: Vec<Box<dyn duckdb::ToSql>> = Vec::new();
        if let Some(engine) = engine {
            clauses.push("engine = ?");
            params_vec.push(Box::new(engine.to_string()));
        }
        if let Some(endpoint) = endpoint {
            clauses.push("endpoint = ?");
            params_vec.push(Box::new(endpoint.to_string()));
        }
        params_vec.push(Box::new(limit.clamp(1, 200) as i64));

        let sql = SLOWEST_SQL_TEMPLATE.replace("{where_sql}", &clauses.join(" AND "));
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let refs: Vec<&dyn duckdb::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(refs.as_slice(), |row| {
            Ok(SlowRow {
                ts_ms: row.get(0)?,
                engine: row.get(1)?,
                endpoint: row.get(2)?,
                total_ms: row.get(3)?,
                payload_bytes: row.get(4)?,
                prompt: row.get(5)?,
                view_zoom: row.get(6)?,
            })
        })?;
        rows.collect()
    }
}

impl Drop for TelemetryStore {
    fn drop(&mut self) {
        // Closing the channel stops the writer; join best-effort.
        let (tx, _) = bounded(0);
        drop(std::mem::replace(&mut self.tx, tx));
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn writer_loop(rx: &Receiver<Msg>, conn: &Arc<Mutex<Connection>>) {
    while let Ok(msg) = rx.recv() {
        let mut batch = Vec::new();
        let mut flush_acks = Vec::new();
        match msg {
            Msg::Record(event) => batch.push(*event),
            Msg::Flush(ack) => flush_acks.push(ack),
        }
        // Drain whatever else is queued into the same batch.
        while let Ok(msg) = rx.try_recv() {
            match msg {
                Msg::Record(event) => batch.push(*event),
                Msg::Flush(ack) => flush_acks.push(ack),
            }
        }

        if !batch.is_empty() {
            let conn = conn.lock();
            for event in &batch {
                let b = event.aoi.normalized();
                let stats_json =
                    serde_json::to_string(&event.stats).unwrap_or_else(|_| "{}".to_string());
                if let Err(e) = conn.execute(
                    INSERT_EVENT_SQL,
                    params![
                        event.ts_ms,
                        event.endpoint,
                        event.prompt,
                        event.engine,
                        event.view_zoom,
                        b.min_lon,
                        b.min_lat,
                        b.max_lon,
                        b.max_lat,
                        stats_json,
                    ],
                ) {
                    warn!(error = %e, "telemetry insert failed");
                }
            }
        }

        for ack in flush_acks {
            let _ = ack.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(engine: &str, total_ms: f64, cache_hit: bool) -> TelemetryEvent {
        TelemetryEvent {
            ts_ms: 1_700_000_000_000,
            endpoint: "/invoke".to_string(),
            prompt: Some("how many places are flooded?".to_string()),
            engine: engine.to_string(),
            view_zoom: 12.0,
            aoi: BBox::new(14.4, 50.0, 14.5, 50.1),
            stats: json!({
                "timingsMs": {"total": total_ms},
                "payloadBytes": 2048,
                "cache": {"cacheHit": cache_hit},
            }),
        }
    }

    #[test]
    fn records_and_summarizes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TelemetryStore::open(&tmp.path().join("t.duckdb")).unwrap();
        store.record(event("in_memory", 10.0, false));
        store.record(event("in_memory", 30.0, true));
        store.record(event("duckdb", 50.0, false));
        store.flush();

        let rows = store.summary(None, None, None).unwrap();
        assert_eq!(rows.len(), 2);
        let inmem = rows.iter().find(|r| r.engine == "in_memory").unwrap();
        assert_eq!(inmem.n, 2);
        assert_eq!(inmem.avg_total_ms, Some(20.0));
        assert_eq!(inmem.cache_hit_rate, Some(0.5));
        assert!((inmem.avg_payload_kb.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn slowest_orders_by_total_desc() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TelemetryStore::open(&tmp.path().join("t.duckdb")).unwrap();
        store.record(event("in_memory", 10.0, false));
        store.record(event("in_memory", 90.0, false));
        store.flush();

        let rows = store.slowest(None, None, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].total_ms, Some(90.0));
    }

    #[test]
    fn summary_filters_by_engine() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TelemetryStore::open(&tmp.path().join("t.duckdb")).unwrap();
        store.record(event("duckdb", 5.0, false));
        store.flush();
        assert!(store.summary(Some("in_memory"), None, None).unwrap().is_empty());
        assert_eq!(store.summary(Some("duckdb"), None, None).unwrap().len(), 1);
    }
}
