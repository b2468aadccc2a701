//! Per-layer stats for the HUD and telemetry.

use serde_json::{json, Value};

use geoprompt_core::GeometryKind;

/// Which caps applied to a layer query.
#[derive(Debug, Clone, Default)]
pub struct CapMeta {
    pub safety_limit: usize,
    pub policy_max_candidates: Option<usize>,
    pub hard_cap: Option<usize>,
    pub effective_limit: usize,
    pub capped_by: Vec<&'static str>,
    pub sampled: bool,
}

impl CapMeta {
    pub fn to_json(&self) -> Value {
        json!({
            "safetyLimit": self.safety_limit,
            "policyMaxCandidates": self.policy_max_candidates,
            "hardCap": self.hard_cap,
            "effectiveLimit": self.effective_limit,
            "cappedBy": self.capped_by,
            "sampled": self.sampled,
        })
    }
}

pub struct LayerStats<'a> {
    pub layer_id: &'a str,
    pub kind: GeometryKind,
    pub view_zoom: f64,
    pub n: usize,
    pub duckdb_ms: f64,
    pub decode_ms: f64,
    pub total_ms: f64,
    pub cap: Option<&'a CapMeta>,
    pub policy: Option<Value>,
    pub skipped_reason: Option<&'a str>,
    pub geom_min_zoom: Option<f64>,
}

pub fn base_stats(s: &LayerStats<'_>) -> Value {
    let mut out = json!({
        "layerId": s.layer_id,
        "kind": s.kind.to_string(),
        "source": "geoparquet",
        "zoom": s.view_zoom,
        "n": s.n,
        "duckdbMs": round2(s.duckdb_ms),
        "decodeMs": round2(s.decode_ms),
        "totalMs": round2(s.total_ms),
    });
    let obj = out.as_object_mut().expect("stats object");
    if let Some(cap) = s.cap {
        obj.insert("cap".to_string(), cap.to_json());
    }
    if let Some(policy) = &s.policy {
        obj.insert("policy".to_string(), policy.clone());
    }
    if let Some(reason) = s.skipped_reason {
        obj.insert("skippedReason".to_string(), json!(reason));
    }
    if let Some(z) = s.geom_min_zoom {
        obj.insert("geomMinZoom".to_string(), json!(z));
    }
    out
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_blocks_appear_only_when_set() {
        let stats = base_stats(&LayerStats {
            layer_id: "roads",
            kind: GeometryKind::Lines,
            view_zoom: 9.0,
            n: 12,
            duckdb_ms: 1.234,
            decode_ms: 0.5,
            total_ms: 2.0,
            cap: None,
            policy: None,
            skipped_reason: Some("belowMinZoomForGeometry"),
            geom_min_zoom: Some(11.0),
        });
        assert_eq!(stats["duckdbMs"], 1.23);
        assert_eq!(stats["skippedReason"], "belowMinZoomForGeometry");
        assert!(stats.get("cap").is_none());
        assert_eq!(stats["geomMinZoom"], 11.0);
    }
}
