//! Wire types
//!
//! Request bodies mirror the frontend's camelCase JSON. Highlights may
//! arrive either as a single `highlight` or a `highlights` list; both
//! shapes normalize to a list.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use geoprompt_core::{BBox, Highlight};

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMessage {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub author: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ApiCenter {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ApiView {
    pub center: ApiCenter,
    pub zoom: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ApiViewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMap {
    pub bbox: BBox,
    pub view: ApiView,
    #[serde(default)]
    pub viewport: Option<ApiViewport>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHighlight {
    pub layer_id: String,
    #[serde(default)]
    pub feature_ids: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

impl ApiHighlight {
    pub fn into_highlight(self) -> Highlight {
        Highlight::new(
            self.layer_id,
            self.feature_ids.into_iter().collect::<BTreeSet<_>>(),
            self.title,
            self.mode.unwrap_or_else(|| "pinned".to_string()),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    #[serde(default)]
    pub scenario_id: Option<String>,
    pub map: ApiMap,
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub messages: Vec<ApiMessage>,
    #[serde(default)]
    pub highlight: Option<ApiHighlight>,
    #[serde(default)]
    pub highlights: Option<Vec<ApiHighlight>>,
    /// Road-type filter applied on map refreshes (`/plot`).
    #[serde(default)]
    pub road_types: Option<Vec<String>>,
}

impl InvokeRequest {
    pub fn prompt(&self) -> &str {
        self.messages.last().map(|m| m.text.as_str()).unwrap_or("")
    }

    /// All client-side highlights, normalized to one list.
    pub fn client_highlights(&self) -> Vec<Highlight> {
        let mut out = Vec::new();
        if let Some(list) = &self.highlights {
            out.extend(list.iter().cloned().map(ApiHighlight::into_highlight));
        } else if let Some(single) = &self.highlight {
            out.push(single.clone().into_highlight());
        }
        out.retain(|h| !h.feature_ids.is_empty());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_invoke_request_with_single_highlight() {
        let body = r#"{
            "scenarioId": "demo_city",
            "map": {
                "bbox": {"minLon": 14.4, "minLat": 50.0, "maxLon": 14.5, "maxLat": 50.1},
                "view": {"center": {"lat": 50.05, "lon": 14.45}, "zoom": 12.0},
                "viewport": {"width": 1200, "height": 800}
            },
            "engine": "duckdb",
            "messages": [{"id": 1, "author": "human", "text": "show layers"}],
            "highlight": {"layerId": "places", "featureIds": ["a", "b"]}
        }"#;
        let req: InvokeRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.prompt(), "show layers");
        assert_eq!(req.map.view.zoom, 12.0);
        let highlights = req.client_highlights();
        assert_eq!(highlights.len(), 1);
        assert_eq!(highlights[0].mode, "pinned");
        assert_eq!(highlights[0].feature_ids.len(), 2);
    }

    #[test]
    fn highlights_list_wins_over_single() {
        let body = r#"{
            "map": {
                "bbox": {"minLon": 0, "minLat": 0, "maxLon": 1, "maxLat": 1},
                "view": {"center": {"lat": 0.5, "lon": 0.5}, "zoom": 10.0}
            },
            "highlight": {"layerId": "a", "featureIds": ["1"]},
            "highlights": [
                {"layerId": "b", "featureIds": ["2"]},
                {"layerId": "c", "featureIds": []}
            ]
        }"#;
        let req: InvokeRequest = serde_json::from_str(body).unwrap();
        let highlights = req.client_highlights();
        assert_eq!(highlights.len(), 1);
        assert_eq!(highlights[0].layer_id, "b");
    }

    #[test]
    fn empty_messages_mean_empty_prompt() {
        let body = r#"{
            "map": {
                "bbox": {"minLon": 0, "minLat": 0, "maxLon": 1, "maxLat": 1},
                "view": {"center": {"lat": 0.5, "lon": 0.5}, "zoom": 10.0}
            }
        }"#;
        let req: InvokeRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.prompt(), "");
        assert!(req.client_highlights().is_empty());
    }
}
