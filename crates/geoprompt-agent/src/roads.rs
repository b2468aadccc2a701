//! Road-type highlight control
//!
//! Map-side road filters ("show motorways + trunks") independent of the
//! prompt flow: each selected canonical road type becomes its own overlay,
//! with a per-type density gate so a single filter cannot blow the payload.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use geoprompt_core::{GeometryKind, Highlight, Layer};

pub const ROAD_HIGHLIGHT_MAX_VERTICES: usize = 60_000;

/// Canonical ordering of road types in API responses.
pub const ROAD_TYPES: [&str; 5] = ["motorway", "trunk", "primary", "secondary", "tertiary"];

fn fclasses_for(road_type: &str) -> &'static [&'static str] {
    match road_type {
        "motorway" => &["motorway", "motorway_link"],
        "trunk" => &["trunk", "trunk_link"],
        "primary" => &["primary"],
        "secondary" => &["secondary"],
        "tertiary" => &["tertiary"],
        _ => &[],
    }
}

fn canonical(raw: &str) -> Option<&'static str> {
    match raw.trim().to_lowercase().as_str() {
        "motorway" | "motorways" => Some("motorway"),
        "trunk" | "trunks" => Some("trunk"),
        "primary" => Some("primary"),
        "secondary" => Some("secondary"),
        "tertiary" => Some("tertiary"),
        _ => None,
    }
}

/// Map raw selections to canonical types, deduplicated, in stable order.
pub fn normalize_road_types(raw_types: &[String]) -> Vec<String> {
    let seen: BTreeSet<&'static str> = raw_types.iter().filter_map(|raw| canonical(raw)).collect();
    ROAD_TYPES
        .iter()
        .filter(|t| seen.contains(**t))
        .map(|t| t.to_string())
        .collect()
}

/// Per-request status of the road filter, reported in plot meta.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadFilterStatus {
    pub selected_types: Vec<String>,
    pub visible_types: Vec<String>,
    pub hidden_types: Vec<String>,
    pub hidden_reason_by_type: BTreeMap<String, String>,
    pub counts_by_type: BTreeMap<String, usize>,
    pub max_vertices: usize,
}

/// Build one overlay per selected road type from the (pre-LOD) roads layer.
///
/// Types are hidden rather than partially rendered when:
/// - no matching features are in view (`noneInView`)
/// - the source layer hit its candidate cap, so matches would be misleading
///   (`sourceCapped`)
/// - the matching features exceed the vertex gate (`tooDense`)
pub fn build_road_type_highlights(
    roads_layer: Option<&Layer>,
    selected_types: &[String],
    source_cap_reached: bool,
    max_vertices: usize,
) -> (Vec<Highlight>, RoadFilterStatus) {
    let mut status = RoadFilterStatus {
        selected_types: selected_types.to_vec(),
        max_vertices,
        ..Default::default()
    };

    let Some(roads_layer) = roads_layer.filter(|l| l.kind == GeometryKind::Lines) else {
        return (Vec::new(), status);
    };
    if selected_types.is_empty() {
        return (Vec::new(), status);
    }

    let mut highlights = Vec::new();
    for road_type in selected_types {
        let allow = fclasses_for(road_type);
        let matches: Vec<_> = roads_layer
            .lines()
            .filter(|f| !f.id.is_empty())
            .filter(|f| {
                f.fclass()
                    .map(|c| allow.contains(&c.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();

        status
            .counts_by_type
            .insert(road_type.clone(), matches.len());

        if matches.is_empty() {
            hide(&mut status, road_type, "noneInView");
            continue;
        }
        if source_cap_reached {
            hide(&mut status, road_type, "sourceCapped");
            continue;
        }
        let vertices: usize = matches.iter().map(|f| f.coords.len()).sum();
        if vertices > max_vertices {
            hide(&mut status, road_type, "tooDense");
            continue;
        }

        status.visible_types.push(road_type.clone());
        let title = match road_type.as_str() {
            "motorway" => "Motorways".to_string(),
            "trunk" => "Trunks".to_string(),
            other => format!("{} roads", capitalize(other)),
        };
        highlights.push(Highlight::new(
            roads_layer.id.clone(),
            matches.iter().map(|f| f.id.clone()).collect(),
            Some(title),
            "road_filter",
        ));
    }

    (highlights, status)
}

fn hide(status: &mut RoadFilterStatus, road_type: &str, reason: &str) {
    status.hidden_types.push(road_type.to_string());
    status
        .hidden_reason_by_type
        .insert(road_type.to_string(), reason.to_string());
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoprompt_core::{LayerFeature, LineFeature, Props, PropValue};

    fn road(id: &str, fclass: &str, n_verts: usize) -> LayerFeature {
        let mut props = Props::new();
        props.insert("fclass".to_string(), PropValue::from(fclass));
        LayerFeature::Line(LineFeature {
            id: id.to_string(),
            coords: (0..n_verts.max(2)).map(|i| (i as f64, 0.0)).collect(),
            props,
        })
    }

    fn roads_layer(features: Vec<LayerFeature>) -> Layer {
        Layer {
            id: "roads".to_string(),
            kind: GeometryKind::Lines,
            title: "Roads".to_string(),
            features,
            style: serde_json::Value::Null,
        }
    }

    #[test]
    fn normalize_dedupes_and_orders_canonically() {
        let raw = vec![
            "Trunks".to_string(),
            "motorway".to_string(),
            "MOTORWAYS".to_string(),
            "gravel".to_string(),
        ];
        assert_eq!(normalize_road_types(&raw), vec!["motorway", "trunk"]);
    }

    #[test]
    fn link_variants_match_their_parent_type() {
        let layer = roads_layer(vec![road("m1", "motorway", 4), road("m2", "motorway_link", 4)]);
        let (highlights, status) = build_road_type_highlights(
            Some(&layer),
            &["motorway".to_string()],
            false,
            ROAD_HIGHLIGHT_MAX_VERTICES,
        );
        assert_eq!(highlights.len(), 1);
        assert_eq!(highlights[0].feature_ids.len(), 2);
        assert_eq!(highlights[0].mode, "road_filter");
        assert_eq!(status.visible_types, vec!["motorway"]);
    }

    #[test]
    fn dense_type_is_hidden_not_truncated() {
        let layer = roads_layer(vec![road("m1", "motorway", 50)]);
        let (highlights, status) =
            build_road_type_highlights(Some(&layer), &["motorway".to_string()], false, 10);
        assert!(highlights.is_empty());
        assert_eq!(
            status.hidden_reason_by_type.get("motorway").map(String::as_str),
            Some("tooDense")
        );
    }

    #[test]
    fn source_cap_hides_types_with_matches() {
        let layer = roads_layer(vec![road("m1", "motorway", 4)]);
        let (highlights, status) = build_road_type_highlights(
            Some(&layer),
            &["motorway".to_string(), "trunk".to_string()],
            true,
            ROAD_HIGHLIGHT_MAX_VERTICES,
        );
        assert!(highlights.is_empty());
        assert_eq!(
            status.hidden_reason_by_type.get("motorway").map(String::as_str),
            Some("sourceCapped")
        );
        // Trunk has no matches, so the more specific reason wins.
        assert_eq!(
            status.hidden_reason_by_type.get("trunk").map(String::as_str),
            Some("noneInView")
        );
    }
}
