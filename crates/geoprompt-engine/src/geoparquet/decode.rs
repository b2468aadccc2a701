//! Row decoding
//!
//! Point rows decode straight from columns (lon/lat are the bbox mins).
//! Line/polygon rows carry WKB; multi-part geometries explode into one
//! feature per part, part 0 keeping the base id and later parts suffixed
//! `{base_id}:{part_index}`. Decode failures skip the feature.

use geo_types::Geometry;
use geozero::{wkb::Wkb, ToGeo};

use geoprompt_core::{LineFeature, PointFeature, PolygonFeature, Props, PropValue};

use super::sql::{GeomRow, PointRow};

fn props_of(name: &Option<String>, fclass: &Option<String>, label_from_name: bool) -> Props {
    let mut props = Props::new();
    if let Some(name) = name.as_deref().filter(|s| !s.is_empty()) {
        props.insert("name".to_string(), PropValue::from(name));
        if label_from_name {
            props.insert("label".to_string(), PropValue::from(name));
        }
    }
    if let Some(fclass) = fclass.as_deref().filter(|s| !s.is_empty()) {
        props.insert("fclass".to_string(), PropValue::from(fclass));
    }
    props
}

fn part_id(base: &str, part: usize) -> String {
    if part == 0 {
        base.to_string()
    } else {
        format!("{base}:{part}")
    }
}

pub fn decode_point_rows(rows: Vec<PointRow>) -> Vec<PointFeature> {
    rows.into_iter()
        .map(|(id, lon, lat, name, fclass)| PointFeature {
            id,
            lon,
            lat,
            props: props_of(&name, &fclass, true),
        })
        .collect()
}

fn decode_wkb(blob: &Option<Vec<u8>>) -> Option<Geometry<f64>> {
    let bytes = blob.as_ref()?;
    Wkb(bytes.clone()).to_geo().ok()
}

pub fn decode_line_rows(rows: Vec<GeomRow>) -> Vec<LineFeature> {
    let mut feats = Vec::with_capacity(rows.len());
    for (fid, blob, name, fclass) in rows {
        let Some(geom) = decode_wkb(&blob) else {
            continue;
        };
        let props = props_of(&name, &fclass, false);

        let push = |feats: &mut Vec<LineFeature>, id: String, ls: &geo_types::LineString<f64>| {
            let coords: Vec<(f64, f64)> = ls.0.iter().map(|c| (c.x, c.y)).collect();
            if coords.len() >= 2 {
                feats.push(LineFeature {
                    id,
                    coords,
                    props: props.clone(),
                });
            }
        };

        match geom {
            Geometry::LineString(ls) => push(&mut feats, fid, &ls),
            Geometry::MultiLineString(mls) => {
                for (i, part) in mls.0.iter().enumerate() {
                    push(&mut feats, part_id(&fid, i), part);
                }
            }
            _ => {}
        }
    }
    feats
}

pub fn decode_polygon_rows(rows: Vec<GeomRow>) -> Vec<PolygonFeature> {
    let mut feats = Vec::with_capacity(rows.len());
    for (fid, blob, name, fclass) in rows {
        let Some(geom) = decode_wkb(&blob) else {
            continue;
        };
        let props = props_of(&name, &fclass, false);

        let push = |feats: &mut Vec<PolygonFeature>, id: String, poly: &geo_types::Polygon<f64>| {
            let ext: Vec<(f64, f64)> = poly.exterior().0.iter().map(|c| (c.x, c.y)).collect();
            if ext.len() >= 4 {
                feats.push(PolygonFeature {
                    id,
                    rings: vec![ext],
                    props: props.clone(),
                });
            }
        };

        match geom {
            Geometry::Polygon(poly) => push(&mut feats, fid, &poly),
            Geometry::MultiPolygon(mp) => {
                for (i, part) in mp.0.iter().enumerate() {
                    push(&mut feats, part_id(&fid, i), part);
                }
            }
            _ => {}
        }
    }
    feats
}
