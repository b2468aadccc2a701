//! Budgeted simplification
//!
//! Douglas-Peucker in EPSG:3857 with a zoom-derived base tolerance,
//! escalated through {1x, 2x, 4x, 8x} until the layer fits its vertex
//! budget, then a deterministic heaviest-first drop as the hard fallback.

use std::collections::BTreeSet;

use geo::Simplify;
use geo_types::{Coord, LineString, Polygon};

use geoprompt_core::{mercator, LineFeature, PolygonFeature};

/// `(max zoom, meters)` rows; the last row covers everything above.
pub const LINE_TOLERANCE_M: [(f64, f64); 5] = [
    (6.0, 250.0),
    (8.0, 150.0),
    (10.0, 75.0),
    (12.0, 25.0),
    (f64::INFINITY, 10.0),
];

pub const POLY_TOLERANCE_M: [(f64, f64); 5] = [
    (6.0, 400.0),
    (8.0, 250.0),
    (10.0, 120.0),
    (12.0, 40.0),
    (f64::INFINITY, 15.0),
];

fn tolerance_for_zoom(table: &[(f64, f64)], zoom: f64) -> f64 {
    for &(max_zoom, tol) in table {
        if zoom <= max_zoom {
            return tol;
        }
    }
    table.last().map(|&(_, tol)| tol).unwrap_or(10.0)
}

pub fn line_tol_m(zoom: f64) -> f64 {
    tolerance_for_zoom(&LINE_TOLERANCE_M, zoom)
}

pub fn poly_tol_m(zoom: f64) -> f64 {
    tolerance_for_zoom(&POLY_TOLERANCE_M, zoom)
}

pub fn count_line_vertices(lines: &[LineFeature]) -> usize {
    lines.iter().map(|l| l.coords.len()).sum()
}

pub fn count_poly_vertices(polys: &[PolygonFeature]) -> usize {
    polys.iter().map(PolygonFeature::vertex_count).sum()
}

/// Simplify lines with an escalating tolerance until under budget; hard-cap
/// as the fallback. Features in `keep_ids` are dropped last.
pub fn simplify_lines_until_budget(
    lines: &[LineFeature],
    zoom: f64,
    max_vertices: usize,
    keep_ids: Option<&BTreeSet<String>>,
) -> Vec<LineFeature> {
    let base_tol = line_tol_m(zoom);

    let mut out = lines.to_vec();
    for mult in [1.0, 2.0, 4.0, 8.0] {
        if count_line_vertices(&out) <= max_vertices {
            break;
        }
        out = simplify_lines(lines, base_tol * mult);
    }
    if count_line_vertices(&out) > max_vertices {
        out = cap_lines_to_vertex_budget(out, max_vertices, keep_ids);
    }
    out
}

/// Polygon variant of the budget loop.
pub fn simplify_polygons_until_budget(
    polys: &[PolygonFeature],
    zoom: f64,
    max_vertices: usize,
    keep_ids: Option<&BTreeSet<String>>,
) -> Vec<PolygonFeature> {
    let base_tol = poly_tol_m(zoom);

    let mut out = polys.to_vec();
    for mult in [1.0, 2.0, 4.0, 8.0] {
        if count_poly_vertices(&out) <= max_vertices {
            break;
        }
        out = simplify_polygons(polys, base_tol * mult);
    }
    if count_poly_vertices(&out) > max_vertices {
        out = cap_polys_to_vertex_budget(out, max_vertices, keep_ids);
    }
    out
}

/// Hard fallback: drop the heaviest features until under budget.
/// Deterministic: sort by vertex count desc, then id; non-kept features go
/// first; restore id order afterwards.
fn cap_lines_to_vertex_budget(
    mut lines: Vec<LineFeature>,
    max_vertices: usize,
    keep_ids: Option<&BTreeSet<String>>,
) -> Vec<LineFeature> {
    lines.sort_by(|a, b| {
        b.coords
            .len()
            .cmp(&a.coords.len())
            .then_with(|| a.id.cmp(&b.id))
    });
    let mut total = count_line_vertices(&lines);
    while !lines.is_empty() && total > max_vertices {
        let idx = next_droppable(&lines, keep_ids, |l| &l.id);
        total -= lines.remove(idx).coords.len();
    }
    lines.sort_by(|a, b| a.id.cmp(&b.id));
    lines
}

fn cap_polys_to_vertex_budget(
    mut polys: Vec<PolygonFeature>,
    max_vertices: usize,
    keep_ids: Option<&BTreeSet<String>>,
) -> Vec<PolygonFeature> {
    polys.sort_by(|a, b| {
        b.vertex_count()
            .cmp(&a.vertex_count())
            .then_with(|| a.id.cmp(&b.id))
    });
    let mut total = count_poly_vertices(&polys);
    while !polys.is_empty() && total > max_vertices {
        let idx = next_droppable(&polys, keep_ids, |p| &p.id);
        total -= polys.remove(idx).vertex_count();
    }
    polys.sort_by(|a, b| a.id.cmp(&b.id));
    polys
}

/// First non-kept feature index; when everything left is kept, drop the
/// heaviest kept one (index 0) as the last resort.
fn next_droppable<T>(
    items: &[T],
    keep_ids: Option<&BTreeSet<String>>,
    id_of: impl Fn(&T) -> &String,
) -> usize {
    match keep_ids {
        Some(keep) if !keep.is_empty() => items
            .iter()
            .position(|item| !keep.contains(id_of(item)))
            .unwrap_or(0),
        _ => 0,
    }
}

/// One simplification pass over lines at `tolerance_m`, in EPSG:3857.
pub fn simplify_lines(lines: &[LineFeature], tolerance_m: f64) -> Vec<LineFeature> {
    let mut out = Vec::with_capacity(lines.len());
    for f in lines {
        if f.coords.len() < 2 {
            continue;
        }
        let projected: Vec<Coord<f64>> = f
            .coords
            .iter()
            .map(|&(lon, lat)| {
                let (x, y) = mercator::forward(lon, lat);
                Coord { x, y }
            })
            .collect();
        let simplified = LineString::from(projected).simplify(&tolerance_m);
        if simplified.0.len() < 2 {
            continue;
        }
        let coords = simplified
            .0
            .iter()
            .map(|c| mercator::inverse(c.x, c.y))
            .collect();
        out.push(LineFeature {
            id: f.id.clone(),
            coords,
            props: f.props.clone(),
        });
    }
    out
}

/// One simplification pass over polygons at `tolerance_m`. Outer rings
/// only; features whose ring collapses are dropped rather than emitted
/// empty.
pub fn simplify_polygons(polys: &[PolygonFeature], tolerance_m: f64) -> Vec<PolygonFeature> {
    let mut out = Vec::with_capacity(polys.len());
    for f in polys {
        let Some(outer) = f.closed_outer() else {
            continue;
        };
        let projected: Vec<Coord<f64>> = outer
            .iter()
            .map(|&(lon, lat)| {
                let (x, y) = mercator::forward(lon, lat);
                Coord { x, y }
            })
            .collect();
        let poly = Polygon::new(LineString::from(projected), vec![]);
        let simplified = poly.simplify(&tolerance_m);
        let ring = simplified.exterior();
        if ring.0.len() < 4 {
            continue;
        }
        let ring_ll: Vec<(f64, f64)> = ring.0.iter().map(|c| mercator::inverse(c.x, c.y)).collect();
        out.push(PolygonFeature {
            id: f.id.clone(),
            rings: vec![ring_ll],
            props: f.props.clone(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoprompt_core::Props;

    fn dense_line(id: &str, n: usize) -> LineFeature {
        // Nearly-collinear vertices a few meters apart; DP collapses them.
        LineFeature {
            id: id.to_string(),
            coords: (0..n)
                .map(|i| (14.0 + i as f64 * 0.00002, 50.0 + ((i % 2) as f64) * 1e-7))
                .collect(),
            props: Props::new(),
        }
    }

    #[test]
    fn tolerance_tables_match_zoom_breakpoints() {
        assert_eq!(line_tol_m(5.0), 250.0);
        assert_eq!(line_tol_m(8.0), 150.0);
        assert_eq!(line_tol_m(10.0), 75.0);
        assert_eq!(line_tol_m(12.0), 25.0);
        assert_eq!(line_tol_m(15.0), 10.0);
        assert_eq!(poly_tol_m(5.0), 400.0);
        assert_eq!(poly_tol_m(15.0), 15.0);
    }

    #[test]
    fn collinear_lines_collapse_under_tolerance() {
        let lines = vec![dense_line("a", 100)];
        let out = simplify_lines(&lines, 50.0);
        assert_eq!(out.len(), 1);
        assert!(out[0].coords.len() < 10, "got {}", out[0].coords.len());
        // Endpoints survive.
        assert!((out[0].coords[0].0 - 14.0).abs() < 1e-9);
    }

    #[test]
    fn cap_drops_heaviest_first_and_restores_id_order() {
        let lines = vec![dense_line("b_heavy", 30), dense_line("a_light", 5)];
        let out = cap_lines_to_vertex_budget(lines, 10, None);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "a_light");
    }

    #[test]
    fn keep_set_survives_cap_until_last() {
        let keep: BTreeSet<String> = ["b_heavy".to_string()].into_iter().collect();
        let lines = vec![dense_line("b_heavy", 30), dense_line("a_light", 5)];
        let out = cap_lines_to_vertex_budget(lines, 30, Some(&keep));
        let ids: Vec<&str> = out.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["b_heavy"]);
    }

    #[test]
    fn degenerate_polygon_is_dropped() {
        let bad = PolygonFeature {
            id: "bad".to_string(),
            rings: vec![vec![(0.0, 0.0), (1.0, 1.0)]],
            props: Props::new(),
        };
        assert!(simplify_polygons(&[bad], 10.0).is_empty());
    }

    #[test]
    fn budget_loop_prefers_simplification_over_dropping() {
        let lines: Vec<LineFeature> = (0..5).map(|i| dense_line(&format!("l{i}"), 200)).collect();
        let out = simplify_lines_until_budget(&lines, 6.0, 100, None);
        // All five features survive; they just got lighter.
        assert_eq!(out.len(), 5);
        assert!(count_line_vertices(&out) <= 100);
    }
}
