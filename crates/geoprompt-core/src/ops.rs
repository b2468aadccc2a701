//! Geometry operations
//!
//! Conversions between the feature model and `geo` geometries, polygon
//! union with self-intersection repair, and containment tests. Malformed
//! inputs are dropped silently - nothing in the slicing path may panic on
//! bad data.

use geo::BooleanOps;
use geo::Contains;
use geo_types::{Coord, LineString, MultiPolygon, Point, Polygon};

use crate::features::{LineFeature, PolygonFeature};
use crate::mercator;

/// LineString from raw lon/lat coords; `None` for degenerate inputs.
pub fn line_string(coords: &[(f64, f64)]) -> Option<LineString<f64>> {
    if coords.len() < 2 {
        return None;
    }
    Some(LineString::from(
        coords.iter().map(|&(x, y)| (x, y)).collect::<Vec<_>>(),
    ))
}

/// LineString of a line feature projected to EPSG:3857.
pub fn line_string_3857(line: &LineFeature) -> Option<LineString<f64>> {
    if line.coords.len() < 2 {
        return None;
    }
    Some(LineString::from(
        line.coords
            .iter()
            .map(|&(lon, lat)| mercator::forward(lon, lat))
            .collect::<Vec<_>>(),
    ))
}

/// Projected point in EPSG:3857.
pub fn point_3857(lon: f64, lat: f64) -> Point<f64> {
    let (x, y) = mercator::forward(lon, lat);
    Point::new(x, y)
}

/// Outer-ring polygon (WGS84) of a polygon feature. Holes are ignored for
/// spatial predicates; they rarely matter for viewport masks and keeping
/// the union single-ring keeps it cheap.
pub fn outer_polygon(poly: &PolygonFeature) -> Option<Polygon<f64>> {
    let ring = poly.closed_outer()?;
    Some(Polygon::new(
        LineString::from(ring.iter().map(|&(x, y)| Coord { x, y }).collect::<Vec<_>>()),
        vec![],
    ))
}

/// Union a set of polygons into one MultiPolygon.
///
/// Going through `BooleanOps::union` pairwise also acts as the repair step
/// for mildly self-intersecting rings (the buffer(0) equivalent).
pub fn union_polygons(polys: &[Polygon<f64>]) -> MultiPolygon<f64> {
    let mut valid = polys.iter().filter(|p| p.exterior().0.len() >= 4);
    let Some(first) = valid.next() else {
        return MultiPolygon::new(Vec::new());
    };
    let mut acc = MultiPolygon::new(vec![first.clone()]);
    for poly in valid {
        acc = acc.union(&MultiPolygon::new(vec![poly.clone()]));
    }
    acc
}

/// Whether a lon/lat position lies inside the polygon union.
pub fn point_in_union(union: &MultiPolygon<f64>, lon: f64, lat: f64) -> bool {
    if union.0.is_empty() {
        return false;
    }
    union.contains(&Point::new(lon, lat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Props;

    fn square(id: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> PolygonFeature {
        PolygonFeature::new(
            id,
            vec![vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]],
            Props::new(),
        )
    }

    #[test]
    fn union_of_disjoint_squares_has_two_parts() {
        let a = outer_polygon(&square("a", 0.0, 0.0, 1.0, 1.0)).unwrap();
        let b = outer_polygon(&square("b", 5.0, 5.0, 6.0, 6.0)).unwrap();
        let u = union_polygons(&[a, b]);
        assert_eq!(u.0.len(), 2);
    }

    #[test]
    fn union_of_overlapping_squares_merges() {
        let a = outer_polygon(&square("a", 0.0, 0.0, 2.0, 2.0)).unwrap();
        let b = outer_polygon(&square("b", 1.0, 1.0, 3.0, 3.0)).unwrap();
        let u = union_polygons(&[a, b]);
        assert_eq!(u.0.len(), 1);
    }

    #[test]
    fn containment_against_union() {
        let a = outer_polygon(&square("a", 0.0, 0.0, 2.0, 2.0)).unwrap();
        let u = union_polygons(&[a]);
        assert!(point_in_union(&u, 1.0, 1.0));
        assert!(!point_in_union(&u, 5.0, 5.0));
    }

    #[test]
    fn empty_union_contains_nothing() {
        let u = union_polygons(&[]);
        assert!(!point_in_union(&u, 0.0, 0.0));
    }

    #[test]
    fn degenerate_line_is_rejected() {
        assert!(line_string(&[(0.0, 0.0)]).is_none());
        let line = LineFeature {
            id: "l".to_string(),
            coords: vec![(0.0, 0.0)],
            props: Props::new(),
        };
        assert!(line_string_3857(&line).is_none());
    }
}
