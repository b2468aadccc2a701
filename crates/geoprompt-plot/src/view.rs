//! Focus-map view fitting
//!
//! Given highlighted points, compute a center and an approximate Mapbox
//! zoom that fits them into the viewport (256px tile math).

use geoprompt_core::PointFeature;

pub const DEFAULT_VIEWPORT: (u32, u32) = (900, 600);

/// Minimum padding in degrees so a single point still gets a sane frame.
const MIN_PAD_DEG: f64 = 0.003;

/// Fit center `(lat, lon)` and zoom for a non-empty point set.
pub fn fit_view_to_points(
    points: &[&PointFeature],
    viewport: Option<(u32, u32)>,
) -> Option<((f64, f64), f64)> {
    if points.is_empty() {
        return None;
    }
    let mut min_lon = f64::INFINITY;
    let mut max_lon = f64::NEG_INFINITY;
    let mut min_lat = f64::INFINITY;
    let mut max_lat = f64::NEG_INFINITY;
    for p in points {
        min_lon = min_lon.min(p.lon);
        max_lon = max_lon.max(p.lon);
        min_lat = min_lat.min(p.lat);
        max_lat = max_lat.max(p.lat);
    }

    let pad_lon = (max_lon - min_lon).max(MIN_PAD_DEG);
    let pad_lat = (max_lat - min_lat).max(MIN_PAD_DEG);
    min_lon -= pad_lon;
    max_lon += pad_lon;
    min_lat -= pad_lat;
    max_lat += pad_lat;

    let center = ((min_lat + max_lat) / 2.0, (min_lon + max_lon) / 2.0);
    let (width, height) = viewport.unwrap_or(DEFAULT_VIEWPORT);
    let zoom = bbox_to_zoom(min_lon, min_lat, max_lon, max_lat, width, height);
    Some((center, zoom))
}

/// WebMercator bbox -> zoom heuristic for 256px tiles; the limiting axis
/// wins.
pub fn bbox_to_zoom(
    min_lon: f64,
    min_lat: f64,
    max_lon: f64,
    max_lat: f64,
    width: u32,
    height: u32,
) -> f64 {
    let lat_to_rad = |lat: f64| -> f64 {
        let s = (lat * std::f64::consts::PI / 180.0).sin();
        ((1.0 + s) / (1.0 - s)).ln() / 2.0
    };

    let lon_delta = (max_lon - min_lon).max(1e-6);
    let lat_delta = ((lat_to_rad(max_lat) - lat_to_rad(min_lat)) * 180.0 / std::f64::consts::PI)
        .max(1e-6);

    let zoom_x = ((width as f64 * 360.0) / (256.0 * lon_delta)).log2();
    let zoom_y = ((height as f64 * 170.0) / (256.0 * lat_delta)).log2();
    zoom_x.min(zoom_y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoprompt_core::Props;

    fn pt(id: &str, lon: f64, lat: f64) -> PointFeature {
        PointFeature {
            id: id.to_string(),
            lon,
            lat,
            props: Props::new(),
        }
    }

    #[test]
    fn single_point_gets_minimum_padding() {
        let p = pt("a", 14.44, 50.08);
        let ((lat, lon), zoom) = fit_view_to_points(&[&p], None).unwrap();
        assert!((lat - 50.08).abs() < 1e-9);
        assert!((lon - 14.44).abs() < 1e-9);
        // 0.006 degrees across a 900px viewport is a deep zoom.
        assert!(zoom > 12.0, "zoom was {zoom}");
    }

    #[test]
    fn wider_spread_means_lower_zoom() {
        let a = [pt("a", 14.0, 50.0), pt("b", 14.01, 50.01)];
        let b = [pt("a", 14.0, 50.0), pt("b", 15.0, 51.0)];
        let (_, z_tight) = fit_view_to_points(&[&a[0], &a[1]], None).unwrap();
        let (_, z_wide) = fit_view_to_points(&[&b[0], &b[1]], None).unwrap();
        assert!(z_tight > z_wide);
    }

    #[test]
    fn empty_point_set_yields_none() {
        assert!(fit_view_to_points(&[], None).is_none());
    }

    #[test]
    fn zoom_respects_viewport_aspect() {
        let z_wide_viewport = bbox_to_zoom(14.0, 50.0, 15.0, 50.5, 1800, 600);
        let z_small_viewport = bbox_to_zoom(14.0, 50.0, 15.0, 50.5, 900, 600);
        assert!(z_wide_viewport >= z_small_viewport);
    }
}
