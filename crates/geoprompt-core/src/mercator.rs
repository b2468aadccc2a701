//! WebMercator (EPSG:3857) transforms
//!
//! All metric computations in this repo - distances, simplification
//! tolerances, cluster grids - run in WebMercator. At city scale the
//! distortion is acceptable and it keeps distance math in the same CRS as
//! the tile pyramid.

/// WGS84 spheroid radius used by the WebMercator projection.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Latitude limit of the WebMercator projection.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

/// Forward transform: lon/lat degrees to EPSG:3857 meters.
pub fn forward(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = EARTH_RADIUS_M * lon.to_radians();
    let y = EARTH_RADIUS_M * ((std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan()).ln();
    (x, y)
}

/// Inverse transform: EPSG:3857 meters to lon/lat degrees.
pub fn inverse(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}

/// Euclidean distance in meters between two lon/lat positions.
pub fn distance_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (ax, ay) = forward(a.0, a.1);
    let (bx, by) = forward(b.0, b.1);
    ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_stable() {
        let (lon, lat) = (14.4378, 50.0755);
        let (x, y) = forward(lon, lat);
        let (lon2, lat2) = inverse(x, y);
        assert!((lon - lon2).abs() < 1e-9);
        assert!((lat - lat2).abs() < 1e-9);
    }

    #[test]
    fn origin_maps_to_origin() {
        let (x, y) = forward(0.0, 0.0);
        assert!(x.abs() < 1e-6);
        assert!(y.abs() < 1e-6);
    }

    #[test]
    fn latitude_is_clamped() {
        let (_, y_pole) = forward(0.0, 90.0);
        let (_, y_max) = forward(0.0, MAX_MERCATOR_LAT);
        assert!((y_pole - y_max).abs() < 1e-6);
    }

    #[test]
    fn one_degree_of_longitude_at_equator() {
        // 1 degree of longitude is ~111.3 km on the spheroid.
        let d = distance_m((0.0, 0.0), (1.0, 0.0));
        assert!((d - 111_319.49).abs() < 1.0);
    }
}
