//! WGS84 bounding boxes
//!
//! The viewport AOI arrives as `minLon/minLat/maxLon/maxLat` degrees.
//! AOI-derived computations are cached under a rounded integer key so that
//! pans within ~11 m (4 decimals) hit the same cache entry.

use serde::{Deserialize, Serialize};

/// WGS84 bounding box in lon/lat degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

/// Hashable cache key: bbox coordinates scaled to integers at a fixed
/// decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AoiKey(pub [i64; 4]);

impl AoiKey {
    /// Reconstruct the snapped bbox this key was rounded from, so cached
    /// computations run on exactly the keyed extent.
    pub fn to_bbox(&self, decimals: u32) -> BBox {
        let scale = 10_f64.powi(decimals as i32);
        BBox {
            min_lon: self.0[0] as f64 / scale,
            min_lat: self.0[1] as f64 / scale,
            max_lon: self.0[2] as f64 / scale,
            max_lat: self.0[3] as f64 / scale,
        }
    }
}

impl BBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Swap inverted edges; degenerate boxes stay degenerate (not an error).
    pub fn normalized(&self) -> BBox {
        BBox {
            min_lon: self.min_lon.min(self.max_lon),
            max_lon: self.min_lon.max(self.max_lon),
            min_lat: self.min_lat.min(self.max_lat),
            max_lat: self.min_lat.max(self.max_lat),
        }
    }

    /// Stable key for AOI-keyed caches. 4 decimals is ~11 m in latitude,
    /// good enough for interactive pan/zoom caching.
    pub fn rounded_key(&self, decimals: u32) -> AoiKey {
        let b = self.normalized();
        let scale = 10_f64.powi(decimals as i32);
        let r = |v: f64| (v * scale).round() as i64;
        AoiKey([r(b.min_lon), r(b.min_lat), r(b.max_lon), r(b.max_lat)])
    }

    pub fn center(&self) -> (f64, f64) {
        let b = self.normalized();
        (
            (b.min_lon + b.max_lon) / 2.0,
            (b.min_lat + b.max_lat) / 2.0,
        )
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        let a = self.normalized();
        let b = other.normalized();
        a.max_lon >= b.min_lon
            && a.min_lon <= b.max_lon
            && a.max_lat >= b.min_lat
            && a.min_lat <= b.max_lat
    }
}
