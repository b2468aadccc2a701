//! Slippy tile math
//!
//! Tile-aligned AOI slicing keeps pan/zoom cache-friendly: the tile zoom
//! does not need to equal the visual zoom exactly, it only needs to be
//! stable while the user pans around.

use serde::{Deserialize, Serialize};

use crate::aoi::BBox;
use crate::mercator::MAX_MERCATOR_LAT;

/// Tile coordinate (z/x/y) in the standard web-map tiling scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileId {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Cache-key form, `z/x/y`.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Choose a stable slippy-tile zoom for a visual zoom, clamped to [3, 13].
pub fn tile_zoom_for_view_zoom(view_zoom: f64) -> u8 {
    let z = view_zoom.round() as i64;
    z.clamp(3, 13) as u8
}

/// Convert lon/lat (EPSG:4326) to tile (x, y) at `zoom`, clamping to the
/// valid tile range.
pub fn lonlat_to_tile(zoom: u8, lon: f64, lat: f64) -> (u32, u32) {
    let n = (1u64 << zoom) as f64;
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let lat_rad = lat.to_radians();

    let x = ((lon + 180.0) / 360.0 * n).floor();
    let y = ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI) / 2.0 * n)
        .floor();

    let max = (n - 1.0).max(0.0);
    (x.clamp(0.0, max) as u32, y.clamp(0.0, max) as u32)
}

/// Canonical WGS84 bbox of a slippy tile.
pub fn tile_bbox(tile: TileId) -> BBox {
    let n = (1u64 << tile.z) as f64;

    let lon_left = tile.x as f64 / n * 360.0 - 180.0;
    let lon_right = (tile.x + 1) as f64 / n * 360.0 - 180.0;

    let lat_from_tile_y = |tile_y: f64| -> f64 {
        let t = std::f64::consts::PI * (1.0 - 2.0 * tile_y / n);
        t.sinh().atan().to_degrees()
    };

    let lat_top = lat_from_tile_y(tile.y as f64);
    let lat_bottom = lat_from_tile_y((tile.y + 1) as f64);

    BBox::new(lon_left, lat_bottom, lon_right, lat_top).normalized()
}

/// All tiles covering the AOI at `zoom`, sorted by (x, y) so tile sets are
/// directly usable as cache keys.
pub fn tiles_for_bbox(zoom: u8, aoi: &BBox) -> Vec<TileId> {
    let b = aoi.normalized();

    let (x0, y0) = lonlat_to_tile(zoom, b.min_lon, b.max_lat); // top-left
    let (x1, y1) = lonlat_to_tile(zoom, b.max_lon, b.min_lat); // bottom-right

    let (min_x, max_x) = (x0.min(x1), x0.max(x1));
    let (min_y, max_y) = (y0.min(y1), y0.max(y1));

    let mut out = Vec::with_capacity(((max_x - min_x + 1) * (max_y - min_y + 1)) as usize);
    for x in min_x..=max_x {
        for y in min_y..=max_y {
            out.push(TileId::new(zoom, x, y));
        }
    }
    out
}
