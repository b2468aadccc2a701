//! Spatial index
//!
//! `GeoIndex` is built once per layer bundle and answers the hot-path
//! queries of a request: AOI slicing (plain and tile-aligned), polygon
//! union per AOI, and nearest-point distances in meters.
//!
//! Geospatial notes:
//! - Input data is EPSG:4326 (lon/lat degrees); bbox trees stay in 4326.
//! - Point layers get a second tree in EPSG:3857 for metric distances.
//! - All caches are bounded, evicting the oldest insertion.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use geo_types::{MultiPolygon, Polygon};
use parking_lot::Mutex;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};

use crate::aoi::{AoiKey, BBox};
use crate::cache::BoundedCache;
use crate::features::{GeometryKind, Layer, LayerBundle, LayerFeature, PointFeature};
use crate::mercator;
use crate::ops;
use crate::tiles::{tile_bbox, tiles_for_bbox, TileId};

/// Cache-key precision for AOI-derived results (~11 m).
pub const SLICE_DECIMALS: u32 = 4;

const SLICE_CACHE_ITEMS: usize = 64;
const UNION_CACHE_ITEMS: usize = 64;
const TILE_CACHE_ITEMS: usize = 256;

type BBoxEntry = GeomWithData<Rectangle<[f64; 2]>, usize>;
type PointEntry = GeomWithData<[f64; 2], usize>;

/// Generic geometry index for a `LayerBundle`.
pub struct GeoIndex {
    layers: LayerBundle,
    /// Synthetic id over the layer set; part of slice-cache keys.
    layer_sig: String,

    bbox_trees: HashMap<String, RTree<BBoxEntry>>,
    poly_geoms: HashMap<String, HashMap<usize, Polygon<f64>>>,
    point_trees_3857: HashMap<String, RTree<PointEntry>>,

    slice_cache: Mutex<BoundedCache<(String, AoiKey), LayerBundle>>,
    union_cache: Mutex<BoundedCache<(String, AoiKey), Arc<MultiPolygon<f64>>>>,
    tile_cache: Mutex<BoundedCache<TileId, LayerBundle>>,
}

impl GeoIndex {
    /// Build per-layer trees. Malformed features are left out of the trees
    /// (they can never match a query) but stay in the bundle.
    pub fn build(bundle: LayerBundle) -> Self {
        let layer_sig = bundle
            .layers
            .iter()
            .map(|layer| layer.id.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let mut bbox_trees = HashMap::new();
        let mut poly_geoms: HashMap<String, HashMap<usize, Polygon<f64>>> = HashMap::new();
        let mut point_trees_3857 = HashMap::new();

        for layer in &bundle.layers {
            let mut entries: Vec<BBoxEntry> = Vec::with_capacity(layer.features.len());
            for (i, feature) in layer.features.iter().enumerate() {
                if let Some((lo, hi)) = feature_bbox(feature) {
                    entries.push(GeomWithData::new(Rectangle::from_corners(lo, hi), i));
                }
            }
            bbox_trees.insert(layer.id.clone(), RTree::bulk_load(entries));

            match layer.kind {
                GeometryKind::Polygons => {
                    let mut geoms = HashMap::new();
                    for (i, feature) in layer.features.iter().enumerate() {
                        if let Some(poly) = feature.as_polygon().and_then(ops::outer_polygon) {
                            geoms.insert(i, poly);
                        }
                    }
                    poly_geoms.insert(layer.id.clone(), geoms);
                }
                GeometryKind::Points => {
                    let mut entries: Vec<PointEntry> = Vec::with_capacity(layer.features.len());
                    for (i, feature) in layer.features.iter().enumerate() {
                        if let Some(p) = feature.as_point() {
                            let (x, y) = mercator::forward(p.lon, p.lat);
                            entries.push(GeomWithData::new([x, y], i));
                        }
                    }
                    point_trees_3857.insert(layer.id.clone(), RTree::bulk_load(entries));
                }
                GeometryKind::Lines => {}
            }
        }

        Self {
            layers: bundle,
            layer_sig,
            bbox_trees,
            poly_geoms,
            point_trees_3857,
            slice_cache: Mutex::new(BoundedCache::new(SLICE_CACHE_ITEMS)),
            union_cache: Mutex::new(BoundedCache::new(UNION_CACHE_ITEMS)),
            tile_cache: Mutex::new(BoundedCache::new(TILE_CACHE_ITEMS)),
        }
    }

    /// The indexed (non-sliced) bundle.
    pub fn layers(&self) -> &LayerBundle {
        &self.layers
    }

    /// Slice all layers to the AOI by bbox intersection. Deterministic:
    /// features come out in their original layer order.
    pub fn slice_layers(&self, aoi: &BBox) -> LayerBundle {
        let key = (self.layer_sig.clone(), aoi.rounded_key(SLICE_DECIMALS));
        if let Some(hit) = self.slice_cache.lock().get(&key) {
            return hit;
        }

        let b = aoi.normalized();
        let envelope = AABB::from_corners([b.min_lon, b.min_lat], [b.max_lon, b.max_lat]);

        let mut out_layers = Vec::with_capacity(self.layers.layers.len());
        for layer in &self.layers.layers {
            let Some(tree) = self.bbox_trees.get(&layer.id) else {
                out_layers.push(layer.empty_like());
                continue;
            };
            let mut idxs: Vec<usize> = tree
                .locate_in_envelope_intersecting(&envelope)
                .map(|e| e.data)
                .collect();
            idxs.sort_unstable();
            let features = idxs.iter().map(|&i| layer.features[i].clone()).collect();
            out_layers.push(layer.with_features(features));
        }

        let out = LayerBundle::new(out_layers);
        self.slice_cache.lock().put(key, out.clone());
        out
    }

    /// Tile-aligned AOI slice: enumerate covering tiles, slice each tile
    /// (cached per tile), then merge with `(layer_id, feature_id)` dedup.
    /// Output features are sorted by id for deterministic downstream
    /// hashing; the AOI-level composition is NOT cached (the tile set is
    /// the composition key).
    pub fn slice_layers_tiled(&self, aoi: &BBox, tile_zoom: u8) -> LayerBundle {
        let tiles = tiles_for_bbox(tile_zoom, aoi);
        if tiles.is_empty() {
            let layers = self.layers.layers.iter().map(Layer::empty_like).collect();
            return LayerBundle::new(layers);
        }

        // (layer_id -> id -> feature), BTreeMap keeps ids sorted.
        let mut merged: HashMap<&str, BTreeMap<String, LayerFeature>> = self
            .layers
            .layers
            .iter()
            .map(|layer| (layer.id.as_str(), BTreeMap::new()))
            .collect();

        for tile in tiles {
            let cached = self.tile_cache.lock().get(&tile);
            let sliced = match cached {
                Some(bundle) => bundle,
                None => {
                    let bundle = self.slice_layers(&tile_bbox(tile));
                    self.tile_cache.lock().put(tile, bundle.clone());
                    bundle
                }
            };
            for layer in &sliced.layers {
                let Some(bucket) = merged.get_mut(layer.id.as_str()) else {
                    continue;
                };
                for feature in &layer.features {
                    let fid = feature.id();
                    if fid.is_empty() {
                        continue;
                    }
                    bucket
                        .entry(fid.to_string())
                        .or_insert_with(|| feature.clone());
                }
            }
        }

        let mut out_layers = Vec::with_capacity(self.layers.layers.len());
        for base in &self.layers.layers {
            let features = merged
                .remove(base.id.as_str())
                .map(|bucket| bucket.into_values().collect())
                .unwrap_or_default();
            out_layers.push(base.with_features(features));
        }
        LayerBundle::new(out_layers)
    }

    /// Union of the polygon features of `layer_id` intersecting the AOI,
    /// self-intersections repaired. Cached per (layer, rounded AOI).
    pub fn polygon_union_for_aoi(&self, layer_id: &str, aoi: &BBox) -> Arc<MultiPolygon<f64>> {
        let key = (layer_id.to_string(), aoi.rounded_key(SLICE_DECIMALS));
        if let Some(hit) = self.union_cache.lock().get(&key) {
            return hit;
        }

        let empty = || Arc::new(MultiPolygon::new(Vec::new()));
        let union = match (self.layers.get(layer_id), self.bbox_trees.get(layer_id)) {
            (Some(layer), Some(tree)) if layer.kind == GeometryKind::Polygons => {
                let b = aoi.normalized();
                let envelope = AABB::from_corners([b.min_lon, b.min_lat], [b.max_lon, b.max_lat]);
                let geoms = self.poly_geoms.get(layer_id);
                let mut idxs: Vec<usize> = tree
                    .locate_in_envelope_intersecting(&envelope)
                    .map(|e| e.data)
                    .collect();
                idxs.sort_unstable();
                let polys: Vec<Polygon<f64>> = idxs
                    .iter()
                    .filter_map(|i| geoms.and_then(|g| g.get(i)).cloned())
                    .collect();
                Arc::new(ops::union_polygons(&polys))
            }
            _ => empty(),
        };

        self.union_cache.lock().put(key, union.clone());
        union
    }

    /// Euclidean distance in meters (EPSG:3857) from `point` to the
    /// nearest point of `point_layer_id`. +inf when the layer is empty or
    /// is not a point layer.
    pub fn distance_to_nearest_point_m(&self, point: &PointFeature, point_layer_id: &str) -> f64 {
        let Some(tree) = self.point_trees_3857.get(point_layer_id) else {
            return f64::INFINITY;
        };
        let (x, y) = mercator::forward(point.lon, point.lat);
        match tree.nearest_neighbor(&[x, y]) {
            Some(entry) => {
                let [nx, ny] = *entry.geom();
                ((x - nx).powi(2) + (y - ny).powi(2)).sqrt()
            }
            None => f64::INFINITY,
        }
    }

    /// Current cache occupancy `(slice, union, tile)` - surfaced on /health.
    pub fn cache_sizes(&self) -> (usize, usize, usize) {
        (
            self.slice_cache.lock().len(),
            self.union_cache.lock().len(),
            self.tile_cache.lock().len(),
        )
    }
}

fn feature_bbox(feature: &LayerFeature) -> Option<([f64; 2], [f64; 2])> {
    match feature {
        LayerFeature::Point(p) => Some(([p.lon, p.lat], [p.lon, p.lat])),
        LayerFeature::Line(l) => coords_bbox(&l.coords),
        LayerFeature::Polygon(p) => coords_bbox(p.rings.first()?),
    }
}

fn coords_bbox(coords: &[(f64, f64)]) -> Option<([f64; 2], [f64; 2])> {
    if coords.len() < 2 {
        return None;
    }
    let mut lo = [f64::INFINITY, f64::INFINITY];
    let mut hi = [f64::NEG_INFINITY, f64::NEG_INFINITY];
    for &(x, y) in coords {
        lo[0] = lo[0].min(x);
        lo[1] = lo[1].min(y);
        hi[0] = hi[0].max(x);
        hi[1] = hi[1].max(y);
    }
    Some((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{LineFeature, PolygonFeature, Props};
    use crate::tiles::lonlat_to_tile;

    fn point(id: &str, lon: f64, lat: f64) -> LayerFeature {
        LayerFeature::Point(PointFeature {
            id: id.to_string(),
            lon,
            lat,
            props: Props::new(),
        })
    }

    fn test_bundle() -> LayerBundle {
        let mask = PolygonFeature::new(
            "poly",
            vec![vec![(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0), (0.0, 0.0)]],
            Props::new(),
        );
        LayerBundle::new(vec![
            Layer {
                id: "mask".to_string(),
                kind: GeometryKind::Polygons,
                title: "Mask".to_string(),
                features: vec![LayerFeature::Polygon(mask)],
                style: serde_json::Value::Null,
            },
            Layer {
                id: "places".to_string(),
                kind: GeometryKind::Points,
                title: "Places".to_string(),
                features: vec![
                    point("a", 1.0, 1.0),
                    point("b", 1.5, 1.5),
                    point("c", 5.0, 5.0),
                ],
                style: serde_json::Value::Null,
            },
        ])
    }

    #[test]
    fn slice_layers_keeps_layer_order_and_filters() {
        let index = GeoIndex::build(test_bundle());
        let sliced = index.slice_layers(&BBox::new(-1.0, -1.0, 3.0, 3.0));
        assert_eq!(sliced.layers[0].id, "mask");
        assert_eq!(sliced.layers[1].id, "places");
        assert_eq!(sliced.layers[1].features.len(), 2);
        let ids: Vec<&str> = sliced.layers[1].features.iter().map(|f| f.id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn slice_layers_is_cached() {
        let index = GeoIndex::build(test_bundle());
        let aoi = BBox::new(-1.0, -1.0, 3.0, 3.0);
        let first = index.slice_layers(&aoi);
        let second = index.slice_layers(&aoi);
        assert_eq!(first, second);
        assert_eq!(index.cache_sizes().0, 1);
    }

    #[test]
    fn union_contains_inner_points_only() {
        let index = GeoIndex::build(test_bundle());
        let union = index.polygon_union_for_aoi("mask", &BBox::new(-1.0, -1.0, 3.0, 3.0));
        assert!(ops::point_in_union(&union, 1.0, 1.0));
        assert!(!ops::point_in_union(&union, 5.0, 5.0));
    }

    #[test]
    fn union_of_non_polygon_layer_is_empty() {
        let index = GeoIndex::build(test_bundle());
        let union = index.polygon_union_for_aoi("places", &BBox::new(-1.0, -1.0, 3.0, 3.0));
        assert!(union.0.is_empty());
    }

    #[test]
    fn nearest_point_distance_is_metric() {
        let index = GeoIndex::build(test_bundle());
        let query = PointFeature {
            id: "q".to_string(),
            lon: 1.0,
            lat: 1.0,
            props: Props::new(),
        };
        let d = index.distance_to_nearest_point_m(&query, "places");
        assert!(d.abs() < 1e-6, "query sits on point a, got {d}");
        assert_eq!(
            index.distance_to_nearest_point_m(&query, "mask"),
            f64::INFINITY
        );
    }

    #[test]
    fn tiled_slice_dedupes_cross_tile_features() {
        // Craft a line crossing a tile boundary so both tiles select it.
        let z = 12;
        let (x, y) = lonlat_to_tile(z, 14.4378, 50.0755);
        let tb = tile_bbox(TileId::new(z, x, y));
        let boundary_lon = tb.max_lon;
        let mid_lat = (tb.min_lat + tb.max_lat) / 2.0;

        let line = LineFeature {
            id: "line-cross".to_string(),
            coords: vec![
                (boundary_lon - 0.0001, mid_lat),
                (boundary_lon + 0.0001, mid_lat),
            ],
            props: Props::new(),
        };
        let bundle = LayerBundle::new(vec![Layer {
            id: "ways".to_string(),
            kind: GeometryKind::Lines,
            title: "Ways".to_string(),
            features: vec![LayerFeature::Line(line)],
            style: serde_json::Value::Null,
        }]);
        let index = GeoIndex::build(bundle);

        let aoi = BBox::new(
            boundary_lon - 0.001,
            mid_lat - 0.001,
            boundary_lon + 0.001,
            mid_lat + 0.001,
        );
        assert!(tiles_for_bbox(z, &aoi).len() >= 2);

        let sliced = index.slice_layers_tiled(&aoi, z);
        assert_eq!(sliced.layers[0].features.len(), 1);
    }

    #[test]
    fn tiled_slice_equals_union_of_tile_slices() {
        let index = GeoIndex::build(test_bundle());
        let aoi = BBox::new(-1.0, -1.0, 6.0, 6.0);
        let z = 6;

        let tiled = index.slice_layers_tiled(&aoi, z);
        let mut expected: std::collections::BTreeSet<String> = Default::default();
        for tile in tiles_for_bbox(z, &aoi) {
            let sliced = index.slice_layers(&tile_bbox(tile));
            for layer in &sliced.layers {
                for f in &layer.features {
                    expected.insert(format!("{}/{}", layer.id, f.id()));
                }
            }
        }
        let mut got: std::collections::BTreeSet<String> = Default::default();
        for layer in &tiled.layers {
            for f in &layer.features {
                got.insert(format!("{}/{}", layer.id, f.id()));
            }
        }
        assert_eq!(got, expected);
    }
}
