//! Geoprompt core
//!
//! Shared building blocks for the geospatial prompt backend:
//! - Feature/layer model (points, lines, polygons with typed props)
//! - WGS84 bounding boxes with rounded cache keys
//! - Slippy tile math (tile zoom bucketing, AOI tile enumeration)
//! - WebMercator (EPSG:3857) forward/inverse transforms
//! - Geometry operations (polygon union with repair, containment, distance)
//! - `GeoIndex`: STR-packed R-trees per layer with bounded AOI caches
//!
//! Everything here is engine-agnostic; both the in-memory and the DuckDB
//! engines produce bundles that flow through this index.

pub mod aoi;
pub mod cache;
pub mod features;
pub mod index;
pub mod mercator;
pub mod ops;
pub mod tiles;

pub use aoi::{AoiKey, BBox};
pub use cache::BoundedCache;
pub use features::{
    GeometryKind, Highlight, Layer, LayerBundle, LayerFeature, LineFeature, PointFeature,
    PolygonFeature, PropValue, Props,
};
pub use index::GeoIndex;
pub use tiles::TileId;
