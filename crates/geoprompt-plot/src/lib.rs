//! Geoprompt plot
//!
//! Builds the Plotly `plot_data` payload: base layer traces from the LOD'd
//! bundle, highlight overlays from the pre-LOD bundle (so highlights render
//! identically regardless of LOD), plus the stats meta block and the
//! focus-map view fit.

pub mod build;
pub mod traces;
pub mod view;

pub use build::{build_map_plot, PlotOptions};
pub use view::{bbox_to_zoom, fit_view_to_points};

/// Independent budgets for highlight overlays. Looser than the base-layer
/// LOD budgets; chosen to keep overlays responsive on commodity hardware.
pub const HIGHLIGHT_MAX_LINE_VERTICES: usize = 60_000;
pub const HIGHLIGHT_MAX_POLY_VERTICES: usize = 80_000;
pub const HIGHLIGHT_MAX_POINTS: usize = 5_000;
