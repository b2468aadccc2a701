//! Geoprompt agent
//!
//! The backend "agent" is a deterministic prompt router: keyword rules from
//! the scenario config map a free-form prompt to layer listings, mask
//! counting, proximity-ranked recommendations, or highlight overlays. No
//! language understanding beyond keyword matching happens here.

pub mod roads;
pub mod router;

use geoprompt_core::Highlight;

pub use roads::{build_road_type_highlights, normalize_road_types, RoadFilterStatus};
pub use router::route_prompt;

/// What the agent decided to do for a prompt.
///
/// - `message` streams to the caller word-by-word (append/commit events)
/// - `highlights` pin features across LOD; `highlight` stays as the
///   primary overlay for single-overlay consumers
/// - `focus_map` asks the frontend to recenter on the highlighted points
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub message: String,
    pub highlight: Option<Highlight>,
    pub highlights: Vec<Highlight>,
    pub focus_map: bool,
}

impl AgentResponse {
    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            highlight: None,
            highlights: Vec::new(),
            focus_map: false,
        }
    }

    pub fn with_highlight(message: impl Into<String>, highlight: Highlight, focus_map: bool) -> Self {
        Self {
            message: message.into(),
            highlight: Some(highlight.clone()),
            highlights: vec![highlight],
            focus_map,
        }
    }
}
