//! # Scene Options
//!
//! Engine-wide capability switches and batch budgets, loaded once at
//! startup (TOML) and resolved into immutable per-layer snapshots at layer
//! construction. Layers never consult live options at toggle time.

use serde::{Deserialize, Serialize};

use crate::flags::SilhouetteGlow;

/// Default cap on vertices per batching layer.
///
/// Keeps every index representable in 16 bits with headroom for drivers
/// that degrade on huge vertex ranges.
pub const DEFAULT_MAX_BATCH_VERTS: usize = 5_000_000;

/// Default cap on indices per batching layer.
pub const DEFAULT_MAX_BATCH_INDICES: usize = 3 * DEFAULT_MAX_BATCH_VERTS;

/// Scene-wide options consumed by the VBO layers.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SceneOptions {
    /// Whether entities carry a per-vertex world-space offset attribute.
    ///
    /// Opt-in: the offsets buffer costs 12 bytes per vertex, so models
    /// that never nudge entities skip it entirely.
    pub entity_offsets_enabled: bool,
    /// Highlighted entities keep rendering in the color passes.
    pub highlight_glow_through: bool,
    /// Selected entities keep rendering in the color passes.
    pub selected_glow_through: bool,
    /// Vertex budget for a single batching layer.
    pub max_batch_verts: usize,
    /// Index budget for a single batching layer.
    pub max_batch_indices: usize,
}

impl Default for SceneOptions {
    fn default() -> Self {
        Self {
            entity_offsets_enabled: false,
            highlight_glow_through: false,
            selected_glow_through: false,
            max_batch_verts: DEFAULT_MAX_BATCH_VERTS,
            max_batch_indices: DEFAULT_MAX_BATCH_INDICES,
        }
    }
}

impl SceneOptions {
    /// The silhouette glow-through snapshot consumed by flag packing.
    #[must_use]
    pub const fn silhouette_glow(&self) -> SilhouetteGlow {
        SilhouetteGlow {
            highlight_glow_through: self.highlight_glow_through,
            selected_glow_through: self.selected_glow_through,
        }
    }
}
