//! # Packed Per-Vertex Render Flags
//!
//! Every vertex (batching) or instance (instancing) carries one 32-bit
//! flags word telling the shaders which render passes include it. The word
//! is a pure function of the owning entity's boolean state, computed here
//! and nowhere else.
//!
//! ## Bit layout (shader ABI - do not drift)
//!
//! ```text
//! bits  0..4   color pass      (NotRendered / ColorOpaque / ColorTransparent)
//! bits  4..8   silhouette pass (NotRendered / Highlighted / Selected / Xrayed)
//! bits  8..12  edges pass      (NotRendered / edge variants)
//! bits 12..16  pick pass       (NotRendered / Pick)
//! bit  16      clippable
//! ```
//!
//! The 4-bit fields at offsets 0/4/12/16 are consumed verbatim by the WGSL
//! vertex stages; a vertex whose field does not match the active pass is
//! collapsed to a degenerate position and discarded.

/// Entity-level render state as a set of named boolean bits.
///
/// This is the input alphabet of [`pack_vertex_flags`]. The bits mirror the
/// per-object toggles exposed by the scene model (visible, x-rayed,
/// highlighted, selected, edges, pickable, clippable, culled).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EntityFlags(u32);

impl EntityFlags {
    /// No bits set.
    pub const EMPTY: Self = Self(0);
    /// Entity is visible.
    pub const VISIBLE: Self = Self(1);
    /// Entity is culled (overrides visibility without clearing it).
    pub const CULLED: Self = Self(1 << 1);
    /// Entity participates in picking.
    pub const PICKABLE: Self = Self(1 << 2);
    /// Entity is clipped by section planes.
    pub const CLIPPABLE: Self = Self(1 << 3);
    /// Entity renders in the x-ray silhouette style.
    pub const XRAYED: Self = Self(1 << 4);
    /// Entity renders in the highlight silhouette style.
    pub const HIGHLIGHTED: Self = Self(1 << 5);
    /// Entity renders in the selection silhouette style.
    pub const SELECTED: Self = Self(1 << 6);
    /// Entity renders emphasized edges.
    pub const EDGES: Self = Self(1 << 7);

    /// Creates a flag set from a raw bit pattern.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bit pattern.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every bit of `other` is set in `self`.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Returns `self` with the bits of `other` set.
    #[inline]
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns `self` with the bits of `other` cleared.
    #[inline]
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Returns `self` with the bits of `other` set or cleared per `on`.
    #[inline]
    #[must_use]
    pub const fn set(self, other: Self, on: bool) -> Self {
        if on {
            self.with(other)
        } else {
            self.without(other)
        }
    }
}

/// Render passes a vertex can be routed to by its packed flags word.
///
/// The numeric values are part of the shader ABI: each 4-bit field of the
/// packed word holds one of these values, and the shaders compare against
/// the pass they are currently executing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RenderPass {
    /// Vertex is skipped in the field's pass family.
    NotRendered = 0,
    /// Opaque fill color pass.
    ColorOpaque = 1,
    /// Blended fill color pass.
    ColorTransparent = 2,
    /// Highlight silhouette pass.
    SilhouetteHighlighted = 3,
    /// Selection silhouette pass.
    SilhouetteSelected = 4,
    /// X-ray silhouette pass.
    SilhouetteXrayed = 5,
    /// Emphasized edges over opaque fill.
    EdgesColorOpaque = 6,
    /// Emphasized edges over blended fill.
    EdgesColorTransparent = 7,
    /// Emphasized edges in highlight style.
    EdgesHighlighted = 8,
    /// Emphasized edges in selection style.
    EdgesSelected = 9,
    /// Emphasized edges in x-ray style.
    EdgesXrayed = 10,
    /// GPU pick pass (mesh / depth / normals / snap all share it).
    Pick = 11,
}

impl RenderPass {
    /// The pass value as a u32 for packing into a flags field.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u32 {
        self as u32
    }
}

/// Whether the silhouette materials glow through the fill color pass.
///
/// Resolved once from [`crate::options::SceneOptions`] when a layer is
/// constructed; the flag encoder gates the color pass on it so silhouetted
/// geometry is not double-drawn unless the material asks for it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SilhouetteGlow {
    /// Highlighted entities also render in the color passes.
    pub highlight_glow_through: bool,
    /// Selected entities also render in the color passes.
    pub selected_glow_through: bool,
}

/// Bit offset of the color pass field.
const COLOR_SHIFT: u32 = 0;
/// Bit offset of the silhouette pass field.
const SILHOUETTE_SHIFT: u32 = 4;
/// Bit offset of the edges pass field.
const EDGES_SHIFT: u32 = 8;
/// Bit offset of the pick pass field.
const PICK_SHIFT: u32 = 12;
/// Bit offset of the clippable bit.
const CLIPPABLE_SHIFT: u32 = 16;

/// Computes the packed 32-bit flags word for one vertex/instance.
///
/// This is the single source of truth for flag encoding: the deferred
/// (bulk-init) and immediate (toggle) write paths both call it, which keeps
/// them bit-identical by construction.
///
/// Selection rules:
/// - Color pass: `NotRendered` when invisible, culled, x-rayed, or
///   silhouetted without glow-through; otherwise opaque/transparent per
///   `transparent`.
/// - Silhouette pass: priority selected > highlighted > x-rayed; requires
///   visible and not culled.
/// - Edges pass: mirrors the silhouette priority when the EDGES bit is set,
///   falling back to the fill color variant.
/// - Pick pass: requires visible, not culled, pickable.
/// - Clippable: bit 16, verbatim from the entity flag.
#[must_use]
pub fn pack_vertex_flags(flags: EntityFlags, transparent: bool, glow: SilhouetteGlow) -> u32 {
    let visible = flags.contains(EntityFlags::VISIBLE);
    let culled = flags.contains(EntityFlags::CULLED);
    let xrayed = flags.contains(EntityFlags::XRAYED);
    let highlighted = flags.contains(EntityFlags::HIGHLIGHTED);
    let selected = flags.contains(EntityFlags::SELECTED);
    let edges = flags.contains(EntityFlags::EDGES);
    let pickable = flags.contains(EntityFlags::PICKABLE);
    let clippable = flags.contains(EntityFlags::CLIPPABLE);

    let color_suppressed = (highlighted && !glow.highlight_glow_through)
        || (selected && !glow.selected_glow_through);

    let color_pass = if !visible || culled || xrayed || color_suppressed {
        RenderPass::NotRendered
    } else if transparent {
        RenderPass::ColorTransparent
    } else {
        RenderPass::ColorOpaque
    };

    let silhouette_pass = if !visible || culled {
        RenderPass::NotRendered
    } else if selected {
        RenderPass::SilhouetteSelected
    } else if highlighted {
        RenderPass::SilhouetteHighlighted
    } else if xrayed {
        RenderPass::SilhouetteXrayed
    } else {
        RenderPass::NotRendered
    };

    let edges_pass = if !visible || culled || !edges {
        RenderPass::NotRendered
    } else if selected {
        RenderPass::EdgesSelected
    } else if highlighted {
        RenderPass::EdgesHighlighted
    } else if xrayed {
        RenderPass::EdgesXrayed
    } else if transparent {
        RenderPass::EdgesColorTransparent
    } else {
        RenderPass::EdgesColorOpaque
    };

    let pick_pass = if visible && !culled && pickable {
        RenderPass::Pick
    } else {
        RenderPass::NotRendered
    };

    (color_pass.value() << COLOR_SHIFT)
        | (silhouette_pass.value() << SILHOUETTE_SHIFT)
        | (edges_pass.value() << EDGES_SHIFT)
        | (pick_pass.value() << PICK_SHIFT)
        | (u32::from(clippable) << CLIPPABLE_SHIFT)
}

/// Extracts the color pass field from a packed flags word.
#[inline]
#[must_use]
pub const fn unpack_color_pass(word: u32) -> u32 {
    (word >> COLOR_SHIFT) & 0xF
}

/// Extracts the silhouette pass field from a packed flags word.
#[inline]
#[must_use]
pub const fn unpack_silhouette_pass(word: u32) -> u32 {
    (word >> SILHOUETTE_SHIFT) & 0xF
}

/// Extracts the edges pass field from a packed flags word.
#[inline]
#[must_use]
pub const fn unpack_edges_pass(word: u32) -> u32 {
    (word >> EDGES_SHIFT) & 0xF
}

/// Extracts the pick pass field from a packed flags word.
#[inline]
#[must_use]
pub const fn unpack_pick_pass(word: u32) -> u32 {
    (word >> PICK_SHIFT) & 0xF
}

/// Extracts the clippable bit from a packed flags word.
#[inline]
#[must_use]
pub const fn unpack_clippable(word: u32) -> bool {
    (word >> CLIPPABLE_SHIFT) & 0x1 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_GLOW: SilhouetteGlow = SilhouetteGlow {
        highlight_glow_through: false,
        selected_glow_through: false,
    };

    #[test]
    fn test_invisible_renders_nothing() {
        let word = pack_vertex_flags(EntityFlags::EMPTY, false, NO_GLOW);
        assert_eq!(word, 0);
    }

    #[test]
    fn test_visible_opaque() {
        let word = pack_vertex_flags(EntityFlags::VISIBLE, false, NO_GLOW);
        assert_eq!(unpack_color_pass(word), RenderPass::ColorOpaque.value());
        assert_eq!(unpack_silhouette_pass(word), 0);
        assert_eq!(unpack_pick_pass(word), 0);
    }

    #[test]
    fn test_visible_transparent() {
        let word = pack_vertex_flags(EntityFlags::VISIBLE, true, NO_GLOW);
        assert_eq!(
            unpack_color_pass(word),
            RenderPass::ColorTransparent.value()
        );
    }

    #[test]
    fn test_culled_overrides_everything() {
        let flags = EntityFlags::VISIBLE
            .with(EntityFlags::CULLED)
            .with(EntityFlags::SELECTED)
            .with(EntityFlags::PICKABLE)
            .with(EntityFlags::EDGES);
        let word = pack_vertex_flags(flags, false, NO_GLOW);
        assert_eq!(unpack_color_pass(word), 0);
        assert_eq!(unpack_silhouette_pass(word), 0);
        assert_eq!(unpack_edges_pass(word), 0);
        assert_eq!(unpack_pick_pass(word), 0);
    }

    #[test]
    fn test_xray_moves_vertex_out_of_color_pass() {
        let flags = EntityFlags::VISIBLE.with(EntityFlags::XRAYED);
        let word = pack_vertex_flags(flags, false, NO_GLOW);
        assert_eq!(unpack_color_pass(word), 0);
        assert_eq!(
            unpack_silhouette_pass(word),
            RenderPass::SilhouetteXrayed.value()
        );
    }

    #[test]
    fn test_silhouette_priority_selected_over_highlighted_over_xrayed() {
        let all = EntityFlags::VISIBLE
            .with(EntityFlags::XRAYED)
            .with(EntityFlags::HIGHLIGHTED)
            .with(EntityFlags::SELECTED);
        let word = pack_vertex_flags(all, false, NO_GLOW);
        assert_eq!(
            unpack_silhouette_pass(word),
            RenderPass::SilhouetteSelected.value()
        );

        let hx = EntityFlags::VISIBLE
            .with(EntityFlags::XRAYED)
            .with(EntityFlags::HIGHLIGHTED);
        let word = pack_vertex_flags(hx, false, NO_GLOW);
        assert_eq!(
            unpack_silhouette_pass(word),
            RenderPass::SilhouetteHighlighted.value()
        );
    }

    #[test]
    fn test_glow_through_keeps_color_pass() {
        let glow = SilhouetteGlow {
            highlight_glow_through: true,
            selected_glow_through: false,
        };
        let flags = EntityFlags::VISIBLE.with(EntityFlags::HIGHLIGHTED);
        let word = pack_vertex_flags(flags, false, glow);
        assert_eq!(unpack_color_pass(word), RenderPass::ColorOpaque.value());

        let flags = EntityFlags::VISIBLE.with(EntityFlags::SELECTED);
        let word = pack_vertex_flags(flags, false, glow);
        assert_eq!(unpack_color_pass(word), 0);
    }

    #[test]
    fn test_pick_requires_visible_and_pickable() {
        let flags = EntityFlags::VISIBLE.with(EntityFlags::PICKABLE);
        let word = pack_vertex_flags(flags, false, NO_GLOW);
        assert_eq!(unpack_pick_pass(word), RenderPass::Pick.value());

        let word = pack_vertex_flags(EntityFlags::PICKABLE, false, NO_GLOW);
        assert_eq!(unpack_pick_pass(word), 0);
    }

    #[test]
    fn test_clippable_is_bit_16() {
        let flags = EntityFlags::CLIPPABLE;
        let word = pack_vertex_flags(flags, false, NO_GLOW);
        assert_eq!(word, 1 << 16);
        assert!(unpack_clippable(word));
    }

    #[test]
    fn test_edges_follow_silhouette_priority() {
        let flags = EntityFlags::VISIBLE
            .with(EntityFlags::EDGES)
            .with(EntityFlags::SELECTED);
        let word = pack_vertex_flags(flags, false, NO_GLOW);
        assert_eq!(unpack_edges_pass(word), RenderPass::EdgesSelected.value());

        let flags = EntityFlags::VISIBLE.with(EntityFlags::EDGES);
        let word = pack_vertex_flags(flags, true, NO_GLOW);
        assert_eq!(
            unpack_edges_pass(word),
            RenderPass::EdgesColorTransparent.value()
        );
    }

    #[test]
    fn test_exhaustive_encoding_is_total() {
        // Every combination of the 8 entity bits plus transparency must
        // produce a word whose fields hold defined pass values.
        for bits in 0_u32..256 {
            for transparent in [false, true] {
                let word =
                    pack_vertex_flags(EntityFlags::from_bits(bits), transparent, NO_GLOW);
                assert!(unpack_color_pass(word) <= RenderPass::ColorTransparent.value());
                assert!(unpack_silhouette_pass(word) <= RenderPass::SilhouetteXrayed.value());
                assert!(unpack_pick_pass(word) <= RenderPass::Pick.value());
                assert_eq!(word >> 17, 0);
            }
        }
    }
}
