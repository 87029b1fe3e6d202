//! # Portions
//!
//! A portion is the unit of addressability inside a layer: one object's
//! contiguous vertex/index range (batching) or instance slot (instancing).
//! Its layout is frozen when the layer finalizes; only the contents of its
//! GPU ranges (colors, flags, offsets) mutate afterwards.

use atrium_core::Aabb;

/// Identifies a portion within its layer.
///
/// Monotonically increasing per layer; doubles as the index into the
/// layer's portion list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PortionId(pub u32);

impl PortionId {
    /// The portion list index this id addresses.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One object's slice of a layer.
#[derive(Clone, Copy, Debug)]
pub struct Portion {
    /// First vertex of the portion's range (batching) or the instance slot
    /// (instancing, with `vert_count == 1` semantics handled by the layer).
    pub vert_base: usize,
    /// Vertices in the range.
    pub vert_count: usize,
    /// First index of the portion's index range (0 when non-indexed).
    pub index_base: usize,
    /// Indices in the range.
    pub index_count: usize,
    /// World-space AABB, fed by the owning mesh; drives the layer AABB.
    pub world_aabb: Aabb,
}
