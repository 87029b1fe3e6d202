//! # Renderer Traits and Draw State
//!
//! Layers dispatch a pass by building a [`LayerDrawState`] over their GPU
//! buffers and invoking one cached [`LayerRenderer`]. The per-vertex flags
//! buffer discriminates which vertices actually render in the pass, so one
//! draw call always covers the whole layer.

use atrium_core::{Mat4, RenderPass};
use atrium_gpu::GpuBuffer;

/// Primitive topology of a layer.
///
/// `Solid` and `Surface` are triangle variants (closed vs open surfaces);
/// only triangle variants render emphasized edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// Point clouds.
    Points,
    /// Line segments.
    Lines,
    /// Generic triangle soup.
    Triangles,
    /// Closed triangle surfaces (backface culling applies).
    Solid,
    /// Open triangle surfaces.
    Surface,
}

impl Primitive {
    /// True for the triangle-based variants.
    #[must_use]
    pub const fn is_triangles(self) -> bool {
        matches!(self, Self::Triangles | Self::Solid | Self::Surface)
    }
}

/// Pass families a renderer set caches one compiled program for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RendererFamily {
    /// Opaque and transparent fill color passes.
    Color,
    /// Depth prepass over opaque fill.
    Depth,
    /// World-normals prepass over opaque fill.
    Normals,
    /// X-ray / highlight / selection silhouettes.
    Silhouette,
    /// Emphasized edge passes.
    Edges,
    /// Pick pass writing mesh ids.
    PickMesh,
    /// Pick pass writing view-space depths.
    PickDepth,
    /// Pick pass writing world normals.
    PickNormals,
    /// Occlusion query pass.
    Occlusion,
    /// Shadow map pass.
    Shadow,
    /// Snap-pick initialization pass.
    SnapInit,
    /// Snap-pick vertex/edge pass.
    Snap,
}

/// Everything a renderer may see of one layer for one draw call.
///
/// Buffers are borrowed for the duration of the call; `None` means the
/// layer was configured without that attribute.
pub struct LayerDrawState<'a> {
    /// Layer topology.
    pub primitive: Primitive,
    /// Vertices in the shared buffers.
    pub vertex_count: usize,
    /// Indices in the index buffer (0 for non-indexed layers).
    pub index_count: usize,
    /// Instances sharing the geometry (1 for batching layers).
    pub instance_count: usize,
    /// Dequantization matrix for the positions buffer.
    pub positions_decode_matrix: Mat4,
    /// Quantized positions (3x u16 per vertex).
    pub positions: &'a dyn GpuBuffer,
    /// Packed per-vertex/per-instance render flags (u32).
    pub flags: &'a dyn GpuBuffer,
    /// RGBA colors (4x u8), if the layer carries colors.
    pub colors: Option<&'a dyn GpuBuffer>,
    /// World-space offsets (3x f32), if the offsets feature is enabled.
    pub offsets: Option<&'a dyn GpuBuffer>,
    /// Oct-encoded normals (3x i8), if supplied by the loader.
    pub normals: Option<&'a dyn GpuBuffer>,
    /// Triangle/line indices (u32), if the layer is indexed.
    pub indices: Option<&'a dyn GpuBuffer>,
    /// Edge indices (u32), triangle variants only.
    pub edge_indices: Option<&'a dyn GpuBuffer>,
    /// Per-instance model matrices (3x vec4 columns), instancing layers
    /// only. Colors/flags/offsets of instancing layers ride the regular
    /// fields at per-instance rather than per-vertex stride.
    pub instance_matrices: Option<&'a dyn GpuBuffer>,
}

/// A compiled draw program for one pass family.
///
/// Implementations bind the state's buffers and issue exactly one draw
/// call. Shader generation and pipeline state live behind this trait and
/// are not specified here.
pub trait LayerRenderer: Send + Sync {
    /// Draws the whole layer for `pass`.
    fn draw(&self, state: &LayerDrawState<'_>, pass: RenderPass);

    /// False once the GPU context has recompiled underneath this program,
    /// at which point the owning set evicts it.
    fn is_valid(&self) -> bool;
}

/// Compiles renderers on demand.
///
/// The factory is the opaque capability boundary: the engine never asks
/// how a program is built, only that one exists per (family, primitive).
pub trait RendererFactory: Send + Sync {
    /// Builds a renderer for `family` drawing `primitive` layers.
    fn create(
        &self,
        family: RendererFamily,
        primitive: Primitive,
    ) -> std::sync::Arc<dyn LayerRenderer>;
}
