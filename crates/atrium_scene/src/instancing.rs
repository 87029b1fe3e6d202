//! # Instancing Geometry Layer
//!
//! The sibling strategy to batching: one shared geometry drawn many times
//! in a single instanced call, with per-instance modeling matrix, color,
//! flags and offset attributes. Appropriate when many objects reuse the
//! same mesh (bolts, mullions, repeated fittings); batching remains the
//! default for unique geometry.
//!
//! The lifecycle contract matches [`crate::batching::BatchingLayer`]:
//! portions only before `finalize`, state changes and draws only after,
//! `finalize` idempotent. Per-portion updates touch exactly one instance
//! slot of the attribute buffers.

use std::sync::Arc;

use atrium_core::{
    math, pack_vertex_flags, Aabb, EntityFlags, Mat4, RenderPass, SceneOptions, SilhouetteGlow,
};
use atrium_gpu::{BufferUsage, GpuBackend, GpuBuffer};
use atrium_rendering::{LayerDrawState, Primitive, RendererFamily, RendererSet};

use crate::counts::LayerCounts;
use crate::portion::{Portion, PortionId};

/// Floats per packed instance matrix (three vec4 rows).
const MATRIX_FLOATS: usize = 12;

/// Geometry shared by every instance of an instancing layer.
///
/// Positions are stored quantized; raw input is compressed against its own
/// AABB at construction, so the decode matrix is fixed before any layer
/// sees the geometry.
pub struct SharedGeometry {
    /// Topology of the shared mesh.
    pub primitive: Primitive,
    /// Quantized positions, 3x u16 per vertex.
    pub positions_quantized: Vec<u16>,
    /// Dequantization matrix for the positions.
    pub decode_matrix: Mat4,
    /// Oct-encoded normals, 3x i8 per vertex (empty when unsupplied).
    pub normals: Vec<i8>,
    /// Triangle/line indices (empty for non-indexed meshes).
    pub indices: Vec<u32>,
    /// Edge indices (triangle variants only).
    pub edge_indices: Vec<u32>,
    /// Local-space AABB of the mesh.
    pub local_aabb: Aabb,
}

impl SharedGeometry {
    /// Builds shared geometry from raw local-space positions, quantizing
    /// them against their own AABB.
    ///
    /// # Panics
    ///
    /// Panics when `positions` is not a whole number of xyz triples.
    #[must_use]
    pub fn from_raw(
        primitive: Primitive,
        positions: &[f32],
        normals: Vec<i8>,
        indices: Vec<u32>,
        edge_indices: Vec<u32>,
    ) -> Self {
        assert!(positions.len() % 3 == 0, "positions must be xyz triples");
        let mut local_aabb = Aabb::collapsed();
        for xyz in positions.chunks_exact(3) {
            local_aabb.expand_point([f64::from(xyz[0]), f64::from(xyz[1]), f64::from(xyz[2])]);
        }
        let mut positions_quantized = vec![0_u16; positions.len()];
        math::quantize_positions(positions, &local_aabb, &mut positions_quantized);
        Self {
            primitive,
            positions_quantized,
            decode_matrix: math::positions_decode_matrix(&local_aabb),
            normals,
            indices,
            edge_indices,
            local_aabb,
        }
    }

    /// Builds shared geometry from already-quantized positions and the
    /// decode matrix they were compressed against.
    #[must_use]
    pub fn from_quantized(
        primitive: Primitive,
        positions_quantized: Vec<u16>,
        decode_matrix: Mat4,
        normals: Vec<i8>,
        indices: Vec<u32>,
        edge_indices: Vec<u32>,
        local_aabb: Aabb,
    ) -> Self {
        assert!(
            positions_quantized.len() % 3 == 0,
            "positions must be xyz triples"
        );
        Self {
            primitive,
            positions_quantized,
            decode_matrix,
            normals,
            indices,
            edge_indices,
            local_aabb,
        }
    }

    /// Vertices in the shared mesh.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.positions_quantized.len() / 3
    }
}

/// One instance, as handed to `create_portion`.
#[derive(Clone, Copy, Debug)]
pub struct InstanceDescriptor {
    /// Modeling matrix placing this instance in the world (column-major).
    pub matrix: Mat4,
    /// RGBA color (opacity in alpha).
    pub color: [u8; 4],
    /// World-space AABB of the placed instance.
    pub world_aabb: Aabb,
}

/// CPU staging for instance attributes, dropped at finalize.
#[derive(Default)]
struct InstanceStaging {
    /// Packed matrices, [`MATRIX_FLOATS`] per instance.
    matrices: Vec<f32>,
    /// RGBA colors, 4 bytes per instance.
    colors: Vec<u8>,
}

/// GPU-resident buffers of a finalized instancing layer.
struct GpuState {
    /// Shared quantized positions. Static.
    positions: Box<dyn GpuBuffer>,
    /// Shared normals. Static.
    normals: Option<Box<dyn GpuBuffer>>,
    /// Shared indices. Static.
    indices: Option<Box<dyn GpuBuffer>>,
    /// Shared edge indices. Static.
    edge_indices: Option<Box<dyn GpuBuffer>>,
    /// Per-instance packed matrices. Dynamic.
    matrices: Box<dyn GpuBuffer>,
    /// Per-instance RGBA colors. Dynamic.
    colors: Box<dyn GpuBuffer>,
    /// Per-instance packed render flags (u32). Dynamic.
    flags: Box<dyn GpuBuffer>,
    /// Per-instance world-space offsets. Dynamic, opt-in.
    offsets: Option<Box<dyn GpuBuffer>>,
}

/// An instancing geometry layer.
pub struct InstancingLayer {
    /// The mesh every portion instantiates.
    geometry: Arc<SharedGeometry>,
    /// Whether this layer carries the per-instance offsets attribute.
    offsets_enabled: bool,
    /// Silhouette glow-through snapshot for flag packing.
    glow: SilhouetteGlow,
    /// Shared renderer cache for this scene/primitive.
    renderers: Arc<RendererSet>,
    /// CPU staging; `None` once finalized.
    staging: Option<InstanceStaging>,
    /// Frozen portion layout (one instance slot each).
    portions: Vec<Portion>,
    /// Exact census of portion states.
    counts: LayerCounts,
    /// Cached union of portion world AABBs.
    world_aabb: Aabb,
    /// Set when a portion AABB changed since the cache was built.
    world_aabb_dirty: bool,
    /// GPU buffers; `Some` once finalized.
    gpu: Option<GpuState>,
    /// Per-instance CPU flag image for the deferred init path.
    deferred_flags: Option<Vec<u32>>,
}

impl InstancingLayer {
    /// Creates an empty layer instancing `geometry`.
    #[must_use]
    pub fn new(
        geometry: Arc<SharedGeometry>,
        options: &SceneOptions,
        renderers: Arc<RendererSet>,
    ) -> Self {
        Self {
            geometry,
            offsets_enabled: options.entity_offsets_enabled,
            glow: options.silhouette_glow(),
            renderers,
            staging: Some(InstanceStaging::default()),
            portions: Vec::new(),
            counts: LayerCounts::new(),
            world_aabb: Aabb::collapsed(),
            world_aabb_dirty: false,
            gpu: None,
            deferred_flags: None,
        }
    }

    /// True once `finalize` ran.
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.gpu.is_some()
    }

    /// The layer's census of portion states.
    #[must_use]
    pub const fn counts(&self) -> &LayerCounts {
        &self.counts
    }

    /// The shared geometry this layer instantiates.
    #[must_use]
    pub fn geometry(&self) -> &Arc<SharedGeometry> {
        &self.geometry
    }

    /// The layer's topology.
    #[must_use]
    pub fn primitive(&self) -> Primitive {
        self.geometry.primitive
    }

    /// The portion layout entry for `portion`.
    ///
    /// # Panics
    ///
    /// Panics on an id from another layer.
    #[must_use]
    pub fn portion(&self, portion: PortionId) -> &Portion {
        &self.portions[portion.index()]
    }

    /// Appends one instance and returns its portion id.
    ///
    /// # Panics
    ///
    /// Panics after `finalize`.
    pub fn create_portion(&mut self, instance: &InstanceDescriptor) -> PortionId {
        assert!(
            !self.is_finalized(),
            "create_portion called on finalized layer"
        );
        let staging = self
            .staging
            .as_mut()
            .expect("staging present until finalize");
        let m = &instance.matrix;
        // Three vec4 rows of the column-major matrix, the shape instanced
        // vertex attributes want.
        staging.matrices.extend_from_slice(&[
            m[0], m[4], m[8], m[12], //
            m[1], m[5], m[9], m[13], //
            m[2], m[6], m[10], m[14],
        ]);
        staging.colors.extend_from_slice(&instance.color);

        let slot = self.portions.len();
        self.world_aabb.expand(&instance.world_aabb);
        self.portions.push(Portion {
            vert_base: slot,
            vert_count: 1,
            index_base: 0,
            index_count: 0,
            world_aabb: instance.world_aabb,
        });
        self.counts.add_portion();
        PortionId(u32::try_from(slot).expect("portion count fits u32"))
    }

    /// Uploads the shared geometry and instance attributes, freezing the
    /// portion layout. Idempotent.
    pub fn finalize(&mut self, backend: &dyn GpuBackend) {
        if self.is_finalized() {
            return;
        }
        let staging = self.staging.take().expect("staging present until finalize");
        let instances = self.portions.len();
        let geometry = &self.geometry;

        let positions = backend.create_buffer(
            BufferUsage::Static,
            bytemuck::cast_slice(&geometry.positions_quantized),
        );
        let normals = (!geometry.normals.is_empty()).then(|| {
            backend.create_buffer(BufferUsage::Static, bytemuck::cast_slice(&geometry.normals))
        });
        let indices = (!geometry.indices.is_empty()).then(|| {
            backend.create_buffer(BufferUsage::Static, bytemuck::cast_slice(&geometry.indices))
        });
        let edge_indices = (!geometry.edge_indices.is_empty()).then(|| {
            backend.create_buffer(
                BufferUsage::Static,
                bytemuck::cast_slice(&geometry.edge_indices),
            )
        });
        let matrices =
            backend.create_buffer(BufferUsage::Dynamic, bytemuck::cast_slice(&staging.matrices));
        let colors = backend.create_buffer(BufferUsage::Dynamic, &staging.colors);
        let flags = backend.create_empty_buffer(BufferUsage::Dynamic, instances * 4);
        let offsets = self
            .offsets_enabled
            .then(|| backend.create_empty_buffer(BufferUsage::Dynamic, instances * 12));

        self.gpu = Some(GpuState {
            positions,
            normals,
            indices,
            edge_indices,
            matrices,
            colors,
            flags,
            offsets,
        });
        tracing::debug!(instances, "instancing layer finalized");
    }

    fn gpu(&self) -> &GpuState {
        self.gpu
            .as_ref()
            .expect("layer must be finalized before state changes and drawing")
    }

    /// Recomputes and writes one instance's flag word (immediate path).
    fn write_portion_flags(&self, portion: PortionId, flags: EntityFlags, transparent: bool) {
        let word = pack_vertex_flags(flags, transparent, self.glow);
        let slot = self.portion(portion).vert_base;
        // Same byte image as the deferred bulk upload, which casts whole
        // words; both paths must stay bit-identical.
        self.gpu()
            .flags
            .write(slot * 4, bytemuck::bytes_of(&word))
            .expect("instance slot is inside the flags buffer");
    }

    /// Writes one instance's initial flags into the deferred CPU image and
    /// seeds the aggregate counters; [`Self::flush_init_flags`] uploads the
    /// whole image in one call.
    ///
    /// # Panics
    ///
    /// Panics before `finalize`.
    pub fn init_flags(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        assert!(
            self.is_finalized(),
            "layer must be finalized before state changes and drawing"
        );
        let word = pack_vertex_flags(flags, transparent, self.glow);
        let instances = self.portions.len();
        let image = self.deferred_flags.get_or_insert_with(|| vec![0; instances]);
        image[portion.index()] = word;

        if flags.contains(EntityFlags::VISIBLE) {
            self.counts.set_visible(true);
            mirror.set_visible(true);
        }
        if flags.contains(EntityFlags::XRAYED) {
            self.counts.set_xrayed(true);
            mirror.set_xrayed(true);
        }
        if flags.contains(EntityFlags::HIGHLIGHTED) {
            self.counts.set_highlighted(true);
            mirror.set_highlighted(true);
        }
        if flags.contains(EntityFlags::SELECTED) {
            self.counts.set_selected(true);
            mirror.set_selected(true);
        }
        if flags.contains(EntityFlags::CLIPPABLE) {
            self.counts.set_clippable(true);
            mirror.set_clippable(true);
        }
        if flags.contains(EntityFlags::EDGES) {
            self.counts.set_edges(true);
            mirror.set_edges(true);
        }
        if flags.contains(EntityFlags::PICKABLE) {
            self.counts.set_pickable(true);
            mirror.set_pickable(true);
        }
        if flags.contains(EntityFlags::CULLED) {
            self.counts.set_culled(true);
            mirror.set_culled(true);
        }
        if transparent {
            self.counts.set_transparent(true);
            mirror.set_transparent(true);
        }
    }

    /// Uploads the deferred flag image in one GPU write and drops it.
    pub fn flush_init_flags(&mut self) {
        let Some(image) = self.deferred_flags.take() else {
            return;
        };
        self.gpu()
            .flags
            .write(0, bytemuck::cast_slice(&image))
            .expect("deferred flag image matches the flags buffer size");
    }

    /// Updates the visible state of one portion.
    ///
    /// # Panics
    ///
    /// Panics before `finalize`.
    pub fn set_visible(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        let on = flags.contains(EntityFlags::VISIBLE);
        self.counts.set_visible(on);
        mirror.set_visible(on);
        self.write_portion_flags(portion, flags, transparent);
    }

    /// Updates the highlighted state of one portion.
    ///
    /// # Panics
    ///
    /// Panics before `finalize`.
    pub fn set_highlighted(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        let on = flags.contains(EntityFlags::HIGHLIGHTED);
        self.counts.set_highlighted(on);
        mirror.set_highlighted(on);
        self.write_portion_flags(portion, flags, transparent);
    }

    /// Updates the x-rayed state of one portion.
    ///
    /// # Panics
    ///
    /// Panics before `finalize`.
    pub fn set_xrayed(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        let on = flags.contains(EntityFlags::XRAYED);
        self.counts.set_xrayed(on);
        mirror.set_xrayed(on);
        self.write_portion_flags(portion, flags, transparent);
    }

    /// Updates the selected state of one portion.
    ///
    /// # Panics
    ///
    /// Panics before `finalize`.
    pub fn set_selected(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        let on = flags.contains(EntityFlags::SELECTED);
        self.counts.set_selected(on);
        mirror.set_selected(on);
        self.write_portion_flags(portion, flags, transparent);
    }

    /// Updates the edges state of one portion.
    ///
    /// # Panics
    ///
    /// Panics before `finalize`.
    pub fn set_edges(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        let on = flags.contains(EntityFlags::EDGES);
        self.counts.set_edges(on);
        mirror.set_edges(on);
        self.write_portion_flags(portion, flags, transparent);
    }

    /// Updates the clippable state of one portion.
    ///
    /// # Panics
    ///
    /// Panics before `finalize`.
    pub fn set_clippable(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        let on = flags.contains(EntityFlags::CLIPPABLE);
        self.counts.set_clippable(on);
        mirror.set_clippable(on);
        self.write_portion_flags(portion, flags, transparent);
    }

    /// Updates the culled state of one portion.
    ///
    /// # Panics
    ///
    /// Panics before `finalize`.
    pub fn set_culled(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        let on = flags.contains(EntityFlags::CULLED);
        self.counts.set_culled(on);
        mirror.set_culled(on);
        self.write_portion_flags(portion, flags, transparent);
    }

    /// Updates the pickable state of one portion.
    ///
    /// # Panics
    ///
    /// Panics before `finalize`.
    pub fn set_pickable(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        let on = flags.contains(EntityFlags::PICKABLE);
        self.counts.set_pickable(on);
        mirror.set_pickable(on);
        self.write_portion_flags(portion, flags, transparent);
    }

    /// Updates the transparency of one portion.
    ///
    /// # Panics
    ///
    /// Panics before `finalize`.
    pub fn set_transparent(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        self.counts.set_transparent(transparent);
        mirror.set_transparent(transparent);
        self.write_portion_flags(portion, flags, transparent);
    }

    /// Rewrites one instance's color bytes. O(1).
    ///
    /// # Panics
    ///
    /// Panics before `finalize`.
    pub fn set_color(&mut self, portion: PortionId, rgba: [u8; 4]) {
        let slot = self.portion(portion).vert_base;
        self.gpu()
            .colors
            .write(slot * 4, &rgba)
            .expect("instance slot is inside the color buffer");
    }

    /// Replaces one instance's modeling matrix. O(1).
    ///
    /// # Panics
    ///
    /// Panics before `finalize`.
    pub fn set_matrix(&mut self, portion: PortionId, matrix: &Mat4) {
        let slot = self.portion(portion).vert_base;
        let m = matrix;
        let packed: [f32; MATRIX_FLOATS] = [
            m[0], m[4], m[8], m[12], //
            m[1], m[5], m[9], m[13], //
            m[2], m[6], m[10], m[14],
        ];
        self.gpu()
            .matrices
            .write(slot * MATRIX_FLOATS * 4, bytemuck::cast_slice(&packed))
            .expect("instance slot is inside the matrix buffer");
    }

    /// Rewrites one instance's world-space offset.
    ///
    /// Soft failure: logs an error and returns when the scene was
    /// configured without entity offsets.
    ///
    /// # Panics
    ///
    /// Panics before `finalize`.
    pub fn set_offset(&mut self, portion: PortionId, offset: [f32; 3]) {
        if !self.offsets_enabled {
            tracing::error!(
                "set_offset ignored: scene options have entity_offsets_enabled = false"
            );
            return;
        }
        let slot = self.portion(portion).vert_base;
        self.gpu()
            .offsets
            .as_ref()
            .expect("offsets buffer exists when the feature is enabled")
            .write(slot * 12, bytemuck::cast_slice(&offset))
            .expect("instance slot is inside the offsets buffer");
    }

    /// Replaces one portion's world AABB and marks the layer AABB dirty.
    pub fn set_portion_aabb(&mut self, portion: PortionId, aabb: Aabb) {
        self.portions[portion.index()].world_aabb = aabb;
        self.world_aabb_dirty = true;
    }

    /// The layer's world AABB, recomputed lazily after portion AABB
    /// changes.
    pub fn aabb(&mut self) -> Aabb {
        if self.world_aabb_dirty {
            let mut aabb = Aabb::collapsed();
            for portion in &self.portions {
                aabb.expand(&portion.world_aabb);
            }
            self.world_aabb = aabb;
            self.world_aabb_dirty = false;
        }
        self.world_aabb
    }

    fn draw_state(&self) -> LayerDrawState<'_> {
        let gpu = self.gpu();
        LayerDrawState {
            primitive: self.geometry.primitive,
            vertex_count: self.geometry.vertex_count(),
            index_count: self.geometry.indices.len(),
            instance_count: self.portions.len(),
            positions_decode_matrix: self.geometry.decode_matrix,
            positions: gpu.positions.as_ref(),
            flags: gpu.flags.as_ref(),
            colors: Some(gpu.colors.as_ref()),
            offsets: gpu.offsets.as_deref(),
            normals: gpu.normals.as_deref(),
            indices: gpu.indices.as_deref(),
            edge_indices: gpu.edge_indices.as_deref(),
            instance_matrices: Some(gpu.matrices.as_ref()),
        }
    }

    fn dispatch(&self, family: RendererFamily, pass: RenderPass) {
        self.renderers.get(family).draw(&self.draw_state(), pass);
    }

    /// Draws the opaque fill color pass.
    pub fn draw_color_opaque(&self) {
        if self.counts.draws_color_opaque() {
            self.dispatch(RendererFamily::Color, RenderPass::ColorOpaque);
        }
    }

    /// Draws the blended fill color pass.
    pub fn draw_color_transparent(&self) {
        if self.counts.draws_color_transparent() {
            self.dispatch(RendererFamily::Color, RenderPass::ColorTransparent);
        }
    }

    /// Draws the opaque depth prepass.
    pub fn draw_depth(&self) {
        if self.counts.draws_prepass() {
            self.dispatch(RendererFamily::Depth, RenderPass::ColorOpaque);
        }
    }

    /// Draws the opaque normals prepass.
    pub fn draw_normals(&self) {
        if self.counts.draws_prepass() {
            self.dispatch(RendererFamily::Normals, RenderPass::ColorOpaque);
        }
    }

    /// Draws the x-ray silhouette pass.
    pub fn draw_silhouette_xrayed(&self) {
        if self.counts.draws_silhouette_xrayed() {
            self.dispatch(RendererFamily::Silhouette, RenderPass::SilhouetteXrayed);
        }
    }

    /// Draws the highlight silhouette pass.
    pub fn draw_silhouette_highlighted(&self) {
        if self.counts.draws_silhouette_highlighted() {
            self.dispatch(
                RendererFamily::Silhouette,
                RenderPass::SilhouetteHighlighted,
            );
        }
    }

    /// Draws the selection silhouette pass.
    pub fn draw_silhouette_selected(&self) {
        if self.counts.draws_silhouette_selected() {
            self.dispatch(RendererFamily::Silhouette, RenderPass::SilhouetteSelected);
        }
    }

    /// Points and lines have no edge representation.
    fn edges_apply(&self) -> bool {
        self.geometry.primitive.is_triangles() && self.counts.draws_edges()
    }

    /// Draws emphasized edges over opaque fill. No-op for points/lines.
    pub fn draw_edges_color_opaque(&self) {
        if self.edges_apply() {
            self.dispatch(RendererFamily::Edges, RenderPass::EdgesColorOpaque);
        }
    }

    /// Draws emphasized edges over blended fill. No-op for points/lines.
    pub fn draw_edges_color_transparent(&self) {
        if self.edges_apply() && self.counts.transparent > 0 {
            self.dispatch(RendererFamily::Edges, RenderPass::EdgesColorTransparent);
        }
    }

    /// Draws x-ray-styled edges. No-op for points/lines.
    pub fn draw_edges_xrayed(&self) {
        if self.edges_apply() && self.counts.xrayed > 0 {
            self.dispatch(RendererFamily::Edges, RenderPass::EdgesXrayed);
        }
    }

    /// Draws highlight-styled edges. No-op for points/lines.
    pub fn draw_edges_highlighted(&self) {
        if self.edges_apply() && self.counts.highlighted > 0 {
            self.dispatch(RendererFamily::Edges, RenderPass::EdgesHighlighted);
        }
    }

    /// Draws selection-styled edges. No-op for points/lines.
    pub fn draw_edges_selected(&self) {
        if self.edges_apply() && self.counts.selected > 0 {
            self.dispatch(RendererFamily::Edges, RenderPass::EdgesSelected);
        }
    }

    /// Draws the mesh-id pick pass.
    pub fn draw_pick_mesh(&self) {
        if self.counts.draws_pick() {
            self.dispatch(RendererFamily::PickMesh, RenderPass::Pick);
        }
    }

    /// Draws the pick depth pass.
    pub fn draw_pick_depths(&self) {
        if self.counts.draws_pick() {
            self.dispatch(RendererFamily::PickDepth, RenderPass::Pick);
        }
    }

    /// Draws the pick normals pass.
    pub fn draw_pick_normals(&self) {
        if self.counts.draws_pick() {
            self.dispatch(RendererFamily::PickNormals, RenderPass::Pick);
        }
    }

    /// Draws the occlusion query pass.
    pub fn draw_occlusion(&self) {
        if self.counts.draws_anything() {
            self.dispatch(RendererFamily::Occlusion, RenderPass::ColorOpaque);
        }
    }

    /// Draws the shadow map pass.
    pub fn draw_shadow(&self) {
        if self.counts.draws_anything() {
            self.dispatch(RendererFamily::Shadow, RenderPass::ColorOpaque);
        }
    }

    /// Draws the snap-pick initialization pass.
    pub fn draw_snap_init(&self) {
        if self.counts.draws_anything() {
            self.dispatch(RendererFamily::SnapInit, RenderPass::Pick);
        }
    }

    /// Draws the snap-pick vertex/edge pass.
    pub fn draw_snap(&self) {
        if self.counts.draws_anything() {
            self.dispatch(RendererFamily::Snap, RenderPass::Pick);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use atrium_core::RenderPass;
    use atrium_gpu::HeadlessBackend;
    use atrium_rendering::{LayerRenderer, RendererFactory};

    use super::*;

    struct NopRenderer;

    impl LayerRenderer for NopRenderer {
        fn draw(&self, _state: &LayerDrawState<'_>, _pass: RenderPass) {}

        fn is_valid(&self) -> bool {
            true
        }
    }

    struct NopFactory;

    impl RendererFactory for NopFactory {
        fn create(
            &self,
            _family: RendererFamily,
            _primitive: Primitive,
        ) -> Arc<dyn LayerRenderer> {
            Arc::new(NopRenderer)
        }
    }

    fn unit_quad() -> Arc<SharedGeometry> {
        Arc::new(SharedGeometry::from_raw(
            Primitive::Triangles,
            &[
                0.0, 0.0, 0.0, //
                1.0, 0.0, 0.0, //
                1.0, 1.0, 0.0, //
                0.0, 1.0, 0.0,
            ],
            Vec::new(),
            vec![0, 1, 2, 0, 2, 3],
            Vec::new(),
        ))
    }

    fn test_layer(options: SceneOptions) -> InstancingLayer {
        let renderers = Arc::new(RendererSet::new(Arc::new(NopFactory), Primitive::Triangles));
        InstancingLayer::new(unit_quad(), &options, renderers)
    }

    fn translated(x: f32) -> InstanceDescriptor {
        let mut matrix = math::identity_mat4();
        matrix[12] = x;
        InstanceDescriptor {
            matrix,
            color: [255, 255, 255, 255],
            world_aabb: Aabb::new([f64::from(x), 0.0, 0.0, f64::from(x) + 1.0, 1.0, 0.0]),
        }
    }

    #[test]
    fn test_shared_geometry_quantizes_against_own_aabb() {
        let geometry = unit_quad();
        assert_eq!(geometry.vertex_count(), 4);
        // The max corner quantizes to the full u16 range.
        assert_eq!(geometry.positions_quantized[6], u16::MAX);
        assert_eq!(geometry.positions_quantized[7], u16::MAX);
    }

    #[test]
    fn test_matrix_packs_as_three_rows() {
        let backend = HeadlessBackend::new();
        let mut layer = test_layer(SceneOptions::default());
        let _ = layer.create_portion(&translated(7.0));
        layer.finalize(&backend);
        // Buffer order: positions, indices, matrices, colors, flags.
        let matrices = backend.buffer(2).expect("matrix buffer");
        let floats: Vec<f32> = bytemuck::cast_slice(&matrices.read_back()).to_vec();
        assert_eq!(floats.len(), MATRIX_FLOATS);
        // Row 0 ends in the x translation.
        assert_eq!(&floats[0..4], &[1.0, 0.0, 0.0, 7.0]);
        assert_eq!(&floats[4..8], &[0.0, 1.0, 0.0, 0.0]);
        assert_eq!(&floats[8..12], &[0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_flag_write_touches_one_instance_slot() {
        let backend = HeadlessBackend::new();
        let mut layer = test_layer(SceneOptions::default());
        let _a = layer.create_portion(&translated(0.0));
        let b = layer.create_portion(&translated(2.0));
        layer.finalize(&backend);

        let flags = backend.buffer(4).expect("flags buffer");
        flags.clear_write_log();
        let mut mirror = LayerCounts::new();
        layer.set_visible(b, EntityFlags::VISIBLE, false, &mut mirror);
        assert_eq!(flags.write_log(), vec![(4, 4)]);
        assert_eq!(mirror.visible, 1);
        assert_eq!(layer.counts().visible, 1);
    }

    #[test]
    fn test_deferred_and_immediate_flag_bytes_match() {
        let flags = EntityFlags::VISIBLE
            .with(EntityFlags::PICKABLE)
            .with(EntityFlags::HIGHLIGHTED);

        let deferred_backend = HeadlessBackend::new();
        let mut deferred_layer = test_layer(SceneOptions::default());
        let portion = deferred_layer.create_portion(&translated(0.0));
        deferred_layer.finalize(&deferred_backend);
        let mut mirror = LayerCounts::new();
        deferred_layer.init_flags(portion, flags, true, &mut mirror);
        deferred_layer.flush_init_flags();

        let immediate_backend = HeadlessBackend::new();
        let mut immediate_layer = test_layer(SceneOptions::default());
        let portion = immediate_layer.create_portion(&translated(0.0));
        immediate_layer.finalize(&immediate_backend);
        let mut mirror = LayerCounts::new();
        immediate_layer.set_highlighted(portion, flags, true, &mut mirror);

        let deferred_bytes = deferred_backend.buffer(4).expect("flags").read_back();
        let immediate_bytes = immediate_backend.buffer(4).expect("flags").read_back();
        assert_eq!(deferred_bytes, immediate_bytes);
    }

    #[test]
    fn test_set_matrix_rewrites_one_slot() {
        let backend = HeadlessBackend::new();
        let mut layer = test_layer(SceneOptions::default());
        let _a = layer.create_portion(&translated(0.0));
        let b = layer.create_portion(&translated(2.0));
        layer.finalize(&backend);

        let matrices = backend.buffer(2).expect("matrix buffer");
        matrices.clear_write_log();
        let mut moved = math::identity_mat4();
        moved[13] = 9.0;
        layer.set_matrix(b, &moved);
        assert_eq!(matrices.write_log(), vec![(48, 48)]);
        let floats: Vec<f32> = bytemuck::cast_slice(&matrices.read_range(48, 48)).to_vec();
        assert_eq!(&floats[4..8], &[0.0, 1.0, 0.0, 9.0]);
    }

    #[test]
    fn test_aabb_unions_instances_and_tracks_changes() {
        let backend = HeadlessBackend::new();
        let mut layer = test_layer(SceneOptions::default());
        let a = layer.create_portion(&translated(0.0));
        let _b = layer.create_portion(&translated(4.0));
        layer.finalize(&backend);
        assert_eq!(layer.aabb().values[3], 5.0);

        layer.set_portion_aabb(a, Aabb::new([-3.0, 0.0, 0.0, -2.0, 1.0, 0.0]));
        assert_eq!(layer.aabb().values[0], -3.0);
        assert_eq!(layer.aabb().values[3], 5.0);
    }

    #[test]
    #[should_panic(expected = "create_portion called on finalized layer")]
    fn test_create_after_finalize_panics() {
        let backend = HeadlessBackend::new();
        let mut layer = test_layer(SceneOptions::default());
        let _ = layer.create_portion(&translated(0.0));
        layer.finalize(&backend);
        let _ = layer.create_portion(&translated(1.0));
    }

    #[test]
    fn test_set_offset_is_a_soft_noop_when_disabled() {
        let backend = HeadlessBackend::new();
        let mut layer = test_layer(SceneOptions::default());
        let id = layer.create_portion(&translated(0.0));
        layer.finalize(&backend);
        layer.set_offset(id, [1.0, 2.0, 3.0]);
        // No offsets buffer was ever created: positions, indices,
        // matrices, colors, flags.
        assert_eq!(backend.buffer_count(), 5);
    }
}
