//! # Batching Geometry Layer
//!
//! Many objects' geometry concatenated into one shared set of GPU buffers,
//! drawn with one call per pass. Each object becomes a portion: a frozen
//! vertex/index range whose colors, flags and offsets stay individually
//! mutable through partial buffer writes.
//!
//! ## Lifecycle contract (panics on violation)
//!
//! - `can_create_portion` / `create_portion` only before `finalize`
//! - every `set_*` toggle and every `draw_*` pass only after `finalize`
//! - `finalize` is idempotent
//!
//! The vertex/index budget is enforced: `create_portion` panics on input
//! that `can_create_portion` would reject, instead of silently overrunning
//! the shared buffers.

use std::sync::Arc;

use atrium_core::{
    math, pack_vertex_flags, Aabb, EntityFlags, Mat4, RenderPass, SceneOptions, ScratchPool,
    SilhouetteGlow,
};
use atrium_gpu::{BufferUsage, GpuBackend, GpuBuffer};
use atrium_rendering::{LayerDrawState, Primitive, RendererFamily, RendererSet};

use crate::counts::LayerCounts;
use crate::portion::{Portion, PortionId};
use crate::staging::LayerStaging;

/// Opaque white, the color of portions that supply none.
const DEFAULT_COLOR: [u8; 4] = [255, 255, 255, 255];

/// Position representation handed to `create_portion`.
///
/// A layer accepts exactly one of these, decided at construction: raw
/// local-space floats when the layer auto-compresses at finalize, or
/// positions pre-quantized against the decode matrix supplied with the
/// layer config.
#[derive(Clone, Copy, Debug)]
pub enum Positions<'a> {
    /// Local-space f32 positions (auto-compression mode).
    Raw(&'a [f32]),
    /// Pre-quantized u16 positions (pre-compressed mode).
    Quantized(&'a [u16]),
}

impl Positions<'_> {
    /// Number of position components.
    #[must_use]
    pub const fn len(&self) -> usize {
        match self {
            Self::Raw(p) => p.len(),
            Self::Quantized(p) => p.len(),
        }
    }

    /// True when no components were supplied.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One mesh's geometry, as handed over by a loader.
#[derive(Clone, Copy, Debug)]
pub struct BatchedGeometry<'a> {
    /// Positions in the layer's configured representation.
    pub positions: Positions<'a>,
    /// Oct-encoded normals, 3x i8 per vertex.
    pub normals: Option<&'a [i8]>,
    /// Per-vertex RGBA colors; wins over `color` when both are set.
    pub colors: Option<&'a [u8]>,
    /// Per-object RGBA color (opacity in alpha).
    pub color: Option<[u8; 4]>,
    /// Triangle/line indices, local to this mesh.
    pub indices: Option<&'a [u32]>,
    /// Edge indices, local to this mesh (triangle variants only).
    pub edge_indices: Option<&'a [u32]>,
    /// Mesh-local matrix baked into raw positions before batching.
    /// Must be `None` in pre-quantized mode.
    pub mesh_matrix: Option<Mat4>,
    /// World-space AABB of the mesh.
    pub world_aabb: Aabb,
}

/// Construction parameters for a batching layer.
#[derive(Clone, Copy, Debug)]
pub struct LayerConfig {
    /// Topology of everything batched into this layer.
    pub primitive: Primitive,
    /// Decode matrix for pre-quantized input; `None` selects
    /// auto-compression against the accumulated local AABB.
    pub positions_decode_matrix: Option<Mat4>,
    /// Whether portions in this layer carry normals.
    pub has_normals: bool,
    /// Scene options, resolved here once; the layer never consults live
    /// options afterwards.
    pub options: SceneOptions,
}

/// GPU-resident buffers of a finalized layer.
struct GpuState {
    /// Quantized positions, 3x u16 per vertex. Static.
    positions: Box<dyn GpuBuffer>,
    /// Oct-encoded normals, 3x i8 per vertex. Static.
    normals: Option<Box<dyn GpuBuffer>>,
    /// RGBA colors, 4x u8 per vertex. Dynamic.
    colors: Box<dyn GpuBuffer>,
    /// World-space offsets, 3x f32 per vertex. Dynamic, opt-in.
    offsets: Option<Box<dyn GpuBuffer>>,
    /// Packed render flags, u32 per vertex. Dynamic.
    flags: Box<dyn GpuBuffer>,
    /// Indices. Static.
    indices: Option<Box<dyn GpuBuffer>>,
    /// Edge indices. Static.
    edge_indices: Option<Box<dyn GpuBuffer>>,
    /// Vertices uploaded.
    vertex_count: usize,
    /// Indices uploaded.
    index_count: usize,
}

/// A batching geometry layer.
pub struct BatchingLayer {
    /// Topology of the batched geometry.
    primitive: Primitive,
    /// Vertex budget (whole vertices, not components).
    max_verts: usize,
    /// Index budget.
    max_indices: usize,
    /// Supplied decode matrix; `Some` selects pre-quantized input.
    supplied_decode_matrix: Option<Mat4>,
    /// Whether this layer stages and uploads normals.
    has_normals: bool,
    /// Whether this layer carries the offsets attribute.
    offsets_enabled: bool,
    /// Silhouette glow-through snapshot for flag packing.
    glow: SilhouetteGlow,
    /// Shared renderer cache for this scene/primitive.
    renderers: Arc<RendererSet>,
    /// CPU staging; `None` once finalized.
    staging: Option<LayerStaging>,
    /// Frozen portion layout.
    portions: Vec<Portion>,
    /// Exact census of portion states.
    counts: LayerCounts,
    /// Local-space AABB accumulated from staged positions (raw mode).
    local_aabb: Aabb,
    /// Cached union of portion world AABBs.
    world_aabb: Aabb,
    /// Set when a portion AABB changed since the cache was built.
    world_aabb_dirty: bool,
    /// Final decode matrix (supplied, or computed at finalize).
    decode_matrix: Mat4,
    /// GPU buffers; `Some` once finalized.
    gpu: Option<GpuState>,
    /// Layer-sized CPU flag image for the deferred init path.
    deferred_flags: Option<Vec<u32>>,
    /// Reusable staging for per-portion partial writes.
    scratch: ScratchPool,
}

impl BatchingLayer {
    /// Creates an empty layer accepting portions up to the budgets in
    /// `config.options`.
    #[must_use]
    pub fn new(config: &LayerConfig, renderers: Arc<RendererSet>) -> Self {
        Self {
            primitive: config.primitive,
            max_verts: config.options.max_batch_verts,
            max_indices: config.options.max_batch_indices,
            supplied_decode_matrix: config.positions_decode_matrix,
            has_normals: config.has_normals,
            offsets_enabled: config.options.entity_offsets_enabled,
            glow: config.options.silhouette_glow(),
            renderers,
            staging: Some(LayerStaging::new()),
            portions: Vec::new(),
            counts: LayerCounts::new(),
            local_aabb: Aabb::collapsed(),
            world_aabb: Aabb::collapsed(),
            world_aabb_dirty: false,
            decode_matrix: config
                .positions_decode_matrix
                .unwrap_or_else(math::identity_mat4),
            gpu: None,
            deferred_flags: None,
            scratch: ScratchPool::new(),
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

    /// The layer's topology.
    #[must_use]
    pub const fn primitive(&self) -> Primitive {
        self.primitive
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

    fn staging(&self) -> &LayerStaging {
        self.staging
            .as_ref()
            .expect("layer is finalized; staging is gone")
    }

    /// Whether `len_positions` position components and `len_indices`
    /// indices still fit this layer's budget.
    ///
    /// # Panics
    ///
    /// Panics after `finalize`.
    #[must_use]
    pub fn can_create_portion(&self, len_positions: usize, len_indices: usize) -> bool {
        assert!(
            !self.is_finalized(),
            "can_create_portion called on finalized layer"
        );
        let staging = self.staging();
        staging.position_len() + len_positions < self.max_verts * 3
            && staging.indices.len() + len_indices < self.max_indices
    }

    /// Appends one mesh's geometry and returns its portion id.
    ///
    /// # Panics
    ///
    /// Panics after `finalize`, when the position representation does not
    /// match the layer's configured mode, when normals presence does not
    /// match the layer's configuration, or when the geometry exceeds the
    /// remaining budget (the budget is enforced, not advisory).
    pub fn create_portion(&mut self, geometry: &BatchedGeometry<'_>) -> PortionId {
        assert!(
            !self.is_finalized(),
            "create_portion called on finalized layer"
        );
        let num_indices = geometry.indices.map_or(0, <[u32]>::len);
        assert!(
            self.can_create_portion(geometry.positions.len(), num_indices),
            "portion exceeds layer budget ({} verts / {} indices)",
            self.max_verts,
            self.max_indices
        );
        assert!(
            geometry.positions.len() % 3 == 0,
            "positions must be xyz triples"
        );
        assert_eq!(
            self.has_normals,
            geometry.normals.is_some(),
            "normals presence must match the layer configuration"
        );

        let offsets_enabled = self.offsets_enabled;
        let pre_quantized = self.supplied_decode_matrix.is_some();
        let staging = self
            .staging
            .as_mut()
            .expect("layer is finalized; staging is gone");

        let vert_base = staging.vertex_count();
        let vert_count = geometry.positions.len() / 3;

        match geometry.positions {
            Positions::Raw(positions) => {
                assert!(
                    !pre_quantized,
                    "raw positions supplied to a pre-quantized layer"
                );
                let start = staging.positions_raw.len();
                staging.positions_raw.extend_from_slice(positions);
                if let Some(matrix) = geometry.mesh_matrix {
                    math::transform_positions(&mut staging.positions_raw[start..], &matrix);
                }
                for xyz in staging.positions_raw[start..].chunks_exact(3) {
                    self.local_aabb.expand_point([
                        f64::from(xyz[0]),
                        f64::from(xyz[1]),
                        f64::from(xyz[2]),
                    ]);
                }
            }
            Positions::Quantized(positions) => {
                assert!(
                    pre_quantized,
                    "pre-quantized positions supplied to an auto-compressing layer"
                );
                assert!(
                    geometry.mesh_matrix.is_none(),
                    "mesh matrices cannot be baked into pre-quantized positions"
                );
                staging.positions_quantized.extend_from_slice(positions);
            }
        }

        if let Some(normals) = geometry.normals {
            assert_eq!(normals.len(), vert_count * 3, "one normal per vertex");
            staging.normals.extend_from_slice(normals);
        }

        if let Some(colors) = geometry.colors {
            assert_eq!(colors.len(), vert_count * 4, "one RGBA color per vertex");
            staging.colors.extend_from_slice(colors);
        } else {
            let rgba = geometry.color.unwrap_or(DEFAULT_COLOR);
            for _ in 0..vert_count {
                staging.colors.extend_from_slice(&rgba);
            }
        }

        if offsets_enabled {
            staging
                .offsets
                .resize(staging.offsets.len() + vert_count * 3, 0.0);
        }

        let index_base = staging.indices.len();
        if let Some(indices) = geometry.indices {
            let base = u32::try_from(vert_base).expect("vertex base fits u32");
            staging.indices.extend(indices.iter().map(|i| i + base));
        }
        if let Some(edge_indices) = geometry.edge_indices {
            let base = u32::try_from(vert_base).expect("vertex base fits u32");
            staging
                .edge_indices
                .extend(edge_indices.iter().map(|i| i + base));
        }

        self.world_aabb.expand(&geometry.world_aabb);
        self.portions.push(Portion {
            vert_base,
            vert_count,
            index_base,
            index_count: num_indices,
            world_aabb: geometry.world_aabb,
        });
        self.counts.add_portion();
        PortionId(u32::try_from(self.portions.len() - 1).expect("portion count fits u32"))
    }

    /// Uploads staged geometry to the GPU and freezes the portion layout.
    ///
    /// Idempotent: a second call is a no-op. Raw positions are quantized
    /// here against the accumulated local AABB; pre-quantized positions
    /// upload as-is. Positions/normals/indices go static, colors/offsets
    /// dynamic, and the flags buffer is allocated zeroed (all portions
    /// start in no pass).
    pub fn finalize(&mut self, backend: &dyn GpuBackend) {
        if self.is_finalized() {
            return;
        }
        let staging = self.staging.take().expect("staging present until finalize");
        let vertex_count = staging.vertex_count();

        let positions = if staging.positions_quantized.is_empty() {
            self.decode_matrix = math::positions_decode_matrix(&self.local_aabb);
            let quantized = self.scratch.u16_slice(staging.positions_raw.len());
            math::quantize_positions(&staging.positions_raw, &self.local_aabb, quantized);
            backend.create_buffer(BufferUsage::Static, bytemuck::cast_slice(quantized))
        } else {
            backend.create_buffer(
                BufferUsage::Static,
                bytemuck::cast_slice(&staging.positions_quantized),
            )
        };

        let normals = (!staging.normals.is_empty()).then(|| {
            backend.create_buffer(BufferUsage::Static, bytemuck::cast_slice(&staging.normals))
        });
        let colors = backend.create_buffer(BufferUsage::Dynamic, &staging.colors);
        let offsets = self.offsets_enabled.then(|| {
            backend.create_buffer(BufferUsage::Dynamic, bytemuck::cast_slice(&staging.offsets))
        });
        let flags = backend.create_empty_buffer(BufferUsage::Dynamic, vertex_count * 4);
        let indices = (!staging.indices.is_empty()).then(|| {
            backend.create_buffer(BufferUsage::Static, bytemuck::cast_slice(&staging.indices))
        });
        let edge_indices = (!staging.edge_indices.is_empty()).then(|| {
            backend.create_buffer(
                BufferUsage::Static,
                bytemuck::cast_slice(&staging.edge_indices),
            )
        });

        self.gpu = Some(GpuState {
            positions,
            normals,
            colors,
            offsets,
            flags,
            indices,
            edge_indices,
            vertex_count,
            index_count: staging.indices.len(),
        });
        tracing::debug!(
            portions = self.portions.len(),
            verts = vertex_count,
            "batching layer finalized"
        );
    }

    fn gpu(&self) -> &GpuState {
        self.gpu
            .as_ref()
            .expect("layer must be finalized before state changes and drawing")
    }

    /// Recomputes and writes one portion's flag range (immediate path).
    fn write_portion_flags(&mut self, portion: PortionId, flags: EntityFlags, transparent: bool) {
        let word = pack_vertex_flags(flags, transparent, self.glow);
        let Portion {
            vert_base,
            vert_count,
            ..
        } = *self.portion(portion);
        let scratch = self.scratch.u32_slice(vert_count);
        scratch.fill(word);
        let bytes: &[u8] = bytemuck::cast_slice(scratch);
        self.gpu
            .as_ref()
            .expect("layer must be finalized before state changes and drawing")
            .flags
            .write(vert_base * 4, bytes)
            .expect("portion flag range is inside the flags buffer");
    }

    /// Writes one portion's initial flags into the deferred CPU image
    /// instead of the GPU, and seeds the aggregate counters.
    ///
    /// Used during bulk construction: thousands of portions get their
    /// initial state without one GPU write each; [`Self::flush_init_flags`]
    /// uploads the whole image in a single call.
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
        let vertex_count = self.gpu().vertex_count;
        let word = pack_vertex_flags(flags, transparent, self.glow);
        let image = self
            .deferred_flags
            .get_or_insert_with(|| vec![0; vertex_count]);
        let p = self.portions[portion.index()];
        image[p.vert_base..p.vert_base + p.vert_count].fill(word);

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
    ///
    /// No-op when `init_flags` was never called. Must run before the layer
    /// is drawn.
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
    /// `flags` is the portion's full post-change flag set; `transparent`
    /// its current transparency. Counters move on the layer and on the
    /// model `mirror` together.
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

    /// Rewrites one portion's color bytes (RGBA, opacity in alpha).
    ///
    /// O(portion verts): only the portion's range of the color buffer is
    /// touched.
    ///
    /// # Panics
    ///
    /// Panics before `finalize`.
    pub fn set_color(&mut self, portion: PortionId, rgba: [u8; 4]) {
        let Portion {
            vert_base,
            vert_count,
            ..
        } = *self.portion(portion);
        let scratch = self.scratch.u8_slice(vert_count * 4);
        for chunk in scratch.chunks_exact_mut(4) {
            chunk.copy_from_slice(&rgba);
        }
        self.gpu
            .as_ref()
            .expect("layer must be finalized before state changes and drawing")
            .colors
            .write(vert_base * 4, scratch)
            .expect("portion color range is inside the color buffer");
    }

    /// Rewrites one portion's world-space offset.
    ///
    /// Soft failure: when the scene was configured without entity offsets
    /// this logs an error and returns without effect (the offsets buffer
    /// does not exist).
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
        let Portion {
            vert_base,
            vert_count,
            ..
        } = *self.portion(portion);
        let scratch = self.scratch.f32_slice(vert_count * 3);
        for chunk in scratch.chunks_exact_mut(3) {
            chunk.copy_from_slice(&offset);
        }
        let bytes: &[u8] = bytemuck::cast_slice(scratch);
        self.gpu
            .as_ref()
            .expect("layer must be finalized before state changes and drawing")
            .offsets
            .as_ref()
            .expect("offsets buffer exists when the feature is enabled")
            .write(vert_base * 12, bytes)
            .expect("portion offset range is inside the offsets buffer");
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
            primitive: self.primitive,
            vertex_count: gpu.vertex_count,
            index_count: gpu.index_count,
            instance_count: 1,
            positions_decode_matrix: self.decode_matrix,
            positions: gpu.positions.as_ref(),
            flags: gpu.flags.as_ref(),
            colors: Some(gpu.colors.as_ref()),
            offsets: gpu.offsets.as_deref(),
            normals: gpu.normals.as_deref(),
            indices: gpu.indices.as_deref(),
            edge_indices: gpu.edge_indices.as_deref(),
            instance_matrices: None,
        }
    }

    fn dispatch(&self, family: RendererFamily, pass: RenderPass) {
        self.renderers.get(family).draw(&self.draw_state(), pass);
    }

    /// Draws the opaque fill color pass.
    ///
    /// Skipped when every portion is culled, none is visible, all are
    /// transparent, or all are x-rayed - a draw call whose every vertex
    /// fails the flag test is pure overhead.
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
        self.primitive.is_triangles() && self.counts.draws_edges()
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

    fn test_layer(options: SceneOptions) -> BatchingLayer {
        let renderers = Arc::new(RendererSet::new(Arc::new(NopFactory), Primitive::Triangles));
        BatchingLayer::new(
            &LayerConfig {
                primitive: Primitive::Triangles,
                positions_decode_matrix: None,
                has_normals: false,
                options,
            },
            renderers,
        )
    }

    fn quad() -> ([f32; 12], [u32; 6]) {
        (
            [
                0.0, 0.0, 0.0, //
                1.0, 0.0, 0.0, //
                1.0, 1.0, 0.0, //
                0.0, 1.0, 0.0,
            ],
            [0, 1, 2, 0, 2, 3],
        )
    }

    fn quad_geometry<'a>(
        positions: &'a [f32],
        indices: &'a [u32],
        rgba: [u8; 4],
    ) -> BatchedGeometry<'a> {
        BatchedGeometry {
            positions: Positions::Raw(positions),
            normals: None,
            colors: None,
            color: Some(rgba),
            indices: Some(indices),
            edge_indices: None,
            mesh_matrix: None,
            world_aabb: Aabb::new([0.0, 0.0, 0.0, 1.0, 1.0, 1.0]),
        }
    }

    #[test]
    fn test_capacity_boundary_is_strict() {
        let layer = test_layer(SceneOptions {
            max_batch_verts: 10,
            max_batch_indices: 24,
            ..SceneOptions::default()
        });
        // 29 components staged against a 30-component budget: the next
        // component would reach the cap, so 1 more is still allowed but
        // exactly 30 is not.
        assert!(layer.can_create_portion(29, 0));
        assert!(!layer.can_create_portion(30, 0));
        assert!(layer.can_create_portion(0, 23));
        assert!(!layer.can_create_portion(0, 24));
    }

    #[test]
    #[should_panic(expected = "portion exceeds layer budget")]
    fn test_budget_is_enforced_not_advisory() {
        let mut layer = test_layer(SceneOptions {
            max_batch_verts: 2,
            max_batch_indices: 6,
            ..SceneOptions::default()
        });
        let (positions, indices) = quad();
        let _ = layer.create_portion(&quad_geometry(&positions, &indices, [255, 0, 0, 255]));
    }

    #[test]
    #[should_panic(expected = "pre-quantized positions supplied to an auto-compressing layer")]
    fn test_wrong_position_representation_panics() {
        let mut layer = test_layer(SceneOptions::default());
        let quantized = [0_u16; 12];
        let _ = layer.create_portion(&BatchedGeometry {
            positions: Positions::Quantized(&quantized),
            normals: None,
            colors: None,
            color: None,
            indices: None,
            edge_indices: None,
            mesh_matrix: None,
            world_aabb: Aabb::new([0.0; 6]),
        });
    }

    #[test]
    #[should_panic(expected = "create_portion called on finalized layer")]
    fn test_create_after_finalize_panics() {
        let backend = HeadlessBackend::new();
        let mut layer = test_layer(SceneOptions::default());
        let (positions, indices) = quad();
        let _ = layer.create_portion(&quad_geometry(&positions, &indices, [255, 0, 0, 255]));
        layer.finalize(&backend);
        let _ = layer.create_portion(&quad_geometry(&positions, &indices, [255, 0, 0, 255]));
    }

    #[test]
    #[should_panic(expected = "layer must be finalized")]
    fn test_toggle_before_finalize_panics() {
        let mut layer = test_layer(SceneOptions::default());
        let (positions, indices) = quad();
        let id = layer.create_portion(&quad_geometry(&positions, &indices, [255, 0, 0, 255]));
        let mut mirror = LayerCounts::new();
        layer.set_visible(id, EntityFlags::VISIBLE, false, &mut mirror);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let backend = HeadlessBackend::new();
        let mut layer = test_layer(SceneOptions::default());
        let (positions, indices) = quad();
        let _ = layer.create_portion(&quad_geometry(&positions, &indices, [255, 0, 0, 255]));
        layer.finalize(&backend);
        let buffers = backend.buffer_count();
        layer.finalize(&backend);
        assert_eq!(backend.buffer_count(), buffers);
    }

    #[test]
    fn test_colors_default_to_opaque_white() {
        let backend = HeadlessBackend::new();
        let mut layer = test_layer(SceneOptions::default());
        let (positions, indices) = quad();
        let _ = layer.create_portion(&BatchedGeometry {
            color: None,
            ..quad_geometry(&positions, &indices, [0, 0, 0, 0])
        });
        layer.finalize(&backend);
        // Buffer order: positions, colors, flags, indices.
        let colors = backend.buffer(1).expect("color buffer");
        assert_eq!(colors.read_back(), vec![255_u8; 16]);
    }

    #[test]
    fn test_mesh_matrix_is_baked_into_aabb() {
        let backend = HeadlessBackend::new();
        let mut layer = test_layer(SceneOptions::default());
        let (positions, indices) = quad();
        let mut matrix = atrium_core::math::identity_mat4();
        matrix[12] = 100.0;
        let _ = layer.create_portion(&BatchedGeometry {
            mesh_matrix: Some(matrix),
            ..quad_geometry(&positions, &indices, [255, 255, 255, 255])
        });
        layer.finalize(&backend);
        // The translated quad spans x in [100, 101]; the decode matrix
        // carries the min corner as its translation.
        let positions_buffer = backend.buffer(0).expect("positions buffer");
        assert_eq!(positions_buffer.len(), 4 * 3 * 2);
    }

    #[test]
    fn test_deferred_and_immediate_flag_paths_agree() {
        let make = || {
            let backend = HeadlessBackend::new();
            let mut layer = test_layer(SceneOptions::default());
            let (positions, indices) = quad();
            let _ =
                layer.create_portion(&quad_geometry(&positions, &indices, [255, 0, 0, 255]));
            layer.finalize(&backend);
            (backend, layer)
        };
        let flag_sets = [
            EntityFlags::VISIBLE,
            EntityFlags::VISIBLE.with(EntityFlags::XRAYED),
            EntityFlags::VISIBLE
                .with(EntityFlags::SELECTED)
                .with(EntityFlags::PICKABLE)
                .with(EntityFlags::CLIPPABLE),
            EntityFlags::CULLED.with(EntityFlags::VISIBLE),
        ];
        for flags in flag_sets {
            for transparent in [false, true] {
                let (backend_a, mut layer_a) = make();
                let mut mirror = LayerCounts::new();
                layer_a.init_flags(PortionId(0), flags, transparent, &mut mirror);
                layer_a.flush_init_flags();

                let (backend_b, mut layer_b) = make();
                let mut mirror = LayerCounts::new();
                layer_b.set_visible(PortionId(0), flags, transparent, &mut mirror);

                // Buffer order: positions, colors, flags, indices.
                let flags_a = backend_a.buffer(2).expect("flags buffer").read_back();
                let flags_b = backend_b.buffer(2).expect("flags buffer").read_back();
                assert_eq!(flags_a, flags_b, "paths diverged for {flags:?}");
            }
        }
    }

    #[test]
    fn test_set_color_touches_only_the_portion_range() {
        let backend = HeadlessBackend::new();
        let mut layer = test_layer(SceneOptions::default());
        let (positions, indices) = quad();
        let _a = layer.create_portion(&quad_geometry(&positions, &indices, [1, 2, 3, 255]));
        let b = layer.create_portion(&quad_geometry(&positions, &indices, [4, 5, 6, 255]));
        layer.finalize(&backend);

        let colors = backend.buffer(1).expect("color buffer");
        colors.clear_write_log();
        layer.set_color(b, [9, 9, 9, 9]);
        // Portion B owns vertices 4..8: bytes 16..32 of the color buffer.
        assert_eq!(colors.write_log(), vec![(16, 16)]);
        assert_eq!(colors.read_range(0, 4), vec![1, 2, 3, 255]);
        assert_eq!(colors.read_range(16, 4), vec![9, 9, 9, 9]);
    }

    #[test]
    fn test_set_offset_is_a_soft_noop_when_disabled() {
        let backend = HeadlessBackend::new();
        let mut layer = test_layer(SceneOptions::default());
        let (positions, indices) = quad();
        let id = layer.create_portion(&quad_geometry(&positions, &indices, [255, 0, 0, 255]));
        layer.finalize(&backend);
        // Must not panic and must not write anywhere.
        let before = backend.buffer_count();
        layer.set_offset(id, [1.0, 2.0, 3.0]);
        assert_eq!(backend.buffer_count(), before);
    }

    #[test]
    fn test_set_offset_writes_portion_range_when_enabled() {
        let backend = HeadlessBackend::new();
        let mut layer = test_layer(SceneOptions {
            entity_offsets_enabled: true,
            ..SceneOptions::default()
        });
        let (positions, indices) = quad();
        let _a = layer.create_portion(&quad_geometry(&positions, &indices, [255, 0, 0, 255]));
        let b = layer.create_portion(&quad_geometry(&positions, &indices, [255, 0, 0, 255]));
        layer.finalize(&backend);
        // Buffer order with offsets: positions, colors, offsets, flags, indices.
        let offsets = backend.buffer(2).expect("offsets buffer");
        offsets.clear_write_log();
        layer.set_offset(b, [0.0, 5.0, 0.0]);
        assert_eq!(offsets.write_log(), vec![(4 * 12, 4 * 12)]);
    }
}
