//! # VBO Scene Model
//!
//! The per-model facade over the layers. Loaders feed it geometries,
//! meshes and entities; it buckets meshes into batching layers (rolling to
//! a fresh layer when the budget fills) or instancing layers (one per
//! shared geometry), finalizes everything in one sweep, and afterwards
//! fans entity state changes out to the owning portions.
//!
//! Recoverable misuse of the public API (unknown ids, ingestion after
//! finalize) surfaces as [`ModelError`]; layer-level contract violations
//! panic, see the layer docs.

use std::collections::HashMap;
use std::sync::Arc;

use atrium_core::{math, Aabb, EntityFlags, Mat4, SceneOptions};
use atrium_gpu::GpuBackend;
use atrium_rendering::{Primitive, RendererRegistry, SceneId};

use crate::batching::{BatchedGeometry, BatchingLayer, LayerConfig, Positions};
use crate::counts::LayerCounts;
use crate::error::ModelError;
use crate::instancing::{InstanceDescriptor, InstancingLayer, SharedGeometry};
use crate::portion::PortionId;

/// Identifies a shared geometry registered with a model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct GeometryId(pub usize);

/// Identifies a mesh within a model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct MeshId(pub usize);

/// Identifies an entity within a model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EntityId(pub usize);

/// One mesh, as handed to [`VboModel::create_mesh`].
///
/// `geometry: Some` selects the instancing path (positions and index
/// fields are ignored, the shared geometry provides them); `None` batches
/// the inline arrays.
#[derive(Clone, Copy, Debug)]
pub struct MeshDescriptor<'a> {
    /// Topology of the inline geometry (ignored on the instancing path).
    pub primitive: Primitive,
    /// Shared geometry to instantiate, registered via `create_geometry`.
    pub geometry: Option<GeometryId>,
    /// Inline positions, in the model's configured representation.
    pub positions: Option<Positions<'a>>,
    /// Oct-encoded normals, 3x i8 per vertex.
    pub normals: Option<&'a [i8]>,
    /// Per-vertex RGBA colors (batching only; wins over `color`).
    pub colors: Option<&'a [u8]>,
    /// Per-object RGBA color (opacity in alpha).
    pub color: Option<[u8; 4]>,
    /// Indices, local to this mesh.
    pub indices: Option<&'a [u32]>,
    /// Edge indices, local to this mesh.
    pub edge_indices: Option<&'a [u32]>,
    /// Modeling matrix: baked into batched positions, carried per-instance
    /// on the instancing path.
    pub matrix: Option<Mat4>,
}

impl Default for MeshDescriptor<'_> {
    fn default() -> Self {
        Self {
            primitive: Primitive::Triangles,
            geometry: None,
            positions: None,
            normals: None,
            colors: None,
            color: None,
            indices: None,
            edge_indices: None,
            matrix: None,
        }
    }
}

/// Construction parameters for a [`VboModel`].
#[derive(Clone, Copy, Debug)]
pub struct VboModelConfig {
    /// The scene this model renders in (selects the renderer sets).
    pub scene: SceneId,
    /// Scene-wide options, snapshotted into every layer.
    pub options: SceneOptions,
    /// Decode matrix for pre-quantized batched input. `None` selects
    /// auto-compression: layers quantize at finalize against their own
    /// accumulated AABB. The two modes are mutually exclusive per model.
    pub positions_decode_matrix: Option<Mat4>,
}

/// A layer of either strategy, dispatched by match.
enum Layer {
    Batching(BatchingLayer),
    Instancing(InstancingLayer),
}

macro_rules! on_layer {
    ($value:expr, $layer:ident => $body:expr) => {
        match $value {
            Layer::Batching($layer) => $body,
            Layer::Instancing($layer) => $body,
        }
    };
}

impl Layer {
    fn finalize(&mut self, backend: &dyn GpuBackend) {
        on_layer!(self, layer => layer.finalize(backend));
    }

    fn init_flags(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        on_layer!(self, layer => layer.init_flags(portion, flags, transparent, mirror));
    }

    fn flush_init_flags(&mut self) {
        on_layer!(self, layer => layer.flush_init_flags());
    }

    fn set_visible(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        on_layer!(self, layer => layer.set_visible(portion, flags, transparent, mirror));
    }

    fn set_highlighted(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        on_layer!(self, layer => layer.set_highlighted(portion, flags, transparent, mirror));
    }

    fn set_xrayed(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        on_layer!(self, layer => layer.set_xrayed(portion, flags, transparent, mirror));
    }

    fn set_selected(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        on_layer!(self, layer => layer.set_selected(portion, flags, transparent, mirror));
    }

    fn set_edges(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        on_layer!(self, layer => layer.set_edges(portion, flags, transparent, mirror));
    }

    fn set_clippable(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        on_layer!(self, layer => layer.set_clippable(portion, flags, transparent, mirror));
    }

    fn set_culled(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        on_layer!(self, layer => layer.set_culled(portion, flags, transparent, mirror));
    }

    fn set_pickable(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        on_layer!(self, layer => layer.set_pickable(portion, flags, transparent, mirror));
    }

    fn set_transparent(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
        mirror: &mut LayerCounts,
    ) {
        on_layer!(self, layer => layer.set_transparent(portion, flags, transparent, mirror));
    }

    fn set_color(&mut self, portion: PortionId, rgba: [u8; 4]) {
        on_layer!(self, layer => layer.set_color(portion, rgba));
    }

    fn set_offset(&mut self, portion: PortionId, offset: [f32; 3]) {
        on_layer!(self, layer => layer.set_offset(portion, offset));
    }

    fn set_portion_aabb(&mut self, portion: PortionId, aabb: Aabb) {
        on_layer!(self, layer => layer.set_portion_aabb(portion, aabb));
    }

    fn aabb(&mut self) -> Aabb {
        on_layer!(self, layer => layer.aabb())
    }

    fn expect_instancing(&mut self) -> &mut InstancingLayer {
        match self {
            Self::Instancing(layer) => layer,
            Self::Batching(_) => panic!("instancing slot holds a batching layer"),
        }
    }

    fn expect_batching(&mut self) -> &mut BatchingLayer {
        match self {
            Self::Batching(layer) => layer,
            Self::Instancing(_) => panic!("batching slot holds an instancing layer"),
        }
    }
}

/// Per-mesh bookkeeping.
#[derive(Clone, Copy)]
struct MeshRecord {
    /// Index into the model's layer list.
    layer: usize,
    /// The mesh's portion within that layer.
    portion: PortionId,
    /// World AABB at ingestion, before any entity offset.
    base_aabb: Aabb,
    /// Owning entity, set by `create_entity`.
    entity: Option<EntityId>,
    /// Current transparency (alpha < 255).
    transparent: bool,
}

/// Per-entity bookkeeping.
struct EntityRecord {
    /// Current boolean render state.
    flags: EntityFlags,
    /// Meshes this entity owns.
    meshes: Vec<MeshId>,
}

/// A scene model over VBO layers.
pub struct VboModel {
    /// The scene whose renderer sets this model draws with.
    scene: SceneId,
    /// Options snapshot taken at construction.
    options: SceneOptions,
    /// Model-wide decode matrix; `Some` selects pre-quantized input.
    decode_matrix: Option<Mat4>,
    /// Shared renderer cache.
    registry: Arc<RendererRegistry>,
    /// Every layer, in creation order.
    layers: Vec<Layer>,
    /// Open batching layer per (primitive, has_normals) bucket.
    open_batching: HashMap<(Primitive, bool), usize>,
    /// Instancing layer per shared geometry.
    open_instancing: HashMap<GeometryId, usize>,
    /// Registered shared geometries.
    geometries: Vec<Arc<SharedGeometry>>,
    /// Mesh bookkeeping, indexed by [`MeshId`].
    meshes: Vec<MeshRecord>,
    /// Entity bookkeeping, indexed by [`EntityId`].
    entities: Vec<EntityRecord>,
    /// Model-wide mirror of the layer counters.
    counts: LayerCounts,
    /// Set once `finalize` ran.
    finalized: bool,
}

impl VboModel {
    /// Creates an empty model drawing through `registry`.
    #[must_use]
    pub fn new(config: &VboModelConfig, registry: Arc<RendererRegistry>) -> Self {
        Self {
            scene: config.scene,
            options: config.options,
            decode_matrix: config.positions_decode_matrix,
            registry,
            layers: Vec::new(),
            open_batching: HashMap::new(),
            open_instancing: HashMap::new(),
            geometries: Vec::new(),
            meshes: Vec::new(),
            entities: Vec::new(),
            counts: LayerCounts::new(),
            finalized: false,
        }
    }

    /// True once `finalize` ran.
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// The model-wide census of portion states.
    #[must_use]
    pub const fn counts(&self) -> &LayerCounts {
        &self.counts
    }

    /// Number of layers created so far.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Number of meshes ingested so far.
    #[must_use]
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Number of entities created so far.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// True when any portion is currently visible. Answered from the
    /// mirrored counters, never by scanning.
    #[must_use]
    pub const fn any_visible(&self) -> bool {
        self.counts.visible > 0
    }

    /// True when any portion is currently x-rayed.
    #[must_use]
    pub const fn any_xrayed(&self) -> bool {
        self.counts.xrayed > 0
    }

    /// True when any portion is currently highlighted.
    #[must_use]
    pub const fn any_highlighted(&self) -> bool {
        self.counts.highlighted > 0
    }

    /// True when any portion is currently selected.
    #[must_use]
    pub const fn any_selected(&self) -> bool {
        self.counts.selected > 0
    }

    /// True when any portion currently renders emphasized edges.
    #[must_use]
    pub const fn any_edges(&self) -> bool {
        self.counts.edges > 0
    }

    /// The current flag set of `entity`.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownEntity`] for a bad id.
    pub fn entity_flags(&self, entity: EntityId) -> Result<EntityFlags, ModelError> {
        self.entities
            .get(entity.0)
            .map(|record| record.flags)
            .ok_or(ModelError::UnknownEntity(entity.0 as u64))
    }

    /// Registers geometry for sharing across instanced meshes.
    ///
    /// # Errors
    ///
    /// [`ModelError::ModelFinalized`] after `finalize`.
    pub fn create_geometry(&mut self, geometry: SharedGeometry) -> Result<GeometryId, ModelError> {
        if self.finalized {
            return Err(ModelError::ModelFinalized);
        }
        self.geometries.push(Arc::new(geometry));
        Ok(GeometryId(self.geometries.len() - 1))
    }

    /// Ingests one mesh.
    ///
    /// Returns `Ok(None)` for degenerate geometry (no positions, or a
    /// triangle mesh without indices), which is skipped with a debug log
    /// rather than poisoning the whole load.
    ///
    /// # Errors
    ///
    /// [`ModelError::ModelFinalized`] after `finalize`,
    /// [`ModelError::UnknownGeometry`] for an unregistered geometry id,
    /// [`ModelError::MeshExceedsBudget`] for an inline mesh too large for
    /// even an empty batching layer.
    pub fn create_mesh(&mut self, mesh: &MeshDescriptor<'_>) -> Result<Option<MeshId>, ModelError> {
        if self.finalized {
            return Err(ModelError::ModelFinalized);
        }
        if let Some(geometry) = mesh.geometry {
            return self.create_instanced_mesh(geometry, mesh).map(Some);
        }
        self.create_batched_mesh(mesh)
    }

    fn create_instanced_mesh(
        &mut self,
        geometry_id: GeometryId,
        mesh: &MeshDescriptor<'_>,
    ) -> Result<MeshId, ModelError> {
        let geometry = self
            .geometries
            .get(geometry_id.0)
            .cloned()
            .ok_or(ModelError::UnknownGeometry(geometry_id.0 as u64))?;
        let matrix = mesh.matrix.unwrap_or_else(math::identity_mat4);
        let world_aabb = transformed_aabb(&geometry.local_aabb, &matrix);
        let color = mesh.color.unwrap_or([255, 255, 255, 255]);

        let layer_index = match self.open_instancing.get(&geometry_id) {
            Some(&index) => index,
            None => {
                let renderers = self.registry.renderers(self.scene, geometry.primitive);
                self.layers.push(Layer::Instancing(InstancingLayer::new(
                    Arc::clone(&geometry),
                    &self.options,
                    renderers,
                )));
                let index = self.layers.len() - 1;
                self.open_instancing.insert(geometry_id, index);
                index
            }
        };
        let portion = self.layers[layer_index]
            .expect_instancing()
            .create_portion(&InstanceDescriptor {
                matrix,
                color,
                world_aabb,
            });
        self.counts.add_portion();
        self.meshes.push(MeshRecord {
            layer: layer_index,
            portion,
            base_aabb: world_aabb,
            entity: None,
            transparent: color[3] < 255,
        });
        Ok(MeshId(self.meshes.len() - 1))
    }

    fn create_batched_mesh(
        &mut self,
        mesh: &MeshDescriptor<'_>,
    ) -> Result<Option<MeshId>, ModelError> {
        let Some(positions) = mesh.positions else {
            tracing::debug!("skipping mesh with no positions");
            return Ok(None);
        };
        if positions.is_empty() {
            tracing::debug!("skipping mesh with empty positions");
            return Ok(None);
        }
        let num_indices = mesh.indices.map_or(0, <[u32]>::len);
        if mesh.primitive.is_triangles() && num_indices == 0 {
            tracing::debug!("skipping triangle mesh without indices");
            return Ok(None);
        }

        let world_aabb = match positions {
            Positions::Raw(raw) => world_aabb_of_raw(raw, mesh.matrix.as_ref()),
            Positions::Quantized(quantized) => {
                let decode = self
                    .decode_matrix
                    .as_ref()
                    .expect("pre-quantized input requires a model decode matrix");
                world_aabb_of_quantized(quantized, decode)
            }
        };

        // A mesh that would not fit a fresh layer can never be placed, so
        // reject it here instead of tripping the layer's budget panic.
        if positions.len() >= self.options.max_batch_verts * 3
            || num_indices >= self.options.max_batch_indices
        {
            return Err(ModelError::MeshExceedsBudget {
                verts: positions.len() / 3,
                indices: num_indices,
            });
        }

        let has_normals = mesh.normals.is_some();
        let bucket = (mesh.primitive, has_normals);
        let open = self.open_batching.get(&bucket).copied().filter(|&index| {
            match &self.layers[index] {
                Layer::Batching(layer) => {
                    layer.can_create_portion(positions.len(), num_indices)
                }
                Layer::Instancing(_) => false,
            }
        });
        let layer_index = match open {
            Some(index) => index,
            None => {
                // Full or missing bucket: open a fresh layer.
                let renderers = self.registry.renderers(self.scene, mesh.primitive);
                self.layers.push(Layer::Batching(BatchingLayer::new(
                    &LayerConfig {
                        primitive: mesh.primitive,
                        positions_decode_matrix: self.decode_matrix,
                        has_normals,
                        options: self.options,
                    },
                    renderers,
                )));
                let index = self.layers.len() - 1;
                self.open_batching.insert(bucket, index);
                tracing::debug!(primitive = ?mesh.primitive, index, "opened batching layer");
                index
            }
        };

        let color = mesh.color.unwrap_or([255, 255, 255, 255]);
        let portion = self.layers[layer_index]
            .expect_batching()
            .create_portion(&BatchedGeometry {
                positions,
                normals: mesh.normals,
                colors: mesh.colors,
                color: mesh.color,
                indices: mesh.indices,
                edge_indices: mesh.edge_indices,
                mesh_matrix: mesh.matrix,
                world_aabb,
            });
        self.counts.add_portion();
        self.meshes.push(MeshRecord {
            layer: layer_index,
            portion,
            base_aabb: world_aabb,
            entity: None,
            transparent: color[3] < 255,
        });
        Ok(Some(MeshId(self.meshes.len() - 1)))
    }

    /// Creates an entity owning `meshes`, with `flags` as its initial
    /// state. The state reaches the GPU in bulk at `finalize`.
    ///
    /// # Errors
    ///
    /// [`ModelError::ModelFinalized`] after `finalize`,
    /// [`ModelError::UnknownMesh`] / [`ModelError::MeshAlreadyOwned`] for
    /// bad mesh ids.
    pub fn create_entity(
        &mut self,
        meshes: &[MeshId],
        flags: EntityFlags,
    ) -> Result<EntityId, ModelError> {
        if self.finalized {
            return Err(ModelError::ModelFinalized);
        }
        for mesh in meshes {
            let record = self
                .meshes
                .get(mesh.0)
                .ok_or(ModelError::UnknownMesh(mesh.0 as u64))?;
            if let Some(owner) = record.entity {
                return Err(ModelError::MeshAlreadyOwned {
                    mesh: mesh.0 as u64,
                    owner: owner.0 as u64,
                });
            }
        }
        let entity = EntityId(self.entities.len());
        for mesh in meshes {
            self.meshes[mesh.0].entity = Some(entity);
        }
        self.entities.push(EntityRecord {
            flags,
            meshes: meshes.to_vec(),
        });
        Ok(entity)
    }

    /// Uploads every layer to the GPU, seeds entity flags through the
    /// deferred bulk path, and freezes ingestion. Idempotent.
    pub fn finalize(&mut self, backend: &dyn GpuBackend) {
        if self.finalized {
            return;
        }
        for layer in &mut self.layers {
            layer.finalize(backend);
        }
        // One CPU flag image per layer, one GPU write per layer, instead
        // of one write per entity.
        for entity_index in 0..self.entities.len() {
            let flags = self.entities[entity_index].flags;
            for mesh_index in 0..self.entities[entity_index].meshes.len() {
                let mesh = self.entities[entity_index].meshes[mesh_index];
                let record = self.meshes[mesh.0];
                self.layers[record.layer].init_flags(
                    record.portion,
                    flags,
                    record.transparent,
                    &mut self.counts,
                );
            }
        }
        for layer in &mut self.layers {
            layer.flush_init_flags();
        }
        self.finalized = true;
        tracing::info!(
            layers = self.layers.len(),
            meshes = self.meshes.len(),
            entities = self.entities.len(),
            "scene model finalized"
        );
    }

    fn update_entity(
        &mut self,
        entity: EntityId,
        bit: EntityFlags,
        on: bool,
        apply: fn(&mut Layer, PortionId, EntityFlags, bool, &mut LayerCounts),
    ) -> Result<(), ModelError> {
        let record = self
            .entities
            .get_mut(entity.0)
            .ok_or(ModelError::UnknownEntity(entity.0 as u64))?;
        if record.flags.contains(bit) == on {
            return Ok(());
        }
        record.flags = record.flags.set(bit, on);
        let flags = record.flags;
        for mesh in &record.meshes {
            let m = self.meshes[mesh.0];
            apply(
                &mut self.layers[m.layer],
                m.portion,
                flags,
                m.transparent,
                &mut self.counts,
            );
        }
        Ok(())
    }

    /// Shows or hides `entity`. No-op when unchanged.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownEntity`] for a bad id.
    pub fn set_visible(&mut self, entity: EntityId, on: bool) -> Result<(), ModelError> {
        self.update_entity(entity, EntityFlags::VISIBLE, on, Layer::set_visible)
    }

    /// Toggles the highlight silhouette on `entity`. No-op when unchanged.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownEntity`] for a bad id.
    pub fn set_highlighted(&mut self, entity: EntityId, on: bool) -> Result<(), ModelError> {
        self.update_entity(entity, EntityFlags::HIGHLIGHTED, on, Layer::set_highlighted)
    }

    /// Toggles the x-ray silhouette on `entity`. No-op when unchanged.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownEntity`] for a bad id.
    pub fn set_xrayed(&mut self, entity: EntityId, on: bool) -> Result<(), ModelError> {
        self.update_entity(entity, EntityFlags::XRAYED, on, Layer::set_xrayed)
    }

    /// Toggles the selection silhouette on `entity`. No-op when unchanged.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownEntity`] for a bad id.
    pub fn set_selected(&mut self, entity: EntityId, on: bool) -> Result<(), ModelError> {
        self.update_entity(entity, EntityFlags::SELECTED, on, Layer::set_selected)
    }

    /// Toggles emphasized edges on `entity`. No-op when unchanged.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownEntity`] for a bad id.
    pub fn set_edges(&mut self, entity: EntityId, on: bool) -> Result<(), ModelError> {
        self.update_entity(entity, EntityFlags::EDGES, on, Layer::set_edges)
    }

    /// Toggles section-plane clipping on `entity`. No-op when unchanged.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownEntity`] for a bad id.
    pub fn set_clippable(&mut self, entity: EntityId, on: bool) -> Result<(), ModelError> {
        self.update_entity(entity, EntityFlags::CLIPPABLE, on, Layer::set_clippable)
    }

    /// Toggles frustum culling on `entity`. No-op when unchanged.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownEntity`] for a bad id.
    pub fn set_culled(&mut self, entity: EntityId, on: bool) -> Result<(), ModelError> {
        self.update_entity(entity, EntityFlags::CULLED, on, Layer::set_culled)
    }

    /// Toggles pickability on `entity`. No-op when unchanged.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownEntity`] for a bad id.
    pub fn set_pickable(&mut self, entity: EntityId, on: bool) -> Result<(), ModelError> {
        self.update_entity(entity, EntityFlags::PICKABLE, on, Layer::set_pickable)
    }

    /// Recolors every mesh of `entity` (opacity in alpha). Crossing the
    /// alpha threshold migrates the meshes between the opaque and
    /// transparent passes.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownEntity`] for a bad id.
    pub fn set_color(&mut self, entity: EntityId, rgba: [u8; 4]) -> Result<(), ModelError> {
        let record = self
            .entities
            .get(entity.0)
            .ok_or(ModelError::UnknownEntity(entity.0 as u64))?;
        let flags = record.flags;
        let transparent = rgba[3] < 255;
        for mesh in record.meshes.clone() {
            let layer_index = self.meshes[mesh.0].layer;
            let portion = self.meshes[mesh.0].portion;
            self.layers[layer_index].set_color(portion, rgba);
            if self.meshes[mesh.0].transparent != transparent {
                self.meshes[mesh.0].transparent = transparent;
                self.layers[layer_index].set_transparent(
                    portion,
                    flags,
                    transparent,
                    &mut self.counts,
                );
            }
        }
        Ok(())
    }

    /// Moves every mesh of `entity` by a world-space offset, updating the
    /// portion AABBs. Soft no-op (with an error log) when the scene was
    /// configured without entity offsets.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownEntity`] for a bad id.
    pub fn set_offset(&mut self, entity: EntityId, offset: [f32; 3]) -> Result<(), ModelError> {
        let record = self
            .entities
            .get(entity.0)
            .ok_or(ModelError::UnknownEntity(entity.0 as u64))?;
        if !self.options.entity_offsets_enabled {
            tracing::error!(
                "set_offset ignored: scene options have entity_offsets_enabled = false"
            );
            return Ok(());
        }
        for mesh in record.meshes.clone() {
            let m = self.meshes[mesh.0];
            let mut aabb = m.base_aabb;
            for axis in 0..3 {
                aabb.values[axis] += f64::from(offset[axis]);
                aabb.values[axis + 3] += f64::from(offset[axis]);
            }
            self.layers[m.layer].set_offset(m.portion, offset);
            self.layers[m.layer].set_portion_aabb(m.portion, aabb);
        }
        Ok(())
    }

    /// The model's world AABB: the union of every layer's.
    pub fn aabb(&mut self) -> Aabb {
        let mut aabb = Aabb::collapsed();
        for layer in &mut self.layers {
            aabb.expand(&layer.aabb());
        }
        aabb
    }

    /// Draws the opaque fill color pass across every layer.
    pub fn draw_color_opaque(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_color_opaque());
        }
    }

    /// Draws the blended fill color pass across every layer.
    pub fn draw_color_transparent(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_color_transparent());
        }
    }

    /// Draws the opaque depth prepass across every layer.
    pub fn draw_depth(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_depth());
        }
    }

    /// Draws the opaque normals prepass across every layer.
    pub fn draw_normals(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_normals());
        }
    }

    /// Draws the x-ray silhouette pass across every layer.
    pub fn draw_silhouette_xrayed(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_silhouette_xrayed());
        }
    }

    /// Draws the highlight silhouette pass across every layer.
    pub fn draw_silhouette_highlighted(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_silhouette_highlighted());
        }
    }

    /// Draws the selection silhouette pass across every layer.
    pub fn draw_silhouette_selected(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_silhouette_selected());
        }
    }

    /// Draws emphasized edges over opaque fill across every layer.
    pub fn draw_edges_color_opaque(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_edges_color_opaque());
        }
    }

    /// Draws emphasized edges over blended fill across every layer.
    pub fn draw_edges_color_transparent(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_edges_color_transparent());
        }
    }

    /// Draws x-ray-styled edges across every layer.
    pub fn draw_edges_xrayed(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_edges_xrayed());
        }
    }

    /// Draws highlight-styled edges across every layer.
    pub fn draw_edges_highlighted(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_edges_highlighted());
        }
    }

    /// Draws selection-styled edges across every layer.
    pub fn draw_edges_selected(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_edges_selected());
        }
    }

    /// Draws the mesh-id pick pass across every layer.
    pub fn draw_pick_mesh(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_pick_mesh());
        }
    }

    /// Draws the pick depth pass across every layer.
    pub fn draw_pick_depths(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_pick_depths());
        }
    }

    /// Draws the pick normals pass across every layer.
    pub fn draw_pick_normals(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_pick_normals());
        }
    }

    /// Draws the occlusion query pass across every layer.
    pub fn draw_occlusion(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_occlusion());
        }
    }

    /// Draws the shadow map pass across every layer.
    pub fn draw_shadow(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_shadow());
        }
    }

    /// Draws the snap-pick initialization pass across every layer.
    pub fn draw_snap_init(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_snap_init());
        }
    }

    /// Draws the snap-pick vertex/edge pass across every layer.
    pub fn draw_snap(&self) {
        for layer in &self.layers {
            on_layer!(layer, l => l.draw_snap());
        }
    }
}

/// World AABB of raw positions under an optional modeling matrix.
fn world_aabb_of_raw(positions: &[f32], matrix: Option<&Mat4>) -> Aabb {
    let mut aabb = Aabb::collapsed();
    for xyz in positions.chunks_exact(3) {
        let (x, y, z) = match matrix {
            Some(m) => (
                m[0] * xyz[0] + m[4] * xyz[1] + m[8] * xyz[2] + m[12],
                m[1] * xyz[0] + m[5] * xyz[1] + m[9] * xyz[2] + m[13],
                m[2] * xyz[0] + m[6] * xyz[1] + m[10] * xyz[2] + m[14],
            ),
            None => (xyz[0], xyz[1], xyz[2]),
        };
        aabb.expand_point([f64::from(x), f64::from(y), f64::from(z)]);
    }
    aabb
}

/// World AABB of pre-quantized positions under their decode matrix.
fn world_aabb_of_quantized(positions: &[u16], decode: &Mat4) -> Aabb {
    let mut aabb = Aabb::collapsed();
    for xyz in positions.chunks_exact(3) {
        let mut point = [0.0_f64; 3];
        for axis in 0..3 {
            point[axis] = f64::from(
                decode[axis * 4 + axis] * f32::from(xyz[axis]) + decode[12 + axis],
            );
        }
        aabb.expand_point(point);
    }
    aabb
}

/// AABB of `local` transformed by `matrix` (all eight corners).
fn transformed_aabb(local: &Aabb, matrix: &Mat4) -> Aabb {
    let mut aabb = Aabb::collapsed();
    for corner in 0..8 {
        #[allow(clippy::cast_possible_truncation)]
        let (x, y, z) = (
            local.values[if corner & 1 == 0 { 0 } else { 3 }] as f32,
            local.values[if corner & 2 == 0 { 1 } else { 4 }] as f32,
            local.values[if corner & 4 == 0 { 2 } else { 5 }] as f32,
        );
        let world = [
            matrix[0] * x + matrix[4] * y + matrix[8] * z + matrix[12],
            matrix[1] * x + matrix[5] * y + matrix[9] * z + matrix[13],
            matrix[2] * x + matrix[6] * y + matrix[10] * z + matrix[14],
        ];
        aabb.expand_point([
            f64::from(world[0]),
            f64::from(world[1]),
            f64::from(world[2]),
        ]);
    }
    aabb
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use atrium_core::RenderPass;
    use atrium_gpu::HeadlessBackend;
    use atrium_rendering::{
        LayerDrawState, LayerRenderer, RendererFactory, RendererFamily,
    };

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

    fn test_model(options: SceneOptions) -> VboModel {
        let registry = Arc::new(RendererRegistry::new(Arc::new(NopFactory)));
        VboModel::new(
            &VboModelConfig {
                scene: SceneId(1),
                options,
                positions_decode_matrix: None,
            },
            registry,
        )
    }

    fn quad_mesh<'a>(positions: &'a [f32], indices: &'a [u32]) -> MeshDescriptor<'a> {
        MeshDescriptor {
            positions: Some(Positions::Raw(positions)),
            indices: Some(indices),
            color: Some([200, 10, 10, 255]),
            ..MeshDescriptor::default()
        }
    }

    const QUAD_POSITIONS: [f32; 12] = [
        0.0, 0.0, 0.0, //
        1.0, 0.0, 0.0, //
        1.0, 1.0, 0.0, //
        0.0, 1.0, 0.0,
    ];
    const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

    #[test]
    fn test_degenerate_meshes_are_skipped_not_fatal() {
        let mut model = test_model(SceneOptions::default());
        let no_positions = model
            .create_mesh(&MeshDescriptor::default())
            .expect("skip is not an error");
        assert_eq!(no_positions, None);

        let no_indices = model
            .create_mesh(&MeshDescriptor {
                positions: Some(Positions::Raw(&QUAD_POSITIONS)),
                ..MeshDescriptor::default()
            })
            .expect("skip is not an error");
        assert_eq!(no_indices, None);
        assert_eq!(model.mesh_count(), 0);
    }

    #[test]
    fn test_meshes_share_a_layer_until_the_budget_fills() {
        let mut model = test_model(SceneOptions {
            max_batch_verts: 10,
            max_batch_indices: 30,
            ..SceneOptions::default()
        });
        let a = model
            .create_mesh(&quad_mesh(&QUAD_POSITIONS, &QUAD_INDICES))
            .expect("ingest")
            .expect("not degenerate");
        let b = model
            .create_mesh(&quad_mesh(&QUAD_POSITIONS, &QUAD_INDICES))
            .expect("ingest")
            .expect("not degenerate");
        assert_eq!(model.layer_count(), 1);
        // Third quad would hit the 10-vertex budget: rolls to a new layer.
        let c = model
            .create_mesh(&quad_mesh(&QUAD_POSITIONS, &QUAD_INDICES))
            .expect("ingest")
            .expect("not degenerate");
        assert_eq!(model.layer_count(), 2);
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(model.counts().portions, 3);
    }

    #[test]
    fn test_oversized_mesh_is_rejected_not_panicked() {
        let mut model = test_model(SceneOptions {
            max_batch_verts: 3,
            max_batch_indices: 9,
            ..SceneOptions::default()
        });
        let result = model.create_mesh(&quad_mesh(&QUAD_POSITIONS, &QUAD_INDICES));
        assert_eq!(
            result,
            Err(ModelError::MeshExceedsBudget {
                verts: 4,
                indices: 6
            })
        );
        assert_eq!(model.layer_count(), 0, "no layer opened for the reject");
        assert_eq!(model.mesh_count(), 0);
    }

    #[test]
    fn test_instanced_meshes_share_one_layer_per_geometry() {
        let mut model = test_model(SceneOptions::default());
        let geometry = model
            .create_geometry(SharedGeometry::from_raw(
                Primitive::Triangles,
                &QUAD_POSITIONS,
                Vec::new(),
                QUAD_INDICES.to_vec(),
                Vec::new(),
            ))
            .expect("register");
        for _ in 0..3 {
            let _ = model
                .create_mesh(&MeshDescriptor {
                    geometry: Some(geometry),
                    ..MeshDescriptor::default()
                })
                .expect("ingest");
        }
        assert_eq!(model.layer_count(), 1);
        assert_eq!(model.counts().portions, 3);
    }

    #[test]
    fn test_unknown_geometry_is_an_error() {
        let mut model = test_model(SceneOptions::default());
        let err = model
            .create_mesh(&MeshDescriptor {
                geometry: Some(GeometryId(9)),
                ..MeshDescriptor::default()
            })
            .expect_err("unregistered geometry");
        assert_eq!(err, ModelError::UnknownGeometry(9));
    }

    #[test]
    fn test_mesh_ownership_is_exclusive() {
        let mut model = test_model(SceneOptions::default());
        let mesh = model
            .create_mesh(&quad_mesh(&QUAD_POSITIONS, &QUAD_INDICES))
            .expect("ingest")
            .expect("not degenerate");
        let owner = model
            .create_entity(&[mesh], EntityFlags::VISIBLE)
            .expect("first owner");
        let err = model
            .create_entity(&[mesh], EntityFlags::VISIBLE)
            .expect_err("second owner rejected");
        assert_eq!(
            err,
            ModelError::MeshAlreadyOwned {
                mesh: mesh.0 as u64,
                owner: owner.0 as u64,
            }
        );
    }

    #[test]
    fn test_ingestion_is_refused_after_finalize() {
        let backend = HeadlessBackend::new();
        let mut model = test_model(SceneOptions::default());
        let _ = model
            .create_mesh(&quad_mesh(&QUAD_POSITIONS, &QUAD_INDICES))
            .expect("ingest");
        model.finalize(&backend);
        let err = model
            .create_mesh(&quad_mesh(&QUAD_POSITIONS, &QUAD_INDICES))
            .expect_err("frozen");
        assert_eq!(err, ModelError::ModelFinalized);
    }

    #[test]
    fn test_finalize_seeds_counters_from_entity_flags() {
        let backend = HeadlessBackend::new();
        let mut model = test_model(SceneOptions::default());
        let a = model
            .create_mesh(&quad_mesh(&QUAD_POSITIONS, &QUAD_INDICES))
            .expect("ingest")
            .expect("not degenerate");
        let b = model
            .create_mesh(&quad_mesh(&QUAD_POSITIONS, &QUAD_INDICES))
            .expect("ingest")
            .expect("not degenerate");
        let _ = model
            .create_entity(
                &[a],
                EntityFlags::VISIBLE.with(EntityFlags::PICKABLE),
            )
            .expect("entity a");
        let _ = model
            .create_entity(&[b], EntityFlags::VISIBLE.with(EntityFlags::XRAYED))
            .expect("entity b");
        model.finalize(&backend);
        assert_eq!(model.counts().visible, 2);
        assert_eq!(model.counts().pickable, 1);
        assert_eq!(model.counts().xrayed, 1);
        assert_eq!(model.counts().selected, 0);
    }

    #[test]
    fn test_toggles_move_counters_and_noop_when_unchanged() {
        let backend = HeadlessBackend::new();
        let mut model = test_model(SceneOptions::default());
        let mesh = model
            .create_mesh(&quad_mesh(&QUAD_POSITIONS, &QUAD_INDICES))
            .expect("ingest")
            .expect("not degenerate");
        let entity = model
            .create_entity(&[mesh], EntityFlags::VISIBLE)
            .expect("entity");
        model.finalize(&backend);
        assert_eq!(model.counts().visible, 1);

        model.set_highlighted(entity, true).expect("known entity");
        model.set_highlighted(entity, true).expect("redundant toggle");
        assert_eq!(model.counts().highlighted, 1, "no double count");
        model.set_highlighted(entity, false).expect("known entity");
        assert_eq!(model.counts().highlighted, 0);

        model.set_visible(entity, false).expect("known entity");
        assert_eq!(model.counts().visible, 0);
    }

    #[test]
    fn test_set_color_migrates_transparency() {
        let backend = HeadlessBackend::new();
        let mut model = test_model(SceneOptions::default());
        let mesh = model
            .create_mesh(&quad_mesh(&QUAD_POSITIONS, &QUAD_INDICES))
            .expect("ingest")
            .expect("not degenerate");
        let entity = model
            .create_entity(&[mesh], EntityFlags::VISIBLE)
            .expect("entity");
        model.finalize(&backend);
        assert_eq!(model.counts().transparent, 0);

        model.set_color(entity, [10, 10, 10, 100]).expect("entity");
        assert_eq!(model.counts().transparent, 1);
        // Same transparency class: counter stays put.
        model.set_color(entity, [20, 20, 20, 50]).expect("entity");
        assert_eq!(model.counts().transparent, 1);
        model.set_color(entity, [30, 30, 30, 255]).expect("entity");
        assert_eq!(model.counts().transparent, 0);
    }

    #[test]
    fn test_set_offset_moves_the_model_aabb() {
        let backend = HeadlessBackend::new();
        let mut model = test_model(SceneOptions {
            entity_offsets_enabled: true,
            ..SceneOptions::default()
        });
        let mesh = model
            .create_mesh(&quad_mesh(&QUAD_POSITIONS, &QUAD_INDICES))
            .expect("ingest")
            .expect("not degenerate");
        let entity = model
            .create_entity(&[mesh], EntityFlags::VISIBLE)
            .expect("entity");
        model.finalize(&backend);
        assert_eq!(model.aabb().values[0], 0.0);

        model.set_offset(entity, [10.0, 0.0, 0.0]).expect("entity");
        assert_eq!(model.aabb().values[0], 10.0);
        assert_eq!(model.aabb().values[3], 11.0);
    }

    #[test]
    fn test_unknown_entity_is_an_error() {
        let mut model = test_model(SceneOptions::default());
        let err = model
            .set_visible(EntityId(3), true)
            .expect_err("no entities exist");
        assert_eq!(err, ModelError::UnknownEntity(3));
    }
}
