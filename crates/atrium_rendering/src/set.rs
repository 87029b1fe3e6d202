//! # Renderer Set
//!
//! One lazily-filled slot per pass family. Accessors compile on first use
//! and memoize; `retain_valid` drops slots whose program reports invalid
//! after a GPU-context recompile, so the next access rebuilds them.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::renderer::{LayerRenderer, Primitive, RendererFactory, RendererFamily};

/// All pass families, in slot order.
const FAMILIES: [RendererFamily; 12] = [
    RendererFamily::Color,
    RendererFamily::Depth,
    RendererFamily::Normals,
    RendererFamily::Silhouette,
    RendererFamily::Edges,
    RendererFamily::PickMesh,
    RendererFamily::PickDepth,
    RendererFamily::PickNormals,
    RendererFamily::Occlusion,
    RendererFamily::Shadow,
    RendererFamily::SnapInit,
    RendererFamily::Snap,
];

/// Memoized renderers for one (scene, primitive) pairing.
pub struct RendererSet {
    /// Compiles renderers on first access.
    factory: Arc<dyn RendererFactory>,
    /// Topology the renderers are specialized for.
    primitive: Primitive,
    /// One slot per entry of [`FAMILIES`].
    slots: [Mutex<Option<Arc<dyn LayerRenderer>>>; 12],
}

impl RendererSet {
    /// Creates an empty set; nothing compiles until first access.
    #[must_use]
    pub fn new(factory: Arc<dyn RendererFactory>, primitive: Primitive) -> Self {
        Self {
            factory,
            primitive,
            slots: std::array::from_fn(|_| Mutex::new(None)),
        }
    }

    fn slot_index(family: RendererFamily) -> usize {
        FAMILIES
            .iter()
            .position(|f| *f == family)
            .expect("every family has a slot")
    }

    /// The renderer for `family`, compiling and memoizing on first access.
    pub fn get(&self, family: RendererFamily) -> Arc<dyn LayerRenderer> {
        let mut slot = self.slots[Self::slot_index(family)].lock();
        if let Some(renderer) = slot.as_ref() {
            return Arc::clone(renderer);
        }
        tracing::debug!(?family, primitive = ?self.primitive, "compiling layer renderer");
        let renderer = self.factory.create(family, self.primitive);
        *slot = Some(Arc::clone(&renderer));
        renderer
    }

    /// The fill color renderer.
    pub fn color(&self) -> Arc<dyn LayerRenderer> {
        self.get(RendererFamily::Color)
    }

    /// The silhouette renderer.
    pub fn silhouette(&self) -> Arc<dyn LayerRenderer> {
        self.get(RendererFamily::Silhouette)
    }

    /// The edges renderer.
    pub fn edges(&self) -> Arc<dyn LayerRenderer> {
        self.get(RendererFamily::Edges)
    }

    /// The snap-pick initialization renderer.
    pub fn snap_init(&self) -> Arc<dyn LayerRenderer> {
        self.get(RendererFamily::SnapInit)
    }

    /// The snap-pick renderer.
    pub fn snap(&self) -> Arc<dyn LayerRenderer> {
        self.get(RendererFamily::Snap)
    }

    /// Drops every slot whose renderer reports invalid; the next access
    /// recompiles it. Called on the scene's recompile event.
    pub fn retain_valid(&self) {
        for (slot, family) in self.slots.iter().zip(FAMILIES) {
            let mut slot = slot.lock();
            if slot.as_ref().is_some_and(|r| !r.is_valid()) {
                tracing::debug!(?family, "evicting invalidated renderer");
                *slot = None;
            }
        }
    }

    /// Drops every slot. Called on scene teardown.
    pub fn clear(&self) {
        for slot in &self.slots {
            *slot.lock() = None;
        }
    }

    /// Number of currently compiled renderers (test/diagnostic hook).
    #[must_use]
    pub fn compiled_count(&self) -> usize {
        self.slots.iter().filter(|s| s.lock().is_some()).count()
    }
}
