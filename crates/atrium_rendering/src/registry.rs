//! # Renderer Registry
//!
//! One [`RendererSet`] per (scene, primitive). An explicit registry object
//! owned by the process-wide rendering context replaces the module-level
//! mutable map the lifecycle was historically hung off: create on first
//! access, [`Self::on_compiled`] prunes invalidated programs,
//! [`Self::on_scene_destroyed`] evicts the scene's sets entirely.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::renderer::{Primitive, RendererFactory};
use crate::set::RendererSet;

/// Identifies one scene (one GPU context) to the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SceneId(pub u64);

/// Per-scene cache of renderer sets.
///
/// Layers across every model of a scene share the same sets, so each pass
/// family's program compiles once per scene rather than once per layer.
pub struct RendererRegistry {
    /// Compiles renderers for every set this registry hands out.
    factory: Arc<dyn RendererFactory>,
    /// Live sets, keyed by scene and topology.
    sets: Mutex<HashMap<(SceneId, Primitive), Arc<RendererSet>>>,
}

impl RendererRegistry {
    /// Creates a registry compiling through `factory`.
    #[must_use]
    pub fn new(factory: Arc<dyn RendererFactory>) -> Self {
        Self {
            factory,
            sets: Mutex::new(HashMap::new()),
        }
    }

    /// The renderer set for `scene` layers of `primitive` topology,
    /// created on first access.
    pub fn renderers(&self, scene: SceneId, primitive: Primitive) -> Arc<RendererSet> {
        let mut sets = self.sets.lock();
        Arc::clone(sets.entry((scene, primitive)).or_insert_with(|| {
            tracing::debug!(scene = scene.0, ?primitive, "creating renderer set");
            Arc::new(RendererSet::new(Arc::clone(&self.factory), primitive))
        }))
    }

    /// Handles the scene's GPU-context recompile event: every cached
    /// renderer is asked for validity and invalid ones are evicted, so the
    /// next access re-creates them against the new context.
    pub fn on_compiled(&self, scene: SceneId) {
        let sets = self.sets.lock();
        for ((id, _), set) in sets.iter() {
            if *id == scene {
                set.retain_valid();
            }
        }
    }

    /// Handles scene teardown: the scene's sets are destroyed and evicted.
    pub fn on_scene_destroyed(&self, scene: SceneId) {
        let mut sets = self.sets.lock();
        sets.retain(|(id, _), set| {
            if *id == scene {
                set.clear();
                false
            } else {
                true
            }
        });
        tracing::debug!(scene = scene.0, "evicted renderer sets for destroyed scene");
    }

    /// Number of live sets (test/diagnostic hook).
    #[must_use]
    pub fn set_count(&self) -> usize {
        self.sets.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use atrium_core::RenderPass;

    use super::*;
    use crate::renderer::{LayerDrawState, LayerRenderer, RendererFamily};

    struct NopRenderer;

    impl LayerRenderer for NopRenderer {
        fn draw(&self, _state: &LayerDrawState<'_>, _pass: RenderPass) {}

        fn is_valid(&self) -> bool {
            true
        }
    }

    struct NopFactory {
        created: AtomicUsize,
    }

    impl RendererFactory for NopFactory {
        fn create(
            &self,
            _family: RendererFamily,
            _primitive: Primitive,
        ) -> Arc<dyn LayerRenderer> {
            self.created.fetch_add(1, Ordering::Relaxed);
            Arc::new(NopRenderer)
        }
    }

    #[test]
    fn test_sets_are_shared_per_scene_and_primitive() {
        let registry = RendererRegistry::new(Arc::new(NopFactory {
            created: AtomicUsize::new(0),
        }));
        let a = registry.renderers(SceneId(1), Primitive::Triangles);
        let b = registry.renderers(SceneId(1), Primitive::Triangles);
        assert!(Arc::ptr_eq(&a, &b));
        let c = registry.renderers(SceneId(1), Primitive::Points);
        assert!(!Arc::ptr_eq(&a, &c));
        let d = registry.renderers(SceneId(2), Primitive::Triangles);
        assert!(!Arc::ptr_eq(&a, &d));
        assert_eq!(registry.set_count(), 3);
    }

    #[test]
    fn test_scene_destruction_evicts_only_that_scene() {
        let registry = RendererRegistry::new(Arc::new(NopFactory {
            created: AtomicUsize::new(0),
        }));
        let set = registry.renderers(SceneId(1), Primitive::Triangles);
        let _ = set.color();
        let _ = registry.renderers(SceneId(2), Primitive::Triangles);
        registry.on_scene_destroyed(SceneId(1));
        assert_eq!(registry.set_count(), 1);
        assert_eq!(set.compiled_count(), 0);
    }

    #[test]
    fn test_on_compiled_keeps_valid_programs() {
        let factory = Arc::new(NopFactory {
            created: AtomicUsize::new(0),
        });
        let registry = RendererRegistry::new(Arc::clone(&factory) as _);
        let set = registry.renderers(SceneId(7), Primitive::Lines);
        let _ = set.color();
        registry.on_compiled(SceneId(7));
        let _ = set.color();
        // Valid renderers survive the recompile event.
        assert_eq!(factory.created.load(Ordering::Relaxed), 1);
    }
}
