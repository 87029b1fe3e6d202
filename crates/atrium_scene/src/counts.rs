//! # Aggregate Portion Counters
//!
//! Every layer keeps an exact census of its portions' boolean states, and
//! the owning model keeps an identical mirror summed across layers. The
//! draw-pass guards and the model's "is anything visible/selected/..."
//! queries read these counters instead of scanning portions, which is what
//! keeps a hundred-layer scene's per-frame dispatch cheap.
//!
//! Invariant: counters move together with the toggle that changes a
//! portion's state - increment on set, decrement on clear, never
//! recomputed by scan.

/// Census of portion states for one layer (or the model-wide mirror).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LayerCounts {
    /// Total portions created.
    pub portions: usize,
    /// Portions currently visible.
    pub visible: usize,
    /// Portions currently transparent.
    pub transparent: usize,
    /// Portions currently x-rayed.
    pub xrayed: usize,
    /// Portions currently highlighted.
    pub highlighted: usize,
    /// Portions currently selected.
    pub selected: usize,
    /// Portions currently clippable.
    pub clippable: usize,
    /// Portions currently rendering emphasized edges.
    pub edges: usize,
    /// Portions currently pickable.
    pub pickable: usize,
    /// Portions currently culled.
    pub culled: usize,
}

impl LayerCounts {
    /// A zeroed census.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly created portion.
    pub fn add_portion(&mut self) {
        self.portions += 1;
    }

    fn adjust(counter: &mut usize, on: bool) {
        if on {
            *counter += 1;
        } else {
            debug_assert!(*counter > 0, "counter underflow: toggle without prior set");
            *counter -= 1;
        }
    }

    /// Moves the visible counter.
    pub fn set_visible(&mut self, on: bool) {
        Self::adjust(&mut self.visible, on);
    }

    /// Moves the transparent counter.
    pub fn set_transparent(&mut self, on: bool) {
        Self::adjust(&mut self.transparent, on);
    }

    /// Moves the x-rayed counter.
    pub fn set_xrayed(&mut self, on: bool) {
        Self::adjust(&mut self.xrayed, on);
    }

    /// Moves the highlighted counter.
    pub fn set_highlighted(&mut self, on: bool) {
        Self::adjust(&mut self.highlighted, on);
    }

    /// Moves the selected counter.
    pub fn set_selected(&mut self, on: bool) {
        Self::adjust(&mut self.selected, on);
    }

    /// Moves the clippable counter.
    pub fn set_clippable(&mut self, on: bool) {
        Self::adjust(&mut self.clippable, on);
    }

    /// Moves the edges counter.
    pub fn set_edges(&mut self, on: bool) {
        Self::adjust(&mut self.edges, on);
    }

    /// Moves the pickable counter.
    pub fn set_pickable(&mut self, on: bool) {
        Self::adjust(&mut self.pickable, on);
    }

    /// Moves the culled counter.
    pub fn set_culled(&mut self, on: bool) {
        Self::adjust(&mut self.culled, on);
    }

    /// True when every portion is culled (vacuously true when empty).
    #[must_use]
    pub const fn all_culled(&self) -> bool {
        self.culled == self.portions
    }

    /// True when anything could render at all: at least one portion is
    /// visible and not everything is culled. Every pass guard starts here.
    #[must_use]
    pub const fn draws_anything(&self) -> bool {
        self.visible > 0 && !self.all_culled()
    }

    /// Guard for the opaque fill pass: skipped when everything renderable
    /// is transparent or x-rayed.
    #[must_use]
    pub const fn draws_color_opaque(&self) -> bool {
        self.draws_anything()
            && self.transparent < self.portions
            && self.xrayed < self.portions
    }

    /// Guard for the blended fill pass. X-ray pulls portions out of both
    /// color passes, so an all-x-rayed layer skips this pass too.
    #[must_use]
    pub const fn draws_color_transparent(&self) -> bool {
        self.draws_anything() && self.transparent > 0 && self.xrayed < self.portions
    }

    /// Guard for the depth/normals prepasses, which cover exactly the
    /// opaque fill.
    #[must_use]
    pub const fn draws_prepass(&self) -> bool {
        self.draws_color_opaque()
    }

    /// Guard for the x-ray silhouette pass.
    #[must_use]
    pub const fn draws_silhouette_xrayed(&self) -> bool {
        self.draws_anything() && self.xrayed > 0
    }

    /// Guard for the highlight silhouette pass.
    #[must_use]
    pub const fn draws_silhouette_highlighted(&self) -> bool {
        self.draws_anything() && self.highlighted > 0
    }

    /// Guard for the selection silhouette pass.
    #[must_use]
    pub const fn draws_silhouette_selected(&self) -> bool {
        self.draws_anything() && self.selected > 0
    }

    /// Guard for the edge passes; the layer additionally requires a
    /// triangle topology.
    #[must_use]
    pub const fn draws_edges(&self) -> bool {
        self.draws_anything() && self.edges > 0
    }

    /// Guard for the pick passes.
    #[must_use]
    pub const fn draws_pick(&self) -> bool {
        self.draws_anything() && self.pickable > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_move_both_directions() {
        let mut counts = LayerCounts::new();
        counts.add_portion();
        counts.add_portion();
        counts.set_visible(true);
        counts.set_visible(true);
        counts.set_visible(false);
        assert_eq!(counts.portions, 2);
        assert_eq!(counts.visible, 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "counter underflow")]
    fn test_underflow_is_caught_in_debug() {
        let mut counts = LayerCounts::new();
        counts.set_selected(false);
    }

    #[test]
    fn test_pass_guards_follow_the_census() {
        let mut counts = LayerCounts::new();
        counts.add_portion();
        counts.add_portion();
        assert!(!counts.draws_anything(), "nothing visible yet");

        counts.set_visible(true);
        assert!(counts.draws_color_opaque());
        assert!(!counts.draws_color_transparent());
        assert!(!counts.draws_silhouette_xrayed());

        counts.set_transparent(true);
        assert!(counts.draws_color_transparent());

        counts.set_xrayed(true);
        counts.set_xrayed(true);
        assert!(counts.draws_silhouette_xrayed());
        assert!(!counts.draws_color_opaque(), "every portion is x-rayed");
        assert!(
            !counts.draws_color_transparent(),
            "x-ray removes portions from both color passes"
        );
        assert!(!counts.draws_prepass());

        counts.set_xrayed(false);
        counts.set_transparent(true);
        assert!(
            !counts.draws_prepass(),
            "all-transparent layer has no opaque prepass work"
        );

        counts.set_culled(true);
        counts.set_culled(true);
        assert!(counts.all_culled());
        assert!(!counts.draws_anything());
    }
}
