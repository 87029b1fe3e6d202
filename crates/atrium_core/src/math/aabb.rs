//! Axis-aligned bounding boxes.
//!
//! Layers accumulate a local-space AABB while portions are appended, then
//! quantize positions against it at finalize time. World-space AABBs are
//! f64 because BIM models routinely sit at georeferenced coordinates where
//! f32 loses millimeters.

/// An axis-aligned bounding box: `[min_x, min_y, min_z, max_x, max_y, max_z]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Min corner followed by max corner.
    pub values: [f64; 6],
}

impl Aabb {
    /// Creates a collapsed AABB that any expansion will replace.
    ///
    /// Min components start at `+inf`, max components at `-inf`, so the
    /// first `expand_point` snaps the box onto that point.
    #[must_use]
    pub const fn collapsed() -> Self {
        Self {
            values: [
                f64::INFINITY,
                f64::INFINITY,
                f64::INFINITY,
                f64::NEG_INFINITY,
                f64::NEG_INFINITY,
                f64::NEG_INFINITY,
            ],
        }
    }

    /// Creates an AABB from explicit corner values.
    #[must_use]
    pub const fn new(values: [f64; 6]) -> Self {
        Self { values }
    }

    /// Returns true if the box has never been expanded.
    #[must_use]
    pub fn is_collapsed(&self) -> bool {
        self.values[0] > self.values[3]
    }

    /// Expands the box to contain `point`.
    pub fn expand_point(&mut self, point: [f64; 3]) {
        for axis in 0..3 {
            if point[axis] < self.values[axis] {
                self.values[axis] = point[axis];
            }
            if point[axis] > self.values[axis + 3] {
                self.values[axis + 3] = point[axis];
            }
        }
    }

    /// Expands the box to contain `other`.
    pub fn expand(&mut self, other: &Self) {
        for axis in 0..3 {
            if other.values[axis] < self.values[axis] {
                self.values[axis] = other.values[axis];
            }
            if other.values[axis + 3] > self.values[axis + 3] {
                self.values[axis + 3] = other.values[axis + 3];
            }
        }
    }

    /// Returns the center point of the box.
    #[must_use]
    pub fn center(&self) -> [f64; 3] {
        [
            (self.values[0] + self.values[3]) / 2.0,
            (self.values[1] + self.values[4]) / 2.0,
            (self.values[2] + self.values[5]) / 2.0,
        ]
    }

    /// Returns the extent along each axis.
    #[must_use]
    pub fn extent(&self) -> [f64; 3] {
        [
            self.values[3] - self.values[0],
            self.values[4] - self.values[1],
            self.values[5] - self.values[2],
        ]
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::collapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapsed_then_expand_point() {
        let mut aabb = Aabb::collapsed();
        assert!(aabb.is_collapsed());
        aabb.expand_point([1.0, 2.0, 3.0]);
        assert!(!aabb.is_collapsed());
        assert_eq!(aabb.values, [1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_union_of_two_boxes() {
        let mut a = Aabb::new([0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let b = Aabb::new([2.0, -1.0, 0.5, 3.0, 0.5, 4.0]);
        a.expand(&b);
        assert_eq!(a.values, [0.0, -1.0, 0.0, 3.0, 1.0, 4.0]);
    }

    #[test]
    fn test_center_and_extent() {
        let aabb = Aabb::new([0.0, 0.0, 0.0, 2.0, 4.0, 6.0]);
        assert_eq!(aabb.center(), [1.0, 2.0, 3.0]);
        assert_eq!(aabb.extent(), [2.0, 4.0, 6.0]);
    }
}
