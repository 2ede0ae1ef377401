use glam::Vec3;

/// Axis-aligned box in camera space.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BBox {
    /// Box that contains nothing; the first `add_point` snaps to the point.
    pub const EMPTY: BBox = BBox {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn clear(&mut self) {
        *self = Self::EMPTY;
    }

    #[inline]
    pub fn add_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// The eight corners, used by projections to bound the box on screen.
    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }
}

impl Default for BBox {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl FromIterator<Vec3> for BBox {
    fn from_iter<I: IntoIterator<Item = Vec3>>(iter: I) -> Self {
        let mut b = BBox::EMPTY;
        for p in iter {
            b.add_point(p);
        }
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_box_snaps_to_first_point() {
        let mut b = BBox::EMPTY;
        assert!(b.is_empty());
        b.add_point(Vec3::new(1.0, 2.0, -3.0));
        assert!(!b.is_empty());
        assert_eq!(b.min, b.max);
    }

    #[test]
    fn collect_spans_all_points() {
        let b: BBox = [Vec3::new(-1.0, 0.0, -5.0), Vec3::new(2.0, 3.0, -1.0)]
            .into_iter()
            .collect();
        assert_eq!(b.min, Vec3::new(-1.0, 0.0, -5.0));
        assert_eq!(b.max, Vec3::new(2.0, 3.0, -1.0));
        assert!(b.corners().iter().all(|c| c.cmpge(b.min).all() && c.cmple(b.max).all()));
    }
}
