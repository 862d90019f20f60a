//! Admission gate — is a detected face eligible for liveness and matching?

use crate::types::Point;

/// Stateless admission predicate over a configured pixel window.
///
/// A face is admitted when its center lies strictly inside the window on
/// both axes, its normalized box height exceeds `min_height` (size/distance
/// proxy) and its detection score exceeds `min_score`.
#[derive(Debug, Clone)]
pub struct RegionGate {
    start: Point,
    end: Point,
    min_height: f32,
    min_score: f32,
}

impl RegionGate {
    pub fn new(start: Point, end: Point, min_height: f32, min_score: f32) -> Self {
        Self { start, end, min_height, min_score }
    }

    /// Test admission. Strict comparisons throughout, so NaN input fails
    /// closed on every clause.
    pub fn admit(&self, center: Point, bbox_height: f32, score: f32) -> bool {
        self.start.x < center.x
            && center.x < self.end.x
            && self.start.y < center.y
            && center.y < self.end.y
            && bbox_height > self.min_height
            && score > self.min_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> RegionGate {
        RegionGate::new(Point::new(100, 100), Point::new(500, 400), 0.2, 0.5)
    }

    #[test]
    fn test_admit_inside() {
        assert!(gate().admit(Point::new(300, 250), 0.3, 0.9));
    }

    #[test]
    fn test_reject_outside_x() {
        assert!(!gate().admit(Point::new(600, 250), 0.3, 0.9));
        assert!(!gate().admit(Point::new(50, 250), 0.3, 0.9));
    }

    #[test]
    fn test_reject_outside_y() {
        assert!(!gate().admit(Point::new(300, 450), 0.3, 0.9));
        assert!(!gate().admit(Point::new(300, 50), 0.3, 0.9));
    }

    #[test]
    fn test_boundary_is_exclusive() {
        // Center exactly on the window edge is not admitted
        assert!(!gate().admit(Point::new(100, 250), 0.3, 0.9));
        assert!(!gate().admit(Point::new(500, 250), 0.3, 0.9));
        assert!(!gate().admit(Point::new(300, 100), 0.3, 0.9));
        assert!(!gate().admit(Point::new(300, 400), 0.3, 0.9));
    }

    #[test]
    fn test_reject_small_face() {
        assert!(!gate().admit(Point::new(300, 250), 0.2, 0.9));
        assert!(!gate().admit(Point::new(300, 250), 0.1, 0.9));
    }

    #[test]
    fn test_reject_low_score() {
        assert!(!gate().admit(Point::new(300, 250), 0.3, 0.5));
        assert!(!gate().admit(Point::new(300, 250), 0.3, 0.2));
    }

    #[test]
    fn test_monotonic_in_height_and_score() {
        let g = gate();
        let center = Point::new(300, 250);
        // Once admitted, raising height or score never flips the result
        assert!(g.admit(center, 0.21, 0.51));
        for step in 1..=10 {
            let h = 0.21 + step as f32 * 0.07;
            let s = 0.51 + step as f32 * 0.04;
            assert!(g.admit(center, h, 0.51));
            assert!(g.admit(center, 0.21, s.min(1.0)));
        }
    }

    #[test]
    fn test_nan_fails_closed() {
        assert!(!gate().admit(Point::new(300, 250), f32::NAN, 0.9));
        assert!(!gate().admit(Point::new(300, 250), 0.3, f32::NAN));
    }
}
