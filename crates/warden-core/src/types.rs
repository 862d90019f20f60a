use serde::{Deserialize, Serialize};

/// Dimensionality of a face descriptor.
pub const DESCRIPTOR_DIM: usize = 128;

/// Label reported when no gallery entry matches.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Face bounding box in normalized image coordinates, values in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub xmin: f32,
    pub ymin: f32,
    pub width: f32,
    pub height: f32,
}

/// One detected face: normalized box, eye keypoints, confidence score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: NormalizedBox,
    /// Normalized eye centers: (left, right), each (x, y) in [0, 1].
    pub left_eye: (f32, f32),
    pub right_eye: (f32, f32),
    pub score: f32,
}

/// Integer pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned pixel rectangle, corners ordered top-left / bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub top_left: Point,
    pub bottom_right: Point,
}

impl Rect {
    pub fn new(top_left: Point, bottom_right: Point) -> Self {
        Self { top_left, bottom_right }
    }

    pub fn width(&self) -> i32 {
        self.bottom_right.x - self.top_left.x
    }

    pub fn height(&self) -> i32 {
        self.bottom_right.y - self.top_left.y
    }

    /// True when both dimensions are positive.
    pub fn is_valid(&self) -> bool {
        self.width() > 0 && self.height() > 0
    }
}

/// Face descriptor vector (128-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance to another descriptor.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One stored gallery entry: a registered name and its descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub name: String,
    pub descriptor: Descriptor,
}

/// Result of matching a probe descriptor against the gallery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub matched: bool,
    /// Euclidean distance of the nearest gallery entry.
    pub distance: f32,
    /// Name of the nearest entry, or [`UNKNOWN_NAME`].
    pub name: String,
}

impl MatchOutcome {
    /// Outcome for "nothing usable to compare against".
    pub fn unknown(distance: f32) -> Self {
        Self {
            matched: false,
            distance,
            name: UNKNOWN_NAME.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_zero_for_self() {
        let d = Descriptor::new(vec![0.3, -0.7, 1.2]);
        assert!(d.euclidean_distance(&d).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_symmetric() {
        let a = Descriptor::new(vec![1.0, 2.0, 3.0]);
        let b = Descriptor::new(vec![-1.0, 0.5, 2.0]);
        assert!((a.euclidean_distance(&b) - b.euclidean_distance(&a)).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_known_value() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_rect_dimensions() {
        let r = Rect::new(Point::new(10, 20), Point::new(40, 80));
        assert_eq!(r.width(), 30);
        assert_eq!(r.height(), 60);
        assert!(r.is_valid());
    }

    #[test]
    fn test_rect_degenerate_invalid() {
        let r = Rect::new(Point::new(10, 20), Point::new(10, 80));
        assert!(!r.is_valid());
    }
}
