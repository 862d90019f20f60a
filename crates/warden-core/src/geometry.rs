//! Coordinate mapping — normalized detector output to pixel-space geometry.
//!
//! Detectors report boxes and keypoints in [0, 1] relative coordinates;
//! everything downstream (ROI gating, cropping, eye windows) works in
//! integer pixels. Conversions truncate toward zero and centers use floor
//! division, matching the calibrated reference behavior exactly.

use crate::types::{NormalizedBox, Point, Rect};

/// Eye window half-extent as a fraction of the face box pixel height.
const EYE_EXTENT_RATIO: f32 = 0.08;

/// Convert a normalized face box to a pixel rectangle and its center.
///
/// The bottom-right corner derives from the truncated top-left corner plus
/// the scaled extent, so rounding is anchored at the top-left.
pub fn face_box(bbox: &NormalizedBox, width: u32, height: u32) -> (Rect, Point) {
    let x1 = (bbox.xmin * width as f32) as i32;
    let y1 = (bbox.ymin * height as f32) as i32;
    let x2 = (x1 as f32 + bbox.width * width as f32) as i32;
    let y2 = (y1 as f32 + bbox.height * height as f32) as i32;

    let center = Point::new((x1 + x2).div_euclid(2), (y1 + y2).div_euclid(2));
    (Rect::new(Point::new(x1, y1), Point::new(x2, y2)), center)
}

/// Compute square pixel windows around both eye keypoints.
///
/// `bbox_height` is the face box height in normalized coordinates; the
/// window half-extent scales with the face size so the crop covers the
/// eyelid region at any distance from the camera.
pub fn eyes_boxes(
    left_eye: (f32, f32),
    right_eye: (f32, f32),
    bbox_height: f32,
    width: u32,
    height: u32,
) -> (Rect, Rect) {
    let extent = bbox_height * height as f32 * EYE_EXTENT_RATIO;
    (
        eye_window(left_eye, extent, width, height),
        eye_window(right_eye, extent, width, height),
    )
}

fn eye_window(eye: (f32, f32), extent: f32, width: u32, height: u32) -> Rect {
    let cx = (eye.0 * width as f32) as i32;
    let cy = (eye.1 * height as f32) as i32;
    Rect::new(
        Point::new((cx as f32 - extent) as i32, (cy as f32 - extent) as i32),
        Point::new((cx as f32 + extent) as i32, (cy as f32 + extent) as i32),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_box_reference_frame() {
        // 640x480 frame, box at (0.2, 0.2) sized 0.3x0.3
        let bbox = NormalizedBox { xmin: 0.2, ymin: 0.2, width: 0.3, height: 0.3 };
        let (rect, center) = face_box(&bbox, 640, 480);
        assert_eq!(rect, Rect::new(Point::new(128, 96), Point::new(320, 240)));
        assert_eq!(center, Point::new(224, 168));
    }

    #[test]
    fn test_face_box_corner_ordering() {
        let bbox = NormalizedBox { xmin: 0.1, ymin: 0.05, width: 0.5, height: 0.42 };
        let (rect, _) = face_box(&bbox, 800, 600);
        assert!(rect.top_left.x < rect.bottom_right.x);
        assert!(rect.top_left.y < rect.bottom_right.y);
        assert!(rect.top_left.x >= 0 && rect.bottom_right.x <= 800);
        assert!(rect.top_left.y >= 0 && rect.bottom_right.y <= 600);
    }

    #[test]
    fn test_face_box_full_frame() {
        let bbox = NormalizedBox { xmin: 0.0, ymin: 0.0, width: 1.0, height: 1.0 };
        let (rect, center) = face_box(&bbox, 320, 240);
        assert_eq!(rect, Rect::new(Point::new(0, 0), Point::new(320, 240)));
        assert_eq!(center, Point::new(160, 120));
    }

    #[test]
    fn test_face_box_center_floor_division() {
        // x span 10..15 -> center floor((10+15)/2) = 12
        let bbox = NormalizedBox { xmin: 0.10, ymin: 0.10, width: 0.05, height: 0.05 };
        let (_, center) = face_box(&bbox, 100, 100);
        assert_eq!(center, Point::new(12, 12));
    }

    #[test]
    fn test_eyes_boxes_square_and_centered() {
        let (left, right) = eyes_boxes((0.35, 0.30), (0.55, 0.30), 0.3, 640, 480);
        // extent = 0.3 * 480 * 0.08 = 11.52
        assert_eq!(left, Rect::new(Point::new(212, 132), Point::new(235, 155)));
        assert_eq!(right, Rect::new(Point::new(340, 132), Point::new(363, 155)));
        assert_eq!(left.width(), left.height());
        assert_eq!(right.width(), right.height());
    }

    #[test]
    fn test_eyes_boxes_scale_with_face_height() {
        let small = eyes_boxes((0.5, 0.5), (0.6, 0.5), 0.2, 640, 480).0;
        let large = eyes_boxes((0.5, 0.5), (0.6, 0.5), 0.6, 640, 480).0;
        assert!(large.width() > small.width());
    }
}
