//! BlazeFace face detector via ONNX Runtime.
//!
//! Implements the short-range BlazeFace model (128×128 input) with SSD-style
//! anchor decoding and NMS post-processing. Coordinates are normalized to
//! `[0, 1]` relative to the frame handed to `detect`, with the eye keypoints
//! pulled out of the six-landmark set.

use crate::types::{Detection, NormalizedBox};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const BLAZE_INPUT_SIZE: usize = 128;
const BLAZE_MEAN: f32 = 127.5;
const BLAZE_STD: f32 = 127.5;
const BLAZE_NUM_ANCHORS: usize = 896;
const BLAZE_REGRESSOR_WIDTH: usize = 16;
const BLAZE_NUM_KEYPOINTS: usize = 6;
const BLAZE_CONFIDENCE_THRESHOLD: f32 = 0.5;
const BLAZE_NMS_THRESHOLD: f32 = 0.3;
const BLAZE_SCORE_CLIP: f32 = 100.0;

/// Keypoint slots in the regressor output. The remaining four landmarks
/// (nose, mouth, ears) are decoded but unused downstream.
const KEYPOINT_RIGHT_EYE: usize = 0;
const KEYPOINT_LEFT_EYE: usize = 1;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; place face_detection_short_range.onnx in models/")]
    ModelNotFound(String),
    #[error("frame buffer does not match dimensions {width}x{height} (len {len})")]
    InvalidFrame { width: u32, height: u32, len: usize },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Detects faces in a frame, returning normalized boxes and eye keypoints
/// sorted by confidence.
pub trait FaceDetector {
    fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, DetectorError>;
}

/// BlazeFace short-range detector.
pub struct BlazeDetector {
    session: Session,
    /// Anchor centers (cx, cy) for the 16×16 and 8×8 feature maps.
    /// All BlazeFace anchors have unit width and height.
    anchors: Vec<(f32, f32)>,
}

impl BlazeDetector {
    /// Load the BlazeFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded BlazeFace model"
        );

        if output_names.len() != 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "BlazeFace model requires 2 outputs (regressors, scores), got {}",
                output_names.len()
            )));
        }

        Ok(Self {
            session,
            anchors: generate_anchors(),
        })
    }
}

impl FaceDetector for BlazeDetector {
    fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, DetectorError> {
        if width == 0 || height == 0 || rgb.len() < width as usize * height as usize * 3 {
            return Err(DetectorError::InvalidFrame { width, height, len: rgb.len() });
        }

        let input = preprocess(rgb, width as usize, height as usize);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        // The exported model may order (regressors, scores) either way;
        // tell them apart by element count.
        let (_, first) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("output 0: {e}")))?;
        let (_, second) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("output 1: {e}")))?;

        let (regressors, scores) = if first.len() == BLAZE_NUM_ANCHORS * BLAZE_REGRESSOR_WIDTH {
            (first, second)
        } else {
            (second, first)
        };

        if regressors.len() != BLAZE_NUM_ANCHORS * BLAZE_REGRESSOR_WIDTH
            || scores.len() != BLAZE_NUM_ANCHORS
        {
            return Err(DetectorError::InferenceFailed(format!(
                "unexpected output shapes: regressors len {}, scores len {}",
                regressors.len(),
                scores.len()
            )));
        }

        let detections = decode_detections(
            scores,
            regressors,
            &self.anchors,
            BLAZE_CONFIDENCE_THRESHOLD,
        );

        Ok(nms(detections, BLAZE_NMS_THRESHOLD))
    }
}

/// Anchor centers for the two feature map scales: 16×16 cells with 2 anchors
/// each, then 8×8 cells with 6 anchors each (512 + 384 = 896).
fn generate_anchors() -> Vec<(f32, f32)> {
    let mut anchors = Vec::with_capacity(BLAZE_NUM_ANCHORS);

    for (cells, anchors_per_cell) in [(16usize, 2usize), (8, 6)] {
        for y in 0..cells {
            for x in 0..cells {
                for _ in 0..anchors_per_cell {
                    let cx = (x as f32 + 0.5) / cells as f32;
                    let cy = (y as f32 + 0.5) / cells as f32;
                    anchors.push((cx, cy));
                }
            }
        }
    }

    anchors
}

/// Resize an RGB frame to the model input with bilinear interpolation and
/// normalize to `[-1, 1]` in NCHW layout.
fn preprocess(rgb: &[u8], width: usize, height: usize) -> Array4<f32> {
    let size = BLAZE_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    let scale_x = width as f32 / size as f32;
    let scale_y = height as f32 / size as f32;

    for y in 0..size {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..size {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                let tl = rgb[(y0 * width + x0) * 3 + c] as f32;
                let tr = rgb[(y0 * width + x1) * 3 + c] as f32;
                let bl = rgb[(y1 * width + x0) * 3 + c] as f32;
                let br = rgb[(y1 * width + x1) * 3 + c] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                tensor[[0, c, y, x]] = (val - BLAZE_MEAN) / BLAZE_STD;
            }
        }
    }

    tensor
}

/// Decode SSD regressors against the anchor grid into normalized detections.
///
/// Regressor layout per anchor: [dx, dy, w, h, kp0x, kp0y, ..., kp5x, kp5y],
/// all in input-pixel units relative to the anchor center.
fn decode_detections(
    scores: &[f32],
    regressors: &[f32],
    anchors: &[(f32, f32)],
    threshold: f32,
) -> Vec<Detection> {
    let input_size = BLAZE_INPUT_SIZE as f32;
    let mut detections = Vec::new();

    for (idx, &(anchor_x, anchor_y)) in anchors.iter().enumerate() {
        let raw = scores[idx].clamp(-BLAZE_SCORE_CLIP, BLAZE_SCORE_CLIP);
        let score = sigmoid(raw);
        if score < threshold {
            continue;
        }

        let reg = &regressors[idx * BLAZE_REGRESSOR_WIDTH..(idx + 1) * BLAZE_REGRESSOR_WIDTH];

        let cx = anchor_x + reg[0] / input_size;
        let cy = anchor_y + reg[1] / input_size;
        let w = reg[2] / input_size;
        let h = reg[3] / input_size;

        let x_min = (cx - w / 2.0).clamp(0.0, 1.0);
        let y_min = (cy - h / 2.0).clamp(0.0, 1.0);
        let x_max = (cx + w / 2.0).clamp(0.0, 1.0);
        let y_max = (cy + h / 2.0).clamp(0.0, 1.0);

        let mut keypoints = [(0.0f32, 0.0f32); BLAZE_NUM_KEYPOINTS];
        for (k, kp) in keypoints.iter_mut().enumerate() {
            let kx = anchor_x + reg[4 + k * 2] / input_size;
            let ky = anchor_y + reg[4 + k * 2 + 1] / input_size;
            *kp = (kx.clamp(0.0, 1.0), ky.clamp(0.0, 1.0));
        }

        detections.push(Detection {
            bbox: NormalizedBox {
                xmin: x_min,
                ymin: y_min,
                width: x_max - x_min,
                height: y_max - y_min,
            },
            left_eye: keypoints[KEYPOINT_LEFT_EYE],
            right_eye: keypoints[KEYPOINT_RIGHT_EYE],
            score,
        });
    }

    detections
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Non-Maximum Suppression: remove overlapping detections, keeping the
/// highest-scoring box of each cluster. Output is sorted by score descending.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&detections[i].bbox, &detections[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Compute Intersection-over-Union between two normalized boxes.
fn iou(a: &NormalizedBox, b: &NormalizedBox) -> f32 {
    let x1 = a.xmin.max(b.xmin);
    let y1 = a.ymin.max(b.ymin);
    let x2 = (a.xmin + a.width).min(b.xmin + b.width);
    let y2 = (a.ymin + a.height).min(b.ymin + b.height);

    let inter_w = (x2 - x1).max(0.0);
    let inter_h = (y2 - y1).max(0.0);
    let inter_area = inter_w * inter_h;

    let area_a = a.width * a.height;
    let area_b = b.width * b.height;
    let union_area = area_a + area_b - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_detection(xmin: f32, ymin: f32, w: f32, h: f32, score: f32) -> Detection {
        Detection {
            bbox: NormalizedBox { xmin, ymin, width: w, height: h },
            left_eye: (0.0, 0.0),
            right_eye: (0.0, 0.0),
            score,
        }
    }

    #[test]
    fn test_anchor_count_and_layout() {
        let anchors = generate_anchors();
        assert_eq!(anchors.len(), BLAZE_NUM_ANCHORS);

        // First anchor sits at the center of cell (0, 0) on the 16x16 grid.
        assert!((anchors[0].0 - 0.5 / 16.0).abs() < 1e-6);
        assert!((anchors[0].1 - 0.5 / 16.0).abs() < 1e-6);
        // Both anchors of a cell share the same center.
        assert_eq!(anchors[0], anchors[1]);

        // Anchor 512 is the first of the 8x8 grid.
        assert!((anchors[512].0 - 0.5 / 8.0).abs() < 1e-6);
        assert!((anchors[512].1 - 0.5 / 8.0).abs() < 1e-6);

        assert!(anchors.iter().all(|&(x, y)| x > 0.0 && x < 1.0 && y > 0.0 && y < 1.0));
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(10.0) > 0.9999);
        assert!(sigmoid(-10.0) < 0.0001);
    }

    #[test]
    fn test_iou_identical() {
        let a = NormalizedBox { xmin: 0.1, ymin: 0.1, width: 0.5, height: 0.5 };
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = NormalizedBox { xmin: 0.0, ymin: 0.0, width: 0.2, height: 0.2 };
        let b = NormalizedBox { xmin: 0.5, ymin: 0.5, width: 0.2, height: 0.2 };
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = NormalizedBox { xmin: 0.0, ymin: 0.0, width: 0.5, height: 0.5 };
        let b = NormalizedBox { xmin: 0.25, ymin: 0.25, width: 0.5, height: 0.5 };
        // Intersection 0.25*0.25 = 0.0625, union 0.25 + 0.25 - 0.0625 = 0.4375
        let expected = 0.0625 / 0.4375;
        assert!((iou(&a, &b) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_detection(0.0, 0.0, 0.5, 0.5, 0.9),
            make_detection(0.02, 0.02, 0.5, 0.5, 0.8),
            make_detection(0.7, 0.7, 0.2, 0.2, 0.7),
        ];
        let result = nms(detections, BLAZE_NMS_THRESHOLD);
        assert_eq!(result.len(), 2);
        assert!((result[0].score - 0.9).abs() < 1e-6);
        assert!((result[1].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_no_suppression() {
        let detections = vec![
            make_detection(0.0, 0.0, 0.1, 0.1, 0.9),
            make_detection(0.5, 0.5, 0.1, 0.1, 0.8),
        ];
        let result = nms(detections, BLAZE_NMS_THRESHOLD);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], BLAZE_NMS_THRESHOLD).is_empty());
    }

    #[test]
    fn test_decode_below_threshold_is_empty() {
        let anchors = generate_anchors();
        let scores = vec![-10.0f32; BLAZE_NUM_ANCHORS];
        let regressors = vec![0.0f32; BLAZE_NUM_ANCHORS * BLAZE_REGRESSOR_WIDTH];
        let dets = decode_detections(&scores, &regressors, &anchors, BLAZE_CONFIDENCE_THRESHOLD);
        assert!(dets.is_empty());
    }

    #[test]
    fn test_decode_single_detection() {
        let anchors = generate_anchors();
        let mut scores = vec![-10.0f32; BLAZE_NUM_ANCHORS];
        let mut regressors = vec![0.0f32; BLAZE_NUM_ANCHORS * BLAZE_REGRESSOR_WIDTH];

        // Anchor 0 sits at (0.03125, 0.03125). Offsets are in input pixels.
        scores[0] = 2.0;
        regressors[0] = 20.0; // dx -> 0.15625
        regressors[1] = 20.0; // dy -> 0.15625
        regressors[2] = 16.0; // w  -> 0.125
        regressors[3] = 16.0; // h  -> 0.125
        // Keypoint 0 (right eye), keypoint 1 (left eye).
        regressors[4] = 20.0;
        regressors[5] = 15.0;
        regressors[6] = 10.0;
        regressors[7] = 15.0;

        let dets = decode_detections(&scores, &regressors, &anchors, BLAZE_CONFIDENCE_THRESHOLD);
        assert_eq!(dets.len(), 1);

        let det = &dets[0];
        assert!((det.score - sigmoid(2.0)).abs() < 1e-6);
        // Center (0.1875, 0.1875) with extent 0.125 square.
        assert!((det.bbox.xmin - 0.125).abs() < 1e-5);
        assert!((det.bbox.ymin - 0.125).abs() < 1e-5);
        assert!((det.bbox.width - 0.125).abs() < 1e-5);
        assert!((det.bbox.height - 0.125).abs() < 1e-5);

        assert!((det.right_eye.0 - (0.03125 + 20.0 / 128.0)).abs() < 1e-5);
        assert!((det.right_eye.1 - (0.03125 + 15.0 / 128.0)).abs() < 1e-5);
        assert!((det.left_eye.0 - (0.03125 + 10.0 / 128.0)).abs() < 1e-5);
        assert!((det.left_eye.1 - (0.03125 + 15.0 / 128.0)).abs() < 1e-5);
    }

    #[test]
    fn test_decode_clamps_box_to_unit_square() {
        let anchors = generate_anchors();
        let mut scores = vec![-10.0f32; BLAZE_NUM_ANCHORS];
        let mut regressors = vec![0.0f32; BLAZE_NUM_ANCHORS * BLAZE_REGRESSOR_WIDTH];

        // Huge box around anchor 0 spills past every edge.
        scores[0] = 5.0;
        regressors[2] = 512.0;
        regressors[3] = 512.0;

        let dets = decode_detections(&scores, &regressors, &anchors, BLAZE_CONFIDENCE_THRESHOLD);
        assert_eq!(dets.len(), 1);
        let b = &dets[0].bbox;
        assert!(b.xmin >= 0.0 && b.ymin >= 0.0);
        assert!(b.xmin + b.width <= 1.0 + 1e-6);
        assert!(b.ymin + b.height <= 1.0 + 1e-6);
    }

    #[test]
    fn test_score_clipping_saturates() {
        let anchors = generate_anchors();
        let mut scores = vec![-10.0f32; BLAZE_NUM_ANCHORS];
        let regressors = vec![0.0f32; BLAZE_NUM_ANCHORS * BLAZE_REGRESSOR_WIDTH];

        scores[3] = 1.0e6;
        let dets = decode_detections(&scores, &regressors, &anchors, BLAZE_CONFIDENCE_THRESHOLD);
        assert_eq!(dets.len(), 1);
        assert!((dets[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_uniform_frame() {
        // A frame of constant 128 normalizes to (128 - 127.5) / 127.5 everywhere.
        let rgb = vec![128u8; 64 * 48 * 3];
        let tensor = preprocess(&rgb, 64, 48);

        assert_eq!(tensor.shape(), &[1, 3, BLAZE_INPUT_SIZE, BLAZE_INPUT_SIZE]);
        let expected = (128.0 - BLAZE_MEAN) / BLAZE_STD;
        assert!(tensor.iter().all(|&v| (v - expected).abs() < 1e-6));
    }

    #[test]
    fn test_preprocess_channel_order() {
        // Pure red frame: channel 0 saturates high, channels 1 and 2 low.
        let mut rgb = Vec::with_capacity(32 * 32 * 3);
        for _ in 0..32 * 32 {
            rgb.extend_from_slice(&[255, 0, 0]);
        }
        let tensor = preprocess(&rgb, 32, 32);

        assert!((tensor[[0, 0, 64, 64]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 64, 64]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 64, 64]] + 1.0).abs() < 1e-6);
    }
}
