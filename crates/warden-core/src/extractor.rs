//! ResNet face encoder via ONNX Runtime.
//!
//! Turns an RGB face crop into a 128-dimensional descriptor using the
//! dlib-style ResNet v1 recognition model. Descriptors are compared with
//! Euclidean distance, so the raw network output is kept un-normalized.

use crate::types::{Descriptor, DESCRIPTOR_DIM};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (different from BlazeFace!) ---
const ENCODER_INPUT_SIZE: usize = 150;
/// Per-channel training means of the ResNet v1 model (R, G, B).
const ENCODER_CHANNEL_MEANS: [f32; 3] = [122.782, 117.001, 104.298];
const ENCODER_SCALE: f32 = 256.0;
/// Crops darker than this on average are treated as empty and skipped.
const MIN_MEAN_INTENSITY: f32 = 10.0;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("model file not found: {0}; place face_recognition_resnet_v1.onnx in models/")]
    ModelNotFound(String),
    #[error("crop buffer does not match dimensions {width}x{height} (len {len})")]
    InvalidCrop { width: u32, height: u32, len: usize },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Encodes an RGB face crop into a descriptor. Returns `Ok(None)` when the
/// crop carries no usable face signal (degenerate or near-black).
pub trait FeatureExtractor {
    fn extract(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Descriptor>, ExtractorError>;
}

/// ResNet v1 based face encoder.
pub struct FaceEncoder {
    session: Session,
}

impl FaceEncoder {
    /// Load the recognition ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, ExtractorError> {
        if !Path::new(model_path).exists() {
            return Err(ExtractorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face recognition model"
        );

        Ok(Self { session })
    }
}

impl FeatureExtractor for FaceEncoder {
    fn extract(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Descriptor>, ExtractorError> {
        if width == 0 || height == 0 {
            return Ok(None);
        }
        if rgb.len() < width as usize * height as usize * 3 {
            return Err(ExtractorError::InvalidCrop { width, height, len: rgb.len() });
        }

        let brightness = mean_intensity(rgb);
        if brightness < MIN_MEAN_INTENSITY {
            tracing::debug!(brightness, "crop too dark, skipping descriptor extraction");
            return Ok(None);
        }

        let input = preprocess(rgb, width as usize, height as usize);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractorError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        if raw.len() != DESCRIPTOR_DIM {
            return Err(ExtractorError::InferenceFailed(format!(
                "expected {DESCRIPTOR_DIM}-dim descriptor, got {}",
                raw.len()
            )));
        }

        // Raw network output. Distances are Euclidean, so no L2 normalization.
        Ok(Some(Descriptor::new(raw.to_vec())))
    }
}

/// Mean intensity across all channels of an RGB buffer.
fn mean_intensity(rgb: &[u8]) -> f32 {
    if rgb.is_empty() {
        return 0.0;
    }
    rgb.iter().map(|&p| p as f32).sum::<f32>() / rgb.len() as f32
}

/// Resize an RGB crop to the model input with bilinear interpolation and
/// subtract the per-channel training means, NCHW layout.
fn preprocess(rgb: &[u8], width: usize, height: usize) -> Array4<f32> {
    let size = ENCODER_INPUT_SIZE;
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

                tensor[[0, c, y, x]] = (val - ENCODER_CHANNEL_MEANS[c]) / ENCODER_SCALE;
            }
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let rgb = vec![128u8; 100 * 80 * 3];
        let tensor = preprocess(&rgb, 100, 80);
        assert_eq!(tensor.shape(), &[1, 3, ENCODER_INPUT_SIZE, ENCODER_INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_channel_means() {
        // Uniform gray crop: each channel normalizes against its own mean.
        let rgb = vec![128u8; 60 * 60 * 3];
        let tensor = preprocess(&rgb, 60, 60);

        for (c, mean) in ENCODER_CHANNEL_MEANS.iter().enumerate() {
            let expected = (128.0 - mean) / ENCODER_SCALE;
            let val = tensor[[0, c, 75, 75]];
            assert!((val - expected).abs() < 1e-5, "channel {c}: got {val}, expected {expected}");
        }
    }

    #[test]
    fn test_preprocess_uniform_stays_uniform() {
        let rgb = vec![200u8; 40 * 30 * 3];
        let tensor = preprocess(&rgb, 40, 30);

        for c in 0..3 {
            let first = tensor[[0, c, 0, 0]];
            for y in 0..ENCODER_INPUT_SIZE {
                for x in 0..ENCODER_INPUT_SIZE {
                    assert!((tensor[[0, c, y, x]] - first).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn test_mean_intensity() {
        assert_eq!(mean_intensity(&[]), 0.0);
        assert_eq!(mean_intensity(&[0, 0, 0, 0]), 0.0);
        assert!((mean_intensity(&[255, 255, 255]) - 255.0).abs() < 1e-6);
        assert!((mean_intensity(&[0, 255]) - 127.5).abs() < 1e-6);
    }

    #[test]
    fn test_dark_crop_fails_intensity_floor() {
        // A crop of constant 5 stays below the extraction floor.
        let rgb = vec![5u8; 150 * 150 * 3];
        assert!(mean_intensity(&rgb) < MIN_MEAN_INTENSITY);

        let lit = vec![60u8; 150 * 150 * 3];
        assert!(mean_intensity(&lit) >= MIN_MEAN_INTENSITY);
    }
}
