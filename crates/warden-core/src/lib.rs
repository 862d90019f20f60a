//! warden-core — face presence and identity verification primitives.
//!
//! Converts normalized detector output into pixel-space geometry, gates
//! faces against a configured admission window, tracks eye-blink liveness
//! over rolling windows, and matches 128-d descriptors against a CSV-backed
//! gallery. Detection and descriptor extraction run via ONNX Runtime for
//! CPU inference.

pub mod blink;
pub mod detector;
pub mod extractor;
pub mod gallery;
pub mod gate;
pub mod geometry;
pub mod types;

pub use blink::BlinkDetector;
pub use detector::{BlazeDetector, FaceDetector};
pub use extractor::{FaceEncoder, FeatureExtractor};
pub use gallery::{EuclideanMatcher, FeatureStore, Matcher};
pub use gate::RegionGate;
pub use types::{Descriptor, Detection, FeatureRecord, MatchOutcome, NormalizedBox, Point, Rect};
