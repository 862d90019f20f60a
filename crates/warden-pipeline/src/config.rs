//! Pipeline configuration.
//!
//! Settings come from three layers, later ones winning: built-in defaults,
//! a TOML file, and `WARDEN_*` environment variables. Every table and field
//! is optional in the file; anything absent falls back to the default.

use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

// --- Named constants ---

/// Config file consulted when no explicit path is given.
const DEFAULT_CONFIG_PATH: &str = "warden.toml";
/// Cooldown length substituted in debug mode, in frames. Long enough that
/// the cooldown effectively never expires between manual triggers.
const DEBUG_PREDICTION_INTERVAL: u64 = 9999;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Frame acquisition settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// V4L2 device path.
    pub device: String,
    /// HTTP snapshot endpoint. Takes precedence over `device` when set.
    pub snapshot_uri: Option<String>,
    pub width: u32,
    pub height: u32,
    /// Top-left corner of the admission window, in pixels.
    pub roi_start: (i32, i32),
    /// Bottom-right corner of the admission window, in pixels.
    pub roi_end: (i32, i32),
    /// Mirror frames horizontally at capture.
    pub mirror: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            snapshot_uri: None,
            width: 640,
            height: 480,
            roi_start: (160, 120),
            roi_end: (480, 360),
            mirror: true,
        }
    }
}

/// Detection and identity matching settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub enabled: bool,
    /// Enrollment mode: a trigger saves the face instead of matching it.
    pub set_mode: bool,
    pub blink_enabled: bool,
    /// Minimum detected face height as a fraction of frame height.
    pub min_face_height: f32,
    /// Minimum detector confidence for admission.
    pub min_score: f32,
    /// Value-channel level separating bright scenes from dim ones.
    pub brightness_threshold: f32,
    /// Grayscale cutoff for eye-darkness counting in bright scenes.
    pub cutoff_bright: u8,
    /// Grayscale cutoff for eye-darkness counting in dim scenes.
    pub cutoff_dim: u8,
    /// Maximum Euclidean distance accepted as an identity match.
    pub sensitivity: f32,
    /// Cooldown between recognition triggers, in frames.
    pub prediction_interval: u64,
    pub store_path: String,
    pub detector_model: String,
    pub extractor_model: String,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            set_mode: false,
            blink_enabled: true,
            min_face_height: 0.25,
            min_score: 0.85,
            brightness_threshold: 100.0,
            cutoff_bright: 80,
            cutoff_dim: 50,
            sensitivity: 0.5,
            prediction_interval: 90,
            store_path: "features.csv".to_string(),
            detector_model: "models/face_detection_short_range.onnx".to_string(),
            extractor_model: "models/face_recognition_resnet_v1.onnx".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Debug mode: recognition fires on the manual trigger command only and
    /// the cooldown is stretched so results stay visible.
    pub debug: bool,
    pub jpeg_quality: u8,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            debug: false,
            jpeg_quality: 70,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub video: VideoConfig,
    pub recognition: RecognitionConfig,
    pub system: SystemConfig,
}

impl AppConfig {
    /// Load configuration, apply environment overrides, and validate.
    ///
    /// An explicit `path` must exist. With `None`, `warden.toml` in the
    /// working directory is used when present and defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_PATH);
                if fallback.exists() {
                    Self::from_file(fallback)?
                } else {
                    tracing::info!("no config file found, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse a TOML document into a config, fields defaulting when absent.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply `WARDEN_*` environment overrides for the common knobs.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<String>("WARDEN_DEVICE") {
            self.video.device = v;
        }
        if let Some(v) = env_parse::<String>("WARDEN_SNAPSHOT_URI") {
            self.video.snapshot_uri = Some(v);
        }
        if let Some(v) = env_parse::<u32>("WARDEN_FRAME_WIDTH") {
            self.video.width = v;
        }
        if let Some(v) = env_parse::<u32>("WARDEN_FRAME_HEIGHT") {
            self.video.height = v;
        }
        if let Some(v) = env_bool("WARDEN_MIRROR") {
            self.video.mirror = v;
        }
        if let Some(v) = env_bool("WARDEN_BLINK_ENABLED") {
            self.recognition.blink_enabled = v;
        }
        if let Some(v) = env_parse::<f32>("WARDEN_SENSITIVITY") {
            self.recognition.sensitivity = v;
        }
        if let Some(v) = env_parse::<u64>("WARDEN_PREDICTION_INTERVAL") {
            self.recognition.prediction_interval = v;
        }
        if let Some(v) = env_parse::<String>("WARDEN_STORE_PATH") {
            self.recognition.store_path = v;
        }
        if let Some(v) = env_parse::<String>("WARDEN_DETECTOR_MODEL") {
            self.recognition.detector_model = v;
        }
        if let Some(v) = env_parse::<String>("WARDEN_EXTRACTOR_MODEL") {
            self.recognition.extractor_model = v;
        }
        if let Some(v) = env_bool("WARDEN_DEBUG") {
            self.system.debug = v;
        }
    }

    /// Structural validation. Model file existence is checked at load time
    /// by the detector and extractor themselves.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.video.width == 0 || self.video.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "frame size {}x{} must be nonzero",
                self.video.width, self.video.height
            )));
        }
        if self.video.roi_start.0 >= self.video.roi_end.0
            || self.video.roi_start.1 >= self.video.roi_end.1
        {
            return Err(ConfigError::Invalid(
                "roi_start must lie strictly above and left of roi_end".to_string(),
            ));
        }
        if self.system.jpeg_quality == 0 || self.system.jpeg_quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "jpeg_quality {} must be in 1..=100",
                self.system.jpeg_quality
            )));
        }
        if !(self.recognition.sensitivity > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "sensitivity {} must be positive",
                self.recognition.sensitivity
            )));
        }
        if self.recognition.prediction_interval == 0 {
            return Err(ConfigError::Invalid(
                "prediction_interval must be nonzero".to_string(),
            ));
        }
        Ok(())
    }

    /// Cooldown length actually in effect for this run.
    pub fn effective_prediction_interval(&self) -> u64 {
        if self.system.debug {
            DEBUG_PREDICTION_INTERVAL
        } else {
            self.recognition.prediction_interval
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// "0", "false" and "off" disable; any other present value enables.
fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| !matches!(v.as_str(), "0" | "false" | "off"))
}
