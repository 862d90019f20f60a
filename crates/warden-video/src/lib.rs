//! warden-video — Camera capture and frame processing.
//!
//! Provides V4L2-based camera access, HTTP snapshot polling, and the pixel
//! operations the recognition pipeline runs on RGB frames.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{dark_pixel_count, Frame, FrameError};
pub use source::{spawn_capture, CaptureError, CaptureHandle, FrameSource};
