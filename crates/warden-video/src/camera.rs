//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG (decoded per frame).
    Mjpg,
    /// Packed 24-bit RGB (3 bytes/pixel).
    Rgb3,
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    /// Negotiated pixel format.
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0") and negotiate
    /// a format near the requested size. The driver may pick a different
    /// resolution; the negotiated one is recorded on the handle.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Request YUYV at the configured size; accept whatever of the
        // supported formats the driver negotiates.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"MJPG") {
            PixelFormat::Mjpg
        } else if fourcc == FourCC::new(b"RGB3") {
            PixelFormat::Rgb3
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, MJPG, or RGB3)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Stream frames until `stop` is raised, handing each converted RGB
    /// frame to `sink`. Holds one memory-mapped buffer queue for the whole
    /// run.
    pub fn stream_frames<F>(&self, stop: &AtomicBool, mut sink: F) -> Result<(), CameraError>
    where
        F: FnMut(Frame),
    {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        while !stop.load(Ordering::Relaxed) {
            let (buf, meta) = stream
                .next()
                .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

            let rgb = self.buf_to_rgb(buf)?;
            sink(Frame::new(rgb, self.width, self.height, meta.sequence));
        }

        Ok(())
    }

    /// Convert a raw buffer to packed RGB based on the negotiated format.
    fn buf_to_rgb(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let pixels = (self.width * self.height) as usize;

        match self.pixel_format {
            PixelFormat::Rgb3 => {
                let expected = pixels * 3;
                if buf.len() < expected {
                    return Err(CameraError::CaptureFailed(format!(
                        "RGB3 buffer too short: expected {expected}, got {}",
                        buf.len()
                    )));
                }
                Ok(buf[..expected].to_vec())
            }
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height)
                .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
            PixelFormat::Mjpg => {
                let img = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                    .map_err(|e| CameraError::CaptureFailed(format!("MJPG decode failed: {e}")))?;
                let rgb = img.to_rgb8();
                if rgb.width() != self.width || rgb.height() != self.height {
                    return Err(CameraError::CaptureFailed(format!(
                        "MJPG frame size {}x{} does not match negotiated {}x{}",
                        rgb.width(),
                        rgb.height(),
                        self.width,
                        self.height
                    )));
                }
                Ok(rgb.into_raw())
            }
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}
