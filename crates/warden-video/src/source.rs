//! Frame sources: live camera capture thread and HTTP snapshot polling.
//!
//! Both sources push frames into a bounded channel with `try_send`; when the
//! consumer lags, new frames are dropped at the producer so the pipeline
//! always sees the freshest available image.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

// --- Named constants ---
const SNAPSHOT_POLL_MILLIS: u64 = 100;
const SNAPSHOT_ERROR_BACKOFF_MILLIS: u64 = 1000;
const SNAPSHOT_TIMEOUT_SECS: u64 = 5;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("snapshot client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("snapshot decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Where frames come from.
#[derive(Debug, Clone)]
pub enum FrameSource {
    /// Local V4L2 device path, e.g. "/dev/video0".
    Device(String),
    /// HTTP endpoint returning one encoded image per GET.
    Snapshot(String),
}

/// Handle to a running capture thread.
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Signal the thread to stop and wait for it to exit.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawn the capture thread for the given source.
///
/// Opens the camera (or builds the HTTP client) synchronously so that
/// misconfiguration fails before any thread exists. `width` and `height`
/// are the requested capture size; snapshot frames keep their native size.
pub fn spawn_capture(
    source: FrameSource,
    width: u32,
    height: u32,
    mirror: bool,
    tx: mpsc::Sender<Frame>,
) -> Result<CaptureHandle, CaptureError> {
    let stop = Arc::new(AtomicBool::new(false));

    let join = match source {
        FrameSource::Device(path) => {
            let camera = Camera::open(&path, width, height)?;
            let stop_flag = stop.clone();
            std::thread::Builder::new()
                .name("warden-capture".into())
                .spawn(move || run_camera_loop(camera, stop_flag, mirror, tx))?
        }
        FrameSource::Snapshot(url) => {
            let client = reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(SNAPSHOT_TIMEOUT_SECS))
                .build()?;
            let stop_flag = stop.clone();
            std::thread::Builder::new()
                .name("warden-capture".into())
                .spawn(move || run_snapshot_loop(client, url, stop_flag, mirror, tx))?
        }
    };

    Ok(CaptureHandle {
        stop,
        join: Some(join),
    })
}

fn run_camera_loop(camera: Camera, stop: Arc<AtomicBool>, mirror: bool, tx: mpsc::Sender<Frame>) {
    tracing::info!(device = %camera.device_path, "capture thread started");

    let sink_stop = stop.clone();
    let result = camera.stream_frames(stop.as_ref(), |mut frame| {
        if mirror {
            frame.flip_horizontal();
        }
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::debug!("frame queue full, dropping frame");
            }
            Err(TrySendError::Closed(_)) => {
                sink_stop.store(true, Ordering::Relaxed);
            }
        }
    });

    if let Err(e) = result {
        if !stop.load(Ordering::Relaxed) {
            tracing::error!(error = %e, "capture loop failed");
        }
    }
    tracing::info!("capture thread exiting");
}

fn run_snapshot_loop(
    client: reqwest::blocking::Client,
    url: String,
    stop: Arc<AtomicBool>,
    mirror: bool,
    tx: mpsc::Sender<Frame>,
) {
    tracing::info!(url = %url, "snapshot capture thread started");
    let mut sequence: u32 = 0;

    while !stop.load(Ordering::Relaxed) {
        match fetch_snapshot(&client, &url, sequence) {
            Ok(mut frame) => {
                sequence = sequence.wrapping_add(1);
                if mirror {
                    frame.flip_horizontal();
                }
                match tx.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::debug!("frame queue full, dropping snapshot");
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
                std::thread::sleep(Duration::from_millis(SNAPSHOT_POLL_MILLIS));
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %url, "snapshot fetch failed, backing off");
                std::thread::sleep(Duration::from_millis(SNAPSHOT_ERROR_BACKOFF_MILLIS));
            }
        }
    }
    tracing::info!("snapshot capture thread exiting");
}

fn fetch_snapshot(
    client: &reqwest::blocking::Client,
    url: &str,
    sequence: u32,
) -> Result<Frame, CaptureError> {
    let bytes = client.get(url).send()?.error_for_status()?.bytes()?;
    let img = image::load_from_memory(&bytes)?;
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    Ok(Frame::new(rgb.into_raw(), w, h, sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_fails_before_spawn() {
        let (tx, _rx) = mpsc::channel(4);
        let result = spawn_capture(
            FrameSource::Device("/dev/video-warden-missing".into()),
            640,
            480,
            false,
            tx,
        );
        assert!(matches!(
            result,
            Err(CaptureError::Camera(CameraError::DeviceNotFound(_)))
        ));
    }

    #[test]
    fn test_capture_handle_stop_joins() {
        // Port 9 refuses immediately on loopback; the thread spends its life
        // in the error backoff until stopped.
        let (tx, _rx) = mpsc::channel(4);
        let handle = spawn_capture(
            FrameSource::Snapshot("http://127.0.0.1:9/frame.jpg".into()),
            640,
            480,
            false,
            tx,
        )
        .unwrap();
        handle.stop();
    }
}
