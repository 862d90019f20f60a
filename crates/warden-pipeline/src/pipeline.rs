//! The frame processing pipeline.
//!
//! `Pipeline::spawn` builds every resource fail-fast (store, models, worker,
//! capture), then starts a dedicated processing thread. Per frame the loop
//! detects faces, gates them against the admission window, advances blink
//! liveness, and decides whether to hand the face crop to the recognition
//! worker. Results and JPEG frames leave through bounded sink channels.

use crate::config::{AppConfig, ConfigError};
use crate::sink::{EncodedFrame, LogRecord, OutputSinks};
use crate::worker::{spawn_worker, WorkerError, WorkerHandle};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use warden_core::detector::DetectorError;
use warden_core::extractor::ExtractorError;
use warden_core::gallery::StoreError;
use warden_core::{
    geometry, BlazeDetector, BlinkDetector, Detection, FaceDetector, FaceEncoder, FeatureStore,
    MatchOutcome, Point, RegionGate,
};
use warden_video::source::{spawn_capture, CaptureError, CaptureHandle, FrameSource};
use warden_video::{dark_pixel_count, Frame};

// --- Named constants ---

/// Raw frames queued between capture and processing. Capture drops frames
/// when the loop falls behind.
const FRAME_QUEUE_CAPACITY: usize = 10;
const COMMAND_QUEUE_CAPACITY: usize = 8;
/// Sleep when no frame is waiting.
const IDLE_SLEEP: Duration = Duration::from_millis(1);
/// Backoff after a processing error in service mode.
const SERVICE_ERROR_BACKOFF: Duration = Duration::from_millis(100);
/// Grace period before a standalone run terminates on a processing error.
const STANDALONE_ERROR_GRACE: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("extractor error: {0}")]
    Extractor(#[from] ExtractorError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),
    #[error("no face in the admission window")]
    NoFaceInRange,
    #[error("pipeline thread exited")]
    ChannelClosed,
    #[error("thread spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
}

/// How the loop reacts to per-frame processing errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Terminate on error after a short grace period.
    Standalone,
    /// Back off and keep serving.
    Service,
}

/// Control messages accepted by the processing thread.
pub enum Command {
    Stop,
    SetBlink(bool),
    /// Manual recognition trigger; honored in debug mode only.
    Trigger,
    Register {
        name: Option<String>,
        reply: oneshot::Sender<Result<String, PipelineError>>,
    },
}

/// Owner handle for a running pipeline.
pub struct PipelineHandle {
    cmd_tx: mpsc::Sender<Command>,
    join: Option<std::thread::JoinHandle<()>>,
    capture: Option<CaptureHandle>,
}

impl PipelineHandle {
    /// Register the currently admitted face under `name`, or a generated
    /// name when `None`.
    pub async fn register(&self, name: Option<String>) -> Result<String, PipelineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Register {
                name,
                reply: reply_tx,
            })
            .await
            .map_err(|_| PipelineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| PipelineError::ChannelClosed)?
    }

    /// Toggle blink liveness at runtime. Disabling clears blink state.
    pub async fn set_blink(&self, enabled: bool) -> Result<(), PipelineError> {
        self.cmd_tx
            .send(Command::SetBlink(enabled))
            .await
            .map_err(|_| PipelineError::ChannelClosed)
    }

    /// Fire a manual recognition trigger (debug mode).
    pub async fn trigger(&self) -> Result<(), PipelineError> {
        self.cmd_tx
            .send(Command::Trigger)
            .await
            .map_err(|_| PipelineError::ChannelClosed)
    }

    /// Stop the loop, join the processing thread, then stop capture.
    pub async fn shutdown(mut self) {
        let _ = self.cmd_tx.send(Command::Stop).await;
        if let Some(join) = self.join.take() {
            let _ = tokio::task::spawn_blocking(move || {
                let _ = join.join();
            })
            .await;
        }
        if let Some(capture) = self.capture.take() {
            let _ = tokio::task::spawn_blocking(move || capture.stop()).await;
        }
    }
}

pub struct Pipeline;

impl Pipeline {
    /// Build all resources and start the processing thread.
    ///
    /// Returns the control handle plus the receiving ends of the encoded
    /// frame stream and the event log stream.
    pub fn spawn(
        config: AppConfig,
        mode: RunMode,
    ) -> Result<
        (
            PipelineHandle,
            mpsc::Receiver<EncodedFrame>,
            mpsc::Receiver<LogRecord>,
        ),
        PipelineError,
    > {
        config.validate()?;

        let store = Arc::new(RwLock::new(FeatureStore::load(
            &config.recognition.store_path,
        )?));
        if let Ok(guard) = store.read() {
            tracing::info!(
                path = %config.recognition.store_path,
                records = guard.len(),
                "feature store ready"
            );
        }

        let detector = BlazeDetector::load(&config.recognition.detector_model)?;
        let extractor = FaceEncoder::load(&config.recognition.extractor_model)?;

        let (worker, outcome_rx) =
            spawn_worker(Box::new(extractor), store, config.recognition.sensitivity)?;

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        let source = match &config.video.snapshot_uri {
            Some(uri) => FrameSource::Snapshot(uri.clone()),
            None => FrameSource::Device(config.video.device.clone()),
        };
        let capture = spawn_capture(
            source,
            config.video.width,
            config.video.height,
            config.video.mirror,
            frame_tx,
        )?;

        let (sinks, encoded_rx, log_rx) = OutputSinks::new(config.system.jpeg_quality);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

        let state = PipelineState::new(
            &config,
            Box::new(detector),
            worker,
            outcome_rx,
            frame_rx,
            cmd_rx,
            sinks,
            mode,
        );

        let join = std::thread::Builder::new()
            .name("warden-pipeline".to_string())
            .spawn(move || run_loop(state))?;

        Ok((
            PipelineHandle {
                cmd_tx,
                join: Some(join),
                capture: Some(capture),
            },
            encoded_rx,
            log_rx,
        ))
    }
}

struct PipelineState {
    detector: Box<dyn FaceDetector + Send>,
    blink: BlinkDetector,
    gate: RegionGate,
    worker: WorkerHandle,
    outcome_rx: mpsc::Receiver<MatchOutcome>,
    frame_rx: mpsc::Receiver<Frame>,
    cmd_rx: mpsc::Receiver<Command>,
    sinks: OutputSinks,
    mode: RunMode,

    width: u32,
    height: u32,
    recognition_enabled: bool,
    set_mode: bool,
    debug: bool,
    brightness_threshold: f32,
    cutoff_bright: u8,
    cutoff_dim: u8,
    prediction_interval: u64,

    /// An admitted face produced a non-empty crop this frame.
    face_in_range: bool,
    last_detection: Option<Detection>,
    face_roi: Option<Frame>,
    /// Trigger cooldown armed; expires after `prediction_interval` frames.
    cooldown: bool,
    interval_count: u64,
    manual_trigger: bool,
    /// Last verification outcome, held until the cooldown expires.
    sticky: Option<MatchOutcome>,
    fps: FpsCounter,
}

impl PipelineState {
    #[allow(clippy::too_many_arguments)]
    fn new(
        config: &AppConfig,
        detector: Box<dyn FaceDetector + Send>,
        worker: WorkerHandle,
        outcome_rx: mpsc::Receiver<MatchOutcome>,
        frame_rx: mpsc::Receiver<Frame>,
        cmd_rx: mpsc::Receiver<Command>,
        sinks: OutputSinks,
        mode: RunMode,
    ) -> Self {
        let gate = RegionGate::new(
            Point::new(config.video.roi_start.0, config.video.roi_start.1),
            Point::new(config.video.roi_end.0, config.video.roi_end.1),
            config.recognition.min_face_height,
            config.recognition.min_score,
        );
        Self {
            detector,
            blink: BlinkDetector::new(config.recognition.blink_enabled),
            gate,
            worker,
            outcome_rx,
            frame_rx,
            cmd_rx,
            sinks,
            mode,
            width: config.video.width,
            height: config.video.height,
            recognition_enabled: config.recognition.enabled,
            set_mode: config.recognition.set_mode,
            debug: config.system.debug,
            brightness_threshold: config.recognition.brightness_threshold,
            cutoff_bright: config.recognition.cutoff_bright,
            cutoff_dim: config.recognition.cutoff_dim,
            prediction_interval: config.effective_prediction_interval(),
            face_in_range: false,
            last_detection: None,
            face_roi: None,
            cooldown: false,
            interval_count: 0,
            manual_trigger: false,
            sticky: None,
            fps: FpsCounter::new(),
        }
    }

    /// Run detection, gating, liveness, and trigger logic on one frame.
    fn process_frame(&mut self, frame: Frame) -> Result<(), PipelineError> {
        let frame = frame.resize(self.width, self.height);
        let detections = self
            .detector
            .detect(&frame.data, frame.width, frame.height)?;

        if detections.is_empty() {
            self.blink.reset();
            self.face_in_range = false;
        } else {
            for detection in &detections {
                let (rect, center) = geometry::face_box(&detection.bbox, frame.width, frame.height);
                if !self.gate.admit(center, detection.bbox.height, detection.score) {
                    self.blink.reset();
                    self.face_in_range = false;
                    continue;
                }

                self.blink.increment_count();
                let roi = frame.crop(
                    rect.top_left.x,
                    rect.top_left.y,
                    rect.bottom_right.x,
                    rect.bottom_right.y,
                );
                self.face_in_range = !roi.is_empty();

                if self.face_in_range && self.blink.should_update_brightness() {
                    let cutoff = self.blink.update_brightness(
                        roi.avg_brightness(),
                        self.brightness_threshold,
                        self.cutoff_bright,
                        self.cutoff_dim,
                    );
                    tracing::debug!(
                        brightness = self.blink.average_brightness(),
                        cutoff,
                        "eye darkness cutoff calibrated"
                    );
                }
                if self.face_in_range {
                    self.last_detection = Some(detection.clone());
                    self.face_roi = Some(roi);
                }
            }
        }

        if self.recognition_enabled && self.face_in_range {
            let blink = if self.blink.enabled() && self.blink.average_brightness() != 0.0 {
                self.measure_blink(&frame)
            } else {
                false
            };

            if self.decide_trigger(blink) {
                self.fire_trigger();
            }

            if self.cooldown {
                self.interval_count += 1;
                if self.interval_count >= self.prediction_interval {
                    self.cooldown = false;
                    self.sticky = None;
                    tracing::debug!("cooldown expired, sticky outcome cleared");
                }
            }
        }

        self.drain_outcomes();
        self.sinks.emit_frame(&frame);
        Ok(())
    }

    /// Sample both eye regions and advance the blink window.
    fn measure_blink(&mut self, frame: &Frame) -> bool {
        let Some(detection) = self.last_detection.clone() else {
            return false;
        };
        let (left_rect, right_rect) = geometry::eyes_boxes(
            detection.left_eye,
            detection.right_eye,
            detection.bbox.height,
            frame.width,
            frame.height,
        );
        let left = frame.crop(
            left_rect.top_left.x,
            left_rect.top_left.y,
            left_rect.bottom_right.x,
            left_rect.bottom_right.y,
        );
        let right = frame.crop(
            right_rect.top_left.x,
            right_rect.top_left.y,
            right_rect.bottom_right.x,
            right_rect.bottom_right.y,
        );

        // One eye clipped off-frame borrows the other; both gone skips the
        // sample entirely.
        let (left, right) = match (left.is_empty(), right.is_empty()) {
            (false, false) => (left, right),
            (true, false) => (right.clone(), right),
            (false, true) => (left.clone(), left),
            (true, true) => {
                tracing::debug!("both eye crops empty, skipping blink sample");
                return self.blink.blink_state();
            }
        };

        let cutoff = self.blink.cutoff();
        let left_dark = dark_pixel_count(&left, cutoff);
        let right_dark = dark_pixel_count(&right, cutoff);
        self.blink.update(left_dark, right_dark)
    }

    /// Trigger policy. Debug mode fires only on the manual command; with
    /// blink liveness on, a blink outside the cooldown fires; with it off,
    /// any admitted face outside the cooldown fires.
    fn decide_trigger(&mut self, blink: bool) -> bool {
        if self.debug {
            return std::mem::take(&mut self.manual_trigger);
        }
        if self.blink.enabled() {
            blink && !self.cooldown
        } else {
            !self.cooldown
        }
    }

    /// Hand the current face crop to the recognition worker and arm the
    /// cooldown.
    fn fire_trigger(&mut self) {
        let Some(roi) = self.face_roi.clone() else {
            return;
        };
        if self.set_mode {
            match self.worker.register_blocking(roi, None) {
                Ok(name) => {
                    tracing::info!(name = %name, "face registered from live trigger");
                    self.sinks.emit_log(LogRecord::new(
                        &name,
                        "info",
                        format!("registered {name}"),
                        false,
                        None,
                    ));
                }
                Err(e) => tracing::warn!(error = %e, "live registration failed"),
            }
        } else {
            self.worker.verify(roi);
            tracing::debug!("recognition triggered");
        }
        self.cooldown = true;
        self.interval_count = 0;
    }

    /// Pull finished verifications and publish them to the log stream.
    fn drain_outcomes(&mut self) {
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            let (level, message) = if outcome.matched {
                ("info", format!("{} recognized", outcome.name))
            } else {
                ("warning", "unrecognized face".to_string())
            };
            self.sinks.emit_log(LogRecord::new(
                &outcome.name,
                level,
                message,
                outcome.matched,
                Some(outcome.distance),
            ));
            tracing::debug!(
                matched = outcome.matched,
                distance = outcome.distance,
                name = %outcome.name,
                "match outcome"
            );
            self.sticky = Some(outcome);
        }
    }

    /// Register the currently admitted face. Fails when no face is in the
    /// admission window right now.
    fn register_current(&mut self, name: Option<String>) -> Result<String, PipelineError> {
        let Some(roi) = self.face_roi.clone().filter(|_| self.face_in_range) else {
            return Err(PipelineError::NoFaceInRange);
        };
        Ok(self.worker.register_blocking(roi, name)?)
    }
}

fn run_loop(mut st: PipelineState) {
    tracing::info!("pipeline thread started");
    'outer: loop {
        loop {
            match st.cmd_rx.try_recv() {
                Ok(Command::Stop) => break 'outer,
                Ok(Command::SetBlink(enabled)) => {
                    st.blink.set_enabled(enabled);
                    tracing::info!(enabled, "blink liveness toggled");
                }
                Ok(Command::Trigger) => {
                    if st.debug {
                        st.manual_trigger = true;
                    } else {
                        tracing::debug!("manual trigger ignored outside debug mode");
                    }
                }
                Ok(Command::Register { name, reply }) => {
                    let result = st.register_current(name);
                    let _ = reply.send(result);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'outer,
            }
        }

        let frame = match st.frame_rx.try_recv() {
            Ok(frame) => frame,
            Err(TryRecvError::Empty) => {
                std::thread::sleep(IDLE_SLEEP);
                continue;
            }
            Err(TryRecvError::Disconnected) => {
                tracing::info!("frame source disconnected, stopping");
                break;
            }
        };

        if let Err(e) = st.process_frame(frame) {
            match st.mode {
                RunMode::Standalone => {
                    tracing::error!(error = %e, "frame processing failed, terminating");
                    std::thread::sleep(STANDALONE_ERROR_GRACE);
                    break;
                }
                RunMode::Service => {
                    tracing::warn!(error = %e, "frame processing failed, backing off");
                    std::thread::sleep(SERVICE_ERROR_BACKOFF);
                }
            }
        }
        st.fps.tick();
    }
    tracing::info!("pipeline thread exiting");
}

/// Frames per second over one-second windows, reported at debug level.
struct FpsCounter {
    window_start: Instant,
    frames: u32,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames: 0,
        }
    }

    fn tick(&mut self) {
        self.frames += 1;
        if self.window_start.elapsed() >= Duration::from_secs(1) {
            tracing::debug!(fps = self.frames, "pipeline throughput");
            self.frames = 0;
            self.window_start = Instant::now();
        }
    }
}
