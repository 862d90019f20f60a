//! Recognition worker thread.
//!
//! Descriptor extraction and matching are an order of magnitude slower than
//! frame processing, so they run on a dedicated thread that owns the encoder
//! session. The pipeline loop hands over face crops and keeps going;
//! verification results come back through a bounded outcome channel.

use std::sync::{Arc, RwLock};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;
use warden_core::extractor::ExtractorError;
use warden_core::gallery::{StoreError, NO_MATCH_DISTANCE};
use warden_core::{EuclideanMatcher, FeatureExtractor, FeatureStore, MatchOutcome, Matcher};
use warden_video::Frame;

// --- Named constants ---

const REQUEST_CHANNEL_CAPACITY: usize = 4;
const OUTCOME_CHANNEL_CAPACITY: usize = 4;
/// Generated enrollment names append this many hex chars of a fresh UUID.
const GENERATED_NAME_HEX_CHARS: usize = 8;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("extractor error: {0}")]
    Extractor(#[from] ExtractorError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("no usable face in the crop")]
    NoFace,
    #[error("feature store lock poisoned")]
    StorePoisoned,
    #[error("recognition worker exited")]
    ChannelClosed,
}

enum WorkerRequest {
    Verify {
        roi: Frame,
    },
    Register {
        roi: Frame,
        name: Option<String>,
        reply: oneshot::Sender<Result<String, WorkerError>>,
    },
}

/// Clone-safe handle to the recognition worker thread.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerRequest>,
}

impl WorkerHandle {
    /// Queue a verification without waiting for the result. Drops the
    /// request when the worker already has a backlog.
    pub fn verify(&self, roi: Frame) {
        if self.tx.try_send(WorkerRequest::Verify { roi }).is_err() {
            tracing::debug!("recognition worker busy, dropping verify request");
        }
    }

    /// Extract a descriptor from `roi` and persist it under `name`, or a
    /// generated name when `None`. Blocks until the store write finishes.
    pub fn register_blocking(
        &self,
        roi: Frame,
        name: Option<String>,
    ) -> Result<String, WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .blocking_send(WorkerRequest::Register {
                roi,
                name,
                reply: reply_tx,
            })
            .map_err(|_| WorkerError::ChannelClosed)?;
        reply_rx.blocking_recv().map_err(|_| WorkerError::ChannelClosed)?
    }
}

/// Spawn the recognition worker. Returns a request handle and the receiving
/// end of the verification outcome stream.
pub fn spawn_worker(
    extractor: Box<dyn FeatureExtractor + Send>,
    store: Arc<RwLock<FeatureStore>>,
    sensitivity: f32,
) -> Result<(WorkerHandle, mpsc::Receiver<MatchOutcome>), std::io::Error> {
    let (tx, mut rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
    let (outcome_tx, outcome_rx) = mpsc::channel(OUTCOME_CHANNEL_CAPACITY);

    std::thread::Builder::new()
        .name("warden-recognition".to_string())
        .spawn(move || {
            tracing::info!("recognition worker started");
            let mut extractor = extractor;
            let matcher = EuclideanMatcher;
            while let Some(request) = rx.blocking_recv() {
                match request {
                    WorkerRequest::Verify { roi } => {
                        let outcome =
                            run_verify(extractor.as_mut(), &matcher, &store, &roi, sensitivity);
                        if outcome_tx.try_send(outcome).is_err() {
                            tracing::debug!("outcome channel full, dropping result");
                        }
                    }
                    WorkerRequest::Register { roi, name, reply } => {
                        let result = run_register(extractor.as_mut(), &store, &roi, name);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("recognition worker exiting");
        })?;

    Ok((WorkerHandle { tx }, outcome_rx))
}

fn run_verify(
    extractor: &mut dyn FeatureExtractor,
    matcher: &EuclideanMatcher,
    store: &Arc<RwLock<FeatureStore>>,
    roi: &Frame,
    sensitivity: f32,
) -> MatchOutcome {
    let started = Instant::now();

    let descriptor = match extractor.extract(&roi.data, roi.width, roi.height) {
        Ok(Some(descriptor)) => descriptor,
        Ok(None) => {
            tracing::debug!("no usable face signal in crop");
            return MatchOutcome::unknown(NO_MATCH_DISTANCE);
        }
        Err(e) => {
            tracing::warn!(error = %e, "descriptor extraction failed");
            return MatchOutcome::unknown(NO_MATCH_DISTANCE);
        }
    };

    let outcome = match store.read() {
        Ok(guard) => matcher.compare(&descriptor, guard.records(), sensitivity),
        Err(_) => {
            tracing::error!("feature store lock poisoned");
            MatchOutcome::unknown(NO_MATCH_DISTANCE)
        }
    };

    tracing::debug!(
        matched = outcome.matched,
        distance = outcome.distance,
        name = %outcome.name,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "verification complete"
    );
    outcome
}

fn run_register(
    extractor: &mut dyn FeatureExtractor,
    store: &Arc<RwLock<FeatureStore>>,
    roi: &Frame,
    name: Option<String>,
) -> Result<String, WorkerError> {
    let descriptor = extractor
        .extract(&roi.data, roi.width, roi.height)?
        .ok_or(WorkerError::NoFace)?;
    let name = name.unwrap_or_else(generated_name);
    let mut guard = store.write().map_err(|_| WorkerError::StorePoisoned)?;
    guard.save(&name, descriptor)?;
    tracing::info!(name = %name, total = guard.len(), "face registered");
    Ok(name)
}

/// "User_" plus the first hex chars of a fresh UUIDv4.
fn generated_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("User_{}", &id[..GENERATED_NAME_HEX_CHARS])
}
