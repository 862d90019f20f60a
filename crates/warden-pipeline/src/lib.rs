//! warden-pipeline — orchestration for the face verification pipeline.
//!
//! Wires capture, detection, liveness, and recognition together: a capture
//! thread feeds frames through a bounded queue into the processing loop,
//! which gates faces, tracks blinks, and hands crops to the recognition
//! worker. Encoded frames and event records leave through bounded sinks.

pub mod config;
pub mod pipeline;
pub mod sink;
pub mod worker;

pub use config::{AppConfig, ConfigError, RecognitionConfig, SystemConfig, VideoConfig};
pub use pipeline::{Command, Pipeline, PipelineError, PipelineHandle, RunMode};
pub use sink::{EncodedFrame, LogRecord, OutputSinks};
pub use worker::{spawn_worker, WorkerError, WorkerHandle};
