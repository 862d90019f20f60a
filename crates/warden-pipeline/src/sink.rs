//! Output sinks for the pipeline loop.
//!
//! The loop never blocks on its consumers: frames and log records go out
//! through bounded channels and are dropped when the receiving side lags.

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use serde::Serialize;
use tokio::sync::mpsc;
use warden_video::Frame;

// --- Named constants ---

pub const FRAME_CHANNEL_CAPACITY: usize = 10;
pub const LOG_CHANNEL_CAPACITY: usize = 100;
/// Every n-th processed frame is encoded and emitted.
const FRAME_EMIT_STRIDE: u64 = 3;
const DEFAULT_GROUP: &str = "Unknown";

/// A JPEG-compressed frame ready for transport.
#[derive(Debug, Clone, Serialize)]
pub struct EncodedFrame {
    /// Base64 of the JPEG payload.
    pub data: String,
    pub quality: u8,
}

/// Structured event record for the log stream.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub name: String,
    pub group: String,
    pub log_level: String,
    pub message: String,
    /// RFC 3339 timestamp taken when the record was built.
    pub timestamp: String,
    pub detection_results: bool,
    pub distance: Option<f32>,
    /// Populated by a downstream uploader, never here.
    pub s3_object_key: Option<String>,
}

impl LogRecord {
    /// Build a record stamped now. Group assignment belongs to the consumer
    /// side and starts out as "Unknown".
    pub fn new(
        name: &str,
        log_level: &str,
        message: String,
        detection_results: bool,
        distance: Option<f32>,
    ) -> Self {
        Self {
            name: name.to_string(),
            group: DEFAULT_GROUP.to_string(),
            log_level: log_level.to_string(),
            message,
            timestamp: chrono::Utc::now().to_rfc3339(),
            detection_results,
            distance,
            s3_object_key: None,
        }
    }
}

/// Bounded, drop-on-full senders for frames and log records.
pub struct OutputSinks {
    frame_tx: mpsc::Sender<EncodedFrame>,
    log_tx: mpsc::Sender<LogRecord>,
    jpeg_quality: u8,
    frame_counter: u64,
}

impl OutputSinks {
    /// Create the sinks together with their receiving ends.
    pub fn new(
        jpeg_quality: u8,
    ) -> (Self, mpsc::Receiver<EncodedFrame>, mpsc::Receiver<LogRecord>) {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (log_tx, log_rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        let sinks = Self {
            frame_tx,
            log_tx,
            jpeg_quality,
            frame_counter: 0,
        };
        (sinks, frame_rx, log_rx)
    }

    /// Encode and emit every third frame. A full channel drops the frame
    /// rather than stalling the loop.
    pub fn emit_frame(&mut self, frame: &Frame) {
        self.frame_counter += 1;
        if self.frame_counter % FRAME_EMIT_STRIDE != 0 {
            return;
        }
        let jpeg = match frame.encode_jpeg(self.jpeg_quality) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "frame encoding failed, skipping frame");
                return;
            }
        };
        let encoded = EncodedFrame {
            data: BASE64_STANDARD.encode(jpeg),
            quality: self.jpeg_quality,
        };
        if self.frame_tx.try_send(encoded).is_err() {
            tracing::debug!("frame sink full, dropping frame");
        }
    }

    /// Emit a log record, dropping it when the channel is full.
    pub fn emit_log(&self, record: LogRecord) {
        if self.log_tx.try_send(record).is_err() {
            tracing::debug!("log sink full, dropping record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame() -> Frame {
        Frame::new(vec![128; 16 * 16 * 3], 16, 16, 0)
    }

    #[test]
    fn test_emit_frame_strides() {
        let (mut sinks, mut frame_rx, _log_rx) = OutputSinks::new(70);
        for _ in 0..9 {
            sinks.emit_frame(&gray_frame());
        }
        let mut received = 0;
        while frame_rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 3);
    }

    #[test]
    fn test_emit_frame_drops_when_full() {
        let (mut sinks, mut frame_rx, _log_rx) = OutputSinks::new(70);
        // 39 frames attempt 13 emissions against a capacity of 10.
        for _ in 0..39 {
            sinks.emit_frame(&gray_frame());
        }
        let mut received = 0;
        while frame_rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, FRAME_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_encoded_frame_is_base64_jpeg() {
        let (mut sinks, mut frame_rx, _log_rx) = OutputSinks::new(80);
        for _ in 0..3 {
            sinks.emit_frame(&gray_frame());
        }
        let encoded = frame_rx.try_recv().unwrap();
        assert_eq!(encoded.quality, 80);
        let jpeg = BASE64_STANDARD.decode(encoded.data.as_bytes()).unwrap();
        // JPEG SOI marker.
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_emit_log_drops_when_full() {
        let (sinks, _frame_rx, mut log_rx) = OutputSinks::new(70);
        for i in 0..LOG_CHANNEL_CAPACITY + 5 {
            sinks.emit_log(LogRecord::new(
                "alice",
                "info",
                format!("event {i}"),
                true,
                Some(0.3),
            ));
        }
        let mut received = 0;
        while log_rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, LOG_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_log_record_serializes_expected_shape() {
        let record = LogRecord::new("alice", "info", "alice recognized".to_string(), true, Some(0.31));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["name"], "alice");
        assert_eq!(value["group"], "Unknown");
        assert_eq!(value["log_level"], "info");
        assert_eq!(value["message"], "alice recognized");
        assert_eq!(value["detection_results"], true);
        assert!(value["s3_object_key"].is_null());
        assert!((value["distance"].as_f64().unwrap() - 0.31).abs() < 1e-6);
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }
}
