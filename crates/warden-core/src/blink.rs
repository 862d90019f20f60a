//! Blink liveness — rolling-window statistics over per-eye dark pixel counts.
//!
//! Each admitted frame contributes one sample per eye: the number of zero
//! pixels left after the eye crop is grayscaled, blurred and binary
//! thresholded. Closed eyelids produce a different dark-pixel mass than the
//! open eye, so a blink appears as one contiguous dip against a rolling
//! median. The comparison directions below are calibrated behavior; do not
//! re-derive them.

use std::collections::VecDeque;

/// Rolling window capacity per eye.
const WINDOW_CAP: usize = 16;
/// Median resync cadence, in admitted frames.
const MEDIAN_RESYNC_FRAMES: u64 = 15;
/// Damping applied to recomputed medians.
const MEDIAN_DAMPING: f32 = 0.8;
/// Default brightness sampling cadence, in admitted frames.
const BRIGHTNESS_SAMPLE_INTERVAL: u64 = 5;
/// Minimum closed samples for a valid blink dip.
const MIN_CLOSED_SAMPLES: usize = 3;
/// Minimum open samples surrounding the dip.
const MIN_OPEN_SAMPLES: usize = 3;

/// Per-session blink liveness state machine.
///
/// Owned and mutated by a single processing loop; reset whenever the face
/// leaves the admission window. The medians and the grayscale cutoff
/// survive a reset on purpose — they track the subject and lighting, not
/// the presence episode.
#[derive(Debug)]
pub struct BlinkDetector {
    enabled: bool,
    left_window: VecDeque<u32>,
    right_window: VecDeque<u32>,
    left_median: u32,
    right_median: u32,
    count: u64,
    average_brightness: f32,
    cutoff: u8,
    blink: bool,
}

impl BlinkDetector {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            left_window: VecDeque::with_capacity(WINDOW_CAP),
            right_window: VecDeque::with_capacity(WINDOW_CAP),
            left_median: 1,
            right_median: 1,
            count: 0,
            average_brightness: 0.0,
            cutoff: 0,
            blink: false,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable liveness tracking. Disabling clears session state.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.reset();
        }
    }

    /// Clear session state: windows, counter, brightness, blink flag.
    pub fn reset(&mut self) {
        self.left_window.clear();
        self.right_window.clear();
        self.count = 0;
        self.average_brightness = 0.0;
        self.blink = false;
    }

    /// Count one admitted frame. No-op while disabled.
    pub fn increment_count(&mut self) {
        if self.enabled {
            self.count += 1;
        }
    }

    /// Brightness sampling gate: only while brightness is unset, and only
    /// on the counter cadence, so sampling costs O(1/interval) of frames.
    pub fn should_update_brightness(&self) -> bool {
        self.enabled
            && self.average_brightness == 0.0
            && self.count % BRIGHTNESS_SAMPLE_INTERVAL == 0
    }

    /// Record the measured face brightness and derive the grayscale cutoff.
    ///
    /// `average` is the mean HSV value channel over the face crop. Above
    /// `threshold` the scene is well lit and the higher cutoff separates
    /// eyelid from eyeball; below it the dimmer cutoff applies. Returns the
    /// selected cutoff.
    pub fn update_brightness(
        &mut self,
        average: f32,
        threshold: f32,
        cutoff_bright: u8,
        cutoff_dim: u8,
    ) -> u8 {
        if !self.enabled {
            return 0;
        }
        self.average_brightness = average;
        self.cutoff = if average > threshold { cutoff_bright } else { cutoff_dim };
        tracing::debug!(
            brightness = average,
            cutoff = self.cutoff,
            "face brightness sampled"
        );
        self.cutoff
    }

    /// Grayscale cutoff selected by [`update_brightness`](Self::update_brightness).
    pub fn cutoff(&self) -> u8 {
        self.cutoff
    }

    /// Last sampled brightness; 0.0 means not yet sampled this session.
    pub fn average_brightness(&self) -> f32 {
        self.average_brightness
    }

    pub fn blink_state(&self) -> bool {
        self.blink
    }

    /// Feed one pair of dark-pixel counts and recompute the blink decision
    /// once both windows have filled past 15 samples.
    pub fn update(&mut self, left_dark: u32, right_dark: u32) -> bool {
        if !self.enabled {
            return false;
        }

        self.left_window.push_back(left_dark);
        self.right_window.push_back(right_dark);

        if self.left_window.len() > WINDOW_CAP - 1 && self.right_window.len() > WINDOW_CAP - 1 {
            self.blink = self.decide();
        }

        self.blink
    }

    /// One blink decision over full windows.
    ///
    /// Pops the oldest sample from both windows first. Every 15th admitted
    /// frame recomputes the damped medians from the current windows and
    /// reports no blink — the resync point that stops median drift from
    /// ever latching a stale threshold.
    fn decide(&mut self) -> bool {
        self.left_window.pop_front();
        self.right_window.pop_front();

        if self.count % MEDIAN_RESYNC_FRAMES == 0 {
            self.left_median = damped_median(&self.left_window);
            self.right_median = damped_median(&self.right_window);
            tracing::debug!(
                left = self.left_median,
                right = self.right_median,
                count = self.count,
                "blink medians resynced"
            );
            return false;
        }

        let left = closed_interval_pattern(&binarize(&self.left_window, self.left_median));
        let right = closed_interval_pattern(&binarize(&self.right_window, self.right_median));
        left && right
    }
}

/// Median of the window, damped and truncated to an integer threshold.
fn damped_median(window: &VecDeque<u32>) -> u32 {
    if window.is_empty() {
        return 0;
    }
    let mut sorted: Vec<u32> = window.iter().copied().collect();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 1 {
        sorted[mid] as f32
    } else {
        (sorted[mid - 1] as f32 + sorted[mid] as f32) / 2.0
    };
    (median * MEDIAN_DAMPING) as u32
}

/// Map samples to 1 (above median = open) or 0 (at/below = closed).
fn binarize(window: &VecDeque<u32>, median: u32) -> Vec<u8> {
    window.iter().map(|&v| u8::from(v > median)).collect()
}

/// Test for exactly one interior closed run: at least three closed and
/// three open samples, open endpoints, and all zeros contiguous.
fn closed_interval_pattern(bits: &[u8]) -> bool {
    let zeros = bits.iter().filter(|&&b| b == 0).count();
    let ones = bits.len() - zeros;

    if zeros < MIN_CLOSED_SAMPLES || ones < MIN_OPEN_SAMPLES {
        return false;
    }
    if bits.first() == Some(&0) || bits.last() == Some(&0) {
        return false;
    }

    let first_zero = bits.iter().position(|&b| b == 0);
    let last_zero = bits.iter().rposition(|&b| b == 0);
    match (first_zero, last_zero) {
        (Some(first), Some(last)) => last - first + 1 == zeros,
        _ => false,
    }
}
