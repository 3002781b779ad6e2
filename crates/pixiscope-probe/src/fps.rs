//! Frame-rate counter fed by animation-frame callbacks.

use serde::{Deserialize, Serialize};

/// Length of one sampling window.
pub const SAMPLE_WINDOW_MS: f64 = 1000.0;

/// Counts frames and publishes a rate once per sampling window.
///
/// Created when the agent is installed and fed from a single animation-frame
/// callback for the life of the page. [`restart`](Self::restart) discards
/// everything counted so far.
#[derive(Debug, Clone, Default)]
pub struct FrameRateCounter {
    window_start: Option<f64>,
    frames_in_window: u32,
    fps: f64,
    samples: u64,
    total_frames: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FpsReading {
    /// Frames per second over the last completed window.
    pub fps: f64,
    /// Completed windows so far. Zero means `fps` is not meaningful yet.
    pub samples: u64,
    pub total_frames: u64,
    /// The application's own ticker figure, when it has one.
    pub ticker_fps: Option<f64>,
}

impl FrameRateCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one animation frame at time `now_ms`.
    pub fn record_frame(&mut self, now_ms: f64) {
        self.total_frames += 1;
        let Some(start) = self.window_start else {
            self.window_start = Some(now_ms);
            return;
        };
        self.frames_in_window += 1;
        let elapsed = now_ms - start;
        if elapsed >= SAMPLE_WINDOW_MS {
            self.fps = f64::from(self.frames_in_window) * 1000.0 / elapsed;
            self.samples += 1;
            self.frames_in_window = 0;
            self.window_start = Some(now_ms);
        }
    }

    pub fn restart(&mut self) {
        *self = Self::default();
    }

    pub fn reading(&self, ticker_fps: Option<f64>) -> FpsReading {
        FpsReading {
            fps: self.fps,
            samples: self.samples,
            total_frames: self.total_frames,
            ticker_fps,
        }
    }
}
