//! Benchmark Runner: render back to back for a fixed wall-clock duration.
//!
//! The loop blocks for the whole duration and cannot be cancelled.

use serde::{Deserialize, Serialize};

use crate::capture::render_frame;
use crate::error::{ProbeError, ProbeResult, RenderPhase};
use crate::locate::RootHandle;
use crate::runtime::Realm;

/// Longest run accepted from a caller.
pub const MAX_DURATION_MS: f64 = 60_000.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkResult {
    /// Requested duration in milliseconds.
    pub duration: f64,
    /// Measured duration in milliseconds.
    pub elapsed: f64,
    pub frame_count: usize,
    pub fps: f64,
    pub frame_times: Vec<f64>,
    pub stats: FrameStats,
}

/// Nearest-rank percentile of an ascending slice.
fn nearest_rank(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Distribution figures for a set of frame times. All zero when empty.
pub fn frame_stats(frame_times: &[f64]) -> FrameStats {
    if frame_times.is_empty() {
        return FrameStats::default();
    }
    let mut sorted = frame_times.to_vec();
    sorted.sort_by(f64::total_cmp);
    let sum: f64 = sorted.iter().sum();
    FrameStats {
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        avg: sum / sorted.len() as f64,
        p50: nearest_rank(&sorted, 0.50),
        p95: nearest_rank(&sorted, 0.95),
        p99: nearest_rank(&sorted, 0.99),
    }
}

/// Render repeatedly until `duration_ms` of clock time has passed.
pub fn run_benchmark(realm: &Realm, roots: &RootHandle, duration_ms: f64) -> ProbeResult<BenchmarkResult> {
    if !duration_ms.is_finite() || duration_ms <= 0.0 || duration_ms > MAX_DURATION_MS {
        return Err(ProbeError::InvalidArgument(format!(
            "duration must be between 0 and {MAX_DURATION_MS} ms, got {duration_ms}"
        )));
    }
    let (renderer, stage) = roots.render_target()?;

    tracing::debug!(duration_ms, "benchmark started");
    let mut frame_times = Vec::new();
    let started = realm.now_ms();
    let mut elapsed = 0.0;
    while elapsed < duration_ms {
        let frame_start = realm.now_ms();
        render_frame(renderer, stage, RenderPhase::Benchmark)?;
        let now = realm.now_ms();
        frame_times.push(now - frame_start);
        elapsed = now - started;
    }

    let frame_count = frame_times.len();
    let fps = if elapsed > 0.0 {
        frame_count as f64 / (elapsed / 1000.0)
    } else {
        0.0
    };
    let stats = frame_stats(&frame_times);
    tracing::debug!(frame_count, fps, "benchmark finished");

    Ok(BenchmarkResult {
        duration: duration_ms,
        elapsed,
        frame_count,
        fps,
        frame_times,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locate::require;
    use crate::sim::{SimApp, SimOptions};

    #[test]
    fn test_nearest_rank() {
        let sorted: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(nearest_rank(&sorted, 0.50), 50.0);
        assert_eq!(nearest_rank(&sorted, 0.95), 95.0);
        assert_eq!(nearest_rank(&sorted, 0.99), 99.0);
        assert_eq!(nearest_rank(&[7.0], 0.99), 7.0);
    }

    #[test]
    fn test_frame_stats_ordering() {
        let stats = frame_stats(&[4.0, 1.0, 9.0, 2.0, 3.0]);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 9.0);
        assert!((stats.avg - 3.8).abs() < 1e-9);
        assert!(stats.p50 <= stats.p95 && stats.p95 <= stats.p99 && stats.p99 <= stats.max);
    }

    #[test]
    fn test_empty_frame_stats_are_zero() {
        assert_eq!(frame_stats(&[]), FrameStats::default());
    }

    #[test]
    fn test_benchmark_runs_for_duration() {
        let sim = SimApp::new(SimOptions::default());
        let roots = require(sim.realm().global()).unwrap();
        let result = run_benchmark(sim.realm(), &roots, 100.0).unwrap();
        assert!(result.elapsed >= 100.0);
        assert_eq!(result.frame_count, result.frame_times.len());
        assert_eq!(result.frame_count as u64, sim.frames_rendered());
        assert!(result.fps > 0.0);
    }

    #[test]
    fn test_benchmark_rejects_bad_duration() {
        let sim = SimApp::new(SimOptions::default());
        let roots = require(sim.realm().global()).unwrap();
        for bad in [0.0, -5.0, f64::NAN, MAX_DURATION_MS + 1.0] {
            assert!(matches!(
                run_benchmark(sim.realm(), &roots, bad),
                Err(ProbeError::InvalidArgument(_))
            ));
        }
    }
}
