/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Session counters and the diagnostics snapshot exposed to callers.

use serde::{Deserialize, Serialize};

/// Lifetime counters for one smoothing session, mutated by the components
/// as they accept, reorder, drop and display frames.
#[derive(Debug, Default)]
pub struct SmootherCounters {
    frames_received: u64,
    frames_ignored: u64,
    frames_reordered: u64,
    frames_duplicate: u64,
    overflow_drops: u64,
    catchup_skips: u64,
    frames_displayed: u64,
}

impl SmootherCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_received(&mut self) {
        self.frames_received += 1;
    }

    pub fn frame_ignored(&mut self) {
        self.frames_ignored += 1;
    }

    pub fn frame_reordered(&mut self) {
        self.frames_reordered += 1;
    }

    pub fn frame_duplicate(&mut self) {
        self.frames_duplicate += 1;
    }

    pub fn overflow_drop(&mut self) {
        self.overflow_drops += 1;
    }

    pub fn catchup_skip(&mut self, frames: usize) {
        self.catchup_skips += frames as u64;
    }

    pub fn frame_displayed(&mut self) {
        self.frames_displayed += 1;
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn frames_reordered(&self) -> u64 {
        self.frames_reordered
    }

    pub fn frames_duplicate(&self) -> u64 {
        self.frames_duplicate
    }

    pub fn catchup_skips(&self) -> u64 {
        self.catchup_skips
    }
}

/// Point-in-time diagnostics snapshot of a smoothing session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmootherStats {
    /// Frames currently resident in the jitter buffer.
    pub buffered_frames: usize,
    /// Buffer occupancy the playback clock is aiming for.
    pub buffer_target_frames: u32,
    /// Current playback speed multiplier.
    pub current_speed: f64,
    /// Measured delivery frame rate (0 until enough arrivals).
    pub effective_fps: f64,
    /// Kalman jitter estimate in milliseconds.
    pub jitter_ms: f64,
    /// Smoothed worst inter-arrival gap in milliseconds.
    pub smoothed_max_gap_ms: f64,
    /// Age of the frame currently on display, in milliseconds.
    pub current_latency_ms: f64,
    /// Receive-path transport delay estimate in milliseconds.
    pub transport_delay_ms: f64,
    /// Learned average burst length in frames (0 until a burst completes).
    pub avg_burst_frames: f64,
    /// Learned average inter-burst gap in milliseconds.
    pub avg_gap_ms: f64,
    pub frames_received: u64,
    pub frames_displayed: u64,
    pub frames_ignored: u64,
    pub frames_reordered: u64,
    pub frames_duplicate: u64,
    pub overflow_drops: u64,
    pub catchup_skips: u64,
    /// Delay-shift alarms raised by the CUSUM detector.
    pub delay_shifts: u64,
}

impl SmootherCounters {
    /// Copy the counters into a stats snapshot; the remaining fields are
    /// filled in by the session facade.
    pub(crate) fn fill(&self, stats: &mut SmootherStats) {
        stats.frames_received = self.frames_received;
        stats.frames_displayed = self.frames_displayed;
        stats.frames_ignored = self.frames_ignored;
        stats.frames_reordered = self.frames_reordered;
        stats.frames_duplicate = self.frames_duplicate;
        stats.overflow_drops = self.overflow_drops;
        stats.catchup_skips = self.catchup_skips;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut counters = SmootherCounters::new();
        counters.frame_received();
        counters.frame_received();
        counters.frame_ignored();
        counters.catchup_skip(12);

        let mut stats = SmootherStats::default();
        counters.fill(&mut stats);
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.frames_ignored, 1);
        assert_eq!(stats.catchup_skips, 12);
    }

    #[test]
    fn snapshot_round_trips_through_serde() {
        let stats = SmootherStats {
            buffered_frames: 7,
            current_speed: 0.95,
            ..Default::default()
        };
        let json = serde_json::to_string(&stats).unwrap();
        let back: SmootherStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back.buffered_frames, 7);
    }
}
