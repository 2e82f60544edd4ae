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

//! Network jitter estimation and jitter-buffer sizing.
//!
//! Two estimates come out of this module. A Kalman filter over frame-size
//! deltas and inter-frame delay variation yields the jitter reading in
//! milliseconds used for diagnostics. For sizing the buffer of a bursty
//! producer, the worst recent inter-arrival gap is what matters, so the
//! recommended buffer target is derived from the smoothed max-gap and the
//! effective frame rate instead.

use crate::fps_tracker::{Arrival, FpsTracker};
use crate::frame::rtp_diff;

const RTP_TICKS_PER_MS: f64 = 90.0;

/// Forgetting factor for the average frame size.
const PHI: f64 = 0.97;
/// Decay of the running max frame size.
const PSI: f64 = 0.9999;
/// Frames in the startup window blending the noise alpha.
const STARTUP_FRAMES: u32 = 30;
/// Cap on the noise-average sample count.
const ALPHA_COUNT_MAX: u32 = 400;

const DELAY_OUTLIER_SIGMAS: f64 = 15.0;
const SIZE_OUTLIER_SIGMAS: f64 = 3.0;
/// A frame this much smaller than the running max signals congestion.
const CONGESTION_RATIO: f64 = -0.25;

/// Process noise of the Kalman state.
const Q_SLOPE_SCALE: f64 = 1e-4;
const Q_INTERCEPT: f64 = 1e-2;
/// Lower bound on the state variances.
const VAR_FLOOR: f64 = 1.0;
const INITIAL_SLOPE: f64 = 1.0 / 512.0;
const INITIAL_VAR_SLOPE: f64 = 100.0;
const INITIAL_VAR_INTERCEPT: f64 = 1e10;
const INITIAL_VAR_NOISE: f64 = 4.0;

/// 98th-percentile multiplier on the noise standard deviation.
const NOISE_STD_DEVS: f64 = 2.33;
const NOISE_OFFSET_MS: f64 = 30.0;
/// Constant term covering OS scheduling jitter.
const OS_JITTER_MS: f64 = 10.0;
const MAX_JITTER_MS: f64 = 10_000.0;

// CUSUM delay-shift detector, in 90 kHz ticks.
const CUSUM_CLAMP_TICKS: f64 = 7_000.0;
const CUSUM_DRIFT_TICKS: f64 = 6_600.0;
const CUSUM_THRESHOLD: f64 = 60_000.0;
const INTERCEPT_VAR_INFLATE: f64 = 1e10;

// Buffer-target emission.
const TARGET_MIN_FRAMES: u32 = 4;
const TARGET_MAX_FRAMES: u32 = 30;
const TARGET_HYSTERESIS: u32 = 3;
const TARGET_MIN_FPS: f64 = 5.0;
const TARGET_MAX_FPS: f64 = 120.0;
const TARGET_MIN_GAP_SAMPLES: usize = 5;
const TARGET_MIN_GAP_MS: f64 = 1.0;
const TARGET_MAX_GAP_MS: f64 = 2_000.0;
const TARGET_HEADROOM_FRAMES: u32 = 2;

/// Whether a frame was admitted into the estimator state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameVerdict {
    Accepted,
    /// Arrival delta outside the admissible range; the caller should drop
    /// the frame without touching any other state.
    Ignored,
}

/// Kalman jitter estimator with a CUSUM delay-shift detector and a
/// gap-driven buffer-target recommendation.
#[derive(Debug)]
pub struct JitterEstimator {
    // Kalman state over (slope, intercept).
    slope: f64,
    intercept: f64,
    var_slope: f64,
    var_intercept: f64,
    cov: f64,

    // Frame-size statistics.
    avg_frame_size: f64,
    var_frame_size: f64,
    max_frame_size: f64,
    prev_frame_size: Option<f64>,

    // Noise statistics.
    avg_noise: f64,
    var_noise: f64,
    alpha_count: u32,
    startup_count: u32,

    prev_rtp: Option<u32>,

    fps: FpsTracker,

    target_frames: u32,

    cusum_pos: f64,
    cusum_neg: f64,
    delay_shifts: u64,
}

impl JitterEstimator {
    /// `seed_target` is the buffer target in frames reported until the
    /// estimator has seen enough traffic to commit its own value.
    pub fn new(seed_target: u32) -> Self {
        Self {
            slope: INITIAL_SLOPE,
            intercept: 0.0,
            var_slope: INITIAL_VAR_SLOPE,
            var_intercept: INITIAL_VAR_INTERCEPT,
            cov: 0.0,
            avg_frame_size: 0.0,
            var_frame_size: VAR_FLOOR,
            max_frame_size: 0.0,
            prev_frame_size: None,
            avg_noise: 0.0,
            var_noise: INITIAL_VAR_NOISE,
            alpha_count: 1,
            startup_count: 0,
            prev_rtp: None,
            fps: FpsTracker::new(),
            target_frames: seed_target,
            cusum_pos: 0.0,
            cusum_neg: 0.0,
            delay_shifts: 0,
        }
    }

    /// Feed one received frame. Returns [`FrameVerdict::Ignored`] when the
    /// arrival gap disqualifies the frame; estimator state is untouched in
    /// that case and the caller must not buffer the frame either.
    pub fn update(
        &mut self,
        rtp_timestamp: u32,
        wall_time_us: u64,
        frame_size_bytes: usize,
    ) -> FrameVerdict {
        let wall_ms = wall_time_us as f64 / 1000.0;
        let (first_frame, wall_delta_ms) = match self.fps.on_arrival(wall_ms) {
            Arrival::Ignored => return FrameVerdict::Ignored,
            Arrival::First => (true, 0.0),
            Arrival::Accepted(delta) => (false, delta),
        };

        let size = frame_size_bytes as f64;

        let rtp_delta_ms = match self.prev_rtp {
            Some(prev) => rtp_diff(rtp_timestamp, prev) as f64 / RTP_TICKS_PER_MS,
            None => 0.0,
        };
        self.prev_rtp = Some(rtp_timestamp);

        let ifdv_ms = if first_frame {
            0.0
        } else {
            wall_delta_ms - rtp_delta_ms
        };
        let delta_frame = size - self.prev_frame_size.unwrap_or(size);
        self.prev_frame_size = Some(size);

        self.update_frame_size_stats(size);

        let residual = ifdv_ms - (self.slope * delta_frame + self.intercept);
        let delay_outlier = residual.abs() >= DELAY_OUTLIER_SIGMAS * self.var_noise.sqrt();
        let size_outlier = size > self.avg_frame_size + SIZE_OUTLIER_SIGMAS * self.var_frame_size.sqrt();
        let congested = delta_frame <= CONGESTION_RATIO * self.max_frame_size;

        if !(delay_outlier && !size_outlier) {
            self.update_noise(residual);
        }
        if !((delay_outlier && !size_outlier) || congested) {
            self.kalman_update(delta_frame, ifdv_ms);
        }

        if !first_frame {
            self.cusum_update(ifdv_ms);
        }

        self.startup_count = (self.startup_count + 1).min(STARTUP_FRAMES);
        self.update_buffer_target();

        FrameVerdict::Accepted
    }

    /// Jitter estimate in milliseconds.
    pub fn jitter_ms(&self) -> f64 {
        let fps = match self.fps.effective_fps() {
            Some(fps) => fps,
            None => return 0.0,
        };

        let noise_threshold = (NOISE_STD_DEVS * self.var_noise.sqrt() - NOISE_OFFSET_MS).max(1.0);
        let jitter = self.slope * (self.max_frame_size - self.avg_frame_size)
            + noise_threshold
            + OS_JITTER_MS;
        let jitter = jitter.clamp(1.0, MAX_JITTER_MS);

        if fps < TARGET_MIN_FPS {
            0.0
        } else if fps < 2.0 * TARGET_MIN_FPS {
            jitter * (fps - TARGET_MIN_FPS) / TARGET_MIN_FPS
        } else {
            jitter
        }
    }

    /// Recommended jitter-buffer occupancy in frames.
    pub fn buffer_target(&self) -> u32 {
        self.target_frames
    }

    /// Replace the current target with a new seed; the next committed
    /// estimate overrides it as usual.
    pub fn reseed_target(&mut self, seed_target: u32) {
        self.target_frames = seed_target;
    }

    pub fn effective_fps(&self) -> Option<f64> {
        self.fps.effective_fps()
    }

    pub fn smoothed_max_gap_ms(&self) -> f64 {
        self.fps.smoothed_max_gap_ms()
    }

    /// Number of delay shifts flagged by the CUSUM detector.
    pub fn delay_shifts(&self) -> u64 {
        self.delay_shifts
    }

    fn update_frame_size_stats(&mut self, size: f64) {
        if self.max_frame_size == 0.0 {
            self.avg_frame_size = size;
            self.var_frame_size = VAR_FLOOR;
            self.max_frame_size = size;
            return;
        }

        // Keyframes blow past the average and would bias it; only typical
        // frames feed the mean.
        if size < self.avg_frame_size + 2.0 * self.var_frame_size.sqrt() {
            self.avg_frame_size = PHI * self.avg_frame_size + (1.0 - PHI) * size;
        }
        let dev = size - self.avg_frame_size;
        self.var_frame_size = (PHI * self.var_frame_size + (1.0 - PHI) * dev * dev).max(VAR_FLOOR);
        self.max_frame_size = (PSI * self.max_frame_size).max(size);
    }

    fn update_noise(&mut self, d: f64) {
        let mut alpha = (self.alpha_count as f64 - 1.0) / self.alpha_count as f64;
        self.alpha_count = (self.alpha_count + 1).min(ALPHA_COUNT_MAX);

        if let Some(fps) = self.fps.effective_fps() {
            // Scale the forgetting rate to the actual frame rate, ramped in
            // over the startup window.
            let mut rate_scale = 30.0 / fps;
            if self.startup_count < STARTUP_FRAMES {
                rate_scale = (self.startup_count as f64 * rate_scale
                    + (STARTUP_FRAMES - self.startup_count) as f64)
                    / STARTUP_FRAMES as f64;
            }
            alpha = alpha.powf(rate_scale);
        }

        self.avg_noise = alpha * self.avg_noise + (1.0 - alpha) * d;
        let dev = d - self.avg_noise;
        self.var_noise = (alpha * self.var_noise + (1.0 - alpha) * dev * dev).max(VAR_FLOOR);
    }

    fn kalman_update(&mut self, delta_frame: f64, ifdv_ms: f64) {
        self.var_slope += Q_SLOPE_SCALE * self.max_frame_size * self.max_frame_size;
        self.var_intercept += Q_INTERCEPT;

        // h = (delta_frame, 1)
        let ph0 = self.var_slope * delta_frame + self.cov;
        let ph1 = self.cov * delta_frame + self.var_intercept;
        let s = delta_frame * ph0 + ph1 + self.var_noise;
        if s < f64::EPSILON {
            return;
        }
        let k0 = ph0 / s;
        let k1 = ph1 / s;

        let residual = ifdv_ms - (self.slope * delta_frame + self.intercept);
        self.slope += k0 * residual;
        self.intercept += k1 * residual;

        self.var_slope = (self.var_slope - k0 * ph0).max(VAR_FLOOR);
        self.cov -= k0 * ph1;
        self.var_intercept = (self.var_intercept - k1 * ph1).max(VAR_FLOOR);
    }

    fn cusum_update(&mut self, ifdv_ms: f64) {
        let x = (ifdv_ms * RTP_TICKS_PER_MS).clamp(-CUSUM_CLAMP_TICKS, CUSUM_CLAMP_TICKS);
        self.cusum_pos = (self.cusum_pos + x - CUSUM_DRIFT_TICKS).max(0.0);
        self.cusum_neg = (self.cusum_neg + x + CUSUM_DRIFT_TICKS).min(0.0);

        if self.cusum_pos > CUSUM_THRESHOLD || self.cusum_neg < -CUSUM_THRESHOLD {
            log::warn!(
                "delay shift detected (cusum pos={:.0} neg={:.0}), re-learning intercept",
                self.cusum_pos,
                self.cusum_neg
            );
            self.cusum_pos = 0.0;
            self.cusum_neg = 0.0;
            self.var_intercept = INTERCEPT_VAR_INFLATE;
            self.alpha_count = 1;
            self.delay_shifts += 1;
        }
    }

    fn update_buffer_target(&mut self) {
        let fps = match self.fps.effective_fps() {
            Some(fps) => fps,
            None => return,
        };
        if !(TARGET_MIN_FPS..=TARGET_MAX_FPS).contains(&fps) {
            return;
        }
        if self.fps.gap_samples() < TARGET_MIN_GAP_SAMPLES {
            return;
        }
        let gap_ms = self.fps.smoothed_max_gap_ms();
        if !(TARGET_MIN_GAP_MS..=TARGET_MAX_GAP_MS).contains(&gap_ms) {
            return;
        }

        let frame_period_ms = 1000.0 / fps;
        let target = ((gap_ms / frame_period_ms).ceil() as u32 + TARGET_HEADROOM_FRAMES)
            .clamp(TARGET_MIN_FRAMES, TARGET_MAX_FRAMES);

        if target.abs_diff(self.target_frames) >= TARGET_HYSTERESIS {
            log::debug!(
                "buffer target {} -> {} frames (gap {:.0} ms, {:.1} fps)",
                self.target_frames,
                target,
                gap_ms,
                fps
            );
            self.target_frames = target;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `frames` arrivals with fixed wall spacing, RTP step and size.
    fn feed(
        est: &mut JitterEstimator,
        frames: u32,
        start_ms: f64,
        spacing_ms: f64,
        rtp_step: u32,
        size: usize,
    ) -> f64 {
        let mut t_ms = start_ms;
        let mut rtp = 90_000u32;
        for _ in 0..frames {
            est.update(rtp, (t_ms * 1000.0) as u64, size);
            t_ms += spacing_ms;
            rtp = rtp.wrapping_add(rtp_step);
        }
        t_ms
    }

    #[test]
    fn steady_stream_keeps_a_small_target() {
        let mut est = JitterEstimator::new(4);
        feed(&mut est, 90, 0.0, 1000.0 / 30.0, 3000, 1000);

        let fps = est.effective_fps().unwrap();
        assert!((29.0..=31.0).contains(&fps), "fps = {fps}");
        let gap = est.smoothed_max_gap_ms();
        assert!((30.0..=45.0).contains(&gap), "gap = {gap}");
        assert!(est.buffer_target() <= 5, "target = {}", est.buffer_target());
    }

    #[test]
    fn bursty_stream_grows_the_target() {
        let mut est = JitterEstimator::new(4);
        let mut t_ms = 0.0;
        let mut rtp = 0u32;
        // 2 s bursts at 50 ms spacing, separated by 300 ms gaps.
        for _ in 0..5 {
            for _ in 0..40 {
                est.update(rtp, (t_ms * 1000.0) as u64, 1000);
                t_ms += 50.0;
                rtp = rtp.wrapping_add(3000);
            }
            t_ms += 250.0;
        }

        assert!(est.buffer_target() >= 8, "target = {}", est.buffer_target());
    }

    #[test]
    fn target_holds_without_enough_gap_samples() {
        let mut est = JitterEstimator::new(6);
        feed(&mut est, 4, 0.0, 33.3, 3000, 1000);
        assert_eq!(est.buffer_target(), 6);
    }

    #[test]
    fn target_holds_outside_the_fps_range() {
        let mut est = JitterEstimator::new(6);
        // 2 fps is below the trusted range; the seed must survive.
        feed(&mut est, 20, 0.0, 500.0, 45_000, 1000);
        assert_eq!(est.buffer_target(), 6);
    }

    #[test]
    fn target_is_stable_under_constant_conditions() {
        let mut est = JitterEstimator::new(10);
        let mut changes = Vec::new();
        let mut t_ms = 0.0;
        let mut rtp = 0u32;
        let mut last = est.buffer_target();
        for cycle in 0..20 {
            for _ in 0..40 {
                est.update(rtp, (t_ms * 1000.0) as u64, 1000);
                t_ms += 50.0;
                rtp = rtp.wrapping_add(3000);
                if est.buffer_target() != last {
                    // Ignore adjustments while the gap statistics warm up.
                    if cycle >= 3 {
                        changes.push(est.buffer_target());
                    }
                    last = est.buffer_target();
                }
            }
            t_ms += 250.0;
        }

        // After settling, hysteresis allows at most one adjustment.
        assert!(changes.len() <= 1, "targets moved: {changes:?}");
    }

    #[test]
    fn sustained_delay_shift_raises_a_cusum_alarm() {
        let mut est = JitterEstimator::new(4);
        let t_ms = feed(&mut est, 60, 0.0, 1000.0 / 30.0, 3000, 1000);

        // The receiver clock now runs 120 ms/frame ahead of the RTP clock.
        // Each sample clamps to +7000 ticks and accumulates 400 over the
        // 6600-tick drift guard, so the alarm trips within ~150 frames.
        let mut t_ms = t_ms;
        let mut rtp = 90_000u32.wrapping_add(60 * 3000);
        for _ in 0..200 {
            est.update(rtp, (t_ms * 1000.0) as u64, 1000);
            t_ms += 1000.0 / 30.0 + 120.0;
            rtp = rtp.wrapping_add(3000);
        }

        assert!(est.delay_shifts() >= 1);
    }

    #[test]
    fn low_fps_reports_zero_jitter() {
        let mut est = JitterEstimator::new(4);
        feed(&mut est, 20, 0.0, 500.0, 45_000, 1000);
        assert_eq!(est.jitter_ms(), 0.0);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut est = JitterEstimator::new(4);
        let mut t_ms = 0.0;
        let mut rtp = 0u32;
        // Alternate small and huge frames with ragged pacing.
        for i in 0..120u32 {
            let size = if i % 10 == 0 { 30_000 } else { 1_000 };
            let spacing = if i % 7 == 0 { 90.0 } else { 25.0 };
            est.update(rtp, (t_ms * 1000.0) as u64, size);
            t_ms += spacing;
            rtp = rtp.wrapping_add(3000);
        }

        let jitter = est.jitter_ms();
        assert!((0.0..=MAX_JITTER_MS).contains(&jitter), "jitter = {jitter}");
    }

    #[test]
    fn ignored_arrival_leaves_state_untouched() {
        let mut est = JitterEstimator::new(4);
        feed(&mut est, 10, 0.0, 33.3, 3000, 1000);
        let target = est.buffer_target();
        let gap = est.smoothed_max_gap_ms();

        // Within a hundred microseconds of the previous arrival.
        let verdict = est.update(1_000_000, (9.0 * 33.3 * 1000.0 + 50.0) as u64, 1000);
        assert_eq!(verdict, FrameVerdict::Ignored);
        assert_eq!(est.buffer_target(), target);
        assert_eq!(est.smoothed_max_gap_ms(), gap);
    }
}
