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

//! Recursive-least-squares mapping from RTP timestamps to local time.
//!
//! The 90 kHz sender clock and the local monotonic clock drift against each
//! other; this filter learns the linear relation between them so the
//! receive path can stamp every frame with an arrival-independent local
//! time. The recursion is the standard RLS update with forgetting factor 1.

/// Nominal ticks per millisecond of the 90 kHz video clock.
const RTP_TICKS_PER_MS: f64 = 90.0;

/// A silence longer than this discards the learned mapping entirely.
const IDLE_RESET_MS: f64 = 10_000.0;

/// Samples needed before the model inversion is trusted.
const STARTUP_SAMPLES: u32 = 2;

/// Below this slope the model is ill-conditioned and inversion is refused.
const MIN_SLOPE: f64 = 1e-3;

/// Raw deltas beyond a quarter period are wraparound (or its mirror image
/// from a reordered pair straddling the wrap).
const WRAP_GUARD: i64 = 1 << 30;
const WRAP_PERIOD: i64 = 1 << 32;

const INITIAL_SLOPE: f64 = RTP_TICKS_PER_MS;
const INITIAL_OFFSET_VAR: f64 = 1e10;
const LAMBDA: f64 = 1.0;

/// RLS filter estimating `rtp_since_first = slope * t_ms + offset`.
#[derive(Debug)]
pub struct TimestampExtrapolator {
    slope: f64,
    offset: f64,
    /// 2x2 inverse-correlation matrix of the RLS recursion.
    p: [[f64; 2]; 2],
    start_time_us: u64,
    first_unwrapped: f64,
    prev_wall_us: u64,
    prev_unwrapped: f64,
    unwrap_offset: i64,
    last_raw_rtp: Option<u32>,
    sample_count: u32,
}

impl Default for TimestampExtrapolator {
    fn default() -> Self {
        Self::new()
    }
}

impl TimestampExtrapolator {
    pub fn new() -> Self {
        Self {
            slope: INITIAL_SLOPE,
            offset: 0.0,
            p: [[1.0, 0.0], [0.0, INITIAL_OFFSET_VAR]],
            start_time_us: 0,
            first_unwrapped: 0.0,
            prev_wall_us: 0,
            prev_unwrapped: 0.0,
            unwrap_offset: 0,
            last_raw_rtp: None,
            sample_count: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Feed one `(rtp, local time)` observation.
    pub fn update(&mut self, rtp_timestamp: u32, wall_time_us: u64) {
        if self.sample_count > 0 {
            let idle_ms = wall_time_us.saturating_sub(self.prev_wall_us) as f64 / 1000.0;
            if idle_ms > IDLE_RESET_MS {
                log::info!("extrapolator idle for {idle_ms:.0} ms, hard reset");
                self.reset();
            }
        }

        let unwrapped = self.unwrap(rtp_timestamp);
        self.last_raw_rtp = Some(rtp_timestamp);

        if self.sample_count == 0 {
            self.start_time_us = wall_time_us;
            self.first_unwrapped = unwrapped;
            self.slope = INITIAL_SLOPE;
            self.offset = 0.0;
            self.p = [[1.0, 0.0], [0.0, INITIAL_OFFSET_VAR]];
            self.prev_wall_us = wall_time_us;
            self.prev_unwrapped = unwrapped;
            self.sample_count = 1;
            return;
        }

        let t_ms = wall_time_us.saturating_sub(self.start_time_us) as f64 / 1000.0;
        let rtp_rel = unwrapped - self.first_unwrapped;

        // h = (t_ms, 1); gain K = P h / (lambda + h' P h)
        let ph0 = self.p[0][0] * t_ms + self.p[0][1];
        let ph1 = self.p[1][0] * t_ms + self.p[1][1];
        let denom = LAMBDA + t_ms * ph0 + ph1;
        if denom.abs() > f64::EPSILON {
            let k0 = ph0 / denom;
            let k1 = ph1 / denom;
            let residual = rtp_rel - (self.slope * t_ms + self.offset);
            self.slope += k0 * residual;
            self.offset += k1 * residual;

            // P = (P - K h' P) / lambda
            let p00 = (self.p[0][0] - k0 * ph0) / LAMBDA;
            let p01 = (self.p[0][1] - k0 * ph1) / LAMBDA;
            let p10 = (self.p[1][0] - k1 * ph0) / LAMBDA;
            let p11 = (self.p[1][1] - k1 * ph1) / LAMBDA;
            self.p = [[p00, p01], [p10, p11]];
        }

        self.prev_wall_us = wall_time_us;
        self.prev_unwrapped = unwrapped;
        self.sample_count = self.sample_count.saturating_add(1);
    }

    /// Local time in microseconds at which a frame with `rtp_timestamp`
    /// would have arrived on a perfectly paced transport.
    pub fn extrapolate_local_us(&self, rtp_timestamp: u32) -> u64 {
        if self.sample_count == 0 {
            return 0;
        }

        let unwrapped = self.unwrap_readonly(rtp_timestamp);

        if self.sample_count < STARTUP_SAMPLES {
            // Not enough history for the model; extend linearly from the
            // previous sample at the nominal clock rate.
            let delta_us = (unwrapped - self.prev_unwrapped) / RTP_TICKS_PER_MS * 1000.0;
            let t = self.prev_wall_us as f64 + delta_us;
            return if t < 0.0 { 0 } else { t as u64 };
        }

        if self.slope.abs() < MIN_SLOPE {
            return self.start_time_us;
        }

        let t_ms = ((unwrapped - self.first_unwrapped - self.offset) / self.slope).max(0.0);
        self.start_time_us + (t_ms * 1000.0) as u64
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    fn unwrap(&mut self, rtp: u32) -> f64 {
        if let Some(last) = self.last_raw_rtp {
            let delta = rtp as i64 - last as i64;
            if delta < -WRAP_GUARD {
                self.unwrap_offset += WRAP_PERIOD;
            } else if delta > WRAP_GUARD {
                self.unwrap_offset -= WRAP_PERIOD;
            }
        }
        (self.unwrap_offset + rtp as i64) as f64
    }

    /// Same unwrap decision as [`unwrap`](Self::unwrap) without committing
    /// the offset, for read-only queries.
    fn unwrap_readonly(&self, rtp: u32) -> f64 {
        let mut offset = self.unwrap_offset;
        if let Some(last) = self.last_raw_rtp {
            let delta = rtp as i64 - last as i64;
            if delta < -WRAP_GUARD {
                offset += WRAP_PERIOD;
            } else if delta > WRAP_GUARD {
                offset -= WRAP_PERIOD;
            }
        }
        (offset + rtp as i64) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed a steady 30 fps stream starting at the given RTP timestamp.
    fn feed_steady(ex: &mut TimestampExtrapolator, start_rtp: u32, frames: u32) {
        for i in 0..frames {
            let rtp = start_rtp.wrapping_add(i * 3000);
            let wall_us = 1_000_000 + i as u64 * 33_333;
            ex.update(rtp, wall_us);
        }
    }

    #[test]
    fn round_trip_error_is_small_on_a_steady_stream() {
        let mut ex = TimestampExtrapolator::new();
        feed_steady(&mut ex, 90_000, 30);

        for i in 0..30u32 {
            let rtp = 90_000 + i * 3000;
            let expected_us = 1_000_000 + i as u64 * 33_333;
            let got = ex.extrapolate_local_us(rtp);
            let err_ms = (got as i64 - expected_us as i64).abs() as f64 / 1000.0;
            assert!(err_ms < 50.0, "frame {i}: error {err_ms} ms");
        }
    }

    #[test]
    fn extrapolation_is_monotonic() {
        let mut ex = TimestampExtrapolator::new();
        feed_steady(&mut ex, 0, 30);

        let mut prev = 0u64;
        for i in 0..60u32 {
            let t = ex.extrapolate_local_us(i * 1500);
            assert!(t >= prev, "rtp {} mapped backwards", i * 1500);
            prev = t;
        }
    }

    #[test]
    fn startup_uses_linear_extension_from_the_anchor() {
        let mut ex = TimestampExtrapolator::new();
        ex.update(9000, 2_000_000);

        // One 90k-clock second past the single sample.
        let t = ex.extrapolate_local_us(9000 + 90_000);
        assert_eq!(t, 3_000_000);
    }

    #[test]
    fn survives_timestamp_wraparound() {
        let mut ex = TimestampExtrapolator::new();
        let start = u32::MAX - 30_000;
        feed_steady(&mut ex, start, 30);

        // The stream has wrapped; mapping must still advance smoothly.
        let before = ex.extrapolate_local_us(start.wrapping_add(27_000));
        let after = ex.extrapolate_local_us(start.wrapping_add(30_000));
        assert!(after > before);
        let step_ms = (after - before) as f64 / 1000.0;
        assert!((step_ms - 33.3).abs() < 5.0, "step {step_ms} ms");
    }

    #[test]
    fn long_idle_resets_the_model() {
        let mut ex = TimestampExtrapolator::new();
        feed_steady(&mut ex, 0, 30);
        assert!(ex.sample_count() >= 30);

        // 11 s of silence; the next update must re-anchor from scratch.
        ex.update(3_000_000, 1_000_000 + 29 * 33_333 + 11_000_000);
        assert_eq!(ex.sample_count(), 1);
    }

    #[test]
    fn degenerate_slope_falls_back_to_the_anchor() {
        let mut ex = TimestampExtrapolator::new();
        // Time advances but the RTP clock is stuck: slope collapses.
        for i in 0..20u64 {
            ex.update(5000, 1_000_000 + i * 33_333);
        }
        assert_eq!(ex.extrapolate_local_us(5000), 1_000_000);
    }
}
