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

//! Burst-aware adaptive playback clock.
//!
//! The clock advances a virtual cursor through RTP-timestamp space each
//! render tick. Local time is dilated when the buffer runs low and
//! compressed when it runs full, with the speed slewed gradually so the
//! viewer never sees an abrupt pace change. Between bursts the clock
//! cruises at a reduced speed sized to what is known about the producer's
//! gap pattern.

const RTP_TICKS_PER_MS: f64 = 90.0;
/// Frame rate the producer's RTP clock assumes.
const NOMINAL_FPS: f64 = 30.0;

/// A silence this long on the receive path means the producer is in a
/// between-burst gap.
const GAP_THRESHOLD_MS: f64 = 100.0;
/// EMA factors for the learned burst statistics.
const BURST_ALPHA_EARLY: f64 = 0.3;
const BURST_ALPHA: f64 = 0.1;
const BURST_EARLY_COUNT: u32 = 10;

/// Maximum speed change per second.
const SPEED_SLEW_PER_S: f64 = 0.5;
/// Cruise speed while riding out a gap with enough frames in hand.
const GAP_CRUISE_SPEED: f64 = 0.8;
/// Speed gain per frame of occupancy above the target.
const DRAIN_GAIN_PER_FRAME: f64 = 0.1;

/// Minimum frames buffered before playback starts.
const PRIME_MIN_FRAMES: usize = 3;

/// Virtual playback cursor over RTP time, with the burst/gap substate it
/// steers by.
#[derive(Debug)]
pub struct PlaybackClock {
    speed_min: f64,
    speed_max: f64,

    started: bool,
    start_rtp: u32,
    accumulated_rtp: f64,
    current_speed: f64,
    last_render_ms: Option<f64>,

    last_arrival_ms: Option<f64>,
    burst_frames: u32,
    avg_burst_frames: f64,
    avg_gap_ms: f64,
    burst_count: u32,
    in_gap: bool,
}

impl PlaybackClock {
    pub fn new(speed_min: f64, speed_max: f64) -> Self {
        Self {
            speed_min,
            speed_max,
            started: false,
            start_rtp: 0,
            accumulated_rtp: 0.0,
            current_speed: 1.0,
            last_render_ms: None,
            last_arrival_ms: None,
            burst_frames: 0,
            avg_burst_frames: 0.0,
            avg_gap_ms: 0.0,
            burst_count: 0,
            in_gap: false,
        }
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn current_speed(&self) -> f64 {
        self.current_speed
    }

    pub fn avg_burst_frames(&self) -> f64 {
        self.avg_burst_frames
    }

    pub fn avg_gap_ms(&self) -> f64 {
        self.avg_gap_ms
    }

    pub fn in_gap(&self) -> bool {
        self.in_gap
    }

    /// Apply new speed bounds, pulling the current speed inside them.
    pub fn set_speed_bounds(&mut self, speed_min: f64, speed_max: f64) {
        self.speed_min = speed_min;
        self.speed_max = speed_max;
        self.current_speed = self.current_speed.clamp(speed_min, speed_max);
    }

    /// Record a frame arrival on the receive path.
    pub fn on_frame_arrival(&mut self, wall_ms: f64) {
        if let Some(last) = self.last_arrival_ms {
            let delta = wall_ms - last;
            if self.in_gap || delta > GAP_THRESHOLD_MS {
                // The gap just ended; its duration is now known.
                let alpha = self.burst_alpha();
                if self.avg_gap_ms == 0.0 {
                    self.avg_gap_ms = delta;
                } else {
                    self.avg_gap_ms += alpha * (delta - self.avg_gap_ms);
                }
                self.in_gap = false;
                self.burst_frames = 0;
            }
        }
        self.burst_frames += 1;
        self.last_arrival_ms = Some(wall_ms);
    }

    /// Whether the buffer has filled enough to start playback.
    pub fn should_prime(&self, buffered: usize, target_frames: u32) -> bool {
        buffered >= (target_frames as usize / 2).max(PRIME_MIN_FRAMES)
    }

    /// Start playback anchored at the oldest buffered frame.
    pub fn prime(&mut self, now_ms: f64, front_rtp: u32) {
        self.started = true;
        self.start_rtp = front_rtp;
        self.accumulated_rtp = 0.0;
        self.current_speed = 1.0;
        self.last_render_ms = Some(now_ms);
        log::debug!("playback primed at rtp {front_rtp}");
    }

    /// Advance the cursor for one render tick and return its new position.
    pub fn advance(
        &mut self,
        now_ms: f64,
        buffered: usize,
        target_frames: u32,
        effective_fps: f64,
    ) -> u32 {
        let dt_ms = match self.last_render_ms {
            Some(last) => (now_ms - last).max(0.0),
            None => 0.0,
        };
        self.last_render_ms = Some(now_ms);

        let since_last_frame = self.detect_gap(now_ms);

        let target_speed = self.target_speed(buffered, target_frames, effective_fps, since_last_frame);
        let max_step = SPEED_SLEW_PER_S * dt_ms / 1000.0;
        self.current_speed += (target_speed - self.current_speed).clamp(-max_step, max_step);

        // The producer stamps RTP at the nominal rate regardless of how
        // fast frames actually arrive; scale the cursor to the delivered
        // rate or it outruns the stream.
        let ticks_per_ms = RTP_TICKS_PER_MS * (effective_fps / NOMINAL_FPS);
        self.accumulated_rtp += dt_ms * ticks_per_ms * self.current_speed;

        self.cursor()
    }

    /// Current cursor position in RTP time.
    pub fn cursor(&self) -> u32 {
        self.start_rtp.wrapping_add(self.accumulated_rtp as u64 as u32)
    }

    /// Re-anchor the cursor after a catch-up skip.
    pub fn reanchor(&mut self, front_rtp: u32) {
        self.start_rtp = front_rtp;
        self.accumulated_rtp = 0.0;
    }

    /// Return to idle. Learned burst statistics survive so the next start
    /// does not re-learn the producer from scratch.
    pub fn reset(&mut self) {
        self.started = false;
        self.accumulated_rtp = 0.0;
        self.current_speed = 1.0;
        self.last_render_ms = None;
        self.last_arrival_ms = None;
        self.burst_frames = 0;
        self.in_gap = false;
    }

    fn burst_alpha(&self) -> f64 {
        if self.burst_count < BURST_EARLY_COUNT {
            BURST_ALPHA_EARLY
        } else {
            BURST_ALPHA
        }
    }

    /// Detect the rising edge of a gap and learn the finished burst's
    /// length. Returns the time since the last received frame.
    fn detect_gap(&mut self, now_ms: f64) -> f64 {
        let since = match self.last_arrival_ms {
            Some(last) => now_ms - last,
            None => return f64::INFINITY,
        };
        if since > GAP_THRESHOLD_MS && !self.in_gap {
            self.in_gap = true;
            self.burst_count += 1;
            if self.burst_frames > 0 {
                let alpha = self.burst_alpha();
                if self.avg_burst_frames == 0.0 {
                    self.avg_burst_frames = self.burst_frames as f64;
                } else {
                    self.avg_burst_frames +=
                        alpha * (self.burst_frames as f64 - self.avg_burst_frames);
                }
            }
            log::debug!(
                "gap started after {} frames (avg burst {:.1}, avg gap {:.0} ms)",
                self.burst_frames,
                self.avg_burst_frames,
                self.avg_gap_ms
            );
        }
        since
    }

    fn target_speed(
        &self,
        buffered: usize,
        target_frames: u32,
        effective_fps: f64,
        since_last_frame: f64,
    ) -> f64 {
        if buffered == 0 {
            return self.speed_min;
        }

        if self.in_gap {
            // Ration the remaining frames over the expected rest of the
            // gap; cruise slightly slow when there is room to spare.
            let remaining_ms = (self.avg_gap_ms - since_last_frame).max(0.0);
            let frames_needed = remaining_ms * effective_fps / 1000.0;
            let margin = buffered as f64 / (frames_needed + 1.0);
            return if margin < 1.0 {
                self.speed_min + margin * (GAP_CRUISE_SPEED - self.speed_min)
            } else {
                GAP_CRUISE_SPEED
            };
        }

        let target = target_frames as usize;
        if buffered < target {
            self.speed_min + (buffered as f64 / target as f64) * (1.0 - self.speed_min)
        } else {
            (1.0 + DRAIN_GAIN_PER_FRAME * (buffered - target) as f64).min(self.speed_max)
        }
    }
}
