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

use crate::{Result, SmoothError};

/// Configuration for one smoothing session.
#[derive(Debug, Clone)]
pub struct SmootherConfig {
    /// When false the engine is bypassed and the latest received frame is
    /// forwarded directly.
    pub smooth_mode: bool,
    /// Seed buffer target in frames; the estimator takes over once it has
    /// seen enough traffic.
    pub buffer_target: u32,
    /// Floor on the playback speed multiplier (0.1 to 1.0).
    pub speed_min: f64,
    /// Ceiling on the playback speed multiplier (1.0 to 3.0).
    pub speed_max: f64,
    /// Jitter buffer capacity in frames (at most 60).
    pub max_frames: usize,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            smooth_mode: true,
            buffer_target: 4,
            speed_min: 0.5,
            speed_max: 2.0,
            max_frames: 60,
        }
    }
}

impl SmootherConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if !(0.1..=1.0).contains(&self.speed_min) {
            return Err(SmoothError::InvalidConfig(format!(
                "speed_min {} outside 0.1..=1.0",
                self.speed_min
            )));
        }
        if !(1.0..=3.0).contains(&self.speed_max) {
            return Err(SmoothError::InvalidConfig(format!(
                "speed_max {} outside 1.0..=3.0",
                self.speed_max
            )));
        }
        if self.max_frames == 0 || self.max_frames > 60 {
            return Err(SmoothError::InvalidConfig(format!(
                "max_frames {} outside 1..=60",
                self.max_frames
            )));
        }
        if self.buffer_target == 0 || self.buffer_target as usize > self.max_frames {
            return Err(SmoothError::InvalidConfig(format!(
                "buffer_target {} outside 1..={}",
                self.buffer_target, self.max_frames
            )));
        }
        Ok(())
    }
}
