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

//! Rolling-window tracking of effective frame rate and worst arrival gap.

use std::collections::VecDeque;

/// Samples kept in each rolling window.
const WINDOW_SLOTS: usize = 30;

/// Arrival deltas outside this range are transport glitches, not pacing
/// information, and are not admitted.
const MIN_ARRIVAL_DELTA_MS: f64 = 0.1;
const MAX_ARRIVAL_DELTA_MS: f64 = 5_000.0;

/// The gap window holds one maximum per resample interval. When jitter is
/// high the raw per-arrival maximum flaps between the long gap and the
/// intra-burst spacing; sampling the max over a fixed interval keeps the
/// signal steady.
const GAP_RESAMPLE_INTERVAL_MS: f64 = 1_000.0;

/// Decay factor applied to the smoothed max-gap once per interval.
const MAX_GAP_ALPHA: f64 = 0.1;

/// Outcome of registering a frame arrival.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arrival {
    /// First frame of the session; no inter-arrival delta exists yet.
    First,
    /// Arrival admitted with the given wall-clock delta in milliseconds.
    Accepted(f64),
    /// Delta outside the admissible range; the sample was dropped.
    Ignored,
}

/// Tracks wall-clock inter-arrival gaps over two rolling windows: the last
/// `WINDOW_SLOTS` deltas for the effective frame rate, and per-interval
/// maxima for the worst recent gap. The smoothed max-gap follows a
/// worsening gap immediately and forgets improvements slowly; undersizing
/// the buffer stutters while oversizing only adds delay.
#[derive(Debug)]
pub struct FpsTracker {
    deltas_ms: VecDeque<f64>,
    gap_maxima_ms: VecDeque<f64>,
    smoothed_max_gap_ms: f64,
    interval_start_ms: f64,
    interval_max_ms: f64,
    last_arrival_ms: Option<f64>,
}

impl Default for FpsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsTracker {
    pub fn new() -> Self {
        Self {
            deltas_ms: VecDeque::with_capacity(WINDOW_SLOTS),
            gap_maxima_ms: VecDeque::with_capacity(WINDOW_SLOTS),
            smoothed_max_gap_ms: 0.0,
            interval_start_ms: 0.0,
            interval_max_ms: 0.0,
            last_arrival_ms: None,
        }
    }

    /// Register a frame arrival at `wall_ms` (monotonic milliseconds).
    pub fn on_arrival(&mut self, wall_ms: f64) -> Arrival {
        let last = match self.last_arrival_ms {
            Some(last) => last,
            None => {
                self.last_arrival_ms = Some(wall_ms);
                self.interval_start_ms = wall_ms;
                return Arrival::First;
            }
        };

        let delta = wall_ms - last;
        if !(MIN_ARRIVAL_DELTA_MS..=MAX_ARRIVAL_DELTA_MS).contains(&delta) {
            return Arrival::Ignored;
        }
        self.last_arrival_ms = Some(wall_ms);

        if self.deltas_ms.len() >= WINDOW_SLOTS {
            self.deltas_ms.pop_front();
        }
        self.deltas_ms.push_back(delta);

        if delta > self.smoothed_max_gap_ms {
            self.smoothed_max_gap_ms = delta;
        }
        self.interval_max_ms = self.interval_max_ms.max(delta);

        if wall_ms - self.interval_start_ms >= GAP_RESAMPLE_INTERVAL_MS {
            self.close_gap_interval();
            self.interval_start_ms = wall_ms;
            self.interval_max_ms = 0.0;
        }

        Arrival::Accepted(delta)
    }

    /// Effective delivery frame rate over the window, or `None` before the
    /// first delta has been observed.
    pub fn effective_fps(&self) -> Option<f64> {
        if self.deltas_ms.is_empty() {
            return None;
        }
        let sum: f64 = self.deltas_ms.iter().sum();
        if sum <= 0.0 {
            return None;
        }
        Some(1000.0 * self.deltas_ms.len() as f64 / sum)
    }

    /// Worst per-interval gap currently in the window.
    pub fn max_gap_ms(&self) -> Option<f64> {
        self.gap_maxima_ms
            .iter()
            .cloned()
            .fold(None, |acc, g| Some(acc.map_or(g, |a: f64| a.max(g))))
    }

    /// Smoothed worst gap.
    pub fn smoothed_max_gap_ms(&self) -> f64 {
        self.smoothed_max_gap_ms
    }

    /// Number of completed resample intervals in the gap window.
    pub fn gap_samples(&self) -> usize {
        self.gap_maxima_ms.len()
    }

    pub fn reset(&mut self) {
        self.deltas_ms.clear();
        self.gap_maxima_ms.clear();
        self.smoothed_max_gap_ms = 0.0;
        self.interval_start_ms = 0.0;
        self.interval_max_ms = 0.0;
        self.last_arrival_ms = None;
    }

    fn close_gap_interval(&mut self) {
        if self.gap_maxima_ms.len() >= WINDOW_SLOTS {
            self.gap_maxima_ms.pop_front();
        }
        self.gap_maxima_ms.push_back(self.interval_max_ms);

        let window_max = self
            .gap_maxima_ms
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        if window_max < self.smoothed_max_gap_ms {
            self.smoothed_max_gap_ms += MAX_GAP_ALPHA * (window_max - self.smoothed_max_gap_ms);
        }
    }
}
