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

//! Per-session facade of the smoothing engine.
//!
//! The receive thread calls [`Smoother::insert_frame`] for every decoded
//! frame; the host render thread calls [`Smoother::select_frame`] once per
//! tick. All shared state lives behind a single mutex, every critical
//! section is bounded by the buffer capacity, and neither side ever blocks
//! on I/O while holding the lock.

use std::sync::{Arc, Mutex, MutexGuard};

use web_time::Instant;

use crate::buffer::JitterBuffer;
use crate::config::SmootherConfig;
use crate::extrapolator::TimestampExtrapolator;
use crate::frame::DecodedFrame;
use crate::jitter_estimator::{FrameVerdict, JitterEstimator};
use crate::playback::PlaybackClock;
use crate::statistics::{SmootherCounters, SmootherStats};
use crate::Result;

/// A receive-path silence this long sends playback back to idle and
/// discards the learned clock mapping.
const IDLE_TIMEOUT_NS: u64 = 10_000_000_000;

/// Frame rate assumed until the estimator has measured one.
const NOMINAL_FPS: f64 = 30.0;

/// Telemetry is emitted every this many render ticks, or once a second,
/// whichever comes first.
const TELEMETRY_TICKS: u32 = 30;
const TELEMETRY_INTERVAL_MS: f64 = 1000.0;

/// Monotonic clock for stamping frames and render ticks, anchored at
/// session start.
#[derive(Debug, Clone)]
pub struct SessionClock {
    epoch: Instant,
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Nanoseconds since session start.
    pub fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

#[derive(Debug)]
struct SmootherState {
    config: SmootherConfig,
    buffer: JitterBuffer,
    estimator: JitterEstimator,
    extrapolator: TimestampExtrapolator,
    clock: PlaybackClock,
    counters: SmootherCounters,

    /// Latest frame received while the engine is bypassed.
    bypass_frame: Option<DecodedFrame>,

    display_rtp: Option<u32>,
    display_receive_ns: u64,
    last_receive_ns: Option<u64>,
    transport_delay_ms: f64,

    stopping: bool,

    ticks_since_log: u32,
    last_log_ms: f64,
    last_latency_ms: f64,
}

/// Handle to one smoothing session, shared between the receive thread and
/// the render thread. Cloning is cheap; all clones refer to the same
/// session.
#[derive(Debug, Clone)]
pub struct Smoother {
    inner: Arc<Mutex<SmootherState>>,
}

impl Smoother {
    pub fn new(config: SmootherConfig) -> Result<Self> {
        config.validate()?;
        let state = SmootherState {
            buffer: JitterBuffer::new(config.max_frames),
            estimator: JitterEstimator::new(config.buffer_target),
            extrapolator: TimestampExtrapolator::new(),
            clock: PlaybackClock::new(config.speed_min, config.speed_max),
            counters: SmootherCounters::new(),
            bypass_frame: None,
            display_rtp: None,
            display_receive_ns: 0,
            last_receive_ns: None,
            transport_delay_ms: 0.0,
            stopping: false,
            ticks_since_log: 0,
            last_log_ms: 0.0,
            last_latency_ms: 0.0,
            config,
        };
        Ok(Self {
            inner: Arc::new(Mutex::new(state)),
        })
    }

    /// Receive-path entry: hand over one decoded frame. The buffer owns
    /// the payload from here until it is selected for display or evicted.
    ///
    /// Malformed input (empty payload, duplicate RTP timestamp, arrival
    /// gap outside the plausible range) is dropped and counted; it never
    /// disturbs the learned state.
    pub fn insert_frame(&self, frame: DecodedFrame) {
        let mut guard = self.lock();
        let s = &mut *guard;

        if s.stopping {
            return;
        }

        if frame.data.is_empty() {
            log::debug!("ignoring empty frame rtp={}", frame.rtp_timestamp);
            s.counters.frame_ignored();
            return;
        }

        if !s.config.smooth_mode {
            s.counters.frame_received();
            s.last_receive_ns = Some(frame.receive_time_ns);
            s.bypass_frame = Some(frame);
            return;
        }

        let wall_us = frame.receive_time_ns / 1000;
        match s
            .estimator
            .update(frame.rtp_timestamp, wall_us, frame.size_bytes())
        {
            FrameVerdict::Ignored => {
                log::debug!(
                    "ignoring frame rtp={} with out-of-range arrival gap",
                    frame.rtp_timestamp
                );
                s.counters.frame_ignored();
                return;
            }
            FrameVerdict::Accepted => {}
        }

        s.extrapolator.update(frame.rtp_timestamp, wall_us);
        let paced_us = s.extrapolator.extrapolate_local_us(frame.rtp_timestamp);
        s.transport_delay_ms = (wall_us as f64 - paced_us as f64) / 1000.0;

        s.clock.on_frame_arrival(wall_us as f64 / 1000.0);
        s.counters.frame_received();
        s.last_receive_ns = Some(frame.receive_time_ns);

        s.buffer.insert(frame, &mut s.counters);
    }

    /// Render-path entry: advance the playback clock and return the frame
    /// that should go on display, if a new one is due. `None` means the
    /// previous display frame stays up.
    pub fn select_frame(&self, now_ns: u64) -> Option<DecodedFrame> {
        let mut guard = self.lock();
        let s = &mut *guard;

        if !s.config.smooth_mode {
            let frame = s.bypass_frame.take();
            if let Some(f) = &frame {
                s.display_rtp = Some(f.rtp_timestamp);
                s.display_receive_ns = f.receive_time_ns;
                s.counters.frame_displayed();
            }
            return frame;
        }

        let now_ms = now_ns as f64 / 1_000_000.0;

        // A long receive silence sends playback back to idle; the buffer
        // keeps its frames and drains through the normal prime path.
        if let Some(last) = s.last_receive_ns {
            if s.clock.started() && now_ns.saturating_sub(last) > IDLE_TIMEOUT_NS {
                log::info!("receive path idle, playback back to idle");
                s.clock.reset();
            }
        }

        let target = s.estimator.buffer_target();

        if !s.clock.started() {
            if s.clock.should_prime(s.buffer.len(), target) {
                if let Some(front) = s.buffer.front_rtp() {
                    s.clock.prime(now_ms, front);
                    log::info!(
                        "playback primed with {} frames buffered (target {})",
                        s.buffer.len(),
                        target
                    );
                }
            } else {
                Self::telemetry(s, now_ms, now_ns);
                return None;
            }
        }

        let fps = s.estimator.effective_fps().unwrap_or(NOMINAL_FPS);
        let mut cursor = s.clock.advance(now_ms, s.buffer.len(), target, fps);

        // Catastrophic overflow: the cursor has fallen hopelessly behind
        // the stream. Halve the backlog repeatedly, then restart the
        // cursor at the new oldest frame.
        if s.buffer.len() > 2 * target as usize {
            let before = s.buffer.len();
            while s.buffer.len() > target as usize {
                let step = ((s.buffer.len() - target as usize) / 2).max(1);
                let dropped = s.buffer.skip(step);
                s.counters.catchup_skip(dropped);
            }
            if let Some(front) = s.buffer.front_rtp() {
                s.clock.reanchor(front);
                cursor = s.clock.cursor();
            }
            log::warn!(
                "buffer overflow catch-up: skipped {} frames, {} remain",
                before - s.buffer.len(),
                s.buffer.len()
            );
        }

        // Pop everything the cursor has passed; only the newest of those
        // goes on display.
        let mut selected: Option<DecodedFrame> = None;
        while let Some(frame) = s.buffer.pop_due(cursor) {
            selected = Some(frame);
        }

        if let Some(f) = &selected {
            s.display_rtp = Some(f.rtp_timestamp);
            s.display_receive_ns = f.receive_time_ns;
            s.counters.frame_displayed();
        }

        Self::telemetry(s, now_ms, now_ns);
        selected
    }

    /// Apply a new configuration to the running session. Speed bounds and
    /// the bypass switch take effect on the next tick; shrinking the
    /// buffer evicts oldest frames immediately.
    pub fn update_config(&self, config: SmootherConfig) -> Result<()> {
        config.validate()?;
        let mut guard = self.lock();
        let s = &mut *guard;

        if config.max_frames != s.config.max_frames {
            s.buffer.set_capacity(config.max_frames, &mut s.counters);
        }
        if config.buffer_target != s.config.buffer_target {
            s.estimator.reseed_target(config.buffer_target);
        }
        s.clock.set_speed_bounds(config.speed_min, config.speed_max);
        if s.config.smooth_mode && !config.smooth_mode {
            s.buffer.reset();
            s.clock.reset();
        } else if !s.config.smooth_mode && config.smooth_mode {
            s.bypass_frame = None;
        }
        s.config = config;
        Ok(())
    }

    /// Diagnostics snapshot.
    pub fn stats(&self) -> SmootherStats {
        let guard = self.lock();
        let s = &*guard;

        let mut stats = SmootherStats {
            buffered_frames: s.buffer.len(),
            buffer_target_frames: s.estimator.buffer_target(),
            current_speed: s.clock.current_speed(),
            effective_fps: s.estimator.effective_fps().unwrap_or(0.0),
            jitter_ms: s.estimator.jitter_ms(),
            smoothed_max_gap_ms: s.estimator.smoothed_max_gap_ms(),
            current_latency_ms: s.last_latency_ms,
            transport_delay_ms: s.transport_delay_ms,
            avg_burst_frames: s.clock.avg_burst_frames(),
            avg_gap_ms: s.clock.avg_gap_ms(),
            delay_shifts: s.estimator.delay_shifts(),
            ..Default::default()
        };
        s.counters.fill(&mut stats);
        stats
    }

    /// Flush the buffer and return playback to idle. Safe to call any
    /// number of times.
    pub fn reset(&self) {
        let mut guard = self.lock();
        let s = &mut *guard;
        s.buffer.reset();
        s.clock.reset();
        s.extrapolator.reset();
        s.bypass_frame = None;
        s.display_rtp = None;
        s.last_receive_ns = None;
        log::debug!("smoother reset");
    }

    /// Mark the session as stopping; subsequent receive callbacks return
    /// without touching any state.
    pub fn stop(&self) {
        let mut guard = self.lock();
        guard.stopping = true;
        guard.buffer.reset();
        guard.bypass_frame = None;
    }

    fn telemetry(s: &mut SmootherState, now_ms: f64, now_ns: u64) {
        if s.display_rtp.is_some() {
            s.last_latency_ms = now_ns.saturating_sub(s.display_receive_ns) as f64 / 1_000_000.0;
        }

        s.ticks_since_log += 1;
        if s.ticks_since_log < TELEMETRY_TICKS && now_ms - s.last_log_ms < TELEMETRY_INTERVAL_MS {
            return;
        }
        s.ticks_since_log = 0;
        s.last_log_ms = now_ms;

        log::info!(
            "smoother: buffered={} target={} speed={:.2} fps={:.1} max_gap={:.0}ms latency={:.0}ms shifts={}",
            s.buffer.len(),
            s.estimator.buffer_target(),
            s.clock.current_speed(),
            s.estimator.effective_fps().unwrap_or(0.0),
            s.estimator.smoothed_max_gap_ms(),
            s.last_latency_ms,
            s.estimator.delay_shifts(),
        );
    }

    fn lock(&self) -> MutexGuard<'_, SmootherState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
