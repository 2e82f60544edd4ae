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

//! Burst-aware adaptive playout smoothing for RTP video streams.
//!
//! Remote transformation services deliver frames in bursts at a variable,
//! sub-nominal rate; played back naively the result is jerky and drifts in
//! latency. This crate reorders incoming frames by RTP timestamp, sizes
//! its buffer from the worst recent arrival gap, and paces playback with
//! an adaptive clock that dilates and compresses local time to hold
//! latency near a target without visible stutter.

pub mod buffer;
pub mod config;
pub mod error;
pub mod extrapolator;
pub mod fps_tracker;
pub mod frame;
pub mod jitter_estimator;
pub mod playback;
pub mod smoother;
pub mod statistics;

pub use buffer::{InsertOutcome, JitterBuffer};
pub use config::SmootherConfig;
pub use error::{Result, SmoothError};
pub use extrapolator::TimestampExtrapolator;
pub use fps_tracker::FpsTracker;
pub use frame::DecodedFrame;
pub use jitter_estimator::JitterEstimator;
pub use playback::PlaybackClock;
pub use smoother::{SessionClock, Smoother};
pub use statistics::SmootherStats;
