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

//! RTP-timestamp-sorted bounded queue of decoded frames.

use std::collections::VecDeque;

use crate::frame::{rtp_diff, DecodedFrame};
use crate::statistics::SmootherCounters;

/// Outcome of a frame insertion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InsertOutcome {
    /// Frame appended at the tail, the common case.
    InOrder,
    /// Frame landed at a sorted position before the tail.
    Reordered,
    /// A frame with the same RTP timestamp is already buffered.
    Duplicate,
}

/// Bounded queue of decoded frames, kept strictly increasing by RTP
/// timestamp under signed 32-bit comparison. The buffer owns every payload
/// it holds; ownership transfers out on pop and is dropped on evict, skip
/// and reset.
#[derive(Debug)]
pub struct JitterBuffer {
    frames: VecDeque<DecodedFrame>,
    max_frames: usize,
}

impl JitterBuffer {
    pub fn new(max_frames: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(max_frames),
            max_frames,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// RTP timestamp of the oldest buffered frame.
    pub fn front_rtp(&self) -> Option<u32> {
        self.frames.front().map(|f| f.rtp_timestamp)
    }

    /// Insert a frame at its sorted position.
    ///
    /// Duplicates are rejected. When the buffer is full the oldest frame is
    /// evicted first so the newest data always finds a slot.
    pub fn insert(&mut self, frame: DecodedFrame, stats: &mut SmootherCounters) -> InsertOutcome {
        let mut pos = self.find_insert_position(frame.rtp_timestamp);

        if pos > 0 && self.frames[pos - 1].rtp_timestamp == frame.rtp_timestamp {
            log::debug!("discarding duplicate frame rtp={}", frame.rtp_timestamp);
            stats.frame_duplicate();
            return InsertOutcome::Duplicate;
        }

        if self.frames.len() >= self.max_frames {
            self.frames.pop_front();
            stats.overflow_drop();
            log::warn!(
                "jitter buffer full ({} frames), dropped oldest",
                self.max_frames
            );
            pos = pos.saturating_sub(1);
        }

        let reordered = pos < self.frames.len();
        self.frames.insert(pos, frame);

        if reordered {
            stats.frame_reordered();
            log::debug!(
                "reordered frame inserted at {} of {}",
                pos,
                self.frames.len()
            );
            InsertOutcome::Reordered
        } else {
            InsertOutcome::InOrder
        }
    }

    /// Pop the oldest frame if its RTP timestamp is at or before `cursor`.
    /// The caller owns the returned payload.
    pub fn pop_due(&mut self, cursor: u32) -> Option<DecodedFrame> {
        match self.frames.front() {
            Some(front) if rtp_diff(front.rtp_timestamp, cursor) <= 0 => self.frames.pop_front(),
            _ => None,
        }
    }

    /// Drop the `n` oldest frames, releasing their payloads. Returns how
    /// many were actually dropped.
    pub fn skip(&mut self, n: usize) -> usize {
        let n = n.min(self.frames.len());
        self.frames.drain(..n).count()
    }

    /// Drop every buffered frame.
    pub fn reset(&mut self) {
        self.frames.clear();
    }

    /// Change the capacity, evicting oldest frames if the buffer already
    /// holds more than the new limit.
    pub fn set_capacity(&mut self, max_frames: usize, stats: &mut SmootherCounters) {
        self.max_frames = max_frames;
        while self.frames.len() > self.max_frames {
            self.frames.pop_front();
            stats.overflow_drop();
        }
    }

    /// Binary search for the sorted slot of `rtp`, comparing through the
    /// signed 32-bit difference so ordering survives timestamp wraparound.
    fn find_insert_position(&self, rtp: u32) -> usize {
        let mut low = 0;
        let mut high = self.frames.len();
        while low < high {
            let mid = (low + high) / 2;
            if rtp_diff(self.frames[mid].rtp_timestamp, rtp) <= 0 {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }

    #[cfg(test)]
    fn rtp_sequence(&self) -> Vec<u32> {
        self.frames.iter().map(|f| f.rtp_timestamp).collect()
    }
}
