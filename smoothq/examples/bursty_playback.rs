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

//! Simulates a bursty producer against the smoothing engine and prints
//! how the buffer, speed and latency evolve.

use smoothq::{DecodedFrame, Smoother, SmootherConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("smoothq bursty playback example");
    println!("===============================");

    let smoother = Smoother::new(SmootherConfig::default())?;

    // Producer: bursts of 40 frames spaced 50 ms apart, separated by
    // 300 ms gaps, RTP stamped at the nominal 30 fps.
    let mut arrivals = Vec::new();
    let mut t_ms = 0.0f64;
    let mut rtp = 90_000u32;
    for _ in 0..8 {
        for _ in 0..40 {
            arrivals.push((t_ms, rtp));
            t_ms += 50.0;
            rtp = rtp.wrapping_add(3000);
        }
        t_ms += 250.0;
    }
    let end_ms = t_ms + 500.0;

    // Render: 60 Hz ticks interleaved with the arrivals on one virtual
    // timeline.
    let mut next_arrival = 0usize;
    let mut displayed = 0u64;
    let mut tick_ms = 0.0f64;
    while tick_ms < end_ms {
        while next_arrival < arrivals.len() && arrivals[next_arrival].0 <= tick_ms {
            let (at_ms, at_rtp) = arrivals[next_arrival];
            smoother.insert_frame(DecodedFrame::new(
                vec![0u8; 1000],
                512,
                512,
                at_rtp,
                (at_ms * 1_000_000.0) as u64,
            ));
            next_arrival += 1;
        }

        if smoother.select_frame((tick_ms * 1_000_000.0) as u64).is_some() {
            displayed += 1;
        }

        if (tick_ms as u64) % 1000 < 17 {
            let stats = smoother.stats();
            println!(
                "t={:5.1}s buffered={:2} target={:2} speed={:.2} fps={:5.1} gap={:3.0}ms latency={:3.0}ms",
                tick_ms / 1000.0,
                stats.buffered_frames,
                stats.buffer_target_frames,
                stats.current_speed,
                stats.effective_fps,
                stats.smoothed_max_gap_ms,
                stats.current_latency_ms,
            );
        }

        tick_ms += 1000.0 / 60.0;
    }

    let stats = smoother.stats();
    println!("\nreceived {} frames, displayed {}", stats.frames_received, displayed);
    println!(
        "learned burst pattern: {:.0} frames per burst, {:.0} ms gaps",
        stats.avg_burst_frames, stats.avg_gap_ms
    );

    Ok(())
}
