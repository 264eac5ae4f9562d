//! Frame timing for the runtime loop

use super::ring_buffer::RingBuffer;
use std::time::{Duration, Instant};

/// Rolling window of frame durations plus a lifetime frame count.
pub struct FrameTimer {
    started: Option<Instant>,
    window: RingBuffer<Duration>,
    total_frames: u64,
}

fn to_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl FrameTimer {
    pub fn new(window: usize) -> Self {
        Self {
            started: None,
            window: RingBuffer::new(window),
            total_frames: 0,
        }
    }

    pub fn begin(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Close the open frame and return its duration. Without a matching
    /// `begin` nothing is recorded and the result is zero.
    pub fn end(&mut self) -> Duration {
        let Some(started) = self.started.take() else {
            return Duration::ZERO;
        };
        let elapsed = started.elapsed();
        self.window.push(elapsed);
        self.total_frames += 1;
        elapsed
    }

    /// Frames currently in the window.
    pub fn frames(&self) -> usize {
        self.window.len()
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn fps(&self) -> f64 {
        let avg = self.window.average().as_secs_f64();
        if avg > 0.0 {
            avg.recip()
        } else {
            0.0
        }
    }

    pub fn frame_time_ms(&self) -> f64 {
        to_ms(self.window.average())
    }

    pub fn frame_time_percentile_ms(&self, p: f64) -> f64 {
        to_ms(self.window.percentile(p))
    }

    pub fn frame_time_p95_ms(&self) -> f64 {
        self.frame_time_percentile_ms(95.0)
    }

    pub fn frame_time_range_ms(&self) -> (f64, f64) {
        let (min, max) = self.window.min_max();
        (to_ms(min), to_ms(max))
    }
}
