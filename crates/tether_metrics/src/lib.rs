//! Tether Metrics - timing sample utilities
//!
//! Bounded sample storage with the summary statistics the bridge reports
//! for script systems (median, percentiles, standard deviation), plus a
//! frame timer for the runtime loop.
//!
//! # Usage
//!
//! ```ignore
//! use tether_metrics::{FrameTimer, RingBuffer};
//!
//! let mut timer = FrameTimer::new(60); // Track last 60 frames
//! timer.begin();
//! // ... do work ...
//! timer.end();
//! println!("FPS: {:.1}", timer.fps());
//! ```
//!
//! Collection is always compiled in; callers decide at runtime whether to
//! record samples at all.

mod frame_timer;
mod ring_buffer;

pub use frame_timer::FrameTimer;
pub use ring_buffer::RingBuffer;
