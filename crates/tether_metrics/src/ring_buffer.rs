//! Ring buffer for rolling statistics

use std::time::Duration;

/// Fixed-capacity sample buffer; the oldest sample is overwritten when full.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    samples: Vec<T>,
    capacity: usize,
    index: usize,
}

impl<T: Clone> RingBuffer<T> {
    /// A zero capacity is bumped to one so `push` never divides by zero.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            index: 0,
        }
    }

    pub fn push(&mut self, sample: T) {
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            self.samples[self.index] = sample;
        }
        self.index = (self.index + 1) % self.capacity;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.index = 0;
    }

    /// Samples oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let split = if self.samples.len() < self.capacity { 0 } else { self.index };
        self.samples[split..].iter().chain(self.samples[..split].iter())
    }
}

// Specialize for Duration (common case)
impl RingBuffer<Duration> {
    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }

        let sum: Duration = self.samples.iter().sum();
        sum / self.samples.len() as u32
    }

    pub fn min_max(&self) -> (Duration, Duration) {
        let min = self.samples.iter().min().copied().unwrap_or(Duration::ZERO);
        let max = self.samples.iter().max().copied().unwrap_or(Duration::ZERO);
        (min, max)
    }

    fn sorted(&self) -> Vec<Duration> {
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        sorted
    }

    pub fn median(&self) -> Duration {
        self.percentile(50.0)
    }

    /// Nearest-rank percentile, `p` clamped to `0..=100`.
    pub fn percentile(&self, p: f64) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let sorted = self.sorted();
        let p = p.clamp(0.0, 100.0);
        let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
    }

    /// Population standard deviation.
    pub fn stddev(&self) -> Duration {
        if self.samples.len() < 2 {
            return Duration::ZERO;
        }
        let mean = self.average().as_secs_f64();
        let variance = self
            .samples
            .iter()
            .map(|s| {
                let d = s.as_secs_f64() - mean;
                d * d
            })
            .sum::<f64>()
            / self.samples.len() as f64;
        Duration::from_secs_f64(variance.sqrt())
    }
}

// Specialize for f64
impl RingBuffer<f64> {
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }

        let sum: f64 = self.samples.iter().sum();
        sum / self.samples.len() as f64
    }
}
