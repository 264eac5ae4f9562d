//! Per-system dispatch timing

use std::time::Duration;
use tether_metrics::RingBuffer;

/// Timing and volume counters for one script system.
///
/// Counters are only updated while `enabled`. Individual invocation samples
/// are additionally kept in a bounded ring when `detailed` is set.
#[derive(Clone, Debug)]
pub struct SystemStats {
    pub enabled: bool,
    pub detailed: bool,
    pub last_entity_count: usize,
    pub last_time: Duration,
    pub invocations: u64,
    pub total_time: Duration,
    pub min_time: Option<Duration>,
    pub max_time: Duration,
    samples: RingBuffer<Duration>,
}

impl SystemStats {
    pub fn new(sample_capacity: usize, enabled: bool) -> Self {
        Self {
            enabled,
            detailed: false,
            last_entity_count: 0,
            last_time: Duration::ZERO,
            invocations: 0,
            total_time: Duration::ZERO,
            min_time: None,
            max_time: Duration::ZERO,
            samples: RingBuffer::new(sample_capacity),
        }
    }

    /// Record one callback invocation.
    pub fn record_invocation(&mut self, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        self.invocations += 1;
        self.total_time += elapsed;
        self.min_time = Some(self.min_time.map_or(elapsed, |min| min.min(elapsed)));
        self.max_time = self.max_time.max(elapsed);
        if self.detailed {
            self.samples.push(elapsed);
        }
    }

    /// Record the totals of one frame's dispatch.
    pub fn record_frame(&mut self, entities: usize, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        self.last_entity_count = entities;
        self.last_time = elapsed;
    }

    pub fn average_time(&self) -> Duration {
        if self.invocations == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((self.total_time.as_nanos() / self.invocations as u128) as u64)
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn median(&self) -> Duration {
        self.samples.median()
    }

    pub fn percentile(&self, p: f64) -> Duration {
        self.samples.percentile(p)
    }

    pub fn stddev(&self) -> Duration {
        self.samples.stddev()
    }

    /// Zero all counters and drop every sample.
    pub fn reset(&mut self) {
        let capacity = self.samples.capacity();
        *self = Self {
            enabled: self.enabled,
            detailed: self.detailed,
            ..Self::new(capacity, self.enabled)
        };
    }
}
