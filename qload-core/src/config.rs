use std::time::Duration;

use rand::Rng as _;

use super::error::{Error, Result};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Iterations starting later than this after their scheduled time count as lagged.
pub const DEFAULT_LAG_TOLERANCE: Duration = Duration::from_millis(10);

/// Open-model schedule: `target_rate` iteration starts per second for `duration`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSpec {
    pub target_rate: f64,
    pub duration: Duration,
    pub pre_allocated_workers: u64,
    pub max_workers: u64,
    /// Ticks allowed to wait for a worker once all `max_workers` are busy.
    pub max_queue_depth: u64,
    /// How long in-flight iterations may run on after `duration` elapsed.
    pub grace_period: Duration,
    pub lag_tolerance: Duration,
}

impl ScheduleSpec {
    pub fn new(
        target_rate: f64,
        duration: Duration,
        pre_allocated_workers: u64,
        max_workers: u64,
    ) -> Self {
        Self {
            target_rate,
            duration,
            pre_allocated_workers,
            max_workers,
            max_queue_depth: max_workers.max(1),
            grace_period: DEFAULT_GRACE_PERIOD,
            lag_tolerance: DEFAULT_LAG_TOLERANCE,
        }
    }

    #[must_use]
    pub fn with_max_queue_depth(mut self, depth: u64) -> Self {
        self.max_queue_depth = depth;
        self
    }

    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    #[must_use]
    pub fn with_lag_tolerance(mut self, tolerance: Duration) -> Self {
        self.lag_tolerance = tolerance;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.target_rate.is_finite() || self.target_rate <= 0.0 {
            return Err(Error::InvalidRate);
        }
        if self.duration.is_zero() {
            return Err(Error::InvalidDuration);
        }
        if self.pre_allocated_workers == 0 {
            return Err(Error::InvalidPreAllocatedWorkers);
        }
        if self.max_workers < self.pre_allocated_workers {
            return Err(Error::InvalidMaxWorkers);
        }
        if self.max_queue_depth == 0 {
            return Err(Error::InvalidQueueDepth);
        }
        Ok(())
    }

    /// Number of ticks the run schedules: every `i` with `i / rate < duration`.
    pub fn total_ticks(&self) -> u64 {
        let exact = self.duration.as_secs_f64() * self.target_rate;
        // Absorb float noise such as 0.3 * 10.0 = 3.0000000000000004.
        (exact - 1e-9).ceil().max(0.0) as u64
    }

    /// Offset of tick `seq` from the start of the run.
    pub fn tick_offset(&self, seq: u64) -> Duration {
        Duration::from_secs_f64(seq as f64 / self.target_rate)
    }
}

/// Bounded retry of transport failures (status 0) inside one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    /// Upper bound of a uniformly random delay added to `backoff`.
    pub jitter: Duration,
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        backoff: Duration::ZERO,
        jitter: Duration::ZERO,
    };

    pub fn fixed(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            jitter: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.backoff;
        }
        let max_us = u64::try_from(self.jitter.as_micros()).unwrap_or(u64::MAX);
        let extra = rand::thread_rng().gen_range(0..=max_us);
        self.backoff.saturating_add(Duration::from_micros(extra))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ScheduleSpec {
        ScheduleSpec::new(10.0, Duration::from_secs(2), 1, 100)
    }

    #[test]
    fn defaults_follow_max_workers() {
        let s = spec();
        assert_eq!(s.max_queue_depth, 100);
        assert_eq!(s.grace_period, DEFAULT_GRACE_PERIOD);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn validate_rejects_each_invalid_field() {
        let cases = [
            (ScheduleSpec { target_rate: 0.0, ..spec() }, "target_rate"),
            (ScheduleSpec { target_rate: f64::NAN, ..spec() }, "target_rate"),
            (ScheduleSpec { duration: Duration::ZERO, ..spec() }, "duration"),
            (ScheduleSpec { pre_allocated_workers: 0, ..spec() }, "pre_allocated_workers"),
            (ScheduleSpec { pre_allocated_workers: 5, max_workers: 4, ..spec() }, "max_workers"),
            (spec().with_max_queue_depth(0), "max_queue_depth"),
        ];

        for (s, field) in cases {
            match s.validate() {
                Err(e) => assert!(e.to_string().contains(field), "{field}: {e}"),
                Ok(()) => panic!("expected `{field}` to be rejected"),
            }
        }
    }

    #[test]
    fn total_ticks_rounds_up_partial_intervals() {
        assert_eq!(spec().total_ticks(), 20);
        assert_eq!(ScheduleSpec::new(10.0, Duration::from_millis(300), 1, 1).total_ticks(), 3);
        assert_eq!(ScheduleSpec::new(3.0, Duration::from_millis(500), 1, 1).total_ticks(), 2);
        assert_eq!(ScheduleSpec::new(0.5, Duration::from_secs(1), 1, 1).total_ticks(), 1);
    }

    #[test]
    fn tick_offsets_are_evenly_spaced() {
        let s = spec();
        assert_eq!(s.tick_offset(0), Duration::ZERO);
        assert_eq!(s.tick_offset(5), Duration::from_millis(500));
    }

    #[test]
    fn retry_delay_stays_within_jitter_bound() {
        let p = RetryPolicy::fixed(2, Duration::from_millis(10)).with_jitter(Duration::from_millis(5));
        for _ in 0..100 {
            let d = p.delay();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(15), "{d:?}");
        }
        assert_eq!(RetryPolicy::NONE.delay(), Duration::ZERO);
    }
}
