//! Sampling and rate limiting.
//!
//! Both processors return [`DropEvent`] to discard an event; neither ever
//! fails a logging call.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::ConfigError;
use crate::processor::{DropEvent, ProcessResult, Processor};
use crate::record::EventRecord;

/// Keeps each event independently with probability `rate`.
#[derive(Debug, Clone)]
pub struct SamplingProcessor {
    rate: f64,
}

impl SamplingProcessor {
    /// `rate` is the fraction of events to keep, in `[0.0, 1.0]`.
    pub fn new(rate: f64) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::InvalidRate(rate));
        }
        Ok(Self { rate })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl Processor for SamplingProcessor {
    fn process(&self, _logger: &str, _method: &str, record: EventRecord) -> ProcessResult {
        if self.rate >= 1.0 {
            return Ok(record);
        }
        // random() is in [0, 1): a rate of 0.0 never admits.
        if rand::random::<f64>() >= self.rate {
            return Err(DropEvent);
        }
        Ok(record)
    }
}

/// Source of monotonic time for [`RateLimitingProcessor`].
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// [`Clock`] backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub const DEFAULT_MAX_COUNT: usize = 10;
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);
pub const DEFAULT_KEY_FIELD: &str = "event";
pub const DEFAULT_SWEEP_INTERVAL: u64 = 1000;

#[derive(Default)]
struct Windows {
    by_key: HashMap<String, VecDeque<Instant>>,
    calls_since_sweep: u64,
}

/// Sliding-window rate limiter.
///
/// Admits at most `max_count` events per grouping key within any trailing
/// `period`. The grouping key is the display string of a configurable
/// field (`event` by default); a missing field groups under `""`.
///
/// Every `sweep_interval` calls, keys whose window has fully expired are
/// evicted so that high-cardinality keys do not accumulate.
pub struct RateLimitingProcessor {
    max_count: usize,
    period: Duration,
    key_field: String,
    sweep_interval: u64,
    clock: Arc<dyn Clock>,
    windows: Mutex<Windows>,
}

impl RateLimitingProcessor {
    pub fn new(max_count: usize, period: Duration) -> Result<Self, ConfigError> {
        if max_count < 1 {
            return Err(ConfigError::InvalidMaxCount(max_count));
        }
        if period.is_zero() {
            return Err(ConfigError::InvalidPeriod(period));
        }
        Ok(Self {
            max_count,
            period,
            key_field: DEFAULT_KEY_FIELD.to_string(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            clock: Arc::new(MonotonicClock),
            windows: Mutex::new(Windows::default()),
        })
    }

    /// Group by `field` instead of the event message.
    pub fn with_key_field(mut self, field: impl Into<String>) -> Self {
        self.key_field = field.into();
        self
    }

    /// Evict expired keys every `interval` calls (minimum 1).
    pub fn with_sweep_interval(mut self, interval: u64) -> Self {
        self.sweep_interval = interval.max(1);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Number of grouping keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().by_key.len()
    }

    fn admit(&self, key: String) -> bool {
        let now = self.clock.now();
        let cutoff = now.checked_sub(self.period);

        let mut windows = self.windows.lock();
        let window = windows.by_key.entry(key).or_default();
        prune(window, cutoff);

        let admitted = window.len() < self.max_count;
        if admitted {
            window.push_back(now);
        }

        windows.calls_since_sweep += 1;
        if windows.calls_since_sweep >= self.sweep_interval {
            windows.calls_since_sweep = 0;
            windows.by_key.retain(|_, window| {
                prune(window, cutoff);
                !window.is_empty()
            });
        }
        admitted
    }
}

/// Drop timestamps at or before `cutoff` from the front of the window.
fn prune(window: &mut VecDeque<Instant>, cutoff: Option<Instant>) {
    let Some(cutoff) = cutoff else {
        return;
    };
    while window.front().is_some_and(|ts| *ts <= cutoff) {
        window.pop_front();
    }
}

impl Processor for RateLimitingProcessor {
    fn process(&self, _logger: &str, _method: &str, record: EventRecord) -> ProcessResult {
        let key = record
            .get(&self.key_field)
            .map(ToString::to_string)
            .unwrap_or_default();
        if self.admit(key) {
            Ok(record)
        } else {
            Err(DropEvent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Clock advanced by hand.
    struct ManualClock(Mutex<Instant>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(ManualClock(Mutex::new(Instant::now())))
        }

        fn advance(&self, by: Duration) {
            *self.0.lock() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.0.lock()
        }
    }

    fn event(msg: &str) -> EventRecord {
        EventRecord::with_event(msg)
    }

    #[test]
    fn test_rate_1_keeps_all() {
        let proc = SamplingProcessor::new(1.0).unwrap();
        for _ in 0..1000 {
            assert!(proc.process("t", "info", event("x")).is_ok());
        }
    }

    #[test]
    fn test_rate_0_drops_all() {
        let proc = SamplingProcessor::new(0.0).unwrap();
        for _ in 0..1000 {
            assert_eq!(proc.process("t", "info", event("x")), Err(DropEvent));
        }
    }

    #[test]
    fn test_rate_between_0_and_1() {
        let proc = SamplingProcessor::new(0.5).unwrap();
        let kept = (0..10_000)
            .filter(|_| proc.process("t", "info", event("x")).is_ok())
            .count();
        assert!((4_000..6_000).contains(&kept), "kept {}", kept);
    }

    #[test]
    fn test_invalid_rate_rejected() {
        assert!(matches!(SamplingProcessor::new(1.5), Err(ConfigError::InvalidRate(_))));
        assert!(matches!(SamplingProcessor::new(-0.1), Err(ConfigError::InvalidRate(_))));
        assert!(SamplingProcessor::new(f64::NAN).is_err());
    }

    #[test]
    fn test_invalid_limiter_parameters_rejected() {
        assert!(matches!(
            RateLimitingProcessor::new(0, Duration::from_secs(1)),
            Err(ConfigError::InvalidMaxCount(0))
        ));
        assert!(matches!(
            RateLimitingProcessor::new(1, Duration::ZERO),
            Err(ConfigError::InvalidPeriod(_))
        ));
    }

    #[test]
    fn test_fourth_call_in_window_dropped() {
        let proc = RateLimitingProcessor::new(3, Duration::from_secs(60)).unwrap();
        for _ in 0..3 {
            assert!(proc.process("t", "info", event("same")).is_ok());
        }
        assert_eq!(proc.process("t", "info", event("same")), Err(DropEvent));
    }

    #[test]
    fn test_different_keys_independent() {
        let proc = RateLimitingProcessor::new(1, Duration::from_secs(60)).unwrap();
        assert!(proc.process("t", "info", event("alpha")).is_ok());
        assert!(proc.process("t", "info", event("alpha")).is_err());
        assert!(proc.process("t", "info", event("beta")).is_ok());
    }

    #[test]
    fn test_window_expiry() {
        let clock = ManualClock::new();
        let proc = RateLimitingProcessor::new(3, Duration::from_secs(60))
            .unwrap()
            .with_clock(clock.clone());
        for _ in 0..3 {
            assert!(proc.process("t", "info", event("msg")).is_ok());
        }
        assert!(proc.process("t", "info", event("msg")).is_err());

        clock.advance(Duration::from_secs(61));
        assert!(proc.process("t", "info", event("msg")).is_ok());
    }

    #[test]
    fn test_window_slides() {
        let clock = ManualClock::new();
        let proc = RateLimitingProcessor::new(2, Duration::from_secs(10))
            .unwrap()
            .with_clock(clock.clone());
        assert!(proc.process("t", "info", event("m")).is_ok());
        clock.advance(Duration::from_secs(6));
        assert!(proc.process("t", "info", event("m")).is_ok());
        clock.advance(Duration::from_secs(5));
        // First admission is now older than the period, second is not.
        assert!(proc.process("t", "info", event("m")).is_ok());
        assert!(proc.process("t", "info", event("m")).is_err());
    }

    #[test]
    fn test_custom_key_field() {
        let proc = RateLimitingProcessor::new(1, Duration::from_secs(60))
            .unwrap()
            .with_key_field("user_id");
        let mut a = event("login");
        a.insert("user_id", 1);
        let mut b = event("login");
        b.insert("user_id", 2);
        assert!(proc.process("t", "info", a.clone()).is_ok());
        assert!(proc.process("t", "info", b).is_ok());
        assert!(proc.process("t", "info", a).is_err());
    }

    #[test]
    fn test_stale_keys_cleaned_up() {
        let clock = ManualClock::new();
        let proc = RateLimitingProcessor::new(5, Duration::from_secs(1))
            .unwrap()
            .with_sweep_interval(10)
            .with_clock(clock.clone());
        for i in 0..9 {
            proc.process("t", "info", event(&format!("key-{}", i))).unwrap();
        }
        assert_eq!(proc.tracked_keys(), 9);

        clock.advance(Duration::from_secs(2));
        proc.process("t", "info", event("fresh")).unwrap();
        assert_eq!(proc.tracked_keys(), 1);
    }

    #[test]
    fn test_concurrent_admissions_never_exceed_limit() {
        let proc = Arc::new(RateLimitingProcessor::new(50, Duration::from_secs(60)).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let proc = Arc::clone(&proc);
                thread::spawn(move || {
                    (0..100)
                        .filter(|_| proc.process("t", "info", event("shared")).is_ok())
                        .count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }
}
