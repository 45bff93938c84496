//! Per-key aggregation state
//!
//! - `Counter`: accumulates `value / rate`
//! - `Timer`: accumulates `value / rate` and the effective sample count
//!   `1 / rate`, and reports their ratio
//!
//! An accumulator is sealed when it is extracted. Updates that reach a sealed
//! accumulator are refused so the caller can retry against the fresh map.

use crate::sampler::SampleKind;
use crate::storage::{Event, Timestamp};
use parking_lot::Mutex;

/// Running aggregation for one key
pub trait Accumulator: Send + Sync {
    fn key(&self) -> &str;

    fn kind(&self) -> SampleKind;

    /// Apply one sample; returns false if the accumulator was already extracted
    fn update(&self, value: f64, rate: f64) -> bool;

    /// Seal the accumulator and produce its summary event, if it has one
    fn extract(&self, time: Timestamp) -> Option<Event>;
}

/// Build an empty accumulator of the given kind
pub fn new_accumulator(key: &str, kind: SampleKind) -> Box<dyn Accumulator> {
    match kind {
        SampleKind::Counter => Box::new(Counter::new(key)),
        SampleKind::Timer => Box::new(Timer::new(key)),
    }
}

#[derive(Debug, Default)]
struct CounterState {
    sum: f64,
    sealed: bool,
}

/// Sum of rate-scaled values
#[derive(Debug)]
pub struct Counter {
    key: String,
    state: Mutex<CounterState>,
}

impl Counter {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: Mutex::new(CounterState::default()),
        }
    }
}

impl Accumulator for Counter {
    fn key(&self) -> &str {
        &self.key
    }

    fn kind(&self) -> SampleKind {
        SampleKind::Counter
    }

    fn update(&self, value: f64, rate: f64) -> bool {
        let mut state = self.state.lock();
        if state.sealed {
            return false;
        }
        state.sum += value / rate;
        true
    }

    fn extract(&self, time: Timestamp) -> Option<Event> {
        let mut state = self.state.lock();
        state.sealed = true;
        Some(Event::new(self.key.clone(), time, state.sum))
    }
}

#[derive(Debug, Default)]
struct TimerState {
    sum: f64,
    count: f64,
    sealed: bool,
}

/// Rate-weighted average of sampled durations
#[derive(Debug)]
pub struct Timer {
    key: String,
    state: Mutex<TimerState>,
}

impl Timer {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: Mutex::new(TimerState::default()),
        }
    }
}

impl Accumulator for Timer {
    fn key(&self) -> &str {
        &self.key
    }

    fn kind(&self) -> SampleKind {
        SampleKind::Timer
    }

    fn update(&self, value: f64, rate: f64) -> bool {
        let mut state = self.state.lock();
        if state.sealed {
            return false;
        }
        state.sum += value / rate;
        state.count += 1.0 / rate;
        true
    }

    fn extract(&self, time: Timestamp) -> Option<Event> {
        let mut state = self.state.lock();
        state.sealed = true;

        if state.count == 0.0 {
            return None;
        }
        Some(Event::new(self.key.clone(), time, state.sum / state.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Value;

    fn value_of(event: &Event) -> f64 {
        match event.value() {
            Value::Float(v) => *v,
            other => panic!("expected float, got {:?}", other),
        }
    }

    #[test]
    fn test_counter() {
        let counter = Counter::new("foo");
        assert!(counter.update(1.0, 1.0));
        assert!(counter.update(2.0, 0.1));

        let event = counter.extract(1000).unwrap();
        assert_eq!(event.key, "foo");
        assert_eq!(event.time(), 1000);
        assert!((value_of(&event) - 21.0).abs() < 1e-9);
    }

    #[test]
    fn test_timer_average() {
        let timer = Timer::new("latency");
        assert!(timer.update(10.0, 1.0));
        assert!(timer.update(20.0, 1.0));

        let event = timer.extract(1000).unwrap();
        assert!((value_of(&event) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_timer_rate_weighting() {
        let timer = Timer::new("latency");
        // One sample at rate 0.5 stands for two observations
        timer.update(10.0, 0.5);
        timer.update(40.0, 1.0);

        // (20 + 40) / (2 + 1)
        let event = timer.extract(0).unwrap();
        assert!((value_of(&event) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_timer_yields_nothing() {
        let timer = Timer::new("idle");
        assert!(timer.extract(0).is_none());
    }

    #[test]
    fn test_sealed_accumulator_refuses_updates() {
        let counter = new_accumulator("c", SampleKind::Counter);
        assert_eq!(counter.kind(), SampleKind::Counter);
        counter.extract(0);
        assert!(!counter.update(1.0, 1.0));

        let timer = new_accumulator("t", SampleKind::Timer);
        assert_eq!(timer.key(), "t");
        timer.extract(0);
        assert!(!timer.update(1.0, 1.0));
    }
}
