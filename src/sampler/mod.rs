//! statsd-style sampler
//!
//! Aggregates high-frequency counter and timer samples in memory and flushes
//! one summary event per key into the store on a fixed interval.
//!
//! # Architecture
//!
//! ```text
//! sample(key, value, rate, kind) → accumulator map (lock per map, lock per key)
//! every tick: swap map for an empty one → extract one event per key → Store::put
//! ```
//!
//! A failed store write drops that batch; aggregated data is never re-queued.

mod accumulator;

pub use accumulator::{new_accumulator, Accumulator, Counter, Timer};

use crate::storage::{is_valid_key, now, Event, Store};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Aggregation semantics for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    /// Sum of `value / rate`
    Counter,
    /// Average of values, weighted by `1 / rate`
    Timer,
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleKind::Counter => write!(f, "counter"),
            SampleKind::Timer => write!(f, "timer"),
        }
    }
}

impl FromStr for SampleKind {
    type Err = SamplerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "counter" => Ok(SampleKind::Counter),
            "timer" => Ok(SampleKind::Timer),
            _ => Err(SamplerError::UnsupportedKind(s.to_string())),
        }
    }
}

/// Errors surfaced by [`Sampler::sample`]
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("Unsupported sample kind: {0}")]
    UnsupportedKind(String),

    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    #[error("Invalid sample rate {0}: must be a positive number")]
    InvalidRate(f64),

    #[error("Key {key} is a {existing}, cannot sample it as a {requested}")]
    KindMismatch {
        key: String,
        existing: SampleKind,
        requested: SampleKind,
    },
}

/// Result type for sampler operations
pub type SamplerResult<T> = Result<T, SamplerError>;

/// Configuration for the sampler
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Time between flushes (default: 1s, at least 1ms)
    pub flush_interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(1),
        }
    }
}

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// In-memory aggregator flushed periodically into a [`Store`]
pub struct Sampler {
    accumulators: Mutex<HashMap<String, Arc<dyn Accumulator>>>,
    flush_interval: Duration,
    store: Arc<dyn Store>,
}

impl Sampler {
    pub fn new(config: SamplerConfig, store: Arc<dyn Store>) -> Self {
        Self {
            accumulators: Mutex::new(HashMap::new()),
            flush_interval: config.flush_interval.max(MIN_FLUSH_INTERVAL),
            store,
        }
    }

    /// Record one sample for `key`
    ///
    /// `rate` is the sampling rate in `(0, ∞)`; a sample taken at rate 0.1
    /// stands for ten observations. A key keeps the kind it was first sampled
    /// with until the next flush. Keys the store would refuse are rejected
    /// here, so one bad key never sinks a whole flush batch.
    pub fn sample(&self, key: &str, value: f64, rate: f64, kind: SampleKind) -> SamplerResult<()> {
        if !is_valid_key(key) {
            return Err(SamplerError::InvalidKey(key.to_string()));
        }
        if !(rate > 0.0 && rate.is_finite()) {
            return Err(SamplerError::InvalidRate(rate));
        }

        // A refused update means a flush sealed the accumulator in between;
        // the retry lands in the fresh map.
        loop {
            let accumulator = self.get_or_create(key, kind)?;
            if accumulator.update(value, rate) {
                return Ok(());
            }
        }
    }

    fn get_or_create(&self, key: &str, kind: SampleKind) -> SamplerResult<Arc<dyn Accumulator>> {
        let mut accumulators = self.accumulators.lock();

        if let Some(existing) = accumulators.get(key) {
            if existing.kind() != kind {
                return Err(SamplerError::KindMismatch {
                    key: key.to_string(),
                    existing: existing.kind(),
                    requested: kind,
                });
            }
            return Ok(Arc::clone(existing));
        }

        let accumulator: Arc<dyn Accumulator> = Arc::from(new_accumulator(key, kind));
        accumulators.insert(key.to_string(), Arc::clone(&accumulator));
        Ok(accumulator)
    }

    /// Swap out every accumulator and extract one event per key
    ///
    /// Events carry the flush time, not the time of any sample.
    pub fn flush(&self) -> Vec<Event> {
        let drained = std::mem::take(&mut *self.accumulators.lock());
        let time = now();

        drained
            .into_values()
            .filter_map(|accumulator| accumulator.extract(time))
            .collect()
    }

    /// Number of keys sampled since the last flush
    pub fn pending(&self) -> usize {
        self.accumulators.lock().len()
    }

    /// Start the periodic flush task
    ///
    /// Each tick's store write runs on its own task so a slow store never
    /// delays the next tick. Cancelling the token performs one last flush.
    pub fn run(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            tracing::info!(interval_ms = self.flush_interval.as_millis() as u64, "Sampler started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let events = self.flush();
                        if !events.is_empty() {
                            tokio::spawn(write_flushed(Arc::clone(&self.store), events));
                        }
                    }
                }
            }

            let events = self.flush();
            if !events.is_empty() {
                write_flushed(Arc::clone(&self.store), events).await;
            }
            tracing::info!("Sampler stopped");
        })
    }
}

async fn write_flushed(store: Arc<dyn Store>, events: Vec<Event>) {
    tracing::info!(count = events.len(), "Flushing sampled events");

    if let Err(e) = store.put(&events).await {
        tracing::error!(count = events.len(), "Dropping flushed batch, store write failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{EventStore, StorageConfig, Value};

    fn test_sampler(interval_ms: u64) -> (Arc<Sampler>, Arc<EventStore>) {
        let store = Arc::new(EventStore::open(&StorageConfig::in_memory()).unwrap());
        let config = SamplerConfig {
            flush_interval: Duration::from_millis(interval_ms),
        };
        (Arc::new(Sampler::new(config, store.clone())), store)
    }

    fn float(event: &Event) -> f64 {
        event.value().as_f64().unwrap()
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("counter".parse::<SampleKind>().unwrap(), SampleKind::Counter);
        assert_eq!("Timer".parse::<SampleKind>().unwrap(), SampleKind::Timer);
        assert!(matches!(
            "histogram".parse::<SampleKind>(),
            Err(SamplerError::UnsupportedKind(_))
        ));
    }

    #[tokio::test]
    async fn test_counter_flush() {
        let (sampler, _) = test_sampler(1000);

        sampler.sample("k", 1.0, 1.0, SampleKind::Counter).unwrap();
        sampler.sample("k", 2.0, 0.1, SampleKind::Counter).unwrap();

        let events = sampler.flush();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "k");
        assert!((float(&events[0]) - 21.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_timer_flush() {
        let (sampler, _) = test_sampler(1000);

        sampler.sample("k", 10.0, 1.0, SampleKind::Timer).unwrap();
        sampler.sample("k", 20.0, 1.0, SampleKind::Timer).unwrap();

        let events = sampler.flush();
        assert_eq!(events.len(), 1);
        assert!((float(&events[0]) - 15.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_flush_empties_map_one_event_per_key() {
        let (sampler, _) = test_sampler(1000);

        sampler.sample("foo", 1.0, 1.0, SampleKind::Counter).unwrap();
        sampler.sample("foo", 1.0, 0.5, SampleKind::Counter).unwrap();
        sampler.sample("bar", 1.0, 0.2, SampleKind::Counter).unwrap();
        assert_eq!(sampler.pending(), 2);

        let before = now();
        let events = sampler.flush();
        assert_eq!(events.len(), 2);
        assert_eq!(sampler.pending(), 0);

        for event in &events {
            assert!(event.key == "foo" || event.key == "bar", "bad key {}", event.key);
            assert!(event.time() >= before);
        }

        assert!(sampler.flush().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_rate() {
        let (sampler, _) = test_sampler(1000);

        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                sampler.sample("k", 1.0, rate, SampleKind::Counter),
                Err(SamplerError::InvalidRate(_))
            ));
        }
        assert_eq!(sampler.pending(), 0);
    }

    #[tokio::test]
    async fn test_rejects_kind_mismatch() {
        let (sampler, _) = test_sampler(1000);

        sampler.sample("foo", 1.0, 1.0, SampleKind::Counter).unwrap();
        let err = sampler.sample("foo", 1.0, 1.0, SampleKind::Timer).unwrap_err();
        assert!(matches!(err, SamplerError::KindMismatch { .. }));

        // After a flush the key is free to change kind
        sampler.flush();
        sampler.sample("foo", 1.0, 1.0, SampleKind::Timer).unwrap();
    }

    #[tokio::test]
    async fn test_invalid_key_is_refused_and_others_still_flush() {
        let (sampler, store) = test_sampler(1000);

        for i in 0..20 {
            sampler.sample(&format!("good{}", i), 1.0, 1.0, SampleKind::Counter).unwrap();
        }
        assert!(matches!(
            sampler.sample("bad key", 1.0, 1.0, SampleKind::Counter),
            Err(SamplerError::InvalidKey(_))
        ));
        assert_eq!(sampler.pending(), 20);

        let events = sampler.flush();
        store.put(&events).await.unwrap();

        for i in 0..20 {
            let series = store.get(&format!("good{}", i), 0, now() + 60).await.unwrap();
            assert_eq!(series.len(), 1, "good{} missing", i);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_flush_interval_is_clamped() {
        let store = Arc::new(EventStore::open(&StorageConfig::in_memory()).unwrap());
        let config = SamplerConfig {
            flush_interval: Duration::ZERO,
        };
        let sampler = Arc::new(Sampler::new(config, store.clone()));
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&sampler).run(cancel.clone());

        sampler.sample("k", 2.0, 1.0, SampleKind::Counter).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(store.get("k", 0, now() + 60).await.unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_samples_are_never_lost() {
        let store = Arc::new(EventStore::open(&StorageConfig::in_memory()).unwrap());
        let sampler = Sampler::new(SamplerConfig::default(), store);

        let mut total = 0.0;
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..1000 {
                        sampler.sample("hits", 1.0, 1.0, SampleKind::Counter).unwrap();
                    }
                });
            }

            for _ in 0..50 {
                total += sampler.flush().iter().map(float).sum::<f64>();
                std::thread::yield_now();
            }
        });
        total += sampler.flush().iter().map(float).sum::<f64>();

        assert_eq!(total, 8000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_writes_flushes_to_store() {
        let (sampler, store) = test_sampler(1000);
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&sampler).run(cancel.clone());

        sampler.sample("req.count", 3.0, 1.0, SampleKind::Counter).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(sampler.pending(), 0);
        let series = store.get("req.count", 0, now() + 60).await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.records[0].value, Value::Float(3.0));

        // Samples taken after the last tick go out with the final flush
        sampler.sample("req.latency", 8.0, 1.0, SampleKind::Timer).unwrap();
        cancel.cancel();
        handle.await.unwrap();

        let series = store.get("req.latency", 0, now() + 60).await.unwrap();
        assert_eq!(series.len(), 1);
    }
}
