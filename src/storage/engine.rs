//! timeflow event store
//!
//! The event store orchestrates the codec and a [`Backend`]:
//! - Write path: Event → validate key → encode → insert into `d::<key>` → publish on `ps::<key>`
//! - Read path: range → `format_range` → scan `d::<key>` → decode (skip bad entries)
//! - Live path: subscribe `ps::<key>` → decode → forward, reconnecting on failure
//!
//! Live delivery is at-most-once: anything published while a subscription is
//! reconnecting is lost to that subscriber.

use crate::storage::backend::{Backend, MemoryBackend, Subscription};
use crate::storage::codec::{self, data_key, pubsub_key};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{is_valid_key, Event, Series, Timestamp};
use crate::storage::wal::WalSyncMode;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

/// The event store contract consumed by the sampler, the pipeline and the CLI
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist and publish events
    ///
    /// Stops at the first failure; events written before it stay committed.
    async fn put(&self, events: &[Event]) -> StorageResult<()>;

    /// Records of `key` with time in `[from, to]`, ascending
    async fn get(&self, key: &str, from: Timestamp, to: Timestamp) -> StorageResult<Series>;

    /// Live updates for `key` until `cancel` fires or the receiver is dropped
    async fn subscribe(
        &self,
        key: &str,
        cancel: CancellationToken,
    ) -> StorageResult<mpsc::Receiver<Series>>;
}

/// Configuration for the event store
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for the commit log; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    /// Commit log sync strategy
    pub wal_sync: WalSyncMode,
    /// Messages buffered per subscriber before it counts as lagged
    pub broadcast_capacity: usize,
    /// Pause before a broken subscription reconnects (default: 100ms)
    pub reconnect_backoff: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            wal_sync: WalSyncMode::Batched,
            broadcast_capacity: 1024,
            reconnect_backoff: Duration::from_millis(100),
        }
    }
}

impl StorageConfig {
    /// Durable configuration rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Default::default()
        }
    }

    /// Volatile configuration
    pub fn in_memory() -> Self {
        Self::default()
    }
}

/// Event store over any [`Backend`]
pub struct EventStore {
    backend: Arc<dyn Backend>,
    reconnect_backoff: Duration,
}

impl EventStore {
    /// Open an event store on a [`MemoryBackend`] built from `config`
    pub fn open(config: &StorageConfig) -> StorageResult<Self> {
        let backend = match &config.data_dir {
            Some(dir) => MemoryBackend::open(dir, config.wal_sync, config.broadcast_capacity)?,
            None => MemoryBackend::new(config.broadcast_capacity),
        };

        Ok(Self::with_backend(Arc::new(backend), config.reconnect_backoff))
    }

    /// Wrap an existing backend
    pub fn with_backend(backend: Arc<dyn Backend>, reconnect_backoff: Duration) -> Self {
        Self {
            backend,
            reconnect_backoff,
        }
    }
}

#[async_trait]
impl Store for EventStore {
    async fn put(&self, events: &[Event]) -> StorageResult<()> {
        for event in events {
            if !is_valid_key(&event.key) {
                return Err(StorageError::InvalidKey(event.key.clone()));
            }

            let encoded = codec::encode_record(&event.record);
            self.backend.insert(&data_key(&event.key), &encoded).await?;
            self.backend.publish(&pubsub_key(&event.key), &encoded).await?;
        }

        tracing::debug!(count = events.len(), "Put events");
        Ok(())
    }

    async fn get(&self, key: &str, from: Timestamp, to: Timestamp) -> StorageResult<Series> {
        let (lower, upper) = codec::format_range(from, to);
        let entries = self.backend.range(&data_key(key), &lower, &upper).await?;

        let mut series = Series {
            key: key.to_string(),
            records: Vec::with_capacity(entries.len()),
        };

        for entry in entries {
            match codec::decode_record(&entry) {
                Ok(record) => series.records.push(record),
                Err(e) => tracing::error!(key = %key, entry = %entry, "Error decoding record: {}", e),
            }
        }

        Ok(series)
    }

    async fn subscribe(
        &self,
        key: &str,
        cancel: CancellationToken,
    ) -> StorageResult<mpsc::Receiver<Series>> {
        let topic = pubsub_key(key);
        let subscription = self.backend.subscribe(&topic).await?;
        let (tx, rx) = mpsc::channel(1);

        let task = SubscribeLoop {
            backend: Arc::clone(&self.backend),
            key: key.to_string(),
            topic,
            backoff: self.reconnect_backoff,
            tx,
            cancel,
        };
        tokio::spawn(task.run(subscription));

        tracing::info!(key = %key, "Subscribed to live updates");
        Ok(rx)
    }
}

/// Self-healing pub/sub loop owned by one subscriber
struct SubscribeLoop {
    backend: Arc<dyn Backend>,
    key: String,
    topic: String,
    backoff: Duration,
    tx: mpsc::Sender<Series>,
    cancel: CancellationToken,
}

impl SubscribeLoop {
    async fn run(self, subscription: Box<dyn Subscription>) {
        let mut subscription = Some(subscription);

        loop {
            if subscription.is_none() {
                subscription = self.reconnect().await;
            }
            let Some(sub) = subscription.as_mut() else {
                break;
            };

            let message = tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.tx.closed() => break,
                message = sub.recv() => message,
            };

            match message {
                Ok(message) => {
                    tracing::debug!(key = %self.key, message = %message, "Got an update");

                    let record = match codec::decode_record(&message) {
                        Ok(record) => record,
                        Err(e) => {
                            tracing::warn!(key = %self.key, "Could not decode pubsub message: {}", e);
                            continue;
                        }
                    };

                    let series = Series {
                        key: self.key.clone(),
                        records: vec![record],
                    };

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        sent = self.tx.send(series) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(key = %self.key, "Error reading pubsub: {}", e);
                    subscription = None;
                }
            }
        }

        tracing::debug!(key = %self.key, "Subscription loop finished");
    }

    /// Sleep, then subscribe again until it works; `None` once cancelled
    async fn reconnect(&self) -> Option<Box<dyn Subscription>> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = self.tx.closed() => return None,
                _ = sleep(self.backoff) => {}
            }

            match self.backend.subscribe(&self.topic).await {
                Ok(sub) => {
                    tracing::warn!(key = %self.key, "Resubscribed after connection failure");
                    return Some(sub);
                }
                Err(e) => tracing::error!(key = %self.key, "Could not subscribe: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::{Record, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tokio::time::timeout;

    // 2012-07-09T00:00:00Z
    const BASE: Timestamp = 1_341_792_000;

    fn memory_store() -> EventStore {
        EventStore::open(&StorageConfig::in_memory()).unwrap()
    }

    #[tokio::test]
    async fn test_get_returns_inclusive_range_in_order() {
        let store = memory_store();

        // Insert out of order; storage order is a function of the encoding
        let events: Vec<Event> = (0..10)
            .rev()
            .map(|i| Event::new("test.key", BASE + i, i))
            .collect();
        store.put(&events).await.unwrap();

        let series = store.get("test.key", BASE, BASE + 5).await.unwrap();
        assert_eq!(series.key, "test.key");
        assert_eq!(series.len(), 6);
        for (i, record) in series.records.iter().enumerate() {
            assert_eq!(record.time, BASE + i as i64);
            assert_eq!(record.value, Value::Int(i as i64));
        }
    }

    #[tokio::test]
    async fn test_get_range_includes_every_value_at_upper_bound() {
        let store = memory_store();
        store
            .put(&[
                Event::new("k", BASE, "zzzz"),
                Event::new("k", BASE, 1.5),
                Event::new("k", BASE + 1, 0),
            ])
            .await
            .unwrap();

        let series = store.get("k", BASE, BASE).await.unwrap();
        assert_eq!(series.len(), 2);
    }

    #[tokio::test]
    async fn test_get_skips_undecodable_entries() {
        let backend = Arc::new(MemoryBackend::new(16));
        let store = EventStore::with_backend(backend.clone(), Duration::from_millis(10));

        store.put(&[Event::new("k", BASE, 1)]).await.unwrap();
        let garbage = format!("{}::not-a-value", codec::encode_time(BASE + 1));
        backend.insert(&data_key("k"), &garbage).await.unwrap();
        store.put(&[Event::new("k", BASE + 2, 3)]).await.unwrap();

        let series = store.get("k", BASE, BASE + 10).await.unwrap();
        assert_eq!(series.records, vec![Record::new(BASE, 1), Record::new(BASE + 2, 3)]);
    }

    #[tokio::test]
    async fn test_put_stops_at_invalid_key() {
        let store = memory_store();

        let result = store
            .put(&[
                Event::new("good", BASE, 1),
                Event::new("bad key", BASE, 2),
                Event::new("later", BASE, 3),
            ])
            .await;

        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
        assert_eq!(store.get("good", BASE, BASE).await.unwrap().len(), 1);
        assert!(store.get("later", BASE, BASE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_records_collapse() {
        let store = memory_store();
        let event = Event::new("k", BASE, 7);
        store.put(&[event.clone(), event]).await.unwrap();

        assert_eq!(store.get("k", BASE, BASE).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_receives_put() {
        let store = memory_store();
        let cancel = CancellationToken::new();
        let mut rx = store.subscribe("foo.pbsb", cancel.clone()).await.unwrap();

        store.put(&[Event::new("foo.pbsb", BASE, "foo")]).await.unwrap();

        let series = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(series.key, "foo.pbsb");
        assert_eq!(series.records, vec![Record::new(BASE, "foo")]);

        cancel.cancel();
        assert!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_drops_undecodable_messages() {
        let backend = Arc::new(MemoryBackend::new(16));
        let store = EventStore::with_backend(backend.clone(), Duration::from_millis(10));
        let mut rx = store.subscribe("k", CancellationToken::new()).await.unwrap();

        backend.publish(&pubsub_key("k"), "garbage").await.unwrap();
        store.put(&[Event::new("k", BASE, 2)]).await.unwrap();

        let series = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(series.records[0].value, Value::Int(2));
    }

    #[tokio::test]
    async fn test_subscription_survives_lag() {
        let config = StorageConfig {
            broadcast_capacity: 1,
            reconnect_backoff: Duration::from_millis(5),
            ..StorageConfig::in_memory()
        };
        let store = EventStore::open(&config).unwrap();
        let mut rx = store.subscribe("k", CancellationToken::new()).await.unwrap();

        // Nobody reads yet, so the broadcast receiver lags and the loop reconnects
        for i in 0..20 {
            store.put(&[Event::new("k", BASE + i, i)]).await.unwrap();
        }
        while timeout(Duration::from_millis(100), rx.recv()).await.is_ok() {}

        store.put(&[Event::new("k", BASE + 100, 100)]).await.unwrap();
        let series = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(series.records[0].time, BASE + 100);
    }

    /// Backend whose subscriptions fail on demand
    struct FlakyBackend {
        inner: MemoryBackend,
        subscribes: AtomicUsize,
    }

    struct FailingSubscription;

    #[async_trait]
    impl Subscription for FailingSubscription {
        async fn recv(&mut self) -> StorageResult<String> {
            Err(StorageError::Connection("connection reset".to_string()))
        }
    }

    #[async_trait]
    impl Backend for FlakyBackend {
        async fn insert(&self, collection: &str, member: &str) -> StorageResult<bool> {
            self.inner.insert(collection, member).await
        }

        async fn range(
            &self,
            collection: &str,
            lower: &str,
            upper: &str,
        ) -> StorageResult<Vec<String>> {
            self.inner.range(collection, lower, upper).await
        }

        async fn publish(&self, topic: &str, message: &str) -> StorageResult<usize> {
            self.inner.publish(topic, message).await
        }

        async fn subscribe(&self, topic: &str) -> StorageResult<Box<dyn Subscription>> {
            match self.subscribes.fetch_add(1, Ordering::SeqCst) {
                // First connection breaks immediately, second attempt is refused
                0 => Ok(Box::new(FailingSubscription)),
                1 => Err(StorageError::Connection("refused".to_string())),
                _ => self.inner.subscribe(topic).await,
            }
        }
    }

    #[tokio::test]
    async fn test_subscribe_reconnects_transparently() {
        let backend = Arc::new(FlakyBackend {
            inner: MemoryBackend::new(16),
            subscribes: AtomicUsize::new(0),
        });
        let store = EventStore::with_backend(backend.clone(), Duration::from_millis(5));
        let mut rx = store.subscribe("k", CancellationToken::new()).await.unwrap();

        // Wait until the loop is attached to a working subscription
        while backend.inner.subscriber_count(&pubsub_key("k")) == 0 {
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(backend.subscribes.load(Ordering::SeqCst), 3);

        store.put(&[Event::new("k", BASE, 42)]).await.unwrap();
        let series = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(series.records[0].value, Value::Int(42));
    }

    #[tokio::test]
    async fn test_dropping_receiver_releases_subscription() {
        let backend = Arc::new(MemoryBackend::new(16));
        let store = EventStore::with_backend(backend.clone(), Duration::from_millis(5));

        let rx = store.subscribe("k", CancellationToken::new()).await.unwrap();
        assert_eq!(backend.subscriber_count(&pubsub_key("k")), 1);
        drop(rx);

        timeout(Duration::from_secs(1), async {
            while backend.subscriber_count(&pubsub_key("k")) > 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_durable_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path());

        {
            let store = EventStore::open(&config).unwrap();
            store
                .put(&[Event::new("k", BASE, 1), Event::new("k", BASE + 1, "two")])
                .await
                .unwrap();
        }

        let store = EventStore::open(&config).unwrap();
        let series = store.get("k", BASE, BASE + 1).await.unwrap();
        assert_eq!(
            series.records,
            vec![Record::new(BASE, 1), Record::new(BASE + 1, "two")]
        );
    }
}
