//! Backing store primitives
//!
//! The event store needs exactly three things from whatever sits underneath
//! it: insert-if-absent into a lexicographically ordered collection, an
//! inclusive range scan over such a collection, and topic-based pub/sub.
//! [`Backend`] captures those; [`MemoryBackend`] implements them with
//! `BTreeSet`s and tokio broadcast channels, optionally made durable by the
//! commit log in [`crate::storage::wal`].

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::wal::{LogEntry, WalSyncMode, WriteAheadLog};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::path::Path;
use tokio::sync::{broadcast, Mutex};

/// An ordered key-value range store with pub/sub
#[async_trait]
pub trait Backend: Send + Sync {
    /// Add `member` to `collection`; returns false if it was already present
    async fn insert(&self, collection: &str, member: &str) -> StorageResult<bool>;

    /// Members of `collection` within `[lower, upper]`, ascending
    async fn range(&self, collection: &str, lower: &str, upper: &str)
        -> StorageResult<Vec<String>>;

    /// Publish `message` on `topic`; returns how many subscribers received it
    async fn publish(&self, topic: &str, message: &str) -> StorageResult<usize>;

    /// Open a subscription to `topic`
    async fn subscribe(&self, topic: &str) -> StorageResult<Box<dyn Subscription>>;
}

/// A live pub/sub connection
///
/// An error means the connection is broken; the caller is expected to drop
/// it and subscribe again.
#[async_trait]
pub trait Subscription: Send {
    async fn recv(&mut self) -> StorageResult<String>;
}

/// In-memory backend with optional commit-log durability
pub struct MemoryBackend {
    /// Ordered collections: name → sorted members
    collections: RwLock<HashMap<String, BTreeSet<String>>>,
    /// Pub/sub topics: name → broadcast sender
    topics: RwLock<HashMap<String, broadcast::Sender<String>>>,
    /// Commit log, present when the backend is durable
    wal: Option<Mutex<WriteAheadLog>>,
    /// Per-subscriber buffer before it is considered lagged
    broadcast_capacity: usize,
}

impl MemoryBackend {
    /// Create a volatile backend
    pub fn new(broadcast_capacity: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            topics: RwLock::new(HashMap::new()),
            wal: None,
            broadcast_capacity: broadcast_capacity.max(1),
        }
    }

    /// Open a durable backend whose collections live in `data_dir`
    pub fn open(
        data_dir: impl AsRef<Path>,
        sync_mode: WalSyncMode,
        broadcast_capacity: usize,
    ) -> StorageResult<Self> {
        let path = data_dir.as_ref().join("wal").join("commit.wal");
        let (wal, replay) = WriteAheadLog::open(&path, sync_mode)?;

        let mut collections: HashMap<String, BTreeSet<String>> = HashMap::new();
        let recovered = replay.entries.len();
        for entry in replay.entries {
            collections
                .entry(entry.collection)
                .or_default()
                .insert(entry.member);
        }

        tracing::info!(
            path = %path.display(),
            entries = recovered,
            truncated_bytes = replay.truncated_bytes,
            collections = collections.len(),
            "Recovered commit log"
        );

        Ok(Self {
            collections: RwLock::new(collections),
            topics: RwLock::new(HashMap::new()),
            wal: Some(Mutex::new(wal)),
            broadcast_capacity: broadcast_capacity.max(1),
        })
    }

    /// Number of members in a collection
    pub fn collection_len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    /// Number of live subscribers on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn topic_sender(&self, topic: &str) -> broadcast::Sender<String> {
        if let Some(tx) = self.topics.read().get(topic) {
            return tx.clone();
        }

        self.topics
            .write()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.broadcast_capacity).0)
            .clone()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn insert(&self, collection: &str, member: &str) -> StorageResult<bool> {
        // Holding the log lock serializes the check, the append and the insert
        let mut wal = match &self.wal {
            Some(wal) => Some(wal.lock().await),
            None => None,
        };

        let present = self
            .collections
            .read()
            .get(collection)
            .map(|c| c.contains(member))
            .unwrap_or(false);
        if present {
            return Ok(false);
        }

        if let Some(wal) = wal.as_mut() {
            wal.append(&LogEntry {
                collection: collection.to_string(),
                member: member.to_string(),
            })?;
        }

        Ok(self
            .collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn range(
        &self,
        collection: &str,
        lower: &str,
        upper: &str,
    ) -> StorageResult<Vec<String>> {
        if lower > upper {
            return Ok(Vec::new());
        }

        let collections = self.collections.read();
        let Some(members) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        Ok(members
            .range::<str, _>((Bound::Included(lower), Bound::Included(upper)))
            .cloned()
            .collect())
    }

    async fn publish(&self, topic: &str, message: &str) -> StorageResult<usize> {
        let tx = match self.topics.read().get(topic) {
            Some(tx) => tx.clone(),
            None => return Ok(0),
        };

        // A send error only means nobody is listening right now
        Ok(tx.send(message.to_string()).unwrap_or(0))
    }

    async fn subscribe(&self, topic: &str) -> StorageResult<Box<dyn Subscription>> {
        let rx = self.topic_sender(topic).subscribe();
        tracing::debug!(topic = %topic, "Subscribed to topic");

        Ok(Box::new(MemorySubscription {
            topic: topic.to_string(),
            rx,
        }))
    }
}

/// Subscription to a [`MemoryBackend`] topic
struct MemorySubscription {
    topic: String,
    rx: broadcast::Receiver<String>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn recv(&mut self) -> StorageResult<String> {
        match self.rx.recv().await {
            Ok(message) => Ok(message),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Err(StorageError::Connection(
                format!("subscriber on {} lagged by {} messages", self.topic, skipped),
            )),
            Err(broadcast::error::RecvError::Closed) => Err(StorageError::Connection(format!(
                "topic {} closed",
                self.topic
            ))),
        }
    }
}
