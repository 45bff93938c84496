//! timeflow storage engine
//!
//! This module provides the time-ordered event store:
//!
//! - **types**: Core data structures (Value, Record, Event, Series)
//! - **codec**: Order-preserving text encoding of records and range bounds
//! - **backend**: Ordered-collection + pub/sub primitives and the in-memory backend
//! - **wal**: Commit log that makes the in-memory backend durable
//! - **engine**: The `Store` contract and the `EventStore` implementation
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   Event → encode_record → insert d::<key> → publish ps::<key>
//!
//! Read Path:
//!   (key, from, to) → format_range → range scan d::<key> → decode_record
//!
//! Live Path:
//!   subscribe ps::<key> → decode_record → Series (reconnects on failure)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use timeflow::storage::{Event, EventStore, StorageConfig, Store};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = EventStore::open(&StorageConfig::new("./data"))?;
//!
//!     store.put(&[Event::now("sys.cpu.load", 0.42)]).await?;
//!
//!     let now = timeflow::storage::now();
//!     let series = store.get("sys.cpu.load", now - 60, now).await?;
//!     println!("{} records in the last minute", series.len());
//!
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod codec;
pub mod engine;
pub mod error;
pub mod types;
pub mod wal;

pub use backend::{Backend, MemoryBackend, Subscription};
pub use engine::{EventStore, StorageConfig, Store};
pub use error::{StorageError, StorageResult};
pub use types::{is_valid_key, now, Event, Record, Series, Timestamp, Value};
pub use wal::{Replay, WalSyncMode, WriteAheadLog};
