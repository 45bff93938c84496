//! # Timeflow
//!
//! A time-ordered event store with live subscriptions, a statsd-style sampler
//! and streaming query pipelines.
//!
//! ## Features
//!
//! - **Ordered storage**: events keyed by name, range-scanned by time
//! - **Durability**: CRC-checked commit log replayed on open
//! - **Live updates**: every write is published to the key's subscribers
//! - **Sampling**: counters and timers aggregated in memory, flushed on a timer
//! - **Pipelines**: JSON query trees of faucet, filter and moving-average stages
//!
//! ## Modules
//!
//! - [`storage`]: Event model, codec, backend and event store
//! - [`sampler`]: Counter/timer aggregation
//! - [`pipeline`]: Streaming operators
//! - [`query`]: Query documents and operator registry
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use timeflow::query::{parse, Registry};
//! use timeflow::storage::{Event, EventStore, StorageConfig, Store};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store: Arc<dyn Store> = Arc::new(EventStore::open(&StorageConfig::in_memory())?);
//!     store.put(&[Event::now("cpu.load", 0.7)]).await?;
//!
//!     let registry = Registry::with_defaults(Arc::clone(&store));
//!     let node = parse(r#"{"type": "faucet", "params": {"key": "cpu.load", "from": -60}}"#)?;
//!     let mut stream = node.eval(&registry)?.stream().await?;
//!
//!     if let Some(event) = stream.recv().await {
//!         println!("{} = {}", event.key, event.value());
//!     }
//!     stream.stop();
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod logging;
pub mod pipeline;
pub mod query;
pub mod sampler;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    Event, EventStore, Record, Series, StorageConfig, StorageError, StorageResult, Store,
    Timestamp, Value,
};

pub use sampler::{SampleKind, Sampler, SamplerConfig, SamplerError};

pub use pipeline::{EventStream, PipelineError, Source, StopHandle};

pub use query::{parse, Node, QueryError, Registry};

pub use config::{
    Config, ConfigError, LoggingConfig, SamplerConfig as ConfigSamplerConfig,
    StorageConfig as ConfigStorageConfig,
};
