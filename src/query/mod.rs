//! Timeflow Query Engine
//!
//! Turns a JSON query document into a running pipeline:
//!
//! - **AST**: the [`Node`] tree and [`parse`]
//! - **Registry**: node type names mapped to operator factories
//!
//! # Example
//!
//! ```rust,ignore
//! use timeflow::query::{parse, Registry};
//!
//! let registry = Registry::with_defaults(store);
//! let node = parse(r#"{"type": "movingAvg", "params": {"window": 10},
//!     "upstream": [{"type": "faucet", "params": {"key": "foo.bar", "from": -60}}]}"#)?;
//!
//! let mut stream = node.eval(&registry)?.stream().await?;
//! while let Some(event) = stream.recv().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! ```

mod ast;
mod error;
mod registry;

pub use ast::{parse, Node};
pub use error::{QueryError, QueryResult};
pub use registry::{Registry, TYPE_FAUCET, TYPE_FILTER, TYPE_MOVING_AVERAGE};
