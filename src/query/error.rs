//! Query error types
//!
//! Covers decoding a query document and evaluating it into a pipeline.

use crate::pipeline::PipelineError;
use thiserror::Error;

/// Errors that can occur while parsing or evaluating a query
#[derive(Error, Debug)]
pub enum QueryError {
    /// The query document is not valid JSON or does not match the node shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// A node names a type with no registered factory
    #[error("Unknown node type: {0}")]
    UnknownType(String),

    /// An operator refused its parameters or upstreams
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Parse(err.to_string())
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
