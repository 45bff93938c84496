//! Query syntax tree
//!
//! A query is a JSON tree of operator nodes. The root is the stage whose
//! output the caller reads; `upstream` lists the stages feeding it.
//!
//! ```text
//! {
//!   "type": "movingAvg",
//!   "params": {"window": 10},
//!   "upstream": [{"type": "faucet", "params": {"key": "foo.bar", "from": -60}}]
//! }
//! ```

use super::error::{QueryError, QueryResult};
use super::registry::Registry;
use crate::pipeline::{Params, Source};
use serde::{Deserialize, Deserializer, Serialize};

/// One operator in a query tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Registered operator name
    #[serde(rename = "type")]
    pub node_type: String,

    /// Operator parameters; `null` reads as none
    #[serde(default, deserialize_with = "null_as_empty")]
    pub params: Params,

    /// Child nodes, evaluated before this one
    #[serde(rename = "upstream", default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Params, D::Error> {
    Option::<Params>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl Node {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            params: Params::new(),
            children: Vec::new(),
        }
    }

    /// Set one parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Append an upstream node
    pub fn upstream(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// Build the operator tree rooted at this node
    ///
    /// Children are evaluated in declaration order; the first failure aborts
    /// the whole evaluation. Arity checks belong to each factory.
    pub fn eval(&self, registry: &Registry) -> QueryResult<Box<dyn Source>> {
        let factory = registry
            .factory(&self.node_type)
            .ok_or_else(|| QueryError::UnknownType(self.node_type.clone()))?;

        let upstream = self
            .children
            .iter()
            .map(|child| child.eval(registry))
            .collect::<QueryResult<Vec<_>>>()?;

        tracing::debug!(node_type = %self.node_type, upstream = upstream.len(), "Evaluating node");

        Ok(factory(&self.params, upstream, registry.store())?)
    }
}

/// Decode a query document
pub fn parse(text: &str) -> QueryResult<Node> {
    Ok(serde_json::from_str(text)?)
}
