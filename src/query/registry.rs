//! Operator registry
//!
//! Maps node type names to the factories that build them, and carries the
//! store handed to every factory.

use crate::pipeline::{Faucet, Filter, MovingAverage, SourceFactory};
use crate::storage::Store;
use std::collections::HashMap;
use std::sync::Arc;

/// Type name of the [`Faucet`] operator
pub const TYPE_FAUCET: &str = "faucet";
/// Type name of the [`Filter`] operator
pub const TYPE_FILTER: &str = "filter";
/// Type name of the [`MovingAverage`] operator
pub const TYPE_MOVING_AVERAGE: &str = "movingAvg";

pub struct Registry {
    factories: HashMap<String, SourceFactory>,
    store: Arc<dyn Store>,
}

impl Registry {
    /// Empty registry bound to `store`
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            factories: HashMap::new(),
            store,
        }
    }

    /// Registry with the built-in operators
    pub fn with_defaults(store: Arc<dyn Store>) -> Self {
        let mut registry = Self::new(store);
        registry.register(TYPE_FAUCET, Faucet::from_params);
        registry.register(TYPE_FILTER, Filter::from_params);
        registry.register(TYPE_MOVING_AVERAGE, MovingAverage::from_params);
        registry
    }

    /// Add or replace the factory for `name`
    pub fn register(&mut self, name: impl Into<String>, factory: SourceFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn factory(&self, name: &str) -> Option<SourceFactory> {
        self.factories.get(name).copied()
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Registered type names, sorted
    pub fn types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
