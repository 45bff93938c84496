//! Faucet: the leaf operator
//!
//! Backfills a key's recent history from the store, then stays attached to
//! the key's live updates. Its "upstream" is the store subscription, which is
//! cancelled whenever the faucet stops.

use super::{
    decode_params, downstream, send_or_stop, EventStream, Params, PipelineError, PipelineResult,
    Source,
};
use crate::storage::{now, Store};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct FaucetParams {
    #[serde(default)]
    key: String,
    /// Backfill offset in seconds relative to now, usually negative
    #[serde(default)]
    from: i64,
}

/// Leaf source bound to one series key
pub struct Faucet {
    key: String,
    from_offset: i64,
    store: Arc<dyn Store>,
}

impl Faucet {
    /// Faucet over `key`, backfilling from `now + from_offset` seconds
    pub fn new(
        key: impl Into<String>,
        from_offset: i64,
        store: Arc<dyn Store>,
    ) -> PipelineResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(PipelineError::Config("No key provided for faucet".to_string()));
        }

        Ok(Self {
            key,
            from_offset,
            store,
        })
    }

    /// Factory for the `faucet` node type
    pub fn from_params(
        params: &Params,
        upstream: Vec<Box<dyn Source>>,
        store: &Arc<dyn Store>,
    ) -> PipelineResult<Box<dyn Source>> {
        if !upstream.is_empty() {
            return Err(PipelineError::Config(format!(
                "faucet takes no upstream, got {}",
                upstream.len()
            )));
        }

        let params: FaucetParams = decode_params("faucet", params)?;
        Ok(Box::new(Self::new(params.key, params.from, Arc::clone(store))?))
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl Source for Faucet {
    async fn stream(&self) -> PipelineResult<EventStream> {
        let to = now();
        let from = to.saturating_add(self.from_offset);

        let backfill = self.store.get(&self.key, from, to).await?;
        let cancel = CancellationToken::new();
        let mut live = self.store.subscribe(&self.key, cancel.clone()).await?;

        let (tx, mut stop, stream) = downstream();
        let key = self.key.clone();

        tracing::debug!(key = %key, backfill = backfill.len(), "Faucet started");

        tokio::spawn(async move {
            let _subscription = cancel.drop_guard();

            'run: {
                for event in backfill.into_events() {
                    if !send_or_stop(&tx, &mut stop, event).await {
                        break 'run;
                    }
                }

                loop {
                    let series = tokio::select! {
                        _ = &mut stop => break,
                        series = live.recv() => match series {
                            Some(series) => series,
                            None => break,
                        },
                    };

                    for event in series.into_events() {
                        if !send_or_stop(&tx, &mut stop, event).await {
                            break 'run;
                        }
                    }
                }
            }

            tracing::debug!(key = %key, "Faucet stopped");
        });

        Ok(stream)
    }
}
