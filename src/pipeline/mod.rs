//! Streaming pipeline operators
//!
//! A pipeline is a tree of [`Source`]s. Leaves are [`Faucet`]s bound to a
//! series key; inner nodes ([`Filter`], [`MovingAverage`]) consume exactly one
//! upstream stream and republish a transformed one.
//!
//! Every call to [`Source::stream`] builds a fresh task graph. Each stage runs
//! on its own task and talks to its neighbours through:
//! - an event channel of capacity 1, so a slow consumer stalls every stage above it
//! - a stop channel; a stopped (or dropped) stage closes its event channel
//!   and stops its own upstream in turn
//!
//! ```text
//! Faucet ──events──▶ Filter ──events──▶ MovingAverage ──events──▶ caller
//!        ◀──stop────        ◀──stop────                ◀──stop────
//! ```

mod faucet;
mod filter;
mod moving_average;

pub use faucet::Faucet;
pub use filter::Filter;
pub use moving_average::MovingAverage;

use crate::storage::{Event, StorageError, Store};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Errors raised while building or starting a pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad arity, missing or invalid operator parameter
    #[error("Invalid operator configuration: {0}")]
    Config(String),

    /// The store failed while a faucet was starting
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Operator parameters as they appear in a query document
pub type Params = HashMap<String, serde_json::Value>;

/// Builds an operator from its parameters, its evaluated upstreams and the store
pub type SourceFactory =
    fn(&Params, Vec<Box<dyn Source>>, &Arc<dyn Store>) -> PipelineResult<Box<dyn Source>>;

/// Anything that can produce a live, cancellable sequence of events
#[async_trait]
pub trait Source: Send + Sync {
    /// Start a new instance of this operator and everything upstream of it
    async fn stream(&self) -> PipelineResult<EventStream>;
}

/// Cancels a running stage
#[derive(Debug)]
pub struct StopHandle(oneshot::Sender<()>);

impl StopHandle {
    /// Ask the stage to stop; harmless if it already finished
    pub fn stop(self) {
        let _ = self.0.send(());
    }
}

/// The output of a running stage
#[derive(Debug)]
pub struct EventStream {
    events: mpsc::Receiver<Event>,
    stop: StopHandle,
}

impl EventStream {
    /// Next event, or `None` once the stage has closed its output
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Stop the stage and, transitively, everything upstream of it
    pub fn stop(self) {
        self.stop.stop();
    }

    pub fn into_parts(self) -> (mpsc::Receiver<Event>, StopHandle) {
        (self.events, self.stop)
    }
}

/// Channels for a new stage: its output sender, its stop receiver, and the
/// stream handed downstream
pub(crate) fn downstream() -> (mpsc::Sender<Event>, oneshot::Receiver<()>, EventStream) {
    let (tx, rx) = mpsc::channel(1);
    let (stop_tx, stop_rx) = oneshot::channel();

    let stream = EventStream {
        events: rx,
        stop: StopHandle(stop_tx),
    };
    (tx, stop_rx, stream)
}

/// Send `event` downstream unless a stop arrives first
///
/// Returns false when the stage should exit: stopped, stop handle dropped,
/// or downstream receiver gone.
pub(crate) async fn send_or_stop(
    tx: &mpsc::Sender<Event>,
    stop: &mut oneshot::Receiver<()>,
    event: Event,
) -> bool {
    tokio::select! {
        _ = stop => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

/// Run a one-upstream stage that maps each event to zero or one output events
pub(crate) fn spawn_stage<F>(stage: &'static str, upstream: EventStream, mut transform: F) -> EventStream
where
    F: FnMut(Event) -> Option<Event> + Send + 'static,
{
    let (tx, mut stop, stream) = downstream();

    tokio::spawn(async move {
        let (mut events, upstream_stop) = upstream.into_parts();

        loop {
            let event = tokio::select! {
                _ = &mut stop => {
                    tracing::debug!(stage, "Got stop from downstream");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        tracing::debug!(stage, "Upstream closed");
                        break;
                    }
                },
            };

            if let Some(output) = transform(event) {
                if !send_or_stop(&tx, &mut stop, output).await {
                    tracing::debug!(stage, "Downstream gone");
                    break;
                }
            }
        }

        drop(tx);
        upstream_stop.stop();
    });

    stream
}

/// Decode operator parameters into a typed struct
pub(crate) fn decode_params<T: DeserializeOwned>(operator: &str, params: &Params) -> PipelineResult<T> {
    let object: serde_json::Map<String, serde_json::Value> =
        params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

    serde_json::from_value(serde_json::Value::Object(object))
        .map_err(|e| PipelineError::Config(format!("{}: {}", operator, e)))
}

/// Take the single upstream of a one-input operator
pub(crate) fn single_upstream(
    operator: &str,
    mut upstream: Vec<Box<dyn Source>>,
) -> PipelineResult<Box<dyn Source>> {
    if upstream.len() != 1 {
        return Err(PipelineError::Config(format!(
            "{} requires exactly 1 upstream, got {}",
            operator,
            upstream.len()
        )));
    }
    upstream
        .pop()
        .ok_or_else(|| PipelineError::Config(format!("{} has no upstream", operator)))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde::Deserialize;
    use tokio::time::{timeout, Duration};

    #[derive(Debug, Deserialize)]
    struct Window {
        window: usize,
    }

    #[test]
    fn test_decode_params() {
        let mut params = Params::new();
        params.insert("window".to_string(), serde_json::json!(10));
        let decoded: Window = decode_params("movingAvg", &params).unwrap();
        assert_eq!(decoded.window, 10);

        params.insert("window".to_string(), serde_json::json!("ten"));
        let err = decode_params::<Window>("movingAvg", &params).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(err.to_string().contains("movingAvg"));
    }

    #[test]
    fn test_single_upstream_arity() {
        assert!(single_upstream("filter", Vec::new()).is_err());

        let (_, _, a) = manual_stream();
        let (_, _, b) = manual_stream();
        let err = single_upstream("filter", vec![Prebuilt::boxed(a), Prebuilt::boxed(b)])
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "Invalid operator configuration: filter requires exactly 1 upstream, got 2"
        );
    }

    #[tokio::test]
    async fn test_stage_relays_in_order_and_closes() {
        let (feed, _stopped, upstream) = manual_stream();
        let mut out = spawn_stage("identity", upstream, Some);

        for i in 0..5 {
            feed.send(Event::new("k", i, i)).await.unwrap();
        }
        drop(feed);

        for i in 0..5 {
            assert_eq!(out.recv().await.unwrap().time(), i);
        }
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_upstream() {
        let (_feed, stopped, upstream) = manual_stream();
        let out = spawn_stage("identity", upstream, Some);

        drop(out);
        timeout(Duration::from_secs(1), stopped).await.unwrap().unwrap();
    }
}
