//! Filter: relays events whose value lies in `[min, max]`

use super::{
    decode_params, single_upstream, spawn_stage, EventStream, Params, PipelineError,
    PipelineResult, Source,
};
use crate::storage::Store;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct FilterParams {
    #[serde(default = "unbounded_min")]
    min: f64,
    #[serde(default = "unbounded_max")]
    max: f64,
}

fn unbounded_min() -> f64 {
    f64::NEG_INFINITY
}

fn unbounded_max() -> f64 {
    f64::INFINITY
}

/// Inclusive numeric bounds
#[derive(Debug, Clone, Copy)]
struct Bounds {
    min: f64,
    max: f64,
}

impl Bounds {
    fn accepts(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Range filter over numeric values; non-numeric values never pass
pub struct Filter {
    bounds: Bounds,
    upstream: Box<dyn Source>,
}

impl Filter {
    pub fn new(min: f64, max: f64, upstream: Box<dyn Source>) -> PipelineResult<Self> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(PipelineError::Config(format!(
                "filter range is empty: min={} max={}",
                min, max
            )));
        }

        Ok(Self {
            bounds: Bounds { min, max },
            upstream,
        })
    }

    /// Factory for the `filter` node type
    pub fn from_params(
        params: &Params,
        upstream: Vec<Box<dyn Source>>,
        _store: &Arc<dyn Store>,
    ) -> PipelineResult<Box<dyn Source>> {
        let upstream = single_upstream("filter", upstream)?;
        let params: FilterParams = decode_params("filter", params)?;
        Ok(Box::new(Self::new(params.min, params.max, upstream)?))
    }
}

#[async_trait]
impl Source for Filter {
    async fn stream(&self) -> PipelineResult<EventStream> {
        let upstream = self.upstream.stream().await?;
        let bounds = self.bounds;

        Ok(spawn_stage("filter", upstream, move |event| {
            match event.value().as_f64() {
                Some(v) if bounds.accepts(v) => Some(event),
                Some(_) => None,
                None => {
                    tracing::debug!(
                        key = %event.key,
                        kind = event.value().type_name(),
                        "Filter dropped non-numeric value"
                    );
                    None
                }
            }
        }))
    }
}
