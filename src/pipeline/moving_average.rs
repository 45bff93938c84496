//! MovingAverage: incremental average over the last `window` samples
//!
//! Nothing is emitted until `window` numeric samples have been seen; from
//! then on every numeric sample produces one event carrying the running
//! average, stamped with the key and time of the sample that triggered it.

use super::{
    decode_params, single_upstream, spawn_stage, EventStream, Params, PipelineError,
    PipelineResult, Source,
};
use crate::storage::{Event, Store, Value};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct MovingAverageParams {
    window: usize,
}

/// Running average state for one stream instance
#[derive(Debug, Clone)]
pub(crate) struct RunningAverage {
    window: f64,
    window_size: u64,
    seen: u64,
    average: f64,
}

impl RunningAverage {
    pub(crate) fn new(window_size: usize) -> Self {
        Self {
            window: window_size as f64,
            window_size: window_size as u64,
            seen: 0,
            average: 0.0,
        }
    }

    /// Fold in one sample; returns the average once the window has filled
    pub(crate) fn push(&mut self, value: f64) -> Option<f64> {
        self.seen = self.seen.saturating_add(1);
        if self.seen > self.window_size {
            self.average -= self.average / self.window;
        }
        self.average += value / self.window;

        (self.seen >= self.window_size).then_some(self.average)
    }
}

pub struct MovingAverage {
    window_size: usize,
    upstream: Box<dyn Source>,
}

impl MovingAverage {
    pub fn new(window_size: usize, upstream: Box<dyn Source>) -> PipelineResult<Self> {
        if window_size == 0 {
            return Err(PipelineError::Config(
                "movingAvg window must be positive".to_string(),
            ));
        }

        Ok(Self {
            window_size,
            upstream,
        })
    }

    /// Factory for the `movingAvg` node type
    pub fn from_params(
        params: &Params,
        upstream: Vec<Box<dyn Source>>,
        _store: &Arc<dyn Store>,
    ) -> PipelineResult<Box<dyn Source>> {
        let upstream = single_upstream("movingAvg", upstream)?;
        let params: MovingAverageParams = decode_params("movingAvg", params)?;
        Ok(Box::new(Self::new(params.window, upstream)?))
    }
}

#[async_trait]
impl Source for MovingAverage {
    async fn stream(&self) -> PipelineResult<EventStream> {
        let upstream = self.upstream.stream().await?;
        let mut running = RunningAverage::new(self.window_size);

        Ok(spawn_stage("movingAvg", upstream, move |event: Event| {
            let Some(value) = event.value().as_f64() else {
                tracing::debug!(key = %event.key, "Moving average skipped non-numeric value");
                return None;
            };

            let average = running.push(value)?;
            Some(Event::new(event.key, event.record.time, Value::Float(average)))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{manual_stream, Prebuilt};
    use super::*;
    use crate::storage::{EventStore, StorageConfig};
    use tokio::time::{timeout, Duration};

    #[test]
    fn test_running_average_waits_for_window() {
        let mut avg = RunningAverage::new(3);

        assert_eq!(avg.push(3.0), None);
        assert_eq!(avg.push(6.0), None);
        assert!((avg.push(9.0).unwrap() - 6.0).abs() < 1e-9);

        // Past the window: avg -= avg/3, then avg += 12/3
        assert!((avg.push(12.0).unwrap() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_of_one_tracks_latest() {
        let mut avg = RunningAverage::new(1);
        assert_eq!(avg.push(4.0), Some(4.0));
        assert_eq!(avg.push(10.0), Some(10.0));
    }

    #[test]
    fn test_rejects_zero_window() {
        let store: Arc<dyn Store> =
            Arc::new(EventStore::open(&StorageConfig::in_memory()).unwrap());
        let (_, _, upstream) = manual_stream();

        let mut params = Params::new();
        params.insert("window".to_string(), serde_json::json!(0));
        let err = MovingAverage::from_params(&params, vec![Prebuilt::boxed(upstream)], &store)
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Config(_)));

        let (_, _, upstream) = manual_stream();
        let err =
            MovingAverage::from_params(&Params::new(), vec![Prebuilt::boxed(upstream)], &store)
                .err()
                .unwrap();
        assert!(err.to_string().contains("window"));
    }

    #[tokio::test]
    async fn test_emits_from_third_event_on() {
        let (feed, _stopped, upstream) = manual_stream();
        let avg = MovingAverage::new(3, Prebuilt::boxed(upstream)).unwrap();
        let mut out = avg.stream().await.unwrap();

        for (i, v) in [3, 6, 9, 12, 15].into_iter().enumerate() {
            feed.send(Event::new("k", i as i64, v)).await.unwrap();
        }
        drop(feed);

        let mut emitted = Vec::new();
        while let Some(event) = timeout(Duration::from_secs(1), out.recv()).await.unwrap() {
            emitted.push((event.time(), event.value().as_f64().unwrap()));
        }

        assert_eq!(emitted.len(), 3);
        assert_eq!(emitted[0].0, 2);
        assert!((emitted[0].1 - 6.0).abs() < 1e-9);
        assert!((emitted[1].1 - 8.0).abs() < 1e-9);
        // 8 - 8/3 + 5
        assert!((emitted[2].1 - (8.0 - 8.0 / 3.0 + 5.0)).abs() < 1e-9);
    }
}
