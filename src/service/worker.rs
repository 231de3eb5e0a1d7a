//! Prediction Worker
//!
//! Dispatches pipeline requests onto the blocking pool, keyed by a logical
//! target (a screen, a camera, a caller). A newer request for a target
//! supersedes the older one: the older task is aborted if it has not started,
//! and if it finishes anyway its result is discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::engine::{ClassifierEngine, DetectorEngine};
use crate::error::{PipelineError, Result};

use super::pipeline::PredictionPipeline;
use super::types::{Request, Response};

struct TargetState {
    generation: u64,
    task: AbortHandle,
}

/// Runs requests in the background, one live request per target
pub struct PredictionWorker<D: DetectorEngine, C: ClassifierEngine> {
    pipeline: Arc<PredictionPipeline<D, C>>,
    targets: Arc<Mutex<HashMap<String, TargetState>>>,
    next_generation: AtomicU64,
}

impl<D: DetectorEngine, C: ClassifierEngine> PredictionWorker<D, C> {
    pub fn new(pipeline: Arc<PredictionPipeline<D, C>>) -> Self {
        Self {
            pipeline,
            targets: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn pipeline(&self) -> &Arc<PredictionPipeline<D, C>> {
        &self.pipeline
    }

    /// Submit a request for `target`.
    /// Returns a oneshot receiver for the result.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(
        &self,
        target: impl Into<String>,
        request: Request,
    ) -> oneshot::Receiver<Result<Response>> {
        let target = target.into();
        let (tx, rx) = oneshot::channel();

        let pipeline = self.pipeline.clone();
        let blocking = tokio::task::spawn_blocking(move || pipeline.run(&request));
        // Generations are unique across targets, so a removed entry can never
        // be mistaken for a newer one.
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        {
            let mut targets = self.targets.lock();
            let previous = targets.insert(
                target.clone(),
                TargetState {
                    generation,
                    task: blocking.abort_handle(),
                },
            );
            if let Some(previous) = previous {
                debug!("Superseding request {} for {}", previous.generation, target);
                previous.task.abort();
            }
        }

        let targets = self.targets.clone();
        tokio::spawn(async move {
            let joined = blocking.await;

            let is_current = {
                let mut targets = targets.lock();
                let is_current = targets
                    .get(&target)
                    .is_some_and(|state| state.generation == generation);
                if is_current {
                    targets.remove(&target);
                }
                is_current
            };

            let result = if is_current {
                joined.map_err(PipelineError::from).and_then(|result| result)
            } else {
                warn!("Discarding stale result {} for {}", generation, target);
                Err(PipelineError::Superseded(target))
            };

            // Receiver may have been dropped
            let _ = tx.send(result);
        });

        rx
    }

    /// Number of targets with a request in flight
    pub fn in_flight(&self) -> usize {
        self.targets.lock().len()
    }
}
