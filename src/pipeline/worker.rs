use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::models::Job;

use super::Pipeline;

/// Drains the event bus, running each job as its own task with at most
/// `max_concurrent` in flight.
pub struct Worker {
    pipeline: Arc<Pipeline>,
    semaphore: Arc<Semaphore>,
}

impl Worker {
    pub fn new(pipeline: Arc<Pipeline>, max_concurrent: usize) -> Self {
        Self {
            pipeline,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Runs until every sender is dropped, then waits for in-flight jobs.
    pub async fn run(self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        tracing::info!(
            "Job worker started with {} slots",
            self.semaphore.available_permits()
        );
        let mut tasks = JoinSet::new();

        while let Some(job) = jobs.recv().await {
            while let Some(finished) = tasks.try_join_next() {
                if let Err(e) = finished {
                    tracing::error!("Job task panicked: {}", e);
                }
            }

            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::error!("Job worker semaphore closed, dropping {}", job.name());
                    break;
                }
            };
            let pipeline = self.pipeline.clone();
            tasks.spawn(async move {
                let _permit = permit;
                pipeline.run(job).await
            });
        }

        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                tracing::error!("Job task panicked: {}", e);
            }
        }
        tracing::info!("Job worker stopped");
    }
}
