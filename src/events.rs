use tokio::sync::mpsc;

use crate::models::Job;

/// Fire-and-forget handle onto the job queue. Cheap to clone; every producer
/// (scheduler, HTTP API, CLI) holds one.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<Job>,
}

impl EventBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues a job. Returns false when the worker side is gone.
    pub fn emit(&self, job: Job) -> bool {
        let name = job.name();
        match self.tx.send(job) {
            Ok(()) => {
                tracing::debug!("Emitted {}", name);
                true
            }
            Err(_) => {
                tracing::warn!("Dropped {}: no worker is listening", name);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitted_jobs_arrive_in_order() {
        let (bus, mut rx) = EventBus::new();
        assert!(bus.emit(Job::CleanupDiscovery));
        assert!(bus.clone().emit(Job::RssReport {
            owner_id: "u1".into()
        }));

        assert_eq!(rx.recv().await, Some(Job::CleanupDiscovery));
        assert_eq!(rx.recv().await.map(|j| j.name()), Some("report/generate.rss"));
    }

    #[test]
    fn emit_after_worker_exit_is_reported() {
        let (bus, rx) = EventBus::new();
        drop(rx);
        assert!(!bus.emit(Job::CleanupDiscovery));
    }
}
