use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::models::verification::BatchSummary;
use crate::services::orchestrator::VerificationOrchestrator;
use crate::services::queue::JobQueue;

pub const DEFAULT_BATCH_SIZE: u32 = 10;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Periodic runner that drains a bounded number of queue entries per pass.
pub struct VerificationScheduler {
    queue: JobQueue,
    orchestrator: Arc<VerificationOrchestrator>,
    batch_size: u32,
    interval: Duration,
}

impl VerificationScheduler {
    pub fn new(
        queue: JobQueue,
        orchestrator: Arc<VerificationOrchestrator>,
        batch_size: u32,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            batch_size,
            interval,
        }
    }

    /// One pass: up to `batch_size` drains, stopping at the first empty
    /// queue, then cleanup. Per-entry errors are logged and counted.
    pub async fn run_once(&self) -> BatchSummary {
        let mut summary = BatchSummary::default();

        for _ in 0..self.batch_size {
            match self.queue.dequeue_and_process(&self.orchestrator).await {
                Ok(Some(state)) => {
                    tracing::debug!(entity_id = %state.entity_id, status = %state.status, "Queue entry processed");
                    summary.processed += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Error processing verification job");
                    metrics::counter!("entity_verification_drain_failures_total").increment(1);
                    summary.failed += 1;
                }
            }
        }

        let cleaned = self.cleanup_expired_jobs().await;

        if let Err(e) = self.queue.queue_depth().await {
            tracing::warn!(error = %e, "Failed to read queue depth");
        }

        tracing::info!(
            processed = summary.processed,
            failed = summary.failed,
            cleaned,
            "Verification batch complete"
        );
        summary
    }

    /// Expired job records are reclaimed by their TTL; nothing to purge here.
    pub async fn cleanup_expired_jobs(&self) -> u64 {
        tracing::debug!("Verification job cleanup completed");
        0
    }

    /// Run passes every `interval` until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Verification scheduler stopping");
                        return;
                    }
                }
            }
        }
    }
}

/// Flip `shutdown` to true once `signal` resolves.
///
/// If `signal` fails the sender is held forever: a dropped sender would stop
/// the scheduler just like an explicit shutdown.
pub async fn shutdown_on<F>(signal: F, shutdown: watch::Sender<bool>)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    let _ = shutdown.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::entity::{Entity, Registration};
    use crate::models::job::VerificationJobStatus;
    use crate::services::events::EventChannel;
    use crate::services::job_state::{JobStateStore, DEFAULT_JOB_TTL};
    use crate::services::memory::{MemoryAuditSink, MemoryBackend, MemoryEntityStore};

    fn entity(id: &str, trn: &str) -> Entity {
        Entity {
            id: id.to_string(),
            tenant_id: "tenant-1".to_string(),
            name: format!("Business {id}"),
            country: "AE".to_string(),
            status: "PENDING".to_string(),
            verified_at: None,
            registrations: vec![Registration {
                id: format!("{id}-trn"),
                registration_type: "TRN".to_string(),
                value: trn.to_string(),
                status: "PENDING".to_string(),
            }],
            licenses: vec![],
        }
    }

    fn scheduler(batch_size: u32) -> (VerificationScheduler, Arc<MemoryEntityStore>) {
        let backend = Arc::new(MemoryBackend::new());
        let events = EventChannel::new(backend.clone(), "test:events");
        let jobs = JobStateStore::new(backend.clone(), events, "test", DEFAULT_JOB_TTL);
        let entities = Arc::new(MemoryEntityStore::new());
        let orchestrator = Arc::new(VerificationOrchestrator::new(
            jobs,
            entities.clone(),
            Arc::new(MemoryAuditSink::new()),
        ));
        let queue = JobQueue::new(backend, "test", Duration::from_secs(60));
        (
            VerificationScheduler::new(queue, orchestrator, batch_size, DEFAULT_INTERVAL),
            entities,
        )
    }

    async fn submit(s: &VerificationScheduler, entity_id: &str) {
        s.orchestrator.jobs().initialize(entity_id).await.unwrap();
        s.queue.enqueue(entity_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_queue_stops_immediately() {
        let (s, _) = scheduler(10);
        assert_eq!(s.run_once().await, BatchSummary::default());
    }

    #[tokio::test]
    async fn test_batch_respects_budget() {
        let (s, entities) = scheduler(2);
        for id in ["a", "b", "c"] {
            entities.insert(entity(id, "100067144000097"));
            submit(&s, id).await;
        }

        let summary = s.run_once().await;
        assert_eq!(summary, BatchSummary { processed: 2, failed: 0 });
        assert_eq!(s.queue.queue_depth().await.unwrap(), 1);

        let summary = s.run_once().await;
        assert_eq!(summary, BatchSummary { processed: 1, failed: 0 });
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_batch() {
        let (s, entities) = scheduler(10);
        entities.insert(entity("good", "100067144000097"));
        entities.insert(entity("bad", "12"));
        submit(&s, "good").await;
        s.queue.enqueue("orphan").await.unwrap();
        submit(&s, "bad").await;

        let summary = s.run_once().await;
        // An invalid registration is a processed job; the orphan is a failure.
        assert_eq!(summary, BatchSummary { processed: 2, failed: 1 });

        let bad = s.orchestrator.jobs().get("bad").await.unwrap().unwrap();
        assert_eq!(bad.status, VerificationJobStatus::VerificationFailed);
        let good = s.orchestrator.jobs().get("good").await.unwrap().unwrap();
        assert_eq!(good.status, VerificationJobStatus::VerifiedSuccess);
    }

    #[tokio::test]
    async fn test_duplicate_entry_processed_once() {
        let (s, entities) = scheduler(10);
        entities.insert(entity("dup", "100067144000097"));
        submit(&s, "dup").await;
        s.queue.enqueue("dup").await.unwrap();

        let summary = s.run_once().await;
        // The second run finds the job already completed.
        assert_eq!(summary, BatchSummary { processed: 1, failed: 1 });
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (s, _) = scheduler(1);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { s.run(rx).await });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_signal_keeps_scheduler_running() {
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(shutdown_on(
            async { Err(std::io::Error::other("no signal handler")) },
            tx,
        ));

        let changed = tokio::time::timeout(Duration::from_secs(60), rx.changed()).await;
        assert!(changed.is_err(), "shutdown channel fired or closed");
        assert!(!*rx.borrow());
    }

    #[tokio::test]
    async fn test_signal_requests_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(shutdown_on(async { Ok(()) }, tx));

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(*rx.borrow());
    }
}
