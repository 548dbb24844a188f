use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::{audit_queries::PgAuditSink, entity_queries::PgEntityStore};
use crate::services::{
    backend::JobBackend,
    events::EventChannel,
    job_state::JobStateStore,
    orchestrator::VerificationOrchestrator,
    queue::JobQueue,
    scheduler::VerificationScheduler,
};

/// Shared application state passed to all route handlers and the worker.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub jobs: JobStateStore,
    pub queue: JobQueue,
    pub events: EventChannel,
    pub orchestrator: Arc<VerificationOrchestrator>,
}

impl AppState {
    pub fn new(db: PgPool, backend: Arc<dyn JobBackend>, config: &AppConfig) -> Self {
        let events = EventChannel::new(backend.clone(), config.events_channel());
        let jobs = JobStateStore::new(
            backend.clone(),
            events.clone(),
            config.key_prefix.clone(),
            config.job_ttl(),
        );
        let queue = JobQueue::new(backend, &config.key_prefix, config.lease_ttl());
        let orchestrator = VerificationOrchestrator::new(
            jobs.clone(),
            Arc::new(PgEntityStore::new(db.clone())),
            Arc::new(PgAuditSink::new(db.clone())),
        );

        Self {
            db,
            jobs,
            queue,
            events,
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub fn scheduler(&self, config: &AppConfig) -> VerificationScheduler {
        VerificationScheduler::new(
            self.queue.clone(),
            self.orchestrator.clone(),
            config.scheduler_batch_size,
            config.scheduler_interval(),
        )
    }
}
