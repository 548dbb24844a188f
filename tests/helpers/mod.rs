//! In-memory harness wiring the verification services together

use entity_verify::models::entity::{Entity, Registration, REGISTRATION_STATUS_PENDING};
use entity_verify::services::{
    backend::JobBackend,
    events::EventChannel,
    job_state::{JobStateStore, DEFAULT_JOB_TTL},
    memory::{MemoryAuditSink, MemoryBackend, MemoryEntityStore},
    orchestrator::VerificationOrchestrator,
    queue::JobQueue,
    scheduler::{VerificationScheduler, DEFAULT_INTERVAL},
};
use std::sync::Arc;
use std::time::Duration;

use crate::fixtures::EntityFixture;

pub const KEY_PREFIX: &str = "entity-setup";

pub struct Harness {
    pub backend: Arc<MemoryBackend>,
    pub events: EventChannel,
    pub jobs: JobStateStore,
    pub queue: JobQueue,
    pub orchestrator: Arc<VerificationOrchestrator>,
    pub entities: Arc<MemoryEntityStore>,
    pub audit: Arc<MemoryAuditSink>,
}

impl Harness {
    pub fn new() -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let shared: Arc<dyn JobBackend> = backend.clone();
        let events = EventChannel::new(shared.clone(), format!("{KEY_PREFIX}:events"));
        let jobs = JobStateStore::new(shared.clone(), events.clone(), KEY_PREFIX, DEFAULT_JOB_TTL);
        let queue = JobQueue::new(shared, KEY_PREFIX, Duration::from_secs(60));
        let entities = Arc::new(MemoryEntityStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let orchestrator = Arc::new(VerificationOrchestrator::new(
            jobs.clone(),
            entities.clone(),
            audit.clone(),
        ));

        Self {
            backend,
            events,
            jobs,
            queue,
            orchestrator,
            entities,
            audit,
        }
    }

    pub fn scheduler(&self, batch_size: u32) -> VerificationScheduler {
        VerificationScheduler::new(
            self.queue.clone(),
            self.orchestrator.clone(),
            batch_size,
            DEFAULT_INTERVAL,
        )
    }

    /// What the submit endpoint does: fresh job, then enqueue.
    pub async fn submit(&self, entity_id: &str) {
        self.jobs
            .initialize(entity_id)
            .await
            .expect("Failed to initialize job");
        self.queue
            .enqueue(entity_id)
            .await
            .expect("Failed to enqueue job");
    }
}

pub fn entity_from_fixture(fixture: &EntityFixture) -> Entity {
    Entity {
        id: fixture.entity_id.to_string(),
        tenant_id: "tenant-test".to_string(),
        name: format!("Fixture {}", fixture.entity_id),
        country: fixture.country.to_string(),
        status: "PENDING".to_string(),
        verified_at: None,
        registrations: fixture
            .registrations
            .iter()
            .enumerate()
            .map(|(i, (registration_type, value))| Registration {
                id: format!("{}-reg-{}", fixture.entity_id, i),
                registration_type: registration_type.to_string(),
                value: value.to_string(),
                status: REGISTRATION_STATUS_PENDING.to_string(),
            })
            .collect(),
        licenses: vec![],
    }
}
