pub mod backend;
pub mod entity_store;
pub mod events;
pub mod job_state;
pub mod memory;
pub mod orchestrator;
pub mod queue;
pub mod redis_backend;
pub mod registry;
pub mod scheduler;
