use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string (entity store and audit log)
    pub database_url: String,

    /// Redis connection string for job state, queue and events
    pub redis_url: String,

    /// Prefix for every job key, queue and channel name
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Lifetime of a job record in seconds, reset on every write
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,

    /// Lifetime of a per-entity processing lease in seconds
    #[serde(default = "default_job_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// Seconds between scheduler passes
    #[serde(default = "default_scheduler_interval_secs")]
    pub scheduler_interval_secs: u64,

    /// Maximum queue entries drained per scheduler pass
    #[serde(default = "default_scheduler_batch_size")]
    pub scheduler_batch_size: u32,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_key_prefix() -> String {
    "entity-setup".to_string()
}

fn default_job_ttl_secs() -> u64 {
    300
}

fn default_scheduler_interval_secs() -> u64 {
    30
}

fn default_scheduler_batch_size() -> u32 {
    10
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }

    pub fn events_channel(&self) -> String {
        format!("{}:events", self.key_prefix)
    }
}
