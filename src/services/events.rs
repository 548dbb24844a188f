use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;

use crate::models::event::{JobEvent, JobEventType};
use crate::models::job::VerificationJobState;
use crate::services::backend::{BackendError, JobBackend};

/// Pub/sub broadcast of job lifecycle transitions.
#[derive(Clone)]
pub struct EventChannel {
    backend: Arc<dyn JobBackend>,
    channel: String,
}

impl EventChannel {
    pub fn new(backend: Arc<dyn JobBackend>, channel: impl Into<String>) -> Self {
        Self {
            backend,
            channel: channel.into(),
        }
    }

    /// Fire-and-forget: publish failures are logged, never returned.
    pub async fn publish(&self, event_type: JobEventType, state: &VerificationJobState) {
        let event = JobEvent::new(event_type, state.clone());
        let payload = match serde_json::to_string(&event) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(event_type = %event_type, error = %e, "Failed to encode job event");
                return;
            }
        };

        if let Err(e) = self.backend.publish(&self.channel, &payload).await {
            tracing::error!(
                event_type = %event_type,
                entity_id = %state.entity_id,
                error = %e,
                "Failed to publish verification event"
            );
        }
    }

    /// Decoded events published after this call. Undecodable payloads are skipped.
    pub async fn subscribe(&self) -> Result<BoxStream<'static, JobEvent>, BackendError> {
        let raw = self.backend.subscribe(&self.channel).await?;
        let events = raw
            .filter_map(|payload| async move {
                match serde_json::from_str::<JobEvent>(&payload) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping undecodable job event");
                        None
                    }
                }
            })
            .boxed();
        Ok(events)
    }
}
