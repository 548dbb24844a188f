use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::services::backend::{BackendError, CasOutcome, JobBackend};

/// Returns -1 when the key is missing, 0 on revision mismatch, 1 when written.
const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return -1
end
local decoded = cjson.decode(current)
if decoded['revision'] ~= ARGV[1] then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
return 1
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis-backed job storage, queue and pub/sub.
pub struct RedisBackend {
    client: redis::Client,
    conn: OnceCell<MultiplexedConnection>,
    cas_script: Script,
    release_script: Script,
}

impl RedisBackend {
    pub fn new(redis_url: &str) -> Result<Self, BackendError> {
        let client = redis::Client::open(redis_url).map_err(BackendError::Redis)?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            cas_script: Script::new(CAS_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }

    /// Shared multiplexed connection, opened on first use.
    async fn connection(&self) -> Result<MultiplexedConnection, BackendError> {
        let conn = self
            .conn
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await
            .map_err(BackendError::Redis)?;
        Ok(conn.clone())
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl JobBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<CasOutcome, BackendError> {
        let mut conn = self.connection().await?;
        let outcome: i64 = self
            .cas_script
            .key(key)
            .arg(expected_revision)
            .arg(value)
            .arg(ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await?;

        Ok(match outcome {
            1 => CasOutcome::Swapped,
            0 => CasOutcome::Conflict,
            _ => CasOutcome::Missing,
        })
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, BackendError> {
        let mut conn = self.connection().await?;
        // -2: missing, -1: no expiry
        let secs: i64 = conn.ttl(key).await?;
        Ok(u64::try_from(secs).ok())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BackendError> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete_if_eq(&self, key: &str, value: &str) -> Result<bool, BackendError> {
        let mut conn = self.connection().await?;
        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn push_back(&self, list: &str, value: &str) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        conn.rpush::<_, _, ()>(list, value).await?;
        Ok(())
    }

    async fn pop_front(&self, list: &str) -> Result<Option<String>, BackendError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.lpop(list, None).await?;
        Ok(value)
    }

    async fn list_len(&self, list: &str) -> Result<u64, BackendError> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.llen(list).await?;
        Ok(len)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, BackendError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping non-text pub/sub payload");
                        None
                    }
                }
            })
            .boxed();
        Ok(stream)
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
