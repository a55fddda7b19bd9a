//! Single-flight lock for comment polling
//!
//! One poll per note target at a time: the handler takes a short TTL'd
//! lock before calling the connector, and a concurrent poll that fails to
//! acquire returns success without doing work. Release is guarded by an
//! owner token so a slow holder cannot delete a successor's lock.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{WorkerError, WorkerResult};

/// Owner-checked compare-and-delete
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Single-flight lock abstraction
#[async_trait]
pub trait PollLock: Send + Sync {
    /// Try to take the lock; returns the owner token, or `None` when held
    async fn try_acquire(&self, key: &str, ttl: Duration) -> WorkerResult<Option<String>>;

    /// Release the lock if still owned by `token`
    async fn release(&self, key: &str, token: &str) -> WorkerResult<()>;
}

/// Redis-backed lock (`SET key token NX PX ttl`)
#[derive(Clone)]
pub struct RedisPollLock {
    conn: MultiplexedConnection,
}

impl RedisPollLock {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl PollLock for RedisPollLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> WorkerResult<Option<String>> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(WorkerError::Redis)?;

        Ok(acquired.map(|_| token))
    }

    async fn release(&self, key: &str, token: &str) -> WorkerResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(WorkerError::Redis)?;
        Ok(())
    }
}

/// Process-local lock for tests and single-instance deployments
///
/// TTLs are ignored: a lock lives until released.
#[derive(Default)]
pub struct InMemoryPollLock {
    held: Mutex<HashMap<String, String>>,
}

impl InMemoryPollLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PollLock for InMemoryPollLock {
    async fn try_acquire(&self, key: &str, _ttl: Duration) -> WorkerResult<Option<String>> {
        let mut held = self.held.lock().unwrap();
        if held.contains_key(key) {
            return Ok(None);
        }
        let token = Uuid::new_v4().to_string();
        held.insert(key.to_string(), token.clone());
        Ok(Some(token))
    }

    async fn release(&self, key: &str, token: &str) -> WorkerResult<()> {
        let mut held = self.held.lock().unwrap();
        if held.get(key).map(String::as_str) == Some(token) {
            held.remove(key);
        }
        Ok(())
    }
}
