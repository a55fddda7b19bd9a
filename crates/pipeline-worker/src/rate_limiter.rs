//! Per-recipient email rate limiting
//!
//! Caps how many result emails a single recipient can receive per window
//! so a comment flood cannot turn the pipeline into a spam cannon.
//! Fails open: an unreachable Redis never blocks deliveries.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::WorkerResult;

/// Default cap: 5 result emails per recipient per hour
pub const DEFAULT_MAX_SENDS: u32 = 5;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

/// Recipient rate limiter abstraction
#[async_trait]
pub trait RecipientRateLimiter: Send + Sync {
    /// Whether a send to this recipient is currently allowed
    ///
    /// An allowed check also counts the send against the window.
    async fn allow(&self, email: &str) -> WorkerResult<bool>;
}

/// Redis fixed-window limiter keyed `rl:mail:<recipient>`
#[derive(Clone)]
pub struct RedisRecipientRateLimiter {
    conn: MultiplexedConnection,
    max_sends: u32,
    window: Duration,
}

impl RedisRecipientRateLimiter {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            max_sends: DEFAULT_MAX_SENDS,
            window: DEFAULT_WINDOW,
        }
    }

    pub fn with_limits(conn: MultiplexedConnection, max_sends: u32, window: Duration) -> Self {
        Self {
            conn,
            max_sends,
            window,
        }
    }
}

#[async_trait]
impl RecipientRateLimiter for RedisRecipientRateLimiter {
    async fn allow(&self, email: &str) -> WorkerResult<bool> {
        let key = format!("rl:mail:{}", email.to_lowercase());
        let mut conn = self.conn.clone();

        let count: i64 = match conn.incr(&key, 1).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, email = %email, "Rate limiter unavailable, allowing send");
                return Ok(true);
            }
        };

        if count == 1 {
            // First send in this window starts its expiry clock
            let _: Result<(), _> = conn.expire(&key, self.window.as_secs() as i64).await;
        }

        if count > self.max_sends as i64 {
            tracing::warn!(
                email = %email,
                count = count,
                max_sends = self.max_sends,
                "Recipient over send limit"
            );
            return Ok(false);
        }

        Ok(true)
    }
}

/// In-memory limiter for tests; the window never expires
#[derive(Default)]
pub struct InMemoryRecipientRateLimiter {
    max_sends: u32,
    counts: Mutex<HashMap<String, u32>>,
}

impl InMemoryRecipientRateLimiter {
    pub fn new(max_sends: u32) -> Self {
        Self {
            max_sends,
            counts: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RecipientRateLimiter for InMemoryRecipientRateLimiter {
    async fn allow(&self, email: &str) -> WorkerResult<bool> {
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(email.to_lowercase()).or_insert(0);
        *count += 1;
        Ok(*count <= self.max_sends)
    }
}

/// Limiter that always allows; keeps the hook wired where tests do not
/// care about throttling
pub struct NoopRecipientRateLimiter;

#[async_trait]
impl RecipientRateLimiter for NoopRecipientRateLimiter {
    async fn allow(&self, _email: &str) -> WorkerResult<bool> {
        Ok(true)
    }
}
