//! Leader election for the scheduler over a Redis key with a TTL.
//!
//! Each `RedisLock` holds a random token; extend and release only act when the
//! stored value is still that token, so an instance whose lease expired can
//! never delete or prolong a successor's lock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{AppError, AppResult};

/// Acquire, or refresh the TTL if we already hold it.
const ACQUIRE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
end
if current then
    return 0
end
redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
return 1
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Shortest renewal period, so tiny TTLs do not spin.
const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(10);

#[async_trait]
pub trait LeaderLock: Send + Sync {
    /// Non-blocking. `true` iff this instance holds the lock afterwards.
    async fn try_acquire(&self) -> AppResult<bool>;

    /// Push the expiry out by one TTL. `false` means the lock is no longer ours.
    async fn extend(&self) -> AppResult<bool>;

    /// Delete the key if it is still ours.
    async fn release(&self) -> AppResult<()>;

    fn ttl(&self) -> Duration;
}

pub struct RedisLock {
    conn: ConnectionManager,
    key: String,
    token: String,
    ttl: Duration,
    acquire: Script,
    extend: Script,
    release: Script,
}

impl std::fmt::Debug for RedisLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLock")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl RedisLock {
    pub async fn connect(redis_url: &str, key: impl Into<String>, ttl: Duration) -> AppResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Self::new(conn, key, ttl)
    }

    pub fn new(conn: ConnectionManager, key: impl Into<String>, ttl: Duration) -> AppResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(AppError::Lock("lock key is required".to_string()));
        }
        if ttl.as_millis() == 0 {
            return Err(AppError::Lock("lock TTL must be positive".to_string()));
        }
        Ok(Self {
            conn,
            key,
            token: generate_token(),
            ttl,
            acquire: Script::new(ACQUIRE_SCRIPT),
            extend: Script::new(EXTEND_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock if still held, then drop the connection.
    pub async fn close(self) -> AppResult<()> {
        let result = LeaderLock::release(&self).await;
        drop(self.conn);
        debug!(key = %self.key, "Lock client closed");
        result
    }

    fn ttl_millis(&self) -> u64 {
        u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX)
    }

    async fn invoke(&self, script: &Script) -> AppResult<i64> {
        let mut conn = self.conn.clone();
        let result: i64 = script
            .key(&self.key)
            .arg(&self.token)
            .arg(self.ttl_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::Lock(format!("lock script failed on {}: {}", self.key, e)))?;
        Ok(result)
    }
}

fn generate_token() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

#[async_trait]
impl LeaderLock for RedisLock {
    async fn try_acquire(&self) -> AppResult<bool> {
        Ok(self.invoke(&self.acquire).await? == 1)
    }

    async fn extend(&self) -> AppResult<bool> {
        Ok(self.invoke(&self.extend).await? == 1)
    }

    async fn release(&self) -> AppResult<()> {
        if self.invoke(&self.release).await? == 0 {
            debug!(key = %self.key, "Lock already expired or taken over");
        }
        Ok(())
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// A held lock plus its background renewer.
///
/// `lost()` fires when the lock can no longer be considered ours: another
/// instance owns the key, or renewal kept failing for a whole TTL.
pub struct LockLease {
    lock: Arc<dyn LeaderLock>,
    lost: CancellationToken,
    stop: CancellationToken,
    renewer: JoinHandle<()>,
}

impl LockLease {
    /// Call only after a successful `try_acquire`.
    pub fn start(lock: Arc<dyn LeaderLock>) -> Self {
        let lost = CancellationToken::new();
        let stop = CancellationToken::new();
        let renewer = tokio::spawn(renew(lock.clone(), stop.clone(), lost.clone()));
        Self {
            lock,
            lost,
            stop,
            renewer,
        }
    }

    pub fn lost(&self) -> &CancellationToken {
        &self.lost
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    /// Stop renewing, then release the key.
    pub async fn release(mut self) -> AppResult<()> {
        self.stop.cancel();
        if let Err(e) = (&mut self.renewer).await {
            if e.is_panic() {
                error!(error = %e, "Lock renewer panicked");
            }
        }
        self.lock.release().await
    }
}

impl Drop for LockLease {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn renew(lock: Arc<dyn LeaderLock>, stop: CancellationToken, lost: CancellationToken) {
    let ttl = lock.ttl();
    let period = (ttl / 3).max(MIN_RENEW_INTERVAL);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_success = Instant::now();

    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match lock.extend().await {
            Ok(true) => last_success = Instant::now(),
            Ok(false) => {
                warn!("Leader lock taken over by another instance");
                lost.cancel();
                return;
            }
            Err(e) if last_success.elapsed() >= ttl => {
                error!(error = %e, "Leader lock renewal failing for a full TTL, giving up");
                lost.cancel();
                return;
            }
            Err(e) => warn!(error = %e, "Failed to extend leader lock"),
        }
    }
}
