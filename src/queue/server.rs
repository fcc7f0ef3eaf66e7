//! Consumer side of the queue: fetch, dispatch, ack, retry and shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::TaskContext;
use crate::error::{AppError, AppResult};

use super::message::TaskMessage;
use super::{HandlerError, QueueKeys, ServeMux, SkipRetry, is_skip_retry};

/// Remove from active and schedule a retry.
const RETRY_SCRIPT: &str = r#"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
    return 0
end
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[2])
return 1
"#;

/// Remove from active and dead-letter. The archive is capped.
const ARCHIVE_SCRIPT: &str = r#"
redis.call('LREM', KEYS[1], 1, ARGV[1])
redis.call('LPUSH', KEYS[2], ARGV[2])
redis.call('LTRIM', KEYS[2], 0, tonumber(ARGV[3]) - 1)
return 1
"#;

/// Move due retries back to pending.
const FORWARD_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
for _, msg in ipairs(due) do
    redis.call('ZREM', KEYS[1], msg)
    redis.call('LPUSH', KEYS[2], msg)
end
return #due
"#;

/// Put an interrupted message at the head of pending so it is fetched next.
const REQUEUE_SCRIPT: &str = r#"
redis.call('LREM', KEYS[1], 1, ARGV[1])
redis.call('RPUSH', KEYS[2], ARGV[1])
return 1
"#;

const ARCHIVE_MAX_LEN: u64 = 10_000;
const FORWARD_BATCH: u64 = 100;

/// Time handlers get to return after their contexts are cancelled.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Retry delay for a task that has already been retried `retried` times:
/// `retried^4 + 15 + rand[0, 30) * (retried + 1)` seconds.
pub fn retry_delay(retried: u32) -> Duration {
    retry_delay_with_jitter(retried, rand::random::<u64>() % 30)
}

fn retry_delay_with_jitter(retried: u32, jitter: u64) -> Duration {
    let n = u64::from(retried);
    let secs = n
        .saturating_pow(4)
        .saturating_add(15)
        .saturating_add(jitter.saturating_mul(n + 1));
    Duration::from_secs(secs)
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub concurrency: usize,
    pub shutdown_timeout: Duration,
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
    /// How often due retries are moved back to pending.
    pub forward_interval: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            shutdown_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            forward_interval: Duration::from_secs(5),
        }
    }
}

/// Redis operations on one queue's keys.
#[derive(Clone)]
struct Broker {
    conn: ConnectionManager,
    keys: Arc<QueueKeys>,
    retry: Arc<Script>,
    archive: Arc<Script>,
    forward: Arc<Script>,
    requeue: Arc<Script>,
}

impl Broker {
    fn new(conn: ConnectionManager, queue: &str) -> Self {
        Self {
            conn,
            keys: Arc::new(QueueKeys::new(queue)),
            retry: Arc::new(Script::new(RETRY_SCRIPT)),
            archive: Arc::new(Script::new(ARCHIVE_SCRIPT)),
            forward: Arc::new(Script::new(FORWARD_SCRIPT)),
            requeue: Arc::new(Script::new(REQUEUE_SCRIPT)),
        }
    }

    async fn fetch(&self) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("LMOVE")
            .arg(&self.keys.pending)
            .arg(&self.keys.active)
            .arg("RIGHT")
            .arg("LEFT")
            .query_async(&mut conn)
            .await?;
        Ok(raw)
    }

    async fn ack(&self, raw: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.lrem(&self.keys.active, 1, raw).await?;
        Ok(())
    }

    async fn schedule_retry(&self, raw: &str, next: &TaskMessage, delay: Duration) -> AppResult<()> {
        let due = Utc::now().timestamp().saturating_add(delay.as_secs() as i64);
        let mut conn = self.conn.clone();
        let _: i64 = self
            .retry
            .key(&self.keys.active)
            .key(&self.keys.retry)
            .arg(raw)
            .arg(next.encode()?)
            .arg(due)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn archive(&self, raw: &str, next: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .archive
            .key(&self.keys.active)
            .key(&self.keys.archived)
            .arg(raw)
            .arg(next)
            .arg(ARCHIVE_MAX_LEN)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn forward_due(&self) -> AppResult<u64> {
        let mut conn = self.conn.clone();
        let moved: u64 = self
            .forward
            .key(&self.keys.retry)
            .key(&self.keys.pending)
            .arg(Utc::now().timestamp())
            .arg(FORWARD_BATCH)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved)
    }

    async fn requeue(&self, raw: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .requeue
            .key(&self.keys.active)
            .key(&self.keys.pending)
            .arg(raw)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Ack on success; otherwise retry with backoff or archive.
    async fn settle(&self, msg: &TaskMessage, raw: &str, result: Result<(), HandlerError>) -> AppResult<()> {
        let err = match result {
            Ok(()) => {
                debug!(task_id = %msg.id, task_type = %msg.task_type, "Task completed");
                return self.ack(raw).await;
            }
            Err(err) => err,
        };

        let mut next = msg.failed(&err.to_string());
        if is_skip_retry(&*err) || msg.retries_exhausted() {
            error!(
                task_id = %msg.id,
                task_type = %msg.task_type,
                retried = msg.retried,
                error = %err,
                "Task archived"
            );
            return self.archive(raw, &next.encode()?).await;
        }

        let delay = retry_delay(msg.retried);
        next.retried += 1;
        warn!(
            task_id = %msg.id,
            task_type = %msg.task_type,
            retried = next.retried,
            max_retry = msg.max_retry,
            delay_secs = delay.as_secs(),
            error = %err,
            "Task failed, scheduling retry"
        );
        self.schedule_retry(raw, &next, delay).await
    }
}

type InFlight = Arc<Mutex<HashMap<Uuid, String>>>;

pub struct QueueServer {
    broker: Broker,
    queue: String,
    options: ServerOptions,
}

impl std::fmt::Debug for QueueServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueServer")
            .field("queue", &self.queue)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl QueueServer {
    pub async fn connect(redis_url: &str, queue: &str, options: ServerOptions) -> AppResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, queue, options))
    }

    pub fn new(conn: ConnectionManager, queue: &str, mut options: ServerOptions) -> Self {
        options.concurrency = options.concurrency.max(1);
        Self {
            broker: Broker::new(conn, queue),
            queue: queue.to_string(),
            options,
        }
    }

    /// Process tasks until `shutdown` fires, then drain.
    ///
    /// In-flight handlers get `shutdown_timeout` to finish. After that their
    /// contexts are cancelled, stragglers are aborted and their messages are
    /// pushed back to pending for redelivery.
    pub async fn run(&self, mux: Arc<ServeMux>, shutdown: CancellationToken) -> AppResult<()> {
        let permits = Arc::new(Semaphore::new(self.options.concurrency));
        let handler_cancel = CancellationToken::new();
        let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));
        let mut tasks = JoinSet::new();

        let forwarder = tokio::spawn(forward_loop(
            self.broker.clone(),
            self.options.forward_interval,
            shutdown.clone(),
        ));

        info!(
            queue = %self.queue,
            concurrency = self.options.concurrency,
            task_types = ?mux.task_types(),
            "Queue server started"
        );

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => permit
                    .map_err(|e| AppError::Queue(format!("worker pool closed: {}", e)))?,
            };
            reap(&mut tasks);

            let raw = match self.broker.fetch().await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    drop(permit);
                    self.idle(&shutdown).await;
                    continue;
                }
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "Failed to fetch task");
                    drop(permit);
                    self.idle(&shutdown).await;
                    continue;
                }
            };

            let msg = match TaskMessage::decode(&raw) {
                Ok(msg) => msg,
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "Archiving malformed envelope");
                    if let Err(e) = self.broker.archive(&raw, &raw).await {
                        error!(error = %e, "Failed to archive malformed envelope");
                    }
                    continue;
                }
            };

            lock(&in_flight).insert(msg.id, raw.clone());
            let ctx = TaskContext::with_cancel(handler_cancel.child_token());
            tasks.spawn(process(
                self.broker.clone(),
                mux.clone(),
                ctx,
                msg,
                raw,
                in_flight.clone(),
                permit,
            ));
        }

        info!(queue = %self.queue, in_flight = tasks.len(), "Shutting down queue server");
        forwarder.abort();

        if !drain(&mut tasks, self.options.shutdown_timeout).await {
            warn!(
                remaining = tasks.len(),
                "Shutdown timeout reached, cancelling in-flight tasks"
            );
            handler_cancel.cancel();
            if !drain(&mut tasks, CANCEL_GRACE).await {
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
            }
        }

        let leftovers: Vec<(Uuid, String)> = lock(&in_flight).drain().collect();
        for (task_id, raw) in leftovers {
            match self.broker.requeue(&raw).await {
                Ok(()) => info!(task_id = %task_id, "Requeued interrupted task"),
                Err(e) => error!(task_id = %task_id, error = %e, "Failed to requeue interrupted task"),
            }
        }

        info!(queue = %self.queue, "Queue server stopped");
        Ok(())
    }

    async fn idle(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.options.poll_interval) => {}
        }
    }
}

fn lock(in_flight: &InFlight) -> std::sync::MutexGuard<'_, HashMap<Uuid, String>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

fn reap(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        if let Err(e) = result {
            if e.is_panic() {
                error!(error = %e, "Task worker panicked");
            }
        }
    }
}

/// `true` if every task finished within `timeout`.
async fn drain(tasks: &mut JoinSet<()>, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, async {
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(error = %e, "Task worker panicked");
                }
            }
        }
    })
    .await
    .is_ok()
}

async fn process(
    broker: Broker,
    mux: Arc<ServeMux>,
    ctx: TaskContext,
    msg: TaskMessage,
    raw: String,
    in_flight: InFlight,
    _permit: OwnedSemaphorePermit,
) {
    let result = match msg.payload_bytes() {
        Ok(payload) => mux.dispatch(&ctx, &msg.task_type, &payload).await,
        Err(e) => Err(Box::new(SkipRetry::new(e)) as HandlerError),
    };

    if let Err(e) = broker.settle(&msg, &raw, result).await {
        error!(task_id = %msg.id, error = %e, "Failed to settle task");
    }
    lock(&in_flight).remove(&msg.id);
}

async fn forward_loop(broker: Broker, period: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match broker.forward_due().await {
            Ok(0) => {}
            Ok(moved) => debug!(moved, "Forwarded due retries"),
            Err(e) => warn!(error = %e, "Failed to forward retries"),
        }
    }
}
