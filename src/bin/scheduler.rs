//! Auto-refresh scheduler.
//!
//! Any number of replicas may run; the Redis leader lock makes sure only one
//! of them enqueues refreshes per tick.

use std::sync::Arc;

use tracing::{error, info, warn};

use collector_lib::config::{SchedulerConfig, mask_url};
use collector_lib::db::DbPool;
use collector_lib::queue::QueueClient;
use collector_lib::services::vcs::Vcs;
use collector_lib::services::{
    AutoRefreshScheduler, GitVcs, LeaderLock, RedisLock, SchedulerSettings,
};
use collector_lib::{shutdown, telemetry};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match SchedulerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            telemetry::init_tracing(Default::default());
            error!("Failed to load configuration: {}", e);
            error!("Required: DATABASE_URL, REDIS_URL");
            std::process::exit(1);
        }
    };
    telemetry::init_tracing(config.log_format);

    if let Err(e) = run(config).await {
        error!("Scheduler failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: SchedulerConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        database_url = %mask_url(&config.database.url),
        redis_url = %mask_url(&config.redis_url),
        lock_key = %config.lock_key,
        lock_ttl_secs = config.lock_ttl.as_secs(),
        "Starting auto-refresh scheduler v{}",
        env!("CARGO_PKG_VERSION")
    );

    let pool = DbPool::new(&config.database).await?;
    info!("Database connection established");

    let lock = Arc::new(
        RedisLock::connect(&config.redis_url, config.lock_key.clone(), config.lock_ttl).await?,
    );
    let enqueuer = QueueClient::connect(&config.redis_url, &config.queue_name).await?;
    let vcs: Option<Arc<dyn Vcs>> = if config.skip_unchanged {
        Some(Arc::new(GitVcs::new()))
    } else {
        None
    };

    let scheduler = AutoRefreshScheduler::new(
        lock.clone(),
        Arc::new(pool),
        Arc::new(enqueuer),
        vcs,
        SchedulerSettings {
            interval: config.interval,
            refresh_after: config.refresh_after,
            batch_size: config.batch_size,
            skip_unchanged: config.skip_unchanged,
        },
    );

    scheduler.run(shutdown::signal_token()).await;
    drop(scheduler);

    let released = match Arc::try_unwrap(lock) {
        Ok(lock) => lock.close().await,
        Err(shared) => shared.release().await,
    };
    if let Err(e) = released {
        warn!(error = %e, "Failed to release scheduler lock on shutdown");
    }

    info!("Scheduler shutdown complete");
    Ok(())
}
