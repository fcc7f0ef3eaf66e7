//! Auto-refresh: periodically re-enqueue analyses for stale codebases.
//!
//! Only the instance holding the leader lock does any work in a tick. The
//! lock is renewed in the background for the duration of the tick; if it is
//! lost, the tick stops before the next enqueue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::TaskContext;
use crate::db::RefreshRepository;
use crate::error::{AppError, AppResult};
use crate::handlers::analyze::{AnalyzePayload, TYPE_ANALYZE};
use crate::models::DueCodebase;
use crate::queue::TaskEnqueuer;
use crate::services::distributed_lock::{LeaderLock, LockLease};
use crate::services::vcs::Vcs;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    /// A codebase is due once its latest completed analysis is this old.
    pub refresh_after: Duration,
    pub batch_size: u64,
    /// Compare the remote HEAD with the last analyzed commit before enqueuing.
    pub skip_unchanged: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            refresh_after: Duration::from_secs(24 * 60 * 60),
            batch_size: 100,
            skip_unchanged: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub due: usize,
    pub enqueued: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another instance holds the lock.
    NotLeader,
    Completed(TickStats),
    /// Lock lost or shutdown requested mid-tick.
    Aborted(TickStats),
}

pub struct AutoRefreshScheduler {
    lock: Arc<dyn LeaderLock>,
    repository: Arc<dyn RefreshRepository>,
    enqueuer: Arc<dyn TaskEnqueuer>,
    vcs: Option<Arc<dyn Vcs>>,
    settings: SchedulerSettings,
}

impl AutoRefreshScheduler {
    /// Without `vcs`, every due codebase is enqueued.
    pub fn new(
        lock: Arc<dyn LeaderLock>,
        repository: Arc<dyn RefreshRepository>,
        enqueuer: Arc<dyn TaskEnqueuer>,
        vcs: Option<Arc<dyn Vcs>>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            lock,
            repository,
            enqueuer,
            vcs,
            settings,
        }
    }

    /// Tick every interval until `shutdown`. The first tick runs immediately.
    pub async fn run(&self, shutdown: CancellationToken) {
        let period = self.settings.interval.max(MIN_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = period.as_secs(), "Auto-refresh scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let ctx = TaskContext::with_cancel(shutdown.child_token());
            match self.run_tick(&ctx).await {
                Ok(TickOutcome::NotLeader) => debug!("Not the leader, skipping tick"),
                Ok(outcome) => debug!(?outcome, "Tick finished"),
                Err(e) => error!(error = %e, "Auto-refresh tick failed"),
            }
        }
        info!("Auto-refresh scheduler stopped");
    }

    /// One leader-guarded pass over the due codebases.
    pub async fn run_tick(&self, ctx: &TaskContext) -> AppResult<TickOutcome> {
        if !self.lock.try_acquire().await? {
            return Ok(TickOutcome::NotLeader);
        }

        let lease = LockLease::start(self.lock.clone());
        let outcome = self.refresh(ctx, &lease).await;
        if let Err(e) = lease.release().await {
            warn!(error = %e, "Failed to release scheduler lock");
        }
        outcome
    }

    async fn refresh(&self, ctx: &TaskContext, lease: &LockLease) -> AppResult<TickOutcome> {
        let refresh_after = TimeDelta::from_std(self.settings.refresh_after)
            .map_err(|e| AppError::InvalidInput(format!("refresh interval out of range: {}", e)))?;
        let cutoff = Utc::now() - refresh_after;

        let due = match ctx
            .run(self.repository.list_due_for_refresh(cutoff, self.settings.batch_size))
            .await
        {
            Ok(due) => due?,
            Err(reason) => {
                warn!(reason = %reason, "Tick interrupted while listing codebases");
                return Ok(TickOutcome::Aborted(TickStats::default()));
            }
        };

        let mut stats = TickStats {
            due: due.len(),
            ..TickStats::default()
        };

        for codebase in &due {
            if lease.is_lost() {
                warn!(enqueued = stats.enqueued, "Scheduler lock lost, aborting tick");
                return Ok(TickOutcome::Aborted(stats));
            }
            if let Some(reason) = ctx.err() {
                warn!(reason = %reason, enqueued = stats.enqueued, "Tick interrupted");
                return Ok(TickOutcome::Aborted(stats));
            }

            if self.head_unchanged(ctx, codebase).await {
                debug!(owner = %codebase.owner, repo = %codebase.name, "HEAD unchanged, skipping");
                stats.skipped += 1;
                self.mark_checked(codebase).await;
                continue;
            }

            let payload = serde_json::to_vec(&AnalyzePayload {
                owner: codebase.owner.clone(),
                repo: codebase.name.clone(),
                user_id: codebase.requested_by.clone(),
            })?;

            match ctx.run(self.enqueuer.enqueue(TYPE_ANALYZE, &payload)).await {
                Ok(Ok(info)) => {
                    debug!(task_id = %info.id, owner = %codebase.owner, repo = %codebase.name, "Refresh enqueued");
                    stats.enqueued += 1;
                    self.mark_checked(codebase).await;
                }
                Ok(Err(e)) => {
                    error!(owner = %codebase.owner, repo = %codebase.name, error = %e, "Failed to enqueue refresh");
                    stats.failed += 1;
                }
                Err(reason) => {
                    warn!(reason = %reason, enqueued = stats.enqueued, "Tick interrupted");
                    return Ok(TickOutcome::Aborted(stats));
                }
            }
        }

        info!(
            due = stats.due,
            enqueued = stats.enqueued,
            skipped = stats.skipped,
            failed = stats.failed,
            "Auto-refresh tick completed"
        );
        Ok(TickOutcome::Completed(stats))
    }

    /// Moves the codebase behind the rest of the due list. A failure only
    /// means it may be picked again next tick.
    async fn mark_checked(&self, codebase: &DueCodebase) {
        if let Err(e) = self
            .repository
            .mark_refresh_checked(codebase.codebase_id, Utc::now())
            .await
        {
            warn!(
                owner = %codebase.owner,
                repo = %codebase.name,
                error = %e,
                "Failed to record refresh check"
            );
        }
    }

    /// Any failure to read the remote HEAD counts as changed.
    async fn head_unchanged(&self, ctx: &TaskContext, codebase: &DueCodebase) -> bool {
        if !self.settings.skip_unchanged {
            return false;
        }
        let Some(vcs) = &self.vcs else {
            return false;
        };

        match ctx.run(vcs.get_head_commit(ctx, &codebase.repo_url(), None)).await {
            Ok(Ok(head)) => head == codebase.last_commit_sha,
            Ok(Err(e)) => {
                warn!(
                    owner = %codebase.owner,
                    repo = %codebase.name,
                    error = %e,
                    "Failed to read remote HEAD, enqueuing anyway"
                );
                false
            }
            Err(_) => false,
        }
    }
}
