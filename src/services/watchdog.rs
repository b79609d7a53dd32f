use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::time::{interval, MissedTickBehavior};

use crate::db::{LockStore, StoreError, TargetStore, TargetUpdate};
use crate::models::{SnipeTarget, TargetStatus};

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub interval: StdDuration,
    /// How long a target may sit in `executing` before it is reclaimed.
    pub stuck_timeout: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: StdDuration::from_secs(30),
            stuck_timeout: Duration::seconds(120),
        }
    }
}

/// Reclaims targets abandoned mid-flight (crashed or cancelled worker)
/// and reaps expired transaction locks. A reclaimed target goes back to
/// `ready` while retry budget remains (its next attempt runs the
/// engine's exchange reconciliation before anything is resubmitted), or
/// to `failed` once the budget is gone.
pub async fn run_watchdog(
    targets: Arc<dyn TargetStore>,
    locks: Arc<dyn LockStore>,
    shutdown: Arc<AtomicBool>,
    config: WatchdogConfig,
) {
    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        stuck_timeout_secs = config.stuck_timeout.num_seconds(),
        "Watchdog started"
    );

    loop {
        ticker.tick().await;
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        sweep(targets.as_ref(), locks.as_ref(), Utc::now(), config.stuck_timeout).await;
    }

    tracing::info!("Watchdog stopped");
}

/// One reclamation pass: reap expired locks, then reclaim every target
/// stuck in `executing` since before `now - stuck_timeout`.
pub async fn sweep(
    targets: &dyn TargetStore,
    locks: &dyn LockStore,
    now: chrono::DateTime<Utc>,
    stuck_timeout: Duration,
) {
    match locks.expire_stale(now).await {
        Ok(0) => {}
        Ok(n) => tracing::warn!(count = n, "Watchdog: expired stale locks"),
        Err(e) => tracing::error!(error = %e, "Watchdog: lock expiry sweep failed"),
    }

    let stuck = match targets.fetch_stuck(now - stuck_timeout).await {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "Watchdog: failed to fetch stuck targets");
            return;
        }
    };

    for target in &stuck {
        reclaim(targets, target).await;
    }
}

async fn reclaim(targets: &dyn TargetStore, target: &SnipeTarget) {
    tracing::warn!(
        target_id = target.id,
        symbol = %target.symbol,
        retries = target.current_retries,
        "Watchdog: reclaiming target stuck in executing"
    );

    let new_count = match targets.increment_retry(target.id).await {
        Ok(n) => n,
        Err(StoreError::Conflict) => target.max_retries,
        Err(e) => {
            tracing::error!(target_id = target.id, error = %e, "Watchdog: retry increment failed");
            return;
        }
    };

    let result = if new_count < target.max_retries {
        targets
            .transition(
                target.id,
                Some(TargetStatus::Executing),
                TargetStatus::Ready,
                TargetUpdate {
                    next_attempt_at: Some(Utc::now() + Duration::seconds(5 * i64::from(new_count))),
                    error_message: Some("execution timed out — reclaimed by watchdog".into()),
                    ..Default::default()
                },
            )
            .await
    } else {
        targets
            .transition(
                target.id,
                Some(TargetStatus::Executing),
                TargetStatus::Failed,
                TargetUpdate {
                    execution_status: Some("failed".into()),
                    error_message: Some(
                        "execution timed out and retry budget exhausted".into(),
                    ),
                    ..Default::default()
                },
            )
            .await
    };

    match result {
        Ok(()) => {}
        Err(StoreError::Conflict) => {
            // The stuck worker woke up and finished in the meantime
            tracing::debug!(target_id = target.id, "Watchdog: target moved on its own");
        }
        Err(e) => {
            tracing::error!(target_id = target.id, error = %e, "Watchdog: reclaim transition failed");
        }
    }
}
