use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, Utc};
use metrics::gauge;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};

use crate::db::TargetStore;
use crate::execution::{ExecutionEngine, ExecutionOutcome};

use super::stats::StatsCollector;

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive execution failures that open the breaker.
    pub failure_threshold: u32,
    /// How long dispatch stays paused once open.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::seconds(300),
        }
    }
}

#[derive(Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub state: &'static str,
    pub consecutive_failures: u32,
    pub open_until: Option<DateTime<Utc>>,
}

/// Stops dispatching new executions after a run of failures, for a
/// cooldown period. Position monitoring is unaffected: risk management
/// keeps running while entries are paused.
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_failures = 0;
    }

    pub async fn record_failure(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        state.consecutive_failures += 1;

        if state.consecutive_failures >= self.config.failure_threshold
            && state.open_until.is_none()
        {
            let until = now + self.config.cooldown;
            state.open_until = Some(until);
            tracing::error!(
                failures = state.consecutive_failures,
                open_until = %until,
                "Circuit breaker OPEN — entry dispatch paused"
            );
        }
    }

    pub async fn is_open(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().await;
        match state.open_until {
            Some(until) if now < until => true,
            Some(_) => {
                // Cooldown elapsed: close and start fresh
                state.open_until = None;
                state.consecutive_failures = 0;
                tracing::info!("Circuit breaker closed after cooldown");
                false
            }
            None => false,
        }
    }

    pub async fn status(&self, now: DateTime<Utc>) -> BreakerStatus {
        let state = self.state.lock().await;
        let open = matches!(state.open_until, Some(until) if now < until);
        BreakerStatus {
            state: if open { "open" } else { "closed" },
            consecutive_failures: state.consecutive_failures,
            open_until: state.open_until.filter(|until| now < *until),
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler loop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: StdDuration,
    pub fetch_limit: i64,
    /// Bounded worker pool size. Execution is rare and high-stakes, not a
    /// throughput workload.
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: StdDuration::from_secs(30),
            fetch_limit: 20,
            max_concurrent: 3,
        }
    }
}

/// Fixed-cadence orchestrator: pulls eligible targets and dispatches them
/// to the execution engine under a bounded worker pool. A tick that is
/// still running when the next is due skips rather than overlaps.
pub async fn run_scheduler(
    engine: Arc<ExecutionEngine>,
    targets: Arc<dyn TargetStore>,
    stats: StatsCollector,
    breaker: Arc<CircuitBreaker>,
    pause_flag: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    config: SchedulerConfig,
) {
    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let lookahead =
        Duration::from_std(config.interval).unwrap_or_else(|_| Duration::seconds(30));

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        max_concurrent = config.max_concurrent,
        "Scheduler started"
    );

    loop {
        ticker.tick().await;

        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        if pause_flag.load(Ordering::Relaxed) {
            tracing::debug!("Sniping paused — skipping scheduler tick");
            continue;
        }

        let now = Utc::now();
        if breaker.is_open(now).await {
            tracing::warn!("Circuit breaker open — skipping scheduler tick");
            continue;
        }

        // Fetch with one tick of lookahead so the engine can hold a claim
        // up to the window's opening edge instead of missing it.
        let eligible = match targets.fetch_eligible(config.fetch_limit, now, lookahead).await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(error = %e, "Scheduler: failed to fetch eligible targets");
                continue;
            }
        };

        gauge!("snipe_targets_eligible").set(eligible.len() as f64);

        if eligible.is_empty() {
            tracing::debug!("Scheduler: no eligible targets");
            continue;
        }

        tracing::info!(count = eligible.len(), "Scheduler: dispatching targets");

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        let mut workers = JoinSet::new();

        for target in eligible {
            let engine = engine.clone();
            let semaphore = semaphore.clone();
            let target_id = target.id;
            let confidence = target.confidence;

            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("scheduler semaphore closed");
                let started = Instant::now();
                let outcome = engine.execute_target(target_id).await;
                (target_id, confidence, outcome, started.elapsed())
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((target_id, confidence, outcome, latency)) => {
                    stats
                        .record_execution(outcome.label(), latency, confidence)
                        .await;

                    match &outcome {
                        ExecutionOutcome::Success { position_id, fill_price } => {
                            tracing::info!(
                                target_id,
                                position_id = %position_id,
                                fill_price = %fill_price,
                                "Scheduler: target executed"
                            );
                            breaker.record_success().await;
                        }
                        ExecutionOutcome::Failed(msg) => {
                            tracing::error!(target_id, error = %msg, "Scheduler: execution failed");
                            breaker.record_failure(Utc::now()).await;
                        }
                        ExecutionOutcome::Rejected(reason) => {
                            tracing::warn!(target_id, reason = %reason, "Scheduler: target rejected");
                        }
                        _ => {}
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Scheduler: execution worker panicked");
                    breaker.record_failure(Utc::now()).await;
                }
            }
        }
    }

    tracing::info!("Scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::seconds(60),
        })
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold() {
        let cb = breaker();
        let now = Utc::now();

        cb.record_failure(now).await;
        cb.record_failure(now).await;
        assert!(!cb.is_open(now).await);

        cb.record_failure(now).await;
        assert!(cb.is_open(now).await);

        let status = cb.status(now).await;
        assert_eq!(status.state, "open");
    }

    #[tokio::test]
    async fn test_breaker_closes_after_cooldown() {
        let cb = breaker();
        let now = Utc::now();

        for _ in 0..3 {
            cb.record_failure(now).await;
        }
        assert!(cb.is_open(now).await);

        let later = now + Duration::seconds(61);
        assert!(!cb.is_open(later).await);
        // Failure count resets with the close
        assert_eq!(cb.status(later).await.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let cb = breaker();
        let now = Utc::now();

        cb.record_failure(now).await;
        cb.record_failure(now).await;
        cb.record_success().await;
        cb.record_failure(now).await;
        cb.record_failure(now).await;

        assert!(!cb.is_open(now).await, "streak was broken by a success");
    }
}
