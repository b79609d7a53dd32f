use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::sync::RwLock;

use snipebot::api::router::create_router;
use snipebot::config::AppConfig;
use snipebot::db::{
    self, ExecutionLog, LockStore, PgExecutionLog, PgLockStore, PgPositionStore, PgTargetStore,
    PositionStore, TargetStore,
};
use snipebot::execution::{EngineConfig, ExecutionEngine, GateConfig, SizingLimits};
use snipebot::mexc::{Exchange, MexcClient};
use snipebot::services::{
    scheduler, watchdog, BreakerConfig, CircuitBreaker, PositionMonitor, SchedulerConfig,
    StatsCollector, WatchdogConfig,
};
use snipebot::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!("Connecting to database...");
    // A dead store is fatal at startup: no loop is spawned without it.
    let pool = db::init_pool(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database connected");

    let metrics_handle = snipebot::metrics::init_metrics();

    // --- Stores ---
    let targets: Arc<dyn TargetStore> = Arc::new(PgTargetStore::new(pool.clone()));
    let positions: Arc<dyn PositionStore> = Arc::new(PgPositionStore::new(pool.clone()));
    let history: Arc<dyn ExecutionLog> = Arc::new(PgExecutionLog::new(pool.clone()));
    let locks: Arc<dyn LockStore> = Arc::new(PgLockStore::new(pool.clone()));

    // --- Exchange client ---
    if !config.has_mexc_auth() {
        tracing::warn!("No MEXC API credentials — signed endpoints (orders, balances) will fail");
    }
    let exchange: Arc<dyn Exchange> = Arc::new(MexcClient::new(
        config.mexc_base_url.clone(),
        config.mexc_api_key.clone().unwrap_or_default(),
        config.mexc_secret_key.clone().unwrap_or_default(),
        config.mexc_max_in_flight,
        StdDuration::from_millis(config.mexc_timeout_ms),
    )?);

    // --- Execution engine ---
    let limits = Arc::new(RwLock::new(SizingLimits {
        min_order_quote: config.min_order_quote,
        max_order_quote: config.max_order_quote,
        max_balance_fraction: config.max_balance_fraction,
    }));

    let engine_config = EngineConfig {
        gate: GateConfig {
            pre_launch_offset: Duration::milliseconds(config.pre_launch_offset_ms),
            post_launch_window: Duration::milliseconds(config.post_launch_window_ms),
            max_slippage_pct: config.max_slippage_pct,
        },
        lock_ttl: Duration::seconds(config.lock_ttl_secs),
        max_gate_wait: StdDuration::from_secs(config.scheduler_interval_secs),
        price_poll_interval: StdDuration::from_millis(config.price_poll_interval_ms),
        quote_asset: "USDT".into(),
    };

    let engine = Arc::new(ExecutionEngine::new(
        targets.clone(),
        positions.clone(),
        history.clone(),
        locks.clone(),
        exchange.clone(),
        limits.clone(),
        engine_config,
    ));

    let stats = StatsCollector::new();
    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig {
        failure_threshold: config.breaker_failure_threshold,
        cooldown: Duration::seconds(config.breaker_cooldown_secs),
    }));

    // Paused at startup unless sniping is enabled; the control API can
    // flip this at runtime.
    let pause_flag = Arc::new(AtomicBool::new(!config.snipe_enabled));
    let shutdown = Arc::new(AtomicBool::new(false));

    // --- Position monitor (risk management runs even when paused) ---
    let monitor = Arc::new(PositionMonitor::new(
        positions.clone(),
        history.clone(),
        locks.clone(),
        exchange.clone(),
        stats.clone(),
        Duration::seconds(config.lock_ttl_secs),
    ));
    tokio::spawn(monitor.clone().run(config.monitor_interval_secs, shutdown.clone()));

    // --- Watchdog ---
    tokio::spawn(watchdog::run_watchdog(
        targets.clone(),
        locks.clone(),
        shutdown.clone(),
        WatchdogConfig {
            interval: StdDuration::from_secs(config.watchdog_interval_secs),
            stuck_timeout: Duration::seconds(config.stuck_execution_timeout_secs),
        },
    ));

    // --- Scheduler ---
    tokio::spawn(scheduler::run_scheduler(
        engine.clone(),
        targets.clone(),
        stats.clone(),
        breaker.clone(),
        pause_flag.clone(),
        shutdown.clone(),
        SchedulerConfig {
            interval: StdDuration::from_secs(config.scheduler_interval_secs),
            fetch_limit: config.fetch_limit,
            max_concurrent: config.max_concurrent_executions,
        },
    ));

    tracing::info!(
        snipe_enabled = config.snipe_enabled,
        scheduler_interval = config.scheduler_interval_secs,
        monitor_interval = config.monitor_interval_secs,
        "Auto-sniping service started"
    );

    let state = AppState {
        db: pool,
        config,
        engine,
        monitor,
        targets,
        positions,
        stats,
        breaker,
        pause_flag,
        limits,
        metrics_handle,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {addr}");

    let shutdown_flag = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received — stopping loops");
            shutdown_flag.store(true, Ordering::Relaxed);
        })
        .await?;

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();
}
