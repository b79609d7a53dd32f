use rust_decimal::Decimal;
use std::env;

const DEFAULT_MEXC_BASE_URL: &str = "https://api.mexc.com";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    // MEXC API credentials (required for signed endpoints)
    pub mexc_base_url: String,
    pub mexc_api_key: Option<String>,
    pub mexc_secret_key: Option<String>,
    pub mexc_max_in_flight: usize,
    pub mexc_timeout_ms: u64,

    // Operator API
    pub api_token: Option<String>,

    // Scheduler / orchestrator
    pub snipe_enabled: bool,
    pub scheduler_interval_secs: u64,
    pub fetch_limit: i64,
    pub max_concurrent_executions: usize,

    // Execution window and gate
    pub pre_launch_offset_ms: i64,
    pub post_launch_window_ms: i64,
    pub price_poll_interval_ms: u64,
    pub max_slippage_pct: Decimal,

    // Position monitor
    pub monitor_interval_secs: u64,

    // Watchdog and locks
    pub watchdog_interval_secs: u64,
    pub stuck_execution_timeout_secs: i64,
    pub lock_ttl_secs: i64,

    // Circuit breaker
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: i64,

    // Sizing limits
    pub min_order_quote: Decimal,
    pub max_order_quote: Decimal,
    pub max_balance_fraction: Decimal,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT").unwrap_or_else(|_| "8080".into()).parse()?,

            mexc_base_url: env::var("MEXC_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_MEXC_BASE_URL.into()),
            mexc_api_key: env::var("MEXC_API_KEY").ok(),
            mexc_secret_key: env::var("MEXC_SECRET_KEY").ok(),
            mexc_max_in_flight: parse_or("MEXC_MAX_IN_FLIGHT", 8),
            mexc_timeout_ms: parse_or("MEXC_TIMEOUT_MS", 5_000),

            api_token: env::var("API_TOKEN").ok().filter(|t| !t.is_empty()),

            snipe_enabled: parse_or("SNIPE_ENABLED", false),
            scheduler_interval_secs: parse_or("SCHEDULER_INTERVAL_SECS", 30),
            fetch_limit: parse_or("FETCH_LIMIT", 20),
            max_concurrent_executions: parse_or("MAX_CONCURRENT_EXECUTIONS", 3),

            pre_launch_offset_ms: parse_or("PRE_LAUNCH_OFFSET_MS", 500),
            post_launch_window_ms: parse_or("POST_LAUNCH_WINDOW_MS", 700),
            price_poll_interval_ms: parse_or("PRICE_POLL_INTERVAL_MS", 100),
            max_slippage_pct: parse_or("MAX_SLIPPAGE_PCT", Decimal::from(3)),

            monitor_interval_secs: parse_or("MONITOR_INTERVAL_SECS", 5),

            watchdog_interval_secs: parse_or("WATCHDOG_INTERVAL_SECS", 30),
            stuck_execution_timeout_secs: parse_or("STUCK_EXECUTION_TIMEOUT_SECS", 120),
            lock_ttl_secs: parse_or("LOCK_TTL_SECS", 60),

            breaker_failure_threshold: parse_or("BREAKER_FAILURE_THRESHOLD", 5),
            breaker_cooldown_secs: parse_or("BREAKER_COOLDOWN_SECS", 300),

            min_order_quote: parse_or("MIN_ORDER_QUOTE", Decimal::from(5)),
            max_order_quote: parse_or("MAX_ORDER_QUOTE", Decimal::from(10_000)),
            max_balance_fraction: parse_or("MAX_BALANCE_FRACTION", Decimal::new(5, 1)),
        })
    }

    /// Returns true if both MEXC API credentials are configured.
    pub fn has_mexc_auth(&self) -> bool {
        self.mexc_api_key.is_some() && self.mexc_secret_key.is_some()
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
