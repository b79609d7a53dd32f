pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod execution;
pub mod metrics;
pub mod mexc;
pub mod models;
pub mod services;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::db::{PositionStore, TargetStore};
use crate::execution::{ExecutionEngine, SizingLimits};
use crate::services::{CircuitBreaker, PositionMonitor, StatsCollector};

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: AppConfig,
    pub engine: Arc<ExecutionEngine>,
    pub monitor: Arc<PositionMonitor>,
    pub targets: Arc<dyn TargetStore>,
    pub positions: Arc<dyn PositionStore>,
    pub stats: StatsCollector,
    pub breaker: Arc<CircuitBreaker>,
    pub pause_flag: Arc<AtomicBool>,
    pub limits: Arc<RwLock<SizingLimits>>,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}
