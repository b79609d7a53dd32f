pub mod position_monitor;
pub mod scheduler;
pub mod stats;
pub mod watchdog;

pub use position_monitor::PositionMonitor;
pub use scheduler::{BreakerConfig, CircuitBreaker, SchedulerConfig};
pub use stats::{StatsCollector, StatsSnapshot};
pub use watchdog::WatchdogConfig;
