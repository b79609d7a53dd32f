use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::fmt;

use crate::models::{Side, SnipeTarget};

/// Execution-window and slippage configuration. Defaults: the window opens
/// 500 ms before the nominal execution time and stays open 700 ms after.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub pre_launch_offset: Duration,
    pub post_launch_window: Duration,
    /// Tolerated adverse distance from a limit entry price, in percent.
    pub max_slippage_pct: Decimal,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            pre_launch_offset: Duration::milliseconds(500),
            post_launch_window: Duration::milliseconds(700),
            max_slippage_pct: Decimal::from(3),
        }
    }
}

/// Admission decision for executing a target right now. Deterministic in
/// (target, now, price); status bookkeeping lives in the target store,
/// not here.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Execute now, using this price snapshot for sizing.
    Admit { price: Decimal },
    /// Window not open yet; re-evaluate after `opens_in`.
    Defer { opens_in: Duration },
    Reject(RejectReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// The execution window has closed. Permanent.
    WindowExpired,
    /// No market price could be obtained. Retryable.
    PriceUnavailable,
    /// Market moved beyond the slippage tolerance of the limit entry
    /// price. Permanent.
    SlippageExceeded { limit: Decimal, market: Decimal },
}

impl RejectReason {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RejectReason::PriceUnavailable)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::WindowExpired => write!(f, "execution window expired"),
            RejectReason::PriceUnavailable => write!(f, "market price unavailable"),
            RejectReason::SlippageExceeded { limit, market } => {
                write!(f, "slippage exceeded: limit {limit}, market {market}")
            }
        }
    }
}

/// Evaluate whether `target` may execute at `now` given the latest market
/// `price` (None when the price fetch failed).
pub fn evaluate(
    target: &SnipeTarget,
    now: DateTime<Utc>,
    price: Option<Decimal>,
    config: &GateConfig,
) -> GateDecision {
    // 1-3. Window check. A null execution time means "always open".
    if let Some(nominal) = target.execution_time {
        let opens = nominal - config.pre_launch_offset;
        let closes = nominal + config.post_launch_window;

        if now < opens {
            return GateDecision::Defer {
                opens_in: opens - now,
            };
        }
        if now > closes {
            return GateDecision::Reject(RejectReason::WindowExpired);
        }
    }

    // 4. Price availability.
    let market = match price {
        Some(p) => p,
        None => return GateDecision::Reject(RejectReason::PriceUnavailable),
    };

    // 5. Slippage against a limit entry price, adverse direction only:
    //    buys fail above the limit, sells below it.
    if let Some(limit) = target.entry_price {
        if !limit.is_zero() {
            let tolerance = limit * config.max_slippage_pct / Decimal::from(100);
            let breached = match target.order_side() {
                Side::Buy => market > limit + tolerance,
                Side::Sell => market < limit - tolerance,
            };
            if breached {
                return GateDecision::Reject(RejectReason::SlippageExceeded { limit, market });
            }
        }
    }

    GateDecision::Admit { price: market }
}
