use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Global order-sizing limits, adjustable at runtime through the control
/// API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingLimits {
    /// Smallest order the exchange will accept, in quote units.
    pub min_order_quote: Decimal,
    /// Hard cap per order, in quote units.
    pub max_order_quote: Decimal,
    /// Cap as a fraction of the free quote balance (0.5 = half).
    pub max_balance_fraction: Decimal,
}

impl Default for SizingLimits {
    fn default() -> Self {
        Self {
            min_order_quote: Decimal::from(5),
            max_order_quote: Decimal::from(10_000),
            max_balance_fraction: Decimal::new(5, 1), // 0.5
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SizingError {
    #[error("requested size {requested} is below the exchange minimum {min}")]
    BelowMinimum { requested: Decimal, min: Decimal },

    #[error("requested size must be positive, got {0}")]
    NonPositive(Decimal),
}

/// Final order size in quote units: the requested size clamped to the
/// absolute cap and to the balance fraction when the free balance is
/// known. Pure and side-effect-free so repeated invocations for the same
/// attempt agree.
pub fn compute_order_size(
    requested: Decimal,
    free_balance: Option<Decimal>,
    limits: &SizingLimits,
) -> Result<Decimal, SizingError> {
    if requested <= Decimal::ZERO {
        return Err(SizingError::NonPositive(requested));
    }

    let mut size = requested.min(limits.max_order_quote);

    if let Some(balance) = free_balance {
        let cap = balance * limits.max_balance_fraction;
        size = size.min(cap);
    }

    if size < limits.min_order_quote {
        return Err(SizingError::BelowMinimum {
            requested: size,
            min: limits.min_order_quote,
        });
    }

    Ok(size)
}
