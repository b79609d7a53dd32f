use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, ensure, Context};
use chrono::{Duration, Utc};
use metrics::gauge;
use rust_decimal::Decimal;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

use crate::db::{ExecutionLog, LockStore, PositionStore};
use crate::mexc::{Exchange, OrderRequest};
use crate::models::execution::{close_client_order_id, execution_status, NewExecutionRecord};
use crate::models::lock::close_lock_key;
use crate::models::position::{stop_loss_price, take_profit_price};
use crate::models::{OrderType, Position, PositionSide};

use super::stats::StatsCollector;

/// Exit reason constants recorded on closed positions.
pub mod exit_reason {
    pub const STOP_LOSS: &str = "stop_loss";
    pub const TAKE_PROFIT: &str = "take_profit";
    pub const MANUAL: &str = "manual";
}

/// Watches open positions against their stop-loss/take-profit thresholds
/// and flattens them when one is breached. A single sweep covers all open
/// positions per tick, so resource usage stays bounded however many are
/// open; one failed evaluation never stops the others.
pub struct PositionMonitor {
    positions: Arc<dyn PositionStore>,
    history: Arc<dyn ExecutionLog>,
    locks: Arc<dyn LockStore>,
    exchange: Arc<dyn Exchange>,
    stats: StatsCollector,
    lock_ttl: Duration,
}

impl PositionMonitor {
    pub fn new(
        positions: Arc<dyn PositionStore>,
        history: Arc<dyn ExecutionLog>,
        locks: Arc<dyn LockStore>,
        exchange: Arc<dyn Exchange>,
        stats: StatsCollector,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            positions,
            history,
            locks,
            exchange,
            stats,
            lock_ttl,
        }
    }

    /// Sweep loop. Runs until the shutdown flag is set; shutdown cancels
    /// all pending watches at once because the watches ARE the sweep.
    pub async fn run(self: Arc<Self>, interval_secs: u64, shutdown: Arc<AtomicBool>) {
        let mut ticker = interval(std::time::Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(interval_secs, "Position monitor started");

        loop {
            ticker.tick().await;
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            self.sweep().await;
        }

        tracing::info!("Position monitor stopped");
    }

    pub async fn sweep(&self) {
        let positions = match self.positions.open_positions().await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "Position monitor: failed to fetch open positions");
                return;
            }
        };

        gauge!("open_positions").set(positions.len() as f64);

        if positions.is_empty() {
            tracing::debug!("Position monitor: no open positions");
            return;
        }

        for pos in &positions {
            if let Err(e) = self.evaluate(pos).await {
                // Stays open and is re-evaluated next tick; closing risk
                // exposure beats giving up.
                tracing::warn!(
                    position_id = %pos.id,
                    symbol = %pos.symbol,
                    error = %e,
                    "Position evaluation failed — will retry next sweep"
                );
            }
        }
    }

    async fn evaluate(&self, pos: &Position) -> anyhow::Result<()> {
        let price = self
            .exchange
            .current_price(&pos.symbol)
            .await
            .context("price fetch failed")?;

        let unrealized = pos.pnl_at(price);
        if let Err(e) = self.positions.update_price(pos.id, price, unrealized).await {
            tracing::warn!(position_id = %pos.id, error = %e, "Failed to persist mark price");
        }

        let Some(reason) = check_trigger(pos, price) else {
            tracing::debug!(
                position_id = %pos.id,
                symbol = %pos.symbol,
                entry = %pos.entry_price,
                current = %price,
                "Position within thresholds"
            );
            return Ok(());
        };

        tracing::info!(
            position_id = %pos.id,
            symbol = %pos.symbol,
            entry = %pos.entry_price,
            current = %price,
            reason,
            "Threshold breached — closing position"
        );

        self.close_with_lock(pos, price, reason).await
    }

    /// Close on explicit operator request.
    pub async fn close_position(&self, position_id: Uuid, reason: &str) -> anyhow::Result<Position> {
        let pos = self.positions.get(position_id).await?;
        ensure!(pos.is_open(), "position {position_id} is not open");

        let price = self
            .exchange
            .current_price(&pos.symbol)
            .await
            .context("price fetch failed")?;

        self.close_with_lock(&pos, price, reason).await?;
        Ok(self.positions.get(position_id).await?)
    }

    async fn close_with_lock(
        &self,
        pos: &Position,
        price: Decimal,
        reason: &str,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        let lock_key = close_lock_key(pos.id);
        let client_order_id = close_client_order_id(pos.id, now);

        let acquired = self
            .locks
            .acquire(&lock_key, &client_order_id, self.lock_ttl, now)
            .await?;
        if !acquired {
            bail!("close already in flight for position {}", pos.id);
        }

        let result = self.close_locked(pos, price, reason, &client_order_id).await;

        if let Err(e) = self.locks.release(&lock_key, &client_order_id).await {
            tracing::warn!(position_id = %pos.id, error = %e, "Failed to release close lock");
        }

        result
    }

    async fn close_locked(
        &self,
        pos: &Position,
        price: Decimal,
        reason: &str,
        client_order_id: &str,
    ) -> anyhow::Result<()> {
        // Re-read under the lock: the contender we raced may have already
        // flattened it.
        let current = self.positions.get(pos.id).await?;
        if !current.is_open() {
            tracing::debug!(position_id = %pos.id, "Position already closed — skipping");
            return Ok(());
        }

        let exit_side = current.position_side().exit_order_side();

        let submitted = NewExecutionRecord {
            target_id: current.target_id,
            position_id: Some(current.id),
            user_id: current.user_id.clone(),
            symbol: current.symbol.clone(),
            side: exit_side.to_string(),
            attempt: 0,
            client_order_id: client_order_id.to_string(),
            exchange_order_id: None,
            status: execution_status::SUBMITTED.into(),
            quantity: Some(current.quantity),
            price: Some(price),
            quote_amount: None,
            error_message: None,
        };
        self.history
            .record(submitted)
            .await
            .context("failed to record close intent")?;

        let request = OrderRequest {
            symbol: current.symbol.clone(),
            side: exit_side,
            order_type: OrderType::Market,
            quantity: Some(current.quantity),
            quote_order_qty: None,
            price: None,
            client_order_id: client_order_id.to_string(),
        };

        match self.exchange.place_order(&request).await {
            Ok(resp) => {
                let exit_price = resp.fill_price().unwrap_or(price);
                let realized = current.pnl_at(exit_price);

                let filled = NewExecutionRecord {
                    target_id: current.target_id,
                    position_id: Some(current.id),
                    user_id: current.user_id.clone(),
                    symbol: current.symbol.clone(),
                    side: exit_side.to_string(),
                    attempt: 0,
                    client_order_id: client_order_id.to_string(),
                    exchange_order_id: Some(resp.order_id.clone()),
                    status: execution_status::FILLED.into(),
                    quantity: Some(current.quantity),
                    price: Some(exit_price),
                    quote_amount: None,
                    error_message: None,
                };
                if let Err(e) = self.history.record(filled).await {
                    tracing::error!(position_id = %current.id, error = %e, "Failed to record close fill");
                }

                self.positions
                    .close(current.id, exit_price, realized, reason, Utc::now())
                    .await
                    .context("exit order filled but close write failed")?;

                self.stats.record_close(reason, realized).await;

                tracing::info!(
                    position_id = %current.id,
                    symbol = %current.symbol,
                    exit_price = %exit_price,
                    realized_pnl = %realized,
                    reason,
                    "Position closed"
                );

                Ok(())
            }
            Err(e) => {
                let failed = NewExecutionRecord {
                    target_id: current.target_id,
                    position_id: Some(current.id),
                    user_id: current.user_id.clone(),
                    symbol: current.symbol.clone(),
                    side: exit_side.to_string(),
                    attempt: 0,
                    client_order_id: client_order_id.to_string(),
                    exchange_order_id: None,
                    status: execution_status::FAILED.into(),
                    quantity: Some(current.quantity),
                    price: Some(price),
                    quote_amount: None,
                    error_message: Some(e.to_string()),
                };
                if let Err(log_err) = self.history.record(failed).await {
                    tracing::error!(position_id = %current.id, error = %log_err, "Failed to record close failure");
                }

                bail!("exit order failed: {e}");
            }
        }
    }

    /// Atomically replace the stop-loss watch: the new price is recomputed
    /// from the entry price and installed in one conditional update.
    pub async fn update_stop_loss(&self, position_id: Uuid, pct: Decimal) -> anyhow::Result<Position> {
        ensure!(pct > Decimal::ZERO, "stop-loss percent must be positive");

        let pos = self.positions.get(position_id).await?;
        ensure!(pos.is_open(), "position {position_id} is not open");

        let price = stop_loss_price(pos.position_side(), pos.entry_price, pct);
        self.positions.set_stop_loss(position_id, pct, price).await?;

        tracing::info!(
            position_id = %position_id,
            pct = %pct,
            price = %price,
            "Stop-loss updated"
        );

        Ok(self.positions.get(position_id).await?)
    }

    /// Atomically replace the take-profit watch.
    pub async fn update_take_profit(
        &self,
        position_id: Uuid,
        pct: Decimal,
    ) -> anyhow::Result<Position> {
        ensure!(pct > Decimal::ZERO, "take-profit percent must be positive");

        let pos = self.positions.get(position_id).await?;
        ensure!(pos.is_open(), "position {position_id} is not open");

        let price = take_profit_price(pos.position_side(), pos.entry_price, pct);
        self.positions.set_take_profit(position_id, pct, price).await?;

        tracing::info!(
            position_id = %position_id,
            pct = %pct,
            price = %price,
            "Take-profit updated"
        );

        Ok(self.positions.get(position_id).await?)
    }
}

/// Side-aware trigger check. Stop-loss takes precedence when a price gap
/// breaches both thresholds at once.
fn check_trigger(pos: &Position, price: Decimal) -> Option<&'static str> {
    let side = pos.position_side();

    if let Some(sl) = pos.stop_loss_price {
        let hit = match side {
            PositionSide::Long => price <= sl,
            PositionSide::Short => price >= sl,
        };
        if hit {
            return Some(exit_reason::STOP_LOSS);
        }
    }

    if let Some(tp) = pos.take_profit_price {
        let hit = match side {
            PositionSide::Long => price >= tp,
            PositionSide::Short => price <= tp,
        };
        if hit {
            return Some(exit_reason::TAKE_PROFIT);
        }
    }

    None
}
