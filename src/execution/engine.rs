use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::{ExecutionLog, LockStore, PositionStore, StoreError, TargetStore, TargetUpdate};
use crate::mexc::{Exchange, OrderRequest, OrderResponse};
use crate::models::execution::{
    entry_client_order_id, execution_status, NewExecutionRecord,
};
use crate::models::lock::trade_lock_key;
use crate::models::position::{stop_loss_price, take_profit_price};
use crate::models::{
    ExecutionRecord, NewPosition, OrderType, PositionSide, Side, SnipeTarget, TargetStatus,
};

use super::price_gate::{self, GateConfig, GateDecision};
use super::sizing::{self, SizingLimits};

/// Result of one execution attempt, as seen by the scheduler. The engine
/// never lets an error escape: every path ends in a persisted status
/// transition and one of these values.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success {
        position_id: Uuid,
        fill_price: Decimal,
    },
    /// Execution window not open yet; the target went back to `ready`.
    Deferred,
    /// Another worker holds the trade lock. No retry was consumed.
    Busy,
    /// The target was claimed or finished by someone else. Benign.
    Conflict,
    /// Permanently rejected (window expired, slippage, bad configuration).
    Rejected(String),
    /// Attempt failed; retried on a later tick if budget remained.
    Failed(String),
}

impl ExecutionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success { .. } => "success",
            ExecutionOutcome::Deferred => "deferred",
            ExecutionOutcome::Busy => "busy",
            ExecutionOutcome::Conflict => "conflict",
            ExecutionOutcome::Rejected(_) => "rejected",
            ExecutionOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub gate: GateConfig,
    /// TTL on the trade lock; must outlast the longest gate wait.
    pub lock_ttl: Duration,
    /// Longest the engine holds a claim waiting for a window to open.
    pub max_gate_wait: StdDuration,
    /// Price re-poll cadence while inside an open window with no price.
    pub price_poll_interval: StdDuration,
    pub quote_asset: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig::default(),
            lock_ttl: Duration::seconds(60),
            max_gate_wait: StdDuration::from_secs(30),
            price_poll_interval: StdDuration::from_millis(100),
            quote_asset: "USDT".into(),
        }
    }
}

/// Converts an eligible target into an exchange order and persists the
/// outcome exactly once. All collaborators are injected; the engine holds
/// no global state.
pub struct ExecutionEngine {
    targets: Arc<dyn TargetStore>,
    positions: Arc<dyn PositionStore>,
    history: Arc<dyn ExecutionLog>,
    locks: Arc<dyn LockStore>,
    exchange: Arc<dyn Exchange>,
    limits: Arc<RwLock<SizingLimits>>,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        targets: Arc<dyn TargetStore>,
        positions: Arc<dyn PositionStore>,
        history: Arc<dyn ExecutionLog>,
        locks: Arc<dyn LockStore>,
        exchange: Arc<dyn Exchange>,
        limits: Arc<RwLock<SizingLimits>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            targets,
            positions,
            history,
            locks,
            exchange,
            limits,
            config,
        }
    }

    /// Execute a single target. Re-invoking for a target already in
    /// `executing` or a terminal state is a no-op (`Conflict`): the status
    /// check plus the compare-and-swap claim make double-submission
    /// impossible, and the trade lock serializes attempts across workers.
    pub async fn execute_target(&self, target_id: i64) -> ExecutionOutcome {
        let target = match self.targets.get(target_id).await {
            Ok(t) => t,
            Err(StoreError::NotFound) => {
                return ExecutionOutcome::Failed(format!("target {target_id} not found"))
            }
            Err(e) => return ExecutionOutcome::Failed(format!("target load failed: {e}")),
        };

        let status = match target.status() {
            Some(s) => s,
            None => {
                return ExecutionOutcome::Failed(format!(
                    "target {target_id} has unknown status '{}'",
                    target.status
                ))
            }
        };

        if !matches!(status, TargetStatus::Ready | TargetStatus::Pending) {
            tracing::debug!(
                target_id,
                status = %status,
                "Target not executable — skipping"
            );
            return ExecutionOutcome::Conflict;
        }

        let idempotency_key = entry_client_order_id(target.id, target.current_retries);
        let lock_key = trade_lock_key(&target.symbol, target.order_side());

        match self
            .locks
            .acquire(&lock_key, &idempotency_key, self.config.lock_ttl, Utc::now())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(target_id, lock_key = %lock_key, "Trade lock busy");
                return ExecutionOutcome::Busy;
            }
            Err(e) => return ExecutionOutcome::Failed(format!("lock acquisition failed: {e}")),
        }

        let outcome = self
            .execute_locked(&target, status, &idempotency_key)
            .await;

        if let Err(e) = self.locks.release(&lock_key, &idempotency_key).await {
            tracing::warn!(target_id, error = %e, "Failed to release trade lock");
        }

        tracing::info!(
            target_id,
            symbol = %target.symbol,
            outcome = outcome.label(),
            "Execution attempt finished"
        );

        outcome
    }

    async fn execute_locked(
        &self,
        target: &SnipeTarget,
        from: TargetStatus,
        client_order_id: &str,
    ) -> ExecutionOutcome {
        // Claim the target. Losing the race here is the normal way a
        // second worker bows out.
        match self
            .targets
            .transition(
                target.id,
                Some(from),
                TargetStatus::Executing,
                TargetUpdate::default(),
            )
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict) => return ExecutionOutcome::Conflict,
            Err(e) => return ExecutionOutcome::Failed(format!("claim failed: {e}")),
        }

        // A previous attempt may have placed an order whose outcome never
        // got persisted. Resolve that against the exchange before anything
        // else is submitted.
        match self.reconcile(target).await {
            Ok(Some(outcome)) => return outcome,
            Ok(None) => {}
            Err(msg) => {
                tracing::warn!(target_id = target.id, error = %msg, "Reconciliation failed");
                return self.retry_or_fail(target, &msg).await;
            }
        }

        // Admission control. When the window opens within the wait budget
        // the claim is held and the engine sleeps up to the opening edge;
        // inside the window a missing price is re-polled instead of
        // burning a retry.
        let wait_started = Instant::now();
        let decision = loop {
            let price = self.market_price(target).await;
            let decision = price_gate::evaluate(target, Utc::now(), price, &self.config.gate);

            match decision {
                GateDecision::Defer { opens_in } => {
                    let opens = opens_in.to_std().unwrap_or(StdDuration::ZERO);
                    if wait_started.elapsed() + opens <= self.config.max_gate_wait {
                        tracing::debug!(
                            target_id = target.id,
                            wait_ms = opens.as_millis() as u64,
                            "Holding claim until execution window opens"
                        );
                        tokio::time::sleep(opens).await;
                        continue;
                    }
                    break GateDecision::Defer { opens_in };
                }
                GateDecision::Reject(price_gate::RejectReason::PriceUnavailable)
                    if target.execution_time.is_some()
                        && wait_started.elapsed() + self.config.price_poll_interval
                            <= self.config.max_gate_wait =>
                {
                    tokio::time::sleep(self.config.price_poll_interval).await;
                    continue;
                }
                other => break other,
            }
        };

        let admitted_price = match decision {
            GateDecision::Admit { price } => price,
            GateDecision::Defer { .. } => {
                let _ = self
                    .targets
                    .transition(
                        target.id,
                        Some(TargetStatus::Executing),
                        TargetStatus::Ready,
                        TargetUpdate::default(),
                    )
                    .await;
                return ExecutionOutcome::Deferred;
            }
            GateDecision::Reject(reason) if reason.is_retryable() => {
                return self.retry_or_fail(target, &reason.to_string()).await;
            }
            GateDecision::Reject(reason) => {
                let msg = reason.to_string();
                let _ = self
                    .targets
                    .transition(
                        target.id,
                        Some(TargetStatus::Executing),
                        TargetStatus::Failed,
                        TargetUpdate {
                            execution_status: Some("rejected".into()),
                            error_message: Some(msg.clone()),
                            ..Default::default()
                        },
                    )
                    .await;
                return ExecutionOutcome::Rejected(msg);
            }
        };

        // Sizing. A failed balance read drops the balance cap rather than
        // the attempt; a size below exchange minimums is a configuration
        // error and permanent.
        let free_balance = match self.exchange.account_balances().await {
            Ok(balances) => balances
                .iter()
                .find(|b| b.asset == self.config.quote_asset)
                .map(|b| b.free),
            Err(e) => {
                tracing::warn!(
                    target_id = target.id,
                    error = %e,
                    "Balance check failed — sizing without balance cap"
                );
                None
            }
        };

        let limits = self.limits.read().await.clone();
        let quote_amount =
            match sizing::compute_order_size(target.position_size_quote, free_balance, &limits) {
                Ok(q) => q,
                Err(e) => {
                    let msg = e.to_string();
                    let _ = self
                        .targets
                        .transition(
                            target.id,
                            Some(TargetStatus::Executing),
                            TargetStatus::Failed,
                            TargetUpdate {
                                execution_status: Some("rejected".into()),
                                error_message: Some(msg.clone()),
                                ..Default::default()
                            },
                        )
                        .await;
                    return ExecutionOutcome::Rejected(msg);
                }
            };

        // Intent row first: if the process dies between the exchange call
        // and the outcome write, the next attempt finds this row and
        // reconciles instead of re-submitting.
        let submitted = NewExecutionRecord {
            target_id: Some(target.id),
            position_id: None,
            user_id: target.user_id.clone(),
            symbol: target.symbol.clone(),
            side: target.side.clone(),
            attempt: target.current_retries,
            client_order_id: client_order_id.to_string(),
            exchange_order_id: None,
            status: execution_status::SUBMITTED.into(),
            quantity: None,
            price: Some(admitted_price),
            quote_amount: Some(quote_amount),
            error_message: None,
        };
        if let Err(e) = self.history.record(submitted).await {
            return self
                .retry_or_fail(target, &format!("failed to record order intent: {e}"))
                .await;
        }

        let request = match target.entry_price {
            Some(limit) => OrderRequest {
                symbol: target.symbol.clone(),
                side: target.order_side(),
                order_type: OrderType::Limit,
                quantity: Some(quote_amount / limit),
                quote_order_qty: None,
                price: Some(limit),
                client_order_id: client_order_id.to_string(),
            },
            None => OrderRequest {
                symbol: target.symbol.clone(),
                side: target.order_side(),
                order_type: OrderType::Market,
                quantity: None,
                quote_order_qty: Some(quote_amount),
                price: None,
                client_order_id: client_order_id.to_string(),
            },
        };

        tracing::info!(
            target_id = target.id,
            symbol = %target.symbol,
            side = %request.side,
            order_type = %request.order_type,
            quote_amount = %quote_amount,
            price = %admitted_price,
            "Placing snipe order"
        );

        match self.exchange.place_order(&request).await {
            Ok(resp) if resp.is_filled() => {
                self.complete_fill(
                    target,
                    client_order_id,
                    target.current_retries,
                    &resp,
                    admitted_price,
                    quote_amount,
                )
                .await
            }
            Ok(resp) => {
                // Limit order accepted but not filled within IOC
                let msg = format!("order not filled (status {})", resp.status);
                self.record_attempt_failure(target, client_order_id, &msg).await;
                self.retry_or_fail(target, &msg).await
            }
            Err(e) => {
                let msg = e.to_string();
                self.record_attempt_failure(target, client_order_id, &msg).await;
                self.retry_or_fail(target, &msg).await
            }
        }
    }

    /// Market price for the gate. Limit entries price off the top of the
    /// book on the side we would take (best ask for buys, best bid for
    /// sells); market entries use the last ticker price. None when no
    /// price could be obtained.
    async fn market_price(&self, target: &SnipeTarget) -> Option<Decimal> {
        if target.entry_price.is_some() {
            match self.exchange.order_book_depth(&target.symbol, 5).await {
                Ok(depth) => {
                    let level = match target.order_side() {
                        Side::Buy => depth.asks.first(),
                        Side::Sell => depth.bids.first(),
                    };
                    match level {
                        Some(level) => return Some(level.0),
                        None => {
                            tracing::debug!(
                                target_id = target.id,
                                symbol = %target.symbol,
                                "Order book empty — falling back to ticker"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        target_id = target.id,
                        symbol = %target.symbol,
                        error = %e,
                        "Depth fetch failed — falling back to ticker"
                    );
                }
            }
        }

        match self.exchange.current_price(&target.symbol).await {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::debug!(
                    target_id = target.id,
                    symbol = %target.symbol,
                    error = %e,
                    "Price fetch failed"
                );
                None
            }
        }
    }

    /// Resolve a previous attempt whose outcome never got persisted.
    /// Returns Some(outcome) when the target was finished here.
    async fn reconcile(
        &self,
        target: &SnipeTarget,
    ) -> Result<Option<ExecutionOutcome>, String> {
        let latest = match self.history.latest_for_target(target.id).await {
            Ok(l) => l,
            Err(e) => return Err(format!("history lookup failed: {e}")),
        };

        let Some(latest) = latest else {
            return Ok(None);
        };

        match latest.status.as_str() {
            execution_status::SUBMITTED => {
                match self
                    .exchange
                    .query_order(&target.symbol, &latest.client_order_id)
                    .await
                {
                    Ok(Some(order)) if order.is_filled() => {
                        tracing::warn!(
                            target_id = target.id,
                            client_order_id = %latest.client_order_id,
                            "Found fill for unresolved attempt — completing without resubmit"
                        );
                        let fallback = latest.price.unwrap_or(Decimal::ZERO);
                        let quote = latest.quote_amount.unwrap_or(Decimal::ZERO);
                        Ok(Some(
                            self.complete_fill(
                                target,
                                &latest.client_order_id,
                                latest.attempt,
                                &order,
                                fallback,
                                quote,
                            )
                            .await,
                        ))
                    }
                    Ok(Some(order)) => {
                        // Resting or expired on the exchange side: make sure
                        // it cannot fill later, then clear the attempt.
                        if let Err(e) = self
                            .exchange
                            .cancel_order(&target.symbol, &latest.client_order_id)
                            .await
                        {
                            tracing::debug!(
                                target_id = target.id,
                                error = %e,
                                "Cancel of unresolved order failed (may already be dead)"
                            );
                        }
                        let msg = format!("unresolved order cancelled (status {})", order.status);
                        self.record_attempt_failure(target, &latest.client_order_id, &msg)
                            .await;
                        Ok(None)
                    }
                    Ok(None) => {
                        self.record_attempt_failure(
                            target,
                            &latest.client_order_id,
                            "order never reached the exchange",
                        )
                        .await;
                        Ok(None)
                    }
                    Err(e) => Err(format!("exchange order lookup failed: {e}")),
                }
            }
            // Fill recorded but the completion write was lost: finish it.
            execution_status::FILLED => {
                let fill_price = latest.price.unwrap_or(Decimal::ZERO);
                let quantity = latest.quantity.unwrap_or(Decimal::ZERO);
                tracing::warn!(
                    target_id = target.id,
                    "Recorded fill without completion — repairing"
                );
                Ok(Some(
                    self.finalize_completed(target, &latest, fill_price, quantity)
                        .await,
                ))
            }
            _ => Ok(None),
        }
    }

    /// Persist a confirmed fill: terminal history row, position, completed
    /// target, in that order, so an interruption at any point is
    /// repairable from the history log.
    async fn complete_fill(
        &self,
        target: &SnipeTarget,
        client_order_id: &str,
        attempt: i32,
        resp: &OrderResponse,
        fallback_price: Decimal,
        quote_amount: Decimal,
    ) -> ExecutionOutcome {
        let fill_price = resp.fill_price().unwrap_or(fallback_price);
        let quantity = resp.executed_qty.unwrap_or_else(|| {
            if fill_price.is_zero() {
                Decimal::ZERO
            } else {
                quote_amount / fill_price
            }
        });

        let filled_row = NewExecutionRecord {
            target_id: Some(target.id),
            position_id: None,
            user_id: target.user_id.clone(),
            symbol: target.symbol.clone(),
            side: target.side.clone(),
            attempt,
            client_order_id: client_order_id.to_string(),
            exchange_order_id: Some(resp.order_id.clone()),
            status: execution_status::FILLED.into(),
            quantity: Some(quantity),
            price: Some(fill_price),
            quote_amount: Some(quote_amount),
            error_message: None,
        };

        let record = match self.history.record(filled_row).await {
            Ok(r) => Some(r),
            Err(e) => {
                // The order IS filled; completing the target matters more
                // than the audit row now.
                tracing::error!(
                    target_id = target.id,
                    error = %e,
                    "Failed to record fill in execution history"
                );
                None
            }
        };

        let latest = record.unwrap_or_else(|| ExecutionRecord {
            id: Uuid::nil(),
            target_id: Some(target.id),
            position_id: None,
            user_id: target.user_id.clone(),
            symbol: target.symbol.clone(),
            side: target.side.clone(),
            attempt,
            client_order_id: client_order_id.to_string(),
            exchange_order_id: Some(resp.order_id.clone()),
            status: execution_status::FILLED.into(),
            quantity: Some(quantity),
            price: Some(fill_price),
            quote_amount: Some(quote_amount),
            error_message: None,
            created_at: Utc::now(),
        });

        self.finalize_completed(target, &latest, fill_price, quantity)
            .await
    }

    /// Ensure the position exists and flip the target to completed. Leaves
    /// the target in `executing` on a persistence error so the watchdog +
    /// reconciliation path can repair it instead of resubmitting.
    async fn finalize_completed(
        &self,
        target: &SnipeTarget,
        fill: &ExecutionRecord,
        fill_price: Decimal,
        quantity: Decimal,
    ) -> ExecutionOutcome {
        let entry_side = PositionSide::from_entry(target.order_side());
        let tp_pct = target.take_profit_pct();

        let position = match self.positions.find_by_target(target.id).await {
            Ok(Some(existing)) => existing,
            Ok(None) => {
                let new_position = NewPosition {
                    target_id: Some(target.id),
                    user_id: target.user_id.clone(),
                    symbol: target.symbol.clone(),
                    side: entry_side,
                    entry_price: fill_price,
                    quantity,
                    stop_loss_pct: Some(target.stop_loss_pct),
                    stop_loss_price: Some(stop_loss_price(
                        entry_side,
                        fill_price,
                        target.stop_loss_pct,
                    )),
                    take_profit_pct: Some(tp_pct),
                    take_profit_price: Some(take_profit_price(entry_side, fill_price, tp_pct)),
                };
                match self.positions.insert(new_position).await {
                    Ok(p) => p,
                    Err(e) => {
                        return ExecutionOutcome::Failed(format!(
                            "order filled but position creation failed, will reconcile: {e}"
                        ));
                    }
                }
            }
            Err(e) => {
                return ExecutionOutcome::Failed(format!(
                    "order filled but position lookup failed, will reconcile: {e}"
                ));
            }
        };

        let update = TargetUpdate {
            next_attempt_at: None,
            actual_execution_time: Some(fill.created_at),
            execution_price: Some(fill_price),
            executed_quantity: Some(quantity),
            execution_status: Some("filled".into()),
            error_message: None,
        };

        match self
            .targets
            .transition(
                target.id,
                Some(TargetStatus::Executing),
                TargetStatus::Completed,
                update,
            )
            .await
        {
            Ok(()) => {}
            Err(e) => {
                return ExecutionOutcome::Failed(format!(
                    "order filled but completion write failed, will reconcile: {e}"
                ));
            }
        }

        tracing::info!(
            target_id = target.id,
            position_id = %position.id,
            fill_price = %fill_price,
            quantity = %quantity,
            "Snipe executed — position opened"
        );

        ExecutionOutcome::Success {
            position_id: position.id,
            fill_price,
        }
    }

    async fn record_attempt_failure(
        &self,
        target: &SnipeTarget,
        client_order_id: &str,
        message: &str,
    ) {
        let row = NewExecutionRecord {
            target_id: Some(target.id),
            position_id: None,
            user_id: target.user_id.clone(),
            symbol: target.symbol.clone(),
            side: target.side.clone(),
            attempt: target.current_retries,
            client_order_id: client_order_id.to_string(),
            exchange_order_id: None,
            status: execution_status::FAILED.into(),
            quantity: None,
            price: None,
            quote_amount: None,
            error_message: Some(message.to_string()),
        };
        if let Err(e) = self.history.record(row).await {
            tracing::error!(
                target_id = target.id,
                error = %e,
                "Failed to record execution failure"
            );
        }
    }

    /// Transient failure: consume a retry and requeue, or fail for good
    /// once the budget is spent.
    async fn retry_or_fail(&self, target: &SnipeTarget, message: &str) -> ExecutionOutcome {
        let new_count = match self.targets.increment_retry(target.id).await {
            Ok(n) => n,
            Err(_) => target.max_retries,
        };

        if new_count < target.max_retries {
            let backoff = retry_backoff(new_count);
            tracing::warn!(
                target_id = target.id,
                retry = new_count,
                max_retries = target.max_retries,
                backoff_secs = backoff.num_seconds(),
                error = message,
                "Execution attempt failed — requeued"
            );
            let _ = self
                .targets
                .transition(
                    target.id,
                    Some(TargetStatus::Executing),
                    TargetStatus::Ready,
                    TargetUpdate {
                        next_attempt_at: Some(Utc::now() + backoff),
                        error_message: Some(message.to_string()),
                        ..Default::default()
                    },
                )
                .await;
        } else {
            tracing::error!(
                target_id = target.id,
                retries = new_count,
                error = message,
                "Retry budget exhausted — target failed"
            );
            let _ = self
                .targets
                .transition(
                    target.id,
                    Some(TargetStatus::Executing),
                    TargetStatus::Failed,
                    TargetUpdate {
                        execution_status: Some("failed".into()),
                        error_message: Some(message.to_string()),
                        ..Default::default()
                    },
                )
                .await;
        }

        ExecutionOutcome::Failed(message.to_string())
    }
}

/// Exponential backoff before retry N: 5s, 10s, 20s, ... capped at 60s.
/// Targets with an execution window are bounded by the window anyway;
/// this paces the open-ended ones.
fn retry_backoff(retry: i32) -> Duration {
    let exp = retry.saturating_sub(1).clamp(0, 6) as u32;
    let secs = (5i64 << exp).min(60);
    Duration::seconds(secs)
}
