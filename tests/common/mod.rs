use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use snipebot::db::{
    ExecutionLog, LockStore, PositionStore, StoreError, TargetStore, TargetUpdate,
};
use snipebot::execution::{EngineConfig, ExecutionEngine, GateConfig, SizingLimits};
use snipebot::mexc::types::DepthLevel;
use snipebot::mexc::{
    AssetBalance, Exchange, ExchangeError, OrderBookDepth, OrderRequest, OrderResponse,
};
use snipebot::models::execution::NewExecutionRecord;
use snipebot::models::{
    position_status, ExecutionRecord, NewPosition, Position, SnipeTarget, TargetStatus,
};
use snipebot::services::{PositionMonitor, StatsCollector};

// ---------------------------------------------------------------------------
// In-memory stores
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryTargetStore {
    targets: Mutex<HashMap<i64, SnipeTarget>>,
}

#[allow(dead_code)]
impl MemoryTargetStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, target: SnipeTarget) {
        self.targets.lock().unwrap().insert(target.id, target);
    }

    pub fn get_sync(&self, id: i64) -> SnipeTarget {
        self.targets
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .expect("target should exist")
    }
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    async fn fetch_eligible(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        lookahead: Duration,
    ) -> Result<Vec<SnipeTarget>, StoreError> {
        let cutoff = now + lookahead;
        let targets = self.targets.lock().unwrap();
        let mut eligible: Vec<SnipeTarget> = targets
            .values()
            .filter(|t| match t.status.as_str() {
                "ready" => t.execution_time.map(|at| at <= cutoff).unwrap_or(true),
                "pending" => t.execution_time.map(|at| at <= cutoff).unwrap_or(false),
                _ => false,
            })
            .filter(|t| t.next_attempt_at.map(|at| at <= now).unwrap_or(true))
            .cloned()
            .collect();
        eligible.sort_by_key(|t| (t.priority, t.execution_time));
        eligible.truncate(limit as usize);
        Ok(eligible)
    }

    async fn get(&self, id: i64) -> Result<SnipeTarget, StoreError> {
        self.targets
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn transition(
        &self,
        id: i64,
        from: Option<TargetStatus>,
        to: TargetStatus,
        update: TargetUpdate,
    ) -> Result<(), StoreError> {
        let mut targets = self.targets.lock().unwrap();
        let target = targets.get_mut(&id).ok_or(StoreError::NotFound)?;

        if let Some(expected) = from {
            if target.status != expected.as_str() {
                return Err(StoreError::Conflict);
            }
        }

        target.status = to.as_str().to_string();
        if let Some(v) = update.next_attempt_at {
            target.next_attempt_at = Some(v);
        }
        if let Some(v) = update.actual_execution_time {
            target.actual_execution_time = Some(v);
        }
        if let Some(v) = update.execution_price {
            target.execution_price = Some(v);
        }
        if let Some(v) = update.executed_quantity {
            target.executed_quantity = Some(v);
        }
        if let Some(v) = update.execution_status {
            target.execution_status = Some(v);
        }
        if let Some(v) = update.error_message {
            target.error_message = Some(v);
        }
        target.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_retry(&self, id: i64) -> Result<i32, StoreError> {
        let mut targets = self.targets.lock().unwrap();
        let target = targets.get_mut(&id).ok_or(StoreError::NotFound)?;
        if target.current_retries >= target.max_retries {
            return Err(StoreError::Conflict);
        }
        target.current_retries += 1;
        target.updated_at = Utc::now();
        Ok(target.current_retries)
    }

    async fn fetch_stuck(&self, cutoff: DateTime<Utc>) -> Result<Vec<SnipeTarget>, StoreError> {
        let targets = self.targets.lock().unwrap();
        Ok(targets
            .values()
            .filter(|t| t.status == "executing" && t.updated_at <= cutoff)
            .cloned()
            .collect())
    }

    async fn list(
        &self,
        status: Option<TargetStatus>,
        limit: i64,
    ) -> Result<Vec<SnipeTarget>, StoreError> {
        let targets = self.targets.lock().unwrap();
        let mut all: Vec<SnipeTarget> = targets
            .values()
            .filter(|t| status.map(|s| t.status == s.as_str()).unwrap_or(true))
            .cloned()
            .collect();
        all.sort_by_key(|t| std::cmp::Reverse(t.created_at));
        all.truncate(limit as usize);
        Ok(all)
    }
}

#[derive(Default)]
pub struct MemoryPositionStore {
    positions: Mutex<HashMap<Uuid, Position>>,
}

#[allow(dead_code)]
impl MemoryPositionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_raw(&self, position: Position) {
        self.positions
            .lock()
            .unwrap()
            .insert(position.id, position);
    }

    pub fn get_sync(&self, id: Uuid) -> Position {
        self.positions
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .expect("position should exist")
    }
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn insert(&self, new: NewPosition) -> Result<Position, StoreError> {
        let position = Position {
            id: Uuid::new_v4(),
            target_id: new.target_id,
            user_id: new.user_id,
            symbol: new.symbol,
            side: new.side.to_string(),
            entry_price: new.entry_price,
            quantity: new.quantity,
            current_price: None,
            unrealized_pnl: None,
            realized_pnl: None,
            stop_loss_pct: new.stop_loss_pct,
            stop_loss_price: new.stop_loss_price,
            take_profit_pct: new.take_profit_pct,
            take_profit_price: new.take_profit_price,
            status: position_status::OPEN.into(),
            exit_reason: None,
            opened_at: Utc::now(),
            closed_at: None,
        };
        self.positions
            .lock()
            .unwrap()
            .insert(position.id, position.clone());
        Ok(position)
    }

    async fn get(&self, id: Uuid) -> Result<Position, StoreError> {
        self.positions
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_target(&self, target_id: i64) -> Result<Option<Position>, StoreError> {
        Ok(self
            .positions
            .lock()
            .unwrap()
            .values()
            .find(|p| p.target_id == Some(target_id))
            .cloned())
    }

    async fn open_positions(&self) -> Result<Vec<Position>, StoreError> {
        let mut open: Vec<Position> = self
            .positions
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|p| p.opened_at);
        Ok(open)
    }

    async fn count_open(&self) -> Result<i64, StoreError> {
        Ok(self
            .positions
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.is_open())
            .count() as i64)
    }

    async fn all_positions(&self, limit: i64) -> Result<Vec<Position>, StoreError> {
        let mut all: Vec<Position> = self.positions.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|p| std::cmp::Reverse(p.opened_at));
        all.truncate(limit as usize);
        Ok(all)
    }

    async fn update_price(
        &self,
        id: Uuid,
        current_price: Decimal,
        unrealized_pnl: Decimal,
    ) -> Result<(), StoreError> {
        let mut positions = self.positions.lock().unwrap();
        let position = positions.get_mut(&id).ok_or(StoreError::NotFound)?;
        position.current_price = Some(current_price);
        position.unrealized_pnl = Some(unrealized_pnl);
        Ok(())
    }

    async fn set_stop_loss(
        &self,
        id: Uuid,
        pct: Decimal,
        price: Decimal,
    ) -> Result<(), StoreError> {
        let mut positions = self.positions.lock().unwrap();
        let position = positions.get_mut(&id).ok_or(StoreError::NotFound)?;
        if !position.is_open() {
            return Err(StoreError::Conflict);
        }
        position.stop_loss_pct = Some(pct);
        position.stop_loss_price = Some(price);
        Ok(())
    }

    async fn set_take_profit(
        &self,
        id: Uuid,
        pct: Decimal,
        price: Decimal,
    ) -> Result<(), StoreError> {
        let mut positions = self.positions.lock().unwrap();
        let position = positions.get_mut(&id).ok_or(StoreError::NotFound)?;
        if !position.is_open() {
            return Err(StoreError::Conflict);
        }
        position.take_profit_pct = Some(pct);
        position.take_profit_price = Some(price);
        Ok(())
    }

    async fn close(
        &self,
        id: Uuid,
        exit_price: Decimal,
        realized_pnl: Decimal,
        reason: &str,
        closed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut positions = self.positions.lock().unwrap();
        let position = positions.get_mut(&id).ok_or(StoreError::NotFound)?;
        if !position.is_open() {
            return Err(StoreError::Conflict);
        }
        position.status = position_status::CLOSED.into();
        position.current_price = Some(exit_price);
        position.realized_pnl = Some(realized_pnl);
        position.exit_reason = Some(reason.to_string());
        position.closed_at = Some(closed_at);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryExecutionLog {
    records: Mutex<Vec<ExecutionRecord>>,
}

#[allow(dead_code)]
impl MemoryExecutionLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_raw(&self, record: ExecutionRecord) {
        self.records.lock().unwrap().push(record);
    }

    pub fn all(&self) -> Vec<ExecutionRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionLog for MemoryExecutionLog {
    async fn record(&self, rec: NewExecutionRecord) -> Result<ExecutionRecord, StoreError> {
        let record = ExecutionRecord {
            id: Uuid::new_v4(),
            target_id: rec.target_id,
            position_id: rec.position_id,
            user_id: rec.user_id,
            symbol: rec.symbol,
            side: rec.side,
            attempt: rec.attempt,
            client_order_id: rec.client_order_id,
            exchange_order_id: rec.exchange_order_id,
            status: rec.status,
            quantity: rec.quantity,
            price: rec.price,
            quote_amount: rec.quote_amount,
            error_message: rec.error_message,
            created_at: Utc::now(),
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn latest_for_target(
        &self,
        target_id: i64,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.target_id == Some(target_id))
            .cloned())
    }

    async fn list_for_target(&self, target_id: i64) -> Result<Vec<ExecutionRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.target_id == Some(target_id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryLockStore {
    active: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

#[allow(dead_code)]
impl MemoryLockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn acquire(
        &self,
        resource_key: &str,
        idempotency_key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut active = self.active.lock().unwrap();
        if let Some((_, expires)) = active.get(resource_key) {
            if *expires > now {
                return Ok(false);
            }
        }
        active.insert(
            resource_key.to_string(),
            (idempotency_key.to_string(), now + ttl),
        );
        Ok(true)
    }

    async fn release(&self, resource_key: &str, idempotency_key: &str) -> Result<(), StoreError> {
        let mut active = self.active.lock().unwrap();
        if let Some((holder, _)) = active.get(resource_key) {
            if holder == idempotency_key {
                active.remove(resource_key);
            }
        }
        Ok(())
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut active = self.active.lock().unwrap();
        let before = active.len();
        active.retain(|_, (_, expires)| *expires > now);
        Ok((before - active.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Mock exchange
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockExchange {
    price: Mutex<Option<Decimal>>,
    fail_place: AtomicBool,
    placed: Mutex<Vec<OrderRequest>>,
    known_orders: Mutex<HashMap<String, OrderResponse>>,
    cancelled: Mutex<Vec<String>>,
    balances: Mutex<Vec<AssetBalance>>,
}

#[allow(dead_code)]
impl MockExchange {
    pub fn with_price(price: Decimal) -> Arc<Self> {
        let exchange = Self::default();
        *exchange.price.lock().unwrap() = Some(price);
        *exchange.balances.lock().unwrap() = vec![AssetBalance {
            asset: "USDT".into(),
            free: Decimal::from(100_000),
            locked: Decimal::ZERO,
        }];
        Arc::new(exchange)
    }

    pub fn set_price(&self, price: Option<Decimal>) {
        *self.price.lock().unwrap() = price;
    }

    pub fn set_fail_place(&self, fail: bool) {
        self.fail_place.store(fail, Ordering::Relaxed);
    }

    pub fn add_known_order(&self, client_order_id: &str, response: OrderResponse) {
        self.known_orders
            .lock()
            .unwrap()
            .insert(client_order_id.to_string(), response);
    }

    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.placed.lock().unwrap().clone()
    }

    pub fn placed_count(&self) -> usize {
        self.placed.lock().unwrap().len()
    }

    pub fn cancelled_orders(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    /// A FILLED response for `req` executed fully at `price`.
    pub fn filled_response(req: &OrderRequest, price: Decimal) -> OrderResponse {
        let executed_qty = match (req.quantity, req.quote_order_qty) {
            (Some(qty), _) => qty,
            (None, Some(quote)) => quote / price,
            (None, None) => Decimal::ZERO,
        };
        OrderResponse {
            order_id: Uuid::new_v4().to_string(),
            symbol: req.symbol.clone(),
            client_order_id: Some(req.client_order_id.clone()),
            side: req.side.to_string(),
            order_type: Some(req.order_type.to_string()),
            status: "FILLED".into(),
            price: Some(price),
            orig_qty: Some(executed_qty),
            executed_qty: Some(executed_qty),
            cumulative_quote_qty: Some(executed_qty * price),
        }
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn current_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        let price = *self.price.lock().unwrap();
        price.ok_or(ExchangeError::Api {
            status: 503,
            body: "price feed down".into(),
        })
    }

    async fn order_book_depth(
        &self,
        _symbol: &str,
        _limit: u32,
    ) -> Result<OrderBookDepth, ExchangeError> {
        let price = self.current_price(_symbol).await?;
        Ok(OrderBookDepth {
            bids: vec![DepthLevel(price, Decimal::from(10))],
            asks: vec![DepthLevel(price, Decimal::from(10))],
        })
    }

    async fn place_order(&self, req: &OrderRequest) -> Result<OrderResponse, ExchangeError> {
        if self.fail_place.load(Ordering::Relaxed) {
            return Err(ExchangeError::Api {
                status: 500,
                body: "order placement failed".into(),
            });
        }

        let price = self.current_price(&req.symbol).await?;
        self.placed.lock().unwrap().push(req.clone());

        let response = Self::filled_response(req, price);
        self.known_orders
            .lock()
            .unwrap()
            .insert(req.client_order_id.clone(), response.clone());
        Ok(response)
    }

    async fn query_order(
        &self,
        _symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderResponse>, ExchangeError> {
        Ok(self
            .known_orders
            .lock()
            .unwrap()
            .get(client_order_id)
            .cloned())
    }

    async fn cancel_order(
        &self,
        _symbol: &str,
        client_order_id: &str,
    ) -> Result<(), ExchangeError> {
        self.cancelled
            .lock()
            .unwrap()
            .push(client_order_id.to_string());
        Ok(())
    }

    async fn account_balances(&self) -> Result<Vec<AssetBalance>, ExchangeError> {
        Ok(self.balances.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Fixtures and wiring
// ---------------------------------------------------------------------------

#[allow(dead_code)]
pub fn make_target(id: i64) -> SnipeTarget {
    SnipeTarget {
        id,
        user_id: "user-1".into(),
        symbol: "BTCUSDT".into(),
        vcoin_id: "BTC".into(),
        side: "BUY".into(),
        position_size_quote: Decimal::from(100),
        stop_loss_pct: Decimal::from(5),
        take_profit_level: 2,
        custom_take_profit_pct: None,
        entry_price: None,
        execution_time: None,
        priority: 1,
        confidence: Decimal::new(85, 2),
        risk_tier: "medium".into(),
        status: "ready".into(),
        current_retries: 0,
        max_retries: 3,
        next_attempt_at: None,
        actual_execution_time: None,
        execution_price: None,
        executed_quantity: None,
        execution_status: None,
        error_message: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[allow(dead_code)]
pub fn make_open_position(
    side: &str,
    entry: Decimal,
    quantity: Decimal,
    stop_loss_price: Option<Decimal>,
    take_profit_price: Option<Decimal>,
) -> Position {
    Position {
        id: Uuid::new_v4(),
        target_id: Some(1),
        user_id: "user-1".into(),
        symbol: "BTCUSDT".into(),
        side: side.into(),
        entry_price: entry,
        quantity,
        current_price: None,
        unrealized_pnl: None,
        realized_pnl: None,
        stop_loss_pct: None,
        stop_loss_price,
        take_profit_pct: None,
        take_profit_price,
        status: position_status::OPEN.into(),
        exit_reason: None,
        opened_at: Utc::now(),
        closed_at: None,
    }
}

#[allow(dead_code)]
pub struct TestKernel {
    pub targets: Arc<MemoryTargetStore>,
    pub positions: Arc<MemoryPositionStore>,
    pub history: Arc<MemoryExecutionLog>,
    pub locks: Arc<MemoryLockStore>,
    pub exchange: Arc<MockExchange>,
    pub engine: Arc<ExecutionEngine>,
    pub monitor: Arc<PositionMonitor>,
}

/// Wire an engine and monitor over in-memory stores and a mock exchange.
/// Gate waits are shortened so tests run in milliseconds.
#[allow(dead_code)]
pub fn test_kernel(price: Decimal) -> TestKernel {
    let targets = MemoryTargetStore::new();
    let positions = MemoryPositionStore::new();
    let history = MemoryExecutionLog::new();
    let locks = MemoryLockStore::new();
    let exchange = MockExchange::with_price(price);

    let engine_config = EngineConfig {
        gate: GateConfig::default(),
        lock_ttl: Duration::seconds(60),
        max_gate_wait: std::time::Duration::from_secs(2),
        price_poll_interval: std::time::Duration::from_millis(10),
        quote_asset: "USDT".into(),
    };

    let engine = Arc::new(ExecutionEngine::new(
        targets.clone(),
        positions.clone(),
        history.clone(),
        locks.clone(),
        exchange.clone(),
        Arc::new(RwLock::new(SizingLimits::default())),
        engine_config,
    ));

    let monitor = Arc::new(PositionMonitor::new(
        positions.clone(),
        history.clone(),
        locks.clone(),
        exchange.clone(),
        StatsCollector::new(),
        Duration::seconds(60),
    ));

    TestKernel {
        targets,
        positions,
        history,
        locks,
        exchange,
        engine,
        monitor,
    }
}
