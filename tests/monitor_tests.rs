mod common;

use rust_decimal::Decimal;

use snipebot::models::position_status;
use snipebot::services::position_monitor::exit_reason;

use common::{make_open_position, test_kernel};

#[tokio::test]
async fn test_stop_loss_trigger_closes_long_with_loss() {
    let kernel = test_kernel(Decimal::from(47_400));
    let position = make_open_position(
        "long",
        Decimal::from(50_000),
        Decimal::new(2, 3), // 0.002
        Some(Decimal::from(47_500)),
        Some(Decimal::from(55_000)),
    );
    let id = position.id;
    kernel.positions.insert_raw(position);

    kernel.monitor.sweep().await;

    let closed = kernel.positions.get_sync(id);
    assert_eq!(closed.status, position_status::CLOSED);
    assert_eq!(closed.exit_reason.as_deref(), Some(exit_reason::STOP_LOSS));
    // (47400 - 50000) * 0.002 = -5.2
    assert_eq!(closed.realized_pnl, Some(Decimal::new(-52, 1)));
    assert!(closed.closed_at.is_some());

    // The flattening order is an opposite-side market sell for the full size
    let orders = kernel.exchange.placed_orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side.to_string(), "SELL");
    assert_eq!(orders[0].quantity, Some(Decimal::new(2, 3)));
}

#[tokio::test]
async fn test_take_profit_trigger_closes_long_with_gain() {
    let kernel = test_kernel(Decimal::from(55_100));
    let position = make_open_position(
        "long",
        Decimal::from(50_000),
        Decimal::new(2, 3),
        Some(Decimal::from(47_500)),
        Some(Decimal::from(55_000)),
    );
    let id = position.id;
    kernel.positions.insert_raw(position);

    kernel.monitor.sweep().await;

    let closed = kernel.positions.get_sync(id);
    assert_eq!(closed.status, position_status::CLOSED);
    assert_eq!(closed.exit_reason.as_deref(), Some(exit_reason::TAKE_PROFIT));
    // (55100 - 50000) * 0.002 = 10.2
    assert_eq!(closed.realized_pnl, Some(Decimal::new(102, 1)));
}

#[tokio::test]
async fn test_short_position_comparisons_invert() {
    // Short entered at 100; stop-loss above entry at 105
    let kernel = test_kernel(Decimal::from(106));
    let position = make_open_position(
        "short",
        Decimal::from(100),
        Decimal::from(10),
        Some(Decimal::from(105)),
        Some(Decimal::from(90)),
    );
    let id = position.id;
    kernel.positions.insert_raw(position);

    kernel.monitor.sweep().await;

    let closed = kernel.positions.get_sync(id);
    assert_eq!(closed.status, position_status::CLOSED);
    assert_eq!(closed.exit_reason.as_deref(), Some(exit_reason::STOP_LOSS));
    // (100 - 106) * 10 = -60
    assert_eq!(closed.realized_pnl, Some(Decimal::from(-60)));

    // Flattening a short means buying back
    assert_eq!(kernel.exchange.placed_orders()[0].side.to_string(), "BUY");
}

#[tokio::test]
async fn test_position_within_bounds_stays_open_and_marks_price() {
    let kernel = test_kernel(Decimal::from(50_100));
    let position = make_open_position(
        "long",
        Decimal::from(50_000),
        Decimal::new(2, 3),
        Some(Decimal::from(47_500)),
        Some(Decimal::from(55_000)),
    );
    let id = position.id;
    kernel.positions.insert_raw(position);

    kernel.monitor.sweep().await;

    let open = kernel.positions.get_sync(id);
    assert_eq!(open.status, position_status::OPEN);
    assert_eq!(open.current_price, Some(Decimal::from(50_100)));
    // (50100 - 50000) * 0.002 = 0.2
    assert_eq!(open.unrealized_pnl, Some(Decimal::new(2, 1)));
    assert_eq!(kernel.exchange.placed_count(), 0);
}

#[tokio::test]
async fn test_concurrent_close_attempts_submit_one_order() {
    let kernel = test_kernel(Decimal::from(47_000));
    let position = make_open_position(
        "long",
        Decimal::from(50_000),
        Decimal::new(2, 3),
        Some(Decimal::from(47_500)),
        None,
    );
    let id = position.id;
    kernel.positions.insert_raw(position);

    let monitor_a = kernel.monitor.clone();
    let monitor_b = kernel.monitor.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { monitor_a.close_position(id, exit_reason::MANUAL).await }),
        tokio::spawn(async move { monitor_b.close_position(id, exit_reason::MANUAL).await }),
    );

    let results = [a.expect("no panic"), b.expect("no panic")];
    let ok_count = results.iter().filter(|r| r.is_ok()).count();
    assert!(ok_count >= 1, "at least one close succeeds");

    // The property that matters: exactly one exit order reached the venue
    assert_eq!(kernel.exchange.placed_count(), 1);
    assert_eq!(
        kernel.positions.get_sync(id).status,
        position_status::CLOSED
    );
}

#[tokio::test]
async fn test_failed_close_retries_on_next_sweep() {
    let kernel = test_kernel(Decimal::from(47_000));
    let position = make_open_position(
        "long",
        Decimal::from(50_000),
        Decimal::new(2, 3),
        Some(Decimal::from(47_500)),
        None,
    );
    let id = position.id;
    kernel.positions.insert_raw(position);

    // Exchange down: the close fails and the position stays open
    kernel.exchange.set_fail_place(true);
    kernel.monitor.sweep().await;
    assert_eq!(kernel.positions.get_sync(id).status, position_status::OPEN);

    // Next sweep with the exchange back: exposure gets flattened
    kernel.exchange.set_fail_place(false);
    kernel.monitor.sweep().await;
    assert_eq!(
        kernel.positions.get_sync(id).status,
        position_status::CLOSED
    );
}

#[tokio::test]
async fn test_update_take_profit_recomputes_price_from_entry() {
    let kernel = test_kernel(Decimal::from(50_000));
    let position = make_open_position(
        "long",
        Decimal::from(50_000),
        Decimal::new(2, 3),
        Some(Decimal::from(47_500)),
        Some(Decimal::from(55_000)),
    );
    let id = position.id;
    kernel.positions.insert_raw(position);

    let updated = kernel
        .monitor
        .update_take_profit(id, Decimal::from(20))
        .await
        .expect("update should succeed");

    assert_eq!(updated.take_profit_pct, Some(Decimal::from(20)));
    assert_eq!(updated.take_profit_price, Some(Decimal::from(60_000)));
    // The other watch is untouched
    assert_eq!(updated.stop_loss_price, Some(Decimal::from(47_500)));
}

#[tokio::test]
async fn test_update_stop_loss_on_short_goes_above_entry() {
    let kernel = test_kernel(Decimal::from(100));
    let position = make_open_position(
        "short",
        Decimal::from(100),
        Decimal::from(10),
        None,
        None,
    );
    let id = position.id;
    kernel.positions.insert_raw(position);

    let updated = kernel
        .monitor
        .update_stop_loss(id, Decimal::from(5))
        .await
        .expect("update should succeed");

    assert_eq!(updated.stop_loss_price, Some(Decimal::from(105)));
}

#[tokio::test]
async fn test_threshold_update_rejected_once_closed() {
    let kernel = test_kernel(Decimal::from(47_000));
    let position = make_open_position(
        "long",
        Decimal::from(50_000),
        Decimal::new(2, 3),
        Some(Decimal::from(47_500)),
        None,
    );
    let id = position.id;
    kernel.positions.insert_raw(position);

    kernel.monitor.sweep().await; // closes via stop-loss
    assert_eq!(
        kernel.positions.get_sync(id).status,
        position_status::CLOSED
    );

    let result = kernel.monitor.update_stop_loss(id, Decimal::from(10)).await;
    assert!(result.is_err(), "closed positions cannot be re-armed");
}

#[tokio::test]
async fn test_manual_close_of_missing_position_errors() {
    let kernel = test_kernel(Decimal::from(100));
    let result = kernel
        .monitor
        .close_position(uuid::Uuid::new_v4(), exit_reason::MANUAL)
        .await;
    assert!(result.is_err());
}
