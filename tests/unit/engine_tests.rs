//! End-to-end orchestrator scenarios.

use crate::common::{Harness, assert_status, m, stored_order};
use exchange_core::CoreError;
use exchange_core::domain::{Instrument, OrderStatus, Side, TimeInForce};
use exchange_core::engine::{Command, CommandResult};
use exchange_core::marketdata::{MarketEvent, TopicFilter};
use exchange_core::storage::{AuditKind, Storage};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_price_time_priority_across_resting_orders() {
    let h = Harness::new("XY");
    let a = h.funded_user("1000000");
    let b = h.funded_user("1000000");
    let c = h.funded_user("1000000");

    let buy_a = h.place(a, "XY", Side::Buy, "10", "100", TimeInForce::Gtc).await;
    let buy_b = h.place(b, "XY", Side::Buy, "10", "100", TimeInForce::Gtc).await;
    let sell_c = h.place(c, "XY", Side::Sell, "15", "99", TimeInForce::Gtc).await;

    assert_eq!(sell_c.trades.len(), 2);
    // First fill against A (earlier sequence), then B; both at the
    // resting price 100, not the taker's 99.
    assert_eq!(sell_c.trades[0].buyer_user_id, a);
    assert_eq!(sell_c.trades[0].quantity, m("10"));
    assert_eq!(sell_c.trades[0].price, m("100"));
    assert_eq!(sell_c.trades[1].buyer_user_id, b);
    assert_eq!(sell_c.trades[1].quantity, m("5"));
    assert_eq!(sell_c.trades[1].price, m("100"));
    assert_eq!(sell_c.status, OrderStatus::Filled);

    // Residual BUY 5 @ 100 by B remains.
    let b_order = stored_order(&h, &buy_b);
    assert_status(&b_order, OrderStatus::PartiallyFilled);
    assert_eq!(b_order.filled_quantity, m("5"));
    let a_order = stored_order(&h, &buy_a);
    assert_status(&a_order, OrderStatus::Filled);

    let snapshot = h.snapshot("XY").await;
    assert_eq!(snapshot.bids.len(), 1);
    assert_eq!(snapshot.bids[0].price, m("100"));
    assert_eq!(snapshot.bids[0].visible_quantity, m("5"));
    assert!(snapshot.asks.is_empty());
}

#[tokio::test]
async fn test_self_match_skipped_order_rests() {
    let h = Harness::new("XY");
    let a = h.funded_user("1000000");

    let sell = h.place(a, "XY", Side::Sell, "10", "100", TimeInForce::Gtc).await;
    let buy = h.place(a, "XY", Side::Buy, "10", "100", TimeInForce::Gtc).await;

    assert!(buy.trades.is_empty());
    assert_eq!(buy.status, OrderStatus::Working);

    let sell_order = stored_order(&h, &sell);
    let buy_order = stored_order(&h, &buy);
    assert_status(&sell_order, OrderStatus::Working);
    assert_status(&buy_order, OrderStatus::Working);
    assert!(buy_order.sequence > sell_order.sequence);
}

#[tokio::test]
async fn test_ioc_partial_fill_then_cancelled() {
    let h = Harness::new("XY");
    let maker = h.funded_user("1000000");
    let taker = h.funded_user("1000000");

    h.place(maker, "XY", Side::Sell, "5", "100", TimeInForce::Gtc).await;
    let ioc = h.place(taker, "XY", Side::Buy, "10", "100", TimeInForce::Ioc).await;

    assert_eq!(ioc.trades.len(), 1);
    assert_eq!(ioc.trades[0].quantity, m("5"));
    assert_eq!(ioc.trades[0].price, m("100"));
    assert_eq!(ioc.status, OrderStatus::Cancelled);

    let order = stored_order(&h, &ioc);
    assert_eq!(order.filled_quantity, m("5"));
    assert_status(&order, OrderStatus::Cancelled);

    // Nothing rests on either side at 100.
    let snapshot = h.snapshot("XY").await;
    assert!(snapshot.bids.is_empty());
    assert!(snapshot.asks.is_empty());
}

#[tokio::test]
async fn test_fok_insufficient_liquidity_rejected() {
    let h = Harness::new("XY");
    let maker = h.funded_user("1000000");
    let taker = h.funded_user("1000000");

    h.place(maker, "XY", Side::Sell, "5", "100", TimeInForce::Gtc).await;
    h.place(maker, "XY", Side::Sell, "3", "101", TimeInForce::Gtc).await;
    let before = h.snapshot("XY").await;

    let fok = h.place(taker, "XY", Side::Buy, "10", "101", TimeInForce::Fok).await;
    assert!(!fok.accepted);
    assert_eq!(fok.status, OrderStatus::Rejected);
    assert!(fok.trades.is_empty());

    // Book unchanged.
    let after = h.snapshot("XY").await;
    assert_eq!(before.asks, after.asks);
    assert_eq!(before.bids, after.bids);
}

#[tokio::test]
async fn test_margin_rejection_with_audit() {
    let instrument = Instrument::new(
        "XY",
        m("1"),
        m("100000"),
        m("1"),
        m("1"),
        m("0.2"),
        None,
    )
    .unwrap();
    let h = Harness::with_instrument(instrument);
    let user = h.funded_user("100");

    let result = h.place(user, "XY", Side::Buy, "10", "100", TimeInForce::Gtc).await;
    assert!(!result.accepted);
    assert_eq!(result.status, OrderStatus::Rejected);
    assert_eq!(
        result.reason.as_deref(),
        Some("insufficient margin (available 100, required 200)")
    );
    assert!(result.risk_score >= 40);

    // One attempt audit, one risk-rejection audit, no trade audit.
    let entries = h.store.audit_entries();
    assert_eq!(
        entries
            .iter()
            .filter(|e| e.kind == AuditKind::CommandAttempt)
            .count(),
        1
    );
    assert_eq!(
        entries
            .iter()
            .filter(|e| e.kind == AuditKind::RiskRejection)
            .count(),
        1
    );
    assert!(
        entries
            .iter()
            .all(|e| e.kind != AuditKind::TradeExecuted)
    );
}

#[tokio::test]
async fn test_expiration_settlement() {
    let h = Harness::new("XY");
    let a = h.funded_user("1000000");
    let b = h.funded_user("1000000");

    // Build A long 10 @ 50 against B short 10 @ 50.
    h.place(a, "XY", Side::Buy, "10", "50", TimeInForce::Gtc).await;
    let sell = h.place(b, "XY", Side::Sell, "10", "50", TimeInForce::Gtc).await;
    assert_eq!(sell.trades.len(), 1);

    // A stray resting order that must expire.
    let resting = h.place(a, "XY", Side::Buy, "1", "40", TimeInForce::Gtc).await;

    let result = h
        .router
        .submit(Command::SettleInstrument {
            symbol: "XY".to_string(),
            settlement_price: m("55"),
            deadline_ms: None,
        })
        .await
        .unwrap();
    let CommandResult::InstrumentSettled {
        positions_settled,
        orders_expired,
    } = result
    else {
        panic!("expected InstrumentSettled, got {result:?}");
    };
    assert_eq!(positions_settled, 2);
    assert_eq!(orders_expired, 1);

    let a_pos = h.store.position(a, "XY").unwrap();
    let b_pos = h.store.position(b, "XY").unwrap();
    assert!(a_pos.is_flat());
    assert!(b_pos.is_flat());
    assert_eq!(a_pos.realized_pnl, m("50"));
    assert_eq!(b_pos.realized_pnl, m("-50"));

    let instrument = h.store.instrument("XY").unwrap();
    assert!(!instrument.is_active);
    assert_eq!(instrument.settlement_price, Some(m("55")));

    assert_status(&stored_order(&h, &resting), OrderStatus::Expired);

    // A later order is rejected for liveness.
    let late = h.place(a, "XY", Side::Buy, "1", "50", TimeInForce::Gtc).await;
    assert!(!late.accepted);
    assert!(late.reason.unwrap().contains("inactive"));
}

#[tokio::test]
async fn test_settlement_moves_cash_atomically() {
    let h = Harness::new("XY");
    let buyer = h.funded_user("10000");
    let seller = h.funded_user("10000");

    h.place(seller, "XY", Side::Sell, "10", "100", TimeInForce::Gtc).await;
    h.place(buyer, "XY", Side::Buy, "10", "100", TimeInForce::Gtc).await;

    // Notional 1000, fee 1 per side.
    let buyer_balance = h.store.balance(buyer, "USD").unwrap();
    let seller_balance = h.store.balance(seller, "USD").unwrap();
    assert_eq!(buyer_balance.available, m("8999"));
    assert_eq!(seller_balance.available, m("10999"));
    assert!(buyer_balance.invariants_hold());
    assert!(seller_balance.invariants_hold());

    // Position conservation across the instrument.
    assert!(h.store.position_sum("XY").is_zero());
}

#[tokio::test]
async fn test_cancel_terminal_order_is_noop() {
    let h = Harness::new("XY");
    let maker = h.funded_user("1000000");
    let taker = h.funded_user("1000000");

    let sell = h.place(maker, "XY", Side::Sell, "5", "100", TimeInForce::Gtc).await;
    h.place(taker, "XY", Side::Buy, "5", "100", TimeInForce::Gtc).await;

    let result = h
        .router
        .submit(Command::CancelOrder {
            user_id: maker,
            order_id: sell.order_id.unwrap(),
            deadline_ms: None,
        })
        .await
        .unwrap();
    assert_eq!(
        result,
        CommandResult::OrderCancelled {
            order_id: sell.order_id.unwrap(),
            status: OrderStatus::Filled,
        }
    );
}

#[tokio::test]
async fn test_cancel_requires_ownership() {
    let h = Harness::new("XY");
    let owner = h.funded_user("1000000");
    let stranger = h.funded_user("1000000");

    let order = h.place(owner, "XY", Side::Buy, "1", "100", TimeInForce::Gtc).await;
    let err = h
        .router
        .submit(Command::CancelOrder {
            user_id: stranger,
            order_id: order.order_id.unwrap(),
            deadline_ms: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn test_modify_quantity_keeps_time_priority() {
    let h = Harness::new("XY");
    let user = h.funded_user("1000000");

    let placed = h.place(user, "XY", Side::Buy, "10", "100", TimeInForce::Gtc).await;
    let original = stored_order(&h, &placed);

    let result = h
        .router
        .submit(Command::ModifyOrder {
            user_id: user,
            order_id: placed.order_id.unwrap(),
            new_quantity: Some(m("4")),
            new_price: None,
            deadline_ms: None,
        })
        .await
        .unwrap();
    let CommandResult::OrderModified { new_order_id, .. } = &result else {
        panic!("expected OrderModified, got {result:?}");
    };
    assert!(new_order_id.is_none());

    let updated = stored_order(&h, &placed);
    assert_eq!(updated.total_quantity, m("4"));
    assert_eq!(updated.sequence, original.sequence);
}

#[tokio::test]
async fn test_modify_price_reissues_with_fresh_id() {
    let h = Harness::new("XY");
    let maker = h.funded_user("1000000");
    let user = h.funded_user("1000000");

    h.place(maker, "XY", Side::Sell, "5", "101", TimeInForce::Gtc).await;
    let placed = h.place(user, "XY", Side::Buy, "5", "99", TimeInForce::Gtc).await;

    // Repricing to 101 crosses the resting ask and trades.
    let result = h
        .router
        .submit(Command::ModifyOrder {
            user_id: user,
            order_id: placed.order_id.unwrap(),
            new_quantity: None,
            new_price: Some(m("101")),
            deadline_ms: None,
        })
        .await
        .unwrap();
    let CommandResult::OrderModified {
        order_id,
        new_order_id,
        status,
        trades,
    } = result
    else {
        panic!("expected OrderModified");
    };
    assert_eq!(order_id, placed.order_id.unwrap());
    let new_id = new_order_id.expect("price change yields a fresh id");
    assert_ne!(new_id, order_id);
    assert_eq!(status, OrderStatus::Filled);
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].price, m("101"));

    assert_status(&stored_order(&h, &placed), OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_all_fans_out_across_instruments() {
    let h = Harness::new("XY");
    h.add_instrument("ZW");
    let user = h.funded_user("1000000");

    h.place(user, "XY", Side::Buy, "1", "100", TimeInForce::Gtc).await;
    h.place(user, "XY", Side::Buy, "1", "99", TimeInForce::Gtc).await;
    h.place(user, "ZW", Side::Sell, "1", "200", TimeInForce::Gtc).await;

    let result = h
        .router
        .submit(Command::CancelAll {
            user_id: user,
            account_id: None,
            symbol: None,
            deadline_ms: None,
        })
        .await
        .unwrap();
    assert_eq!(result, CommandResult::AllCancelled { cancelled_count: 3 });

    assert!(h.snapshot("XY").await.bids.is_empty());
    assert!(h.snapshot("ZW").await.asks.is_empty());
}

#[tokio::test]
async fn test_expired_deadline_rejected_without_work() {
    let h = Harness::new("XY");
    let user = h.funded_user("1000000");

    let err = h
        .router
        .submit(Command::PlaceOrder(exchange_core::engine::PlaceOrder {
            user_id: user,
            account_id: user,
            symbol: "XY".to_string(),
            side: Side::Buy,
            time_in_force: TimeInForce::Gtc,
            quantity: m("1"),
            price: m("100"),
            display_quantity: None,
            deadline_ms: Some(1),
        }))
        .await
        .unwrap_err();
    assert_eq!(err, CoreError::DeadlineExceeded);

    let snapshot = h.snapshot("XY").await;
    assert!(snapshot.bids.is_empty());
}

#[tokio::test]
async fn test_day_orders_expire_via_session_close() {
    let h = Harness::new("XY");
    let user = h.funded_user("1000000");

    let day = h.place(user, "XY", Side::Buy, "1", "100", TimeInForce::Day).await;
    let gtc = h.place(user, "XY", Side::Buy, "1", "99", TimeInForce::Gtc).await;

    let result = h
        .router
        .submit(Command::ExpireDayOrders {
            symbol: "XY".to_string(),
            deadline_ms: None,
        })
        .await
        .unwrap();
    assert_eq!(result, CommandResult::DayOrdersExpired { expired_count: 1 });

    assert_status(&stored_order(&h, &day), OrderStatus::Expired);
    assert_status(&stored_order(&h, &gtc), OrderStatus::Working);
}

#[tokio::test]
async fn test_event_sequences_strictly_increase() {
    let h = Harness::new("XY");
    let sequences = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&sequences);
    let _sub = h.bus.subscribe(
        TopicFilter::All,
        Arc::new(move |_: &str, event: &MarketEvent| {
            sink.lock().unwrap().push(event.sequence());
        }),
    );

    let maker = h.funded_user("1000000");
    let taker = h.funded_user("1000000");
    h.place(maker, "XY", Side::Sell, "5", "100", TimeInForce::Gtc).await;
    h.place(maker, "XY", Side::Sell, "5", "101", TimeInForce::Gtc).await;
    h.place(taker, "XY", Side::Buy, "8", "101", TimeInForce::Gtc).await;

    let seen = sequences.lock().unwrap().clone();
    assert!(!seen.is_empty());
    for pair in seen.windows(2) {
        assert!(pair[0] < pair[1], "sequences not increasing: {seen:?}");
    }
}

#[tokio::test]
async fn test_no_trade_records_same_user_both_sides() {
    let h = Harness::new("XY");
    let a = h.funded_user("1000000");
    let b = h.funded_user("1000000");

    h.place(a, "XY", Side::Sell, "5", "100", TimeInForce::Gtc).await;
    h.place(b, "XY", Side::Sell, "5", "100", TimeInForce::Gtc).await;
    let cross = h.place(a, "XY", Side::Buy, "10", "100", TimeInForce::Gtc).await;

    // A's buy fills only against B; A's own ask still rests.
    assert_eq!(cross.trades.len(), 1);
    for trade in &cross.trades {
        assert_ne!(trade.buyer_user_id, trade.seller_user_id);
    }
    assert_eq!(cross.trades[0].seller_user_id, b);
}
