//! Snapshot/delta consistency and event-stream tests.

use crate::common::{Harness, m};
use exchange_core::domain::{Side, TimeInForce};
use exchange_core::marketdata::{MarketEvent, TopicFilter};
use exchange_core::money::Money;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

type Ladder = BTreeMap<Money, (Money, usize)>;

fn ladders_from_snapshot(
    snapshot: &exchange_core::orderbook::OrderBookSnapshot,
) -> (Ladder, Ladder) {
    let mut bids = Ladder::new();
    let mut asks = Ladder::new();
    for level in &snapshot.bids {
        bids.insert(level.price, (level.visible_quantity, level.order_count));
    }
    for level in &snapshot.asks {
        asks.insert(level.price, (level.visible_quantity, level.order_count));
    }
    (bids, asks)
}

fn apply_delta(bids: &mut Ladder, asks: &mut Ladder, event: &MarketEvent) {
    if let MarketEvent::BookDelta {
        side,
        price,
        visible_quantity,
        order_count,
        ..
    } = event
    {
        let ladder = match side {
            Side::Buy => bids,
            Side::Sell => asks,
        };
        if *order_count == 0 || visible_quantity.is_zero() {
            ladder.remove(price);
        } else {
            ladder.insert(*price, (*visible_quantity, *order_count));
        }
    }
}

#[tokio::test]
async fn test_snapshot_plus_deltas_equals_later_snapshot() {
    let h = Harness::new("XY");
    let deltas = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&deltas);
    let _sub = h.bus.subscribe(
        TopicFilter::Prefix("orderbook.".to_string()),
        Arc::new(move |_: &str, event: &MarketEvent| {
            sink.lock().unwrap().push(event.clone());
        }),
    );

    let maker = h.funded_user("1000000");
    let taker = h.funded_user("1000000");

    h.place(maker, "XY", Side::Sell, "5", "100", TimeInForce::Gtc).await;
    h.place(maker, "XY", Side::Sell, "7", "101", TimeInForce::Gtc).await;
    let first = h.snapshot("XY").await;
    first.verify().unwrap();

    h.place(taker, "XY", Side::Buy, "6", "101", TimeInForce::Gtc).await;
    h.place(maker, "XY", Side::Buy, "3", "98", TimeInForce::Gtc).await;
    let second = h.snapshot("XY").await;
    second.verify().unwrap();
    assert!(second.sequence > first.sequence);

    // Apply every delta in (first.sequence, second.sequence] on top of
    // the first snapshot; the result must equal the second.
    let (mut bids, mut asks) = ladders_from_snapshot(&first);
    for event in deltas.lock().unwrap().iter() {
        let sequence = event.sequence();
        if sequence > first.sequence && sequence <= second.sequence {
            apply_delta(&mut bids, &mut asks, event);
        }
    }
    let (expected_bids, expected_asks) = ladders_from_snapshot(&second);
    assert_eq!(bids, expected_bids);
    assert_eq!(asks, expected_asks);
}

#[tokio::test]
async fn test_trade_prints_reach_trade_topic_only() {
    let h = Harness::new("XY");
    let trades = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&trades);
    let _sub = h.bus.subscribe(
        TopicFilter::Exact("trades.XY".to_string()),
        Arc::new(move |_: &str, event: &MarketEvent| {
            sink.lock().unwrap().push(event.clone());
        }),
    );

    let maker = h.funded_user("1000000");
    let taker = h.funded_user("1000000");
    h.place(maker, "XY", Side::Sell, "5", "100", TimeInForce::Gtc).await;
    h.place(taker, "XY", Side::Buy, "5", "100", TimeInForce::Gtc).await;

    let seen = trades.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let MarketEvent::TradePrint { trade } = &seen[0] else {
        panic!("expected a trade print");
    };
    assert_eq!(trade.quantity, m("5"));
    assert_eq!(trade.price, m("100"));
}

#[tokio::test]
async fn test_user_events_routed_to_owner_topic() {
    let h = Harness::new("XY");
    let maker = h.funded_user("1000000");
    let taker = h.funded_user("1000000");

    let maker_events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&maker_events);
    let _sub = h.bus.subscribe(
        TopicFilter::Exact(format!("user.{maker}")),
        Arc::new(move |_: &str, event: &MarketEvent| {
            sink.lock().unwrap().push(event.clone());
        }),
    );

    h.place(maker, "XY", Side::Sell, "5", "100", TimeInForce::Gtc).await;
    h.place(taker, "XY", Side::Buy, "5", "100", TimeInForce::Gtc).await;

    let seen = maker_events.lock().unwrap();
    // Order status on entry, then position, balance, and fill status.
    assert!(
        seen.iter().any(|e| matches!(e, MarketEvent::OrderStatus { user_id, .. } if *user_id == maker))
    );
    assert!(
        seen.iter()
            .any(|e| matches!(e, MarketEvent::PositionUpdate { user_id, .. } if *user_id == maker))
    );
    assert!(
        seen.iter()
            .any(|e| matches!(e, MarketEvent::BalanceUpdate { user_id, .. } if *user_id == maker))
    );
    // Nothing for the other user leaked onto this topic.
    for event in seen.iter() {
        match event {
            MarketEvent::OrderStatus { user_id, .. }
            | MarketEvent::PositionUpdate { user_id, .. }
            | MarketEvent::BalanceUpdate { user_id, .. } => assert_eq!(*user_id, maker),
            other => panic!("unexpected event on user topic: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_iceberg_hides_residual_in_snapshot() {
    let h = Harness::new("XY");
    let user = h.funded_user("1000000");

    h.place_order(exchange_core::engine::PlaceOrder {
        user_id: user,
        account_id: user,
        symbol: "XY".to_string(),
        side: Side::Sell,
        time_in_force: TimeInForce::Gtc,
        quantity: m("100"),
        price: m("100"),
        display_quantity: Some(m("10")),
        deadline_ms: None,
    })
    .await;

    let snapshot = h.snapshot("XY").await;
    assert_eq!(snapshot.asks.len(), 1);
    // Only the displayed slice is visible.
    assert_eq!(snapshot.asks[0].visible_quantity, m("10"));
    assert_eq!(snapshot.asks[0].order_count, 1);
}
