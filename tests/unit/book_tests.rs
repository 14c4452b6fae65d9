//! Order book operation tests.

use crate::common::m;
use exchange_core::domain::{Order, OrderStatus, Side, TimeInForce};
use exchange_core::orderbook::{OrderBook, OrderBookError};
use uuid::Uuid;

fn order(side: Side, price: &str, qty: &str) -> Order {
    Order::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        "X",
        side,
        m(price),
        m(qty),
        None,
        TimeInForce::Gtc,
        0,
    )
}

#[test]
fn test_add_assigns_monotonic_sequence() {
    let book = OrderBook::new("X");
    let first = book.add_order(order(Side::Buy, "100", "1")).unwrap();
    let second = book.add_order(order(Side::Buy, "101", "1")).unwrap();
    assert!(second.sequence > first.sequence);
    assert_eq!(first.status, OrderStatus::Working);
}

#[test]
fn test_best_bid_ask_spread_mid() {
    let book = OrderBook::new("X");
    book.add_order(order(Side::Buy, "99", "1")).unwrap();
    book.add_order(order(Side::Buy, "100", "1")).unwrap();
    book.add_order(order(Side::Sell, "102", "1")).unwrap();
    book.add_order(order(Side::Sell, "104", "1")).unwrap();

    assert_eq!(book.best_bid(), Some(m("100")));
    assert_eq!(book.best_ask(), Some(m("102")));
    assert_eq!(book.spread(), Some(m("2")));
    assert_eq!(book.mid_price(), Some(m("101")));
    book.validate_integrity().unwrap();
}

#[test]
fn test_remove_preserves_sibling_fifo() {
    let book = OrderBook::new("X");
    let a = book.add_order(order(Side::Buy, "100", "1")).unwrap();
    let b = book.add_order(order(Side::Buy, "100", "1")).unwrap();
    let c = book.add_order(order(Side::Buy, "100", "1")).unwrap();

    book.remove_order(b.id).unwrap();
    let mut taker = order(Side::Sell, "100", "2");
    let outcome = book.match_order(&mut taker).unwrap();
    assert_eq!(outcome.fills.len(), 2);
    assert_eq!(outcome.fills[0].maker.id, a.id);
    assert_eq!(outcome.fills[1].maker.id, c.id);
}

#[test]
fn test_remove_unknown_order_not_found() {
    let book = OrderBook::new("X");
    let missing = order(Side::Buy, "100", "1");
    assert!(matches!(
        book.remove_order(missing.id),
        Err(OrderBookError::OrderNotFound(_))
    ));
}

#[test]
fn test_quantity_update_decrease_only() {
    let book = OrderBook::new("X");
    let added = book.add_order(order(Side::Buy, "100", "10")).unwrap();

    let updated = book.update_order_quantity(added.id, m("4")).unwrap();
    assert_eq!(updated.total_quantity, m("4"));
    assert_eq!(updated.sequence, added.sequence);

    assert!(matches!(
        book.update_order_quantity(added.id, m("8")),
        Err(OrderBookError::QuantityIncrease { .. })
    ));
}

#[test]
fn test_cancel_all_respects_account_filter() {
    let book = OrderBook::new("X");
    let user = Uuid::new_v4();
    let account_a = Uuid::new_v4();
    let account_b = Uuid::new_v4();

    for account in [account_a, account_a, account_b] {
        let mut o = order(Side::Buy, "100", "1");
        o.user_id = user;
        o.account_id = account;
        book.add_order(o).unwrap();
    }

    let cancelled = book.cancel_all(user, Some(account_a));
    assert_eq!(cancelled.len(), 2);
    assert!(cancelled.iter().all(|o| o.status == OrderStatus::Cancelled));
    assert_eq!(book.open_order_count(), 1);
}

#[test]
fn test_day_orders_expire_at_session_close() {
    let book = OrderBook::new("X");
    let mut day = order(Side::Buy, "100", "1");
    day.time_in_force = TimeInForce::Day;
    let day = book.add_order(day).unwrap();
    book.add_order(order(Side::Buy, "99", "1")).unwrap();

    // No session close configured: nothing expires.
    assert!(book.expire_day_orders(10_000).is_empty());

    book.set_session_close(5_000);
    assert!(book.expire_day_orders(4_999).is_empty());
    let expired = book.expire_day_orders(5_000);
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, day.id);
    assert_eq!(expired[0].status, OrderStatus::Expired);
    assert_eq!(book.open_order_count(), 1);
}

#[test]
fn test_mark_price_fallback_chain() {
    let instrument = crate::common::test_instrument("X");
    let book = OrderBook::new("X");

    // Empty book: midpoint of the instrument band.
    assert_eq!(book.mark_price(&instrument), m("50000.5"));

    // Two-sided book: mid price.
    book.add_order(order(Side::Buy, "100", "1")).unwrap();
    book.add_order(order(Side::Sell, "104", "1")).unwrap();
    assert_eq!(book.mark_price(&instrument), m("102"));

    // After a trade: last trade price.
    let mut taker = order(Side::Buy, "104", "1");
    book.match_order(&mut taker).unwrap();
    assert_eq!(book.mark_price(&instrument), m("104"));
}

#[test]
fn test_integrity_detects_crossed_book_between_users() {
    let book = OrderBook::new("X");
    // Force a crossed state by adding directly (no matching pass).
    book.add_order(order(Side::Buy, "105", "1")).unwrap();
    book.add_order(order(Side::Sell, "100", "1")).unwrap();
    assert!(matches!(
        book.validate_integrity(),
        Err(OrderBookError::Integrity { .. })
    ));
}

#[test]
fn test_integrity_tolerates_single_user_crossing() {
    let book = OrderBook::new("X");
    let user = Uuid::new_v4();
    let mut bid = order(Side::Buy, "105", "1");
    bid.user_id = user;
    let mut ask = order(Side::Sell, "100", "1");
    ask.user_id = user;
    book.add_order(bid).unwrap();
    book.add_order(ask).unwrap();
    book.validate_integrity().unwrap();
}
