//! Matching engine tests at the book level.

use crate::common::m;
use exchange_core::domain::{Order, OrderStatus, Side, TimeInForce};
use exchange_core::money::Money;
use exchange_core::orderbook::OrderBook;
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

fn iceberg(side: Side, price: &str, qty: &str, display: &str) -> Order {
    let mut o = order(side, price, qty);
    o.display_quantity = Some(m(display));
    o
}

#[test]
fn test_price_priority_before_time_priority() {
    let book = OrderBook::new("X");
    let cheap = book.add_order(order(Side::Sell, "100", "5")).unwrap();
    let early_expensive = book.add_order(order(Side::Sell, "101", "5")).unwrap();
    let late_cheap = book.add_order(order(Side::Sell, "100", "5")).unwrap();

    let mut taker = order(Side::Buy, "101", "12");
    let outcome = book.match_order(&mut taker).unwrap();

    let maker_ids: Vec<_> = outcome.fills.iter().map(|f| f.maker.id).collect();
    assert_eq!(maker_ids, vec![cheap.id, late_cheap.id, early_expensive.id]);
    assert_eq!(outcome.fills[2].quantity, m("2"));
}

#[test]
fn test_trade_price_is_resting_price() {
    let book = OrderBook::new("X");
    book.add_order(order(Side::Sell, "100", "5")).unwrap();

    // Taker willing to pay 105 still trades at 100.
    let mut taker = order(Side::Buy, "105", "5");
    let outcome = book.match_order(&mut taker).unwrap();
    assert_eq!(outcome.fills[0].price, m("100"));
    assert_eq!(taker.status, OrderStatus::Filled);
}

#[test]
fn test_taker_prices_monotone_non_improving() {
    let book = OrderBook::new("X");
    for (price, qty) in [("100", "3"), ("101", "3"), ("102", "3")] {
        book.add_order(order(Side::Sell, price, qty)).unwrap();
    }

    let mut taker = order(Side::Buy, "102", "9");
    let outcome = book.match_order(&mut taker).unwrap();
    let prices: Vec<Money> = outcome.fills.iter().map(|f| f.price).collect();
    let mut sorted = prices.clone();
    sorted.sort();
    // Ascending for a buy taker.
    assert_eq!(prices, sorted);
}

#[test]
fn test_limit_never_crossed() {
    let book = OrderBook::new("X");
    book.add_order(order(Side::Sell, "100", "5")).unwrap();
    book.add_order(order(Side::Sell, "103", "5")).unwrap();

    let mut taker = order(Side::Buy, "101", "10");
    let outcome = book.match_order(&mut taker).unwrap();
    assert_eq!(outcome.executed_quantity(), m("5"));
    assert_eq!(taker.remaining(), m("5"));
    assert_eq!(book.best_ask(), Some(m("103")));
}

#[test]
fn test_self_match_skips_and_continues_to_next_level() {
    let book = OrderBook::new("X");
    let user = Uuid::new_v4();
    let mut own = order(Side::Sell, "100", "5");
    own.user_id = user;
    let own = book.add_order(own).unwrap();
    let other = book.add_order(order(Side::Sell, "101", "5")).unwrap();

    let mut taker = order(Side::Buy, "101", "5");
    taker.user_id = user;
    let outcome = book.match_order(&mut taker).unwrap();

    // Skips the own order at the better price, fills against the other
    // user at the worse price, and leaves the own order resting.
    assert_eq!(outcome.fills.len(), 1);
    assert_eq!(outcome.fills[0].maker.id, other.id);
    assert_eq!(outcome.fills[0].price, m("101"));
    assert!(book.get_order(own.id).is_some());
}

#[test]
fn test_iceberg_hidden_residual_blocks_worse_prices() {
    let book = OrderBook::new("X");
    // 30 total with only 5 displayed at 100, plain order at 101.
    book.add_order(iceberg(Side::Sell, "100", "30", "5")).unwrap();
    book.add_order(order(Side::Sell, "101", "10")).unwrap();

    let mut taker = order(Side::Buy, "101", "30");
    let outcome = book.match_order(&mut taker).unwrap();

    // The entire hidden residual at 100 executes before 101 is touched.
    let at_100: Money = outcome
        .fills
        .iter()
        .filter(|f| f.price == m("100"))
        .map(|f| f.quantity)
        .sum();
    assert_eq!(at_100, m("30"));
    assert_eq!(outcome.executed_quantity(), m("30"));
}

#[test]
fn test_matchable_quantity_excludes_own_liquidity() {
    let book = OrderBook::new("X");
    let user = Uuid::new_v4();
    let mut own = order(Side::Sell, "100", "10");
    own.user_id = user;
    book.add_order(own).unwrap();
    book.add_order(order(Side::Sell, "100", "4")).unwrap();

    let available = book.matchable_quantity(Side::Buy, m("100"), user, m("100"));
    assert_eq!(available, m("4"));
}

#[test]
fn test_match_is_deterministic_replay() {
    let run = || {
        let book = OrderBook::new("X");
        let users: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let script = [
            (Side::Sell, "101", "7", 0usize),
            (Side::Sell, "100", "3", 1),
            (Side::Buy, "99", "5", 2),
            (Side::Sell, "100", "4", 3),
        ];
        for (side, price, qty, user) in script {
            let mut o = order(side, price, qty);
            o.user_id = users[user];
            book.add_order(o).unwrap();
        }
        let mut taker = order(Side::Buy, "101", "12");
        let outcome = book.match_order(&mut taker).unwrap();
        outcome
            .fills
            .iter()
            .map(|f| (f.price, f.quantity))
            .collect::<Vec<_>>()
    };

    assert_eq!(run(), run());
}

#[test]
fn test_no_cross_remains_after_matching() {
    let book = OrderBook::new("X");
    book.add_order(order(Side::Sell, "100", "5")).unwrap();
    book.add_order(order(Side::Sell, "101", "5")).unwrap();

    let mut taker = order(Side::Buy, "100", "8");
    book.match_order(&mut taker).unwrap();
    let residual = book.add_order(taker).unwrap();
    assert_eq!(residual.status, OrderStatus::PartiallyFilled);

    book.validate_integrity().unwrap();
    assert_eq!(book.best_bid(), Some(m("100")));
    assert_eq!(book.best_ask(), Some(m("101")));
}
