//! Operator CLI over the exported market-event stream.
//!
//! Works offline against the JSON-lines event log a host tees from the
//! bus (see `marketdata::EventLog`). Exit codes: 0 success, 1 transient
//! failure (I/O), 2 integrity violation, 3 invalid arguments.

use clap::{Parser, Subcommand};
use exchange_core::domain::Side;
use exchange_core::marketdata::{EventLog, MarketEvent};
use exchange_core::money::Money;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use uuid::Uuid;

const EXIT_OK: u8 = 0;
const EXIT_TRANSIENT: u8 = 1;
const EXIT_INTEGRITY: u8 = 2;
const EXIT_INVALID_ARGS: u8 = 3;

#[derive(Parser)]
#[command(name = "admin", about = "Exchange core operator tools")]
struct Cli {
    /// Path to the JSON-lines market-event log.
    #[arg(long, global = true, default_value = "events.jsonl")]
    log: PathBuf,

    #[command(subcommand)]
    command: AdminCommand,
}

#[derive(Subcommand)]
enum AdminCommand {
    /// Replay book deltas from a sequence and print the resulting book.
    Replay {
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value_t = 0)]
        from_sequence: u64,
    },
    /// Verify the event stream's sequencing and book invariants.
    IntegrityCheck {
        #[arg(long)]
        symbol: String,
    },
    /// Compute the expiration settlement plan at a given price.
    MarkExpired {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        price: Money,
    },
    /// Print the latest book state reconstructed from deltas.
    DumpBook {
        #[arg(long)]
        symbol: String,
    },
}

/// Book state reconstructed from deltas.
#[derive(Default)]
struct RebuiltBook {
    bids: BTreeMap<Money, (Money, usize)>,
    asks: BTreeMap<Money, (Money, usize)>,
    last_sequence: u64,
}

impl RebuiltBook {
    fn apply(&mut self, side: Side, price: Money, visible: Money, count: usize) {
        let ladder = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if count == 0 || visible.is_zero() {
            ladder.remove(&price);
        } else {
            ladder.insert(price, (visible, count));
        }
    }

    fn print(&self, symbol: &str) {
        println!("book {symbol} (through sequence {})", self.last_sequence);
        println!("  asks:");
        for (price, (qty, count)) in self.asks.iter().rev() {
            println!("    {price} x {qty} ({count} orders)");
        }
        println!("  bids:");
        for (price, (qty, count)) in self.bids.iter().rev() {
            println!("    {price} x {qty} ({count} orders)");
        }
    }
}

fn rebuild(
    events: &[MarketEvent],
    symbol: &str,
    from_sequence: u64,
) -> Result<RebuiltBook, String> {
    let mut book = RebuiltBook::default();
    for event in events {
        if event.symbol() != Some(symbol) {
            continue;
        }
        let sequence = event.sequence();
        if sequence <= from_sequence {
            continue;
        }
        if sequence <= book.last_sequence {
            return Err(format!(
                "sequence regression: {sequence} after {}",
                book.last_sequence
            ));
        }
        book.last_sequence = sequence;
        if let MarketEvent::BookDelta {
            side,
            price,
            visible_quantity,
            order_count,
            ..
        } = event
        {
            book.apply(*side, *price, *visible_quantity, *order_count);
        }
    }
    Ok(book)
}

fn run(cli: Cli) -> u8 {
    let events = match EventLog::read_all(&cli.log) {
        Ok(events) => events,
        Err(e) => {
            eprintln!("cannot read event log: {e}");
            return EXIT_TRANSIENT;
        }
    };

    match cli.command {
        AdminCommand::Replay {
            symbol,
            from_sequence,
        } => match rebuild(&events, &symbol, from_sequence) {
            Ok(book) => {
                book.print(&symbol);
                EXIT_OK
            }
            Err(e) => {
                eprintln!("integrity violation: {e}");
                EXIT_INTEGRITY
            }
        },

        AdminCommand::IntegrityCheck { symbol } => match rebuild(&events, &symbol, 0) {
            Ok(book) => {
                if let (Some((bid, _)), Some((ask, _))) = (
                    book.bids.iter().next_back(),
                    book.asks.iter().next(),
                ) {
                    if bid >= ask {
                        eprintln!("integrity violation: crossed book ({bid} >= {ask})");
                        return EXIT_INTEGRITY;
                    }
                }
                println!(
                    "ok: {} events through sequence {}, book uncrossed",
                    events.len(),
                    book.last_sequence
                );
                EXIT_OK
            }
            Err(e) => {
                eprintln!("integrity violation: {e}");
                EXIT_INTEGRITY
            }
        },

        AdminCommand::MarkExpired { symbol, price } => {
            // Rebuild net positions per account from the trade prints and
            // price the settlement transfer for each.
            let mut positions: BTreeMap<Uuid, (Money, Money)> = BTreeMap::new(); // qty, cost
            for event in &events {
                let MarketEvent::TradePrint { trade } = event else {
                    continue;
                };
                if trade.symbol != symbol {
                    continue;
                }
                let notional = match trade.quantity.checked_mul(trade.price) {
                    Ok(n) => n,
                    Err(e) => {
                        eprintln!("integrity violation: {e}");
                        return EXIT_INTEGRITY;
                    }
                };
                let buyer = positions
                    .entry(trade.buyer_account_id)
                    .or_insert((Money::ZERO, Money::ZERO));
                buyer.0 = buyer.0.saturating_add(trade.quantity);
                buyer.1 = buyer.1.saturating_add(notional);
                let seller = positions
                    .entry(trade.seller_account_id)
                    .or_insert((Money::ZERO, Money::ZERO));
                seller.0 = seller.0.saturating_add(-trade.quantity);
                seller.1 = seller.1.saturating_add(-notional);
            }

            let mut settled = 0usize;
            for (account, (quantity, cost)) in &positions {
                if quantity.is_zero() {
                    continue;
                }
                let value = match quantity.checked_mul(price) {
                    Ok(v) => v,
                    Err(e) => {
                        eprintln!("integrity violation: {e}");
                        return EXIT_INTEGRITY;
                    }
                };
                let transfer = value.saturating_add(-*cost);
                println!("{account}: quantity {quantity}, settlement transfer {transfer}");
                settled += 1;
            }
            println!("positions to settle at {price}: {settled}");
            EXIT_OK
        }

        AdminCommand::DumpBook { symbol } => match rebuild(&events, &symbol, 0) {
            Ok(book) => {
                book.print(&symbol);
                EXIT_OK
            }
            Err(e) => {
                eprintln!("integrity violation: {e}");
                EXIT_INTEGRITY
            }
        },
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Let clap print help/version normally; anything else is an
            // argument error.
            if e.use_stderr() {
                eprintln!("{e}");
                return ExitCode::from(EXIT_INVALID_ARGS);
            }
            let _ = e.print();
            return ExitCode::from(EXIT_OK);
        }
    };
    ExitCode::from(run(cli))
}
