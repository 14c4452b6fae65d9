//! Engine configuration.
//!
//! The core reads a small set of environment variables; everything else is
//! supplied explicitly at construction time (no ambient globals).

use crate::money::Money;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::warn;

/// Default decimal rounding precision (significant fractional digits).
pub const DEFAULT_DECIMAL_PRECISION: u32 = 28;

/// Default trading fee rate applied to each side of a trade (0.1%).
pub const DEFAULT_FEE_RATE: &str = "0.001";

/// Default cash currency for balances.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Default bound on each instrument's command queue.
pub const DEFAULT_MAX_COMMAND_QUEUE: usize = 10_000;

/// Runtime configuration for the core, resolved once at startup and passed
/// to the orchestrator at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Rounding precision for derived monetary values (fees, P&L).
    pub decimal_precision: u32,

    /// Fee rate charged on the notional of each fill, per side.
    pub fee_rate: Money,

    /// Cash currency used for balances and settlement.
    pub default_currency: String,

    /// Capacity of each instrument's bounded command queue. A full queue
    /// rejects new commands immediately with a busy error.
    pub max_command_queue: usize,
}

impl CoreConfig {
    /// Resolve configuration from the process environment, falling back to
    /// documented defaults. Malformed values are ignored with a warning
    /// rather than aborting startup.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("DECIMAL_PRECISION") {
            match raw.parse::<u32>() {
                Ok(p) if p <= crate::money::MAX_SCALE => config.decimal_precision = p,
                _ => warn!(value = %raw, "ignoring invalid DECIMAL_PRECISION"),
            }
        }
        if let Ok(raw) = std::env::var("FEE_RATE") {
            match Decimal::from_str(&raw) {
                Ok(rate) if !rate.is_sign_negative() => config.fee_rate = Money::new(rate),
                _ => warn!(value = %raw, "ignoring invalid FEE_RATE"),
            }
        }
        if let Ok(raw) = std::env::var("DEFAULT_CURRENCY") {
            if !raw.is_empty() {
                config.default_currency = raw;
            }
        }
        if let Ok(raw) = std::env::var("MAX_COMMAND_QUEUE") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => config.max_command_queue = n,
                _ => warn!(value = %raw, "ignoring invalid MAX_COMMAND_QUEUE"),
            }
        }

        config
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            decimal_precision: DEFAULT_DECIMAL_PRECISION,
            fee_rate: Money::from_str(DEFAULT_FEE_RATE).expect("default fee rate parses"),
            default_currency: DEFAULT_CURRENCY.to_string(),
            max_command_queue: DEFAULT_MAX_COMMAND_QUEUE,
        }
    }
}
