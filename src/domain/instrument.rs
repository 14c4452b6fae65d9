//! Instrument definition and validation.

use crate::money::Money;
use serde::{Deserialize, Serialize};

/// A tradable instrument.
///
/// Immutable after creation except `is_active` and `settlement_price`,
/// which change exactly once at expiration settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Unique symbol: uppercase alphanumeric plus `_` and `-`.
    pub symbol: String,
    pub min_price: Money,
    pub max_price: Money,
    pub tick_size: Money,
    pub lot_size: Money,
    /// Initial margin rate in `[0, 1]`.
    pub margin_rate: Money,
    /// Expiration instant, if the instrument expires.
    pub expiration_ms: Option<u64>,
    pub is_active: bool,
    /// Set once at expiration settlement.
    pub settlement_price: Option<Money>,
}

/// Instrument construction failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum InstrumentError {
    #[error("invalid symbol {symbol:?}: expected uppercase alphanumeric plus '_' or '-'")]
    InvalidSymbol { symbol: String },

    #[error("min price must be below max price")]
    InvertedPriceBand,

    #[error("tick size must be positive")]
    NonPositiveTick,

    #[error("lot size must be positive")]
    NonPositiveLot,

    #[error("margin rate must lie in [0, 1]")]
    MarginRateOutOfRange,
}

impl Instrument {
    /// Validate and build an instrument.
    pub fn new(
        symbol: impl Into<String>,
        min_price: Money,
        max_price: Money,
        tick_size: Money,
        lot_size: Money,
        margin_rate: Money,
        expiration_ms: Option<u64>,
    ) -> Result<Self, InstrumentError> {
        let symbol = symbol.into();
        if symbol.is_empty()
            || !symbol
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(InstrumentError::InvalidSymbol { symbol });
        }
        if min_price >= max_price {
            return Err(InstrumentError::InvertedPriceBand);
        }
        if !tick_size.is_positive() {
            return Err(InstrumentError::NonPositiveTick);
        }
        if !lot_size.is_positive() {
            return Err(InstrumentError::NonPositiveLot);
        }
        if margin_rate.is_negative() || margin_rate > Money::ONE {
            return Err(InstrumentError::MarginRateOutOfRange);
        }
        Ok(Self {
            symbol,
            min_price,
            max_price,
            tick_size,
            lot_size,
            margin_rate,
            expiration_ms,
            is_active: true,
            settlement_price: None,
        })
    }

    /// Whether the instrument is past its expiration instant at `now_ms`.
    #[must_use]
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        matches!(self.expiration_ms, Some(exp) if now_ms >= exp)
    }

    /// Whether `price` is inside the band and on the tick grid.
    #[must_use]
    pub fn price_is_valid(&self, price: Money) -> bool {
        price >= self.min_price && price <= self.max_price && price.is_multiple_of(self.tick_size)
    }

    /// Whether `quantity` is positive and on the lot grid.
    #[must_use]
    pub fn quantity_is_valid(&self, quantity: Money) -> bool {
        quantity.is_positive() && quantity.is_multiple_of(self.lot_size)
    }

    /// Fallback mark price when the book has neither trades nor a mid:
    /// the midpoint of the instrument's price band.
    #[must_use]
    pub fn band_midpoint(&self) -> Money {
        self.min_price
            .saturating_add(self.max_price)
            .checked_div(Money::from_int(2))
            .unwrap_or(self.min_price)
    }
}
