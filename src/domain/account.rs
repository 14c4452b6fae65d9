//! Position and balance records.

use crate::money::{Money, MoneyError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Net position of one account in one instrument.
///
/// `quantity` is signed: positive long, negative short. When the position
/// is flat the average price is meaningless and is kept at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub account_id: Uuid,
    pub symbol: String,
    pub quantity: Money,
    pub avg_price: Money,
    pub realized_pnl: Money,
    pub unrealized_pnl: Money,
}

impl Position {
    /// A flat position.
    #[must_use]
    pub fn flat(account_id: Uuid, symbol: impl Into<String>) -> Self {
        Self {
            account_id,
            symbol: symbol.into(),
            quantity: Money::ZERO,
            avg_price: Money::ZERO,
            realized_pnl: Money::ZERO,
            unrealized_pnl: Money::ZERO,
        }
    }

    #[must_use]
    #[inline]
    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Absolute notional at `price`.
    pub fn notional_at(&self, price: Money) -> Result<Money, MoneyError> {
        self.quantity.abs().checked_mul(price)
    }

    /// Recompute unrealized P&L against `mark_price`:
    /// `quantity × (mark − avg)`.
    pub fn remark(&mut self, mark_price: Money) -> Result<(), MoneyError> {
        self.unrealized_pnl = if self.is_flat() {
            Money::ZERO
        } else {
            self.quantity
                .checked_mul(mark_price.checked_sub(self.avg_price)?)?
        };
        Ok(())
    }
}

/// Cash balance of one account in one currency.
///
/// Invariant: `total = available + reserved`, all non-negative for cash
/// currencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub account_id: Uuid,
    pub currency: String,
    pub total: Money,
    pub available: Money,
    pub reserved: Money,
}

/// Balance mutations that would break the non-negativity invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BalanceError {
    #[error("balance would go negative: available {available}, debit {debit}")]
    InsufficientAvailable { available: Money, debit: Money },

    #[error("reserved balance underflow: reserved {reserved}, release {release}")]
    ReservedUnderflow { reserved: Money, release: Money },

    #[error(transparent)]
    Arithmetic(#[from] MoneyError),
}

impl Balance {
    /// A zero balance.
    #[must_use]
    pub fn empty(account_id: Uuid, currency: impl Into<String>) -> Self {
        Self {
            account_id,
            currency: currency.into(),
            total: Money::ZERO,
            available: Money::ZERO,
            reserved: Money::ZERO,
        }
    }

    /// A balance funded with `amount` of available cash.
    #[must_use]
    pub fn with_available(account_id: Uuid, currency: impl Into<String>, amount: Money) -> Self {
        Self {
            account_id,
            currency: currency.into(),
            total: amount,
            available: amount,
            reserved: Money::ZERO,
        }
    }

    /// Credit available funds.
    pub fn credit(&mut self, amount: Money) -> Result<(), BalanceError> {
        self.available = self.available.checked_add(amount)?;
        self.total = self.total.checked_add(amount)?;
        Ok(())
    }

    /// Debit available funds; refuses to go negative.
    pub fn debit(&mut self, amount: Money) -> Result<(), BalanceError> {
        if amount > self.available {
            return Err(BalanceError::InsufficientAvailable {
                available: self.available,
                debit: amount,
            });
        }
        self.available = self.available.checked_sub(amount)?;
        self.total = self.total.checked_sub(amount)?;
        Ok(())
    }

    /// Move funds from available to reserved.
    pub fn reserve(&mut self, amount: Money) -> Result<(), BalanceError> {
        if amount > self.available {
            return Err(BalanceError::InsufficientAvailable {
                available: self.available,
                debit: amount,
            });
        }
        self.available = self.available.checked_sub(amount)?;
        self.reserved = self.reserved.checked_add(amount)?;
        Ok(())
    }

    /// Move funds from reserved back to available.
    pub fn release(&mut self, amount: Money) -> Result<(), BalanceError> {
        if amount > self.reserved {
            return Err(BalanceError::ReservedUnderflow {
                reserved: self.reserved,
                release: amount,
            });
        }
        self.reserved = self.reserved.checked_sub(amount)?;
        self.available = self.available.checked_add(amount)?;
        Ok(())
    }

    /// `total = available + reserved` and non-negativity.
    #[must_use]
    pub fn invariants_hold(&self) -> bool {
        !self.total.is_negative()
            && !self.available.is_negative()
            && !self.reserved.is_negative()
            && self.available.saturating_add(self.reserved) == self.total
    }
}
