//! Fixed-precision monetary arithmetic.
//!
//! Every price, quantity, balance, and P&L figure in the engine is a
//! [`Money`]. The type wraps [`rust_decimal::Decimal`] (28 significant
//! digits) and exposes a closed, checked API: arithmetic never silently
//! wraps or falls back to binary floating point, and division by zero is
//! a recoverable [`MoneyError`] rather than a panic.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::Neg;
use std::str::FromStr;

/// Maximum number of decimal places preserved by scaling operations.
///
/// Matches the 28 significant digits `Decimal` can represent; division
/// results are rounded half-up to this scale so repeated operations stay
/// representable.
pub const MAX_SCALE: u32 = 28;

/// Errors produced by [`Money`] arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum MoneyError {
    /// Division by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// The result does not fit in the 28-digit representation.
    #[error("arithmetic overflow: {op}")]
    Overflow {
        /// The operation that overflowed, for diagnostics.
        op: &'static str,
    },

    /// A decimal string could not be parsed.
    #[error("invalid decimal literal: {input}")]
    InvalidLiteral {
        /// The rejected input.
        input: String,
    },
}

/// A signed fixed-precision monetary amount.
///
/// Equality is exact (`1.50 == 1.500`, per decimal semantics). String
/// conversion is lossless for inputs within precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Zero.
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// One.
    pub const ONE: Money = Money(Decimal::ONE);

    /// Wrap a raw decimal.
    #[must_use]
    #[inline]
    pub const fn new(value: Decimal) -> Self {
        Money(value)
    }

    /// Build from an integer number of whole units.
    #[must_use]
    #[inline]
    pub fn from_int(value: i64) -> Self {
        Money(Decimal::from(value))
    }

    /// The underlying decimal value.
    #[must_use]
    #[inline]
    pub const fn inner(&self) -> Decimal {
        self.0
    }

    #[must_use]
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[must_use]
    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    #[must_use]
    #[inline]
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Absolute value.
    #[must_use]
    #[inline]
    pub fn abs(&self) -> Money {
        Money(self.0.abs())
    }

    /// `+1`, `-1`, or `0` depending on sign.
    #[must_use]
    #[inline]
    pub fn signum(&self) -> i8 {
        if self.0.is_zero() {
            0
        } else if self.0.is_sign_negative() {
            -1
        } else {
            1
        }
    }

    /// Checked addition.
    #[inline]
    pub fn checked_add(self, rhs: Money) -> Result<Money, MoneyError> {
        self.0
            .checked_add(rhs.0)
            .map(Money)
            .ok_or(MoneyError::Overflow { op: "add" })
    }

    /// Checked subtraction.
    #[inline]
    pub fn checked_sub(self, rhs: Money) -> Result<Money, MoneyError> {
        self.0
            .checked_sub(rhs.0)
            .map(Money)
            .ok_or(MoneyError::Overflow { op: "sub" })
    }

    /// Checked multiplication.
    #[inline]
    pub fn checked_mul(self, rhs: Money) -> Result<Money, MoneyError> {
        self.0
            .checked_mul(rhs.0)
            .map(Money)
            .ok_or(MoneyError::Overflow { op: "mul" })
    }

    /// Checked division, rounded half-up to [`MAX_SCALE`] decimal places.
    #[inline]
    pub fn checked_div(self, rhs: Money) -> Result<Money, MoneyError> {
        if rhs.0.is_zero() {
            return Err(MoneyError::DivisionByZero);
        }
        self.0
            .checked_div(rhs.0)
            .map(|d| Money(d.round_dp_with_strategy(MAX_SCALE, RoundingStrategy::MidpointAwayFromZero)))
            .ok_or(MoneyError::Overflow { op: "div" })
    }

    /// Saturating addition. Used only for display-side aggregation where a
    /// clamped total is preferable to failing a read path.
    #[must_use]
    #[inline]
    pub fn saturating_add(self, rhs: Money) -> Money {
        Money(self.0.checked_add(rhs.0).unwrap_or(Decimal::MAX))
    }

    /// Saturating subtraction clamped at zero.
    #[must_use]
    #[inline]
    pub fn saturating_sub_floor_zero(self, rhs: Money) -> Money {
        match self.0.checked_sub(rhs.0) {
            Some(d) if !d.is_sign_negative() => Money(d),
            _ => Money::ZERO,
        }
    }

    /// Round half-up to `dp` decimal places.
    #[must_use]
    #[inline]
    pub fn round_dp(&self, dp: u32) -> Money {
        Money(
            self.0
                .round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Whether `self` is an exact multiple of `step`.
    ///
    /// Used for tick-size and lot-size validation. A zero `step` is never
    /// a valid increment and yields `false`.
    #[must_use]
    pub fn is_multiple_of(&self, step: Money) -> bool {
        if step.0.is_zero() {
            return false;
        }
        match self.0.checked_rem(step.0) {
            Some(rem) => rem.is_zero(),
            None => false,
        }
    }

    #[must_use]
    #[inline]
    pub fn min(self, other: Money) -> Money {
        if self <= other { self } else { other }
    }

    #[must_use]
    #[inline]
    pub fn max(self, other: Money) -> Money {
        if self >= other { self } else { other }
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::ZERO
    }
}

impl Neg for Money {
    type Output = Money;

    #[inline]
    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc.saturating_add(m))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Normalized so arithmetic artifacts like `200.0` print as `200`.
        // Equality is unaffected: `1.50 == 1.5` per decimal semantics.
        write!(f, "{}", self.0.normalize())
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s)
            .map(Money)
            .map_err(|_| MoneyError::InvalidLiteral {
                input: s.to_string(),
            })
    }
}

impl From<i64> for Money {
    fn from(value: i64) -> Self {
        Money::from_int(value)
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Money(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(s: &str) -> Money {
        Money::from_str(s).unwrap()
    }

    #[test]
    fn test_string_round_trip_is_lossless() {
        for input in ["0", "1", "-1", "0.1", "123.456789012345", "-99999.00001"] {
            let money = m(input);
            assert_eq!(Money::from_str(&money.to_string()).unwrap(), money);
        }
    }

    #[test]
    fn test_equality_is_exact() {
        assert_eq!(m("1.50"), m("1.5"));
        assert_ne!(m("1.50"), m("1.51"));
    }

    #[test]
    fn test_division_by_zero_is_recoverable() {
        let err = m("10").checked_div(Money::ZERO).unwrap_err();
        assert_eq!(err, MoneyError::DivisionByZero);
    }

    #[test]
    fn test_division_rounds_half_up() {
        // 1/3 rounded at MAX_SCALE; check the general half-up behavior at
        // a coarse scale instead of eyeballing 28 digits.
        let result = m("0.25").checked_div(m("1")).unwrap().round_dp(1);
        assert_eq!(result, m("0.3"));
        let result = m("-0.25").checked_div(m("1")).unwrap().round_dp(1);
        assert_eq!(result, m("-0.3"));
    }

    #[test]
    fn test_is_multiple_of() {
        assert!(m("100").is_multiple_of(m("0.5")));
        assert!(m("100.5").is_multiple_of(m("0.5")));
        assert!(!m("100.3").is_multiple_of(m("0.5")));
        assert!(!m("100").is_multiple_of(Money::ZERO));
    }

    #[test]
    fn test_signum() {
        assert_eq!(m("5").signum(), 1);
        assert_eq!(m("-5").signum(), -1);
        assert_eq!(Money::ZERO.signum(), 0);
    }

    #[test]
    fn test_checked_arithmetic_closed_over_type() {
        let a = m("10.5");
        let b = m("2");
        assert_eq!(a.checked_add(b).unwrap(), m("12.5"));
        assert_eq!(a.checked_sub(b).unwrap(), m("8.5"));
        assert_eq!(a.checked_mul(b).unwrap(), m("21.0"));
        assert_eq!(a.checked_div(b).unwrap(), m("5.25"));
    }

    #[test]
    fn test_saturating_sub_floor_zero() {
        assert_eq!(m("3").saturating_sub_floor_zero(m("5")), Money::ZERO);
        assert_eq!(m("5").saturating_sub_floor_zero(m("3")), m("2"));
    }

    #[test]
    fn test_serde_transparent() {
        let money = m("123.45");
        let json = serde_json::to_string(&money).unwrap();
        assert_eq!(json, "\"123.45\"");
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, money);
    }
}
