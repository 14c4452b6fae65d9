//! Pre-trade risk gating.
//!
//! Every order passes the gate before it can touch the book. Checks are
//! independent; any rejection aborts admission, warnings ride along. The
//! aggregate risk score is advisory: scores at or above
//! [`HIGH_RISK_THRESHOLD`] are logged even when the order passes.

use crate::domain::{Balance, Instrument, Order, Position};
use crate::money::{Money, MoneyError};
use crate::utils::utc_day_start_millis;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Scores at or above this value are logged as high-risk.
pub const HIGH_RISK_THRESHOLD: u8 = 80;

/// Per-user trading limits consulted by the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum notional of a single order.
    pub max_order_notional: Money,
    /// Maximum absolute position notional after the order.
    pub max_position_notional: Money,
    /// Maximum traded notional per UTC day.
    pub max_daily_volume: Money,
    /// Maximum tolerated loss (realized + unrealized) per UTC day.
    pub max_daily_loss: Money,
    /// Maximum share of portfolio value in one instrument, in `[0, 1]`.
    /// Breaching this is a warning, not a rejection.
    pub concentration_limit: Money,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_order_notional: Money::from_int(1_000_000),
            max_position_notional: Money::from_int(5_000_000),
            max_daily_volume: Money::from_int(20_000_000),
            max_daily_loss: Money::from_int(100_000),
            concentration_limit: Money::new(rust_decimal::Decimal::new(25, 2)),
        }
    }
}

/// Rolling per-account activity counters, reset at the UTC day boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyActivity {
    pub day_start_ms: u64,
    /// Notional traded since day start.
    pub traded_notional: Money,
    /// Realized P&L accumulated since day start.
    pub realized_pnl: Money,
}

impl DailyActivity {
    /// Reset the counters if `now_ms` falls in a later UTC day.
    pub fn roll(&mut self, now_ms: u64) {
        let day_start = utc_day_start_millis(now_ms);
        if day_start > self.day_start_ms {
            self.day_start_ms = day_start;
            self.traded_notional = Money::ZERO;
            self.realized_pnl = Money::ZERO;
        }
    }

    /// Record traded notional.
    pub fn record_trade(&mut self, notional: Money) {
        self.traded_notional = self.traded_notional.saturating_add(notional);
    }

    /// Record realized P&L movement.
    pub fn record_realized(&mut self, delta: Money) {
        self.realized_pnl = self.realized_pnl.saturating_add(delta);
    }
}

/// Everything the gate needs to judge one proposed order.
#[derive(Debug, Clone)]
pub struct RiskContext<'a> {
    pub order: &'a Order,
    pub instrument: &'a Instrument,
    pub limits: &'a RiskLimits,
    /// Current position for (account, instrument); flat when absent.
    pub position: &'a Position,
    /// Cash balance for the account's settlement currency.
    pub balance: &'a Balance,
    pub activity: &'a DailyActivity,
    /// Total portfolio value used for the concentration check.
    pub portfolio_value: Money,
    /// Relative spread of the book (spread / mid), if both sides rest.
    /// Feeds the volatility component of the risk score.
    pub relative_spread: Option<Money>,
    pub now_ms: u64,
}

/// Gate verdict for one order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub passed: bool,
    pub warnings: Vec<String>,
    pub rejections: Vec<String>,
    /// Aggregate severity in `[0, 100]`.
    pub risk_score: u8,
}

impl RiskAssessment {
    /// The first rejection reason, if any.
    #[must_use]
    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejections.first().map(String::as_str)
    }
}

/// The pre-trade risk gate.
#[derive(Debug, Clone, Default)]
pub struct RiskGate;

impl RiskGate {
    #[must_use]
    pub fn new() -> Self {
        RiskGate
    }

    /// Run every check against `ctx`. Arithmetic failures surface as
    /// [`MoneyError`] so the orchestrator can treat them as integrity
    /// faults rather than silently passing or failing the order.
    pub fn evaluate(&self, ctx: &RiskContext<'_>) -> Result<RiskAssessment, MoneyError> {
        let mut assessment = RiskAssessment::default();
        let mut score: u32 = 0;

        let order = ctx.order;
        let notional = order.total_quantity.checked_mul(order.limit_price)?;

        // 1. Instrument liveness.
        if !ctx.instrument.is_active {
            assessment
                .rejections
                .push(format!("instrument {} is inactive", ctx.instrument.symbol));
            score += 40;
        } else if ctx.instrument.is_expired_at(ctx.now_ms) {
            assessment
                .rejections
                .push(format!("instrument {} is expired", ctx.instrument.symbol));
            score += 40;
        }

        // 2. Price and quantity bounds.
        if !ctx.instrument.price_is_valid(order.limit_price) {
            assessment.rejections.push(format!(
                "price {} outside [{}, {}] or off tick {}",
                order.limit_price,
                ctx.instrument.min_price,
                ctx.instrument.max_price,
                ctx.instrument.tick_size
            ));
            score += 30;
        }
        if !ctx.instrument.quantity_is_valid(order.total_quantity) {
            assessment.rejections.push(format!(
                "quantity {} not a positive multiple of lot {}",
                order.total_quantity, ctx.instrument.lot_size
            ));
            score += 30;
        }

        // 3. Order-size cap.
        if notional > ctx.limits.max_order_notional {
            assessment.rejections.push(format!(
                "order notional {notional} exceeds limit {}",
                ctx.limits.max_order_notional
            ));
            score += 30;
        }

        // 4. Margin. Required margin is the post-trade position notional
        // at the order price, scaled by the instrument margin rate;
        // available margin is cash plus unrealized P&L.
        let signed_qty = match order.side {
            crate::domain::Side::Buy => order.total_quantity,
            crate::domain::Side::Sell => -order.total_quantity,
        };
        let post_quantity = ctx.position.quantity.checked_add(signed_qty)?;
        let post_notional = post_quantity.abs().checked_mul(order.limit_price)?;
        let required_margin = post_notional.checked_mul(ctx.instrument.margin_rate)?;
        let available_margin = ctx
            .balance
            .available
            .checked_add(ctx.position.unrealized_pnl)?;
        if required_margin > available_margin {
            assessment.rejections.push(format!(
                "insufficient margin (available {available_margin}, required {required_margin})"
            ));
            score += 40;
        } else if required_margin.is_positive() && available_margin.is_positive() {
            // Utilization above 80% is worth a warning.
            let utilization = required_margin.checked_div(available_margin)?;
            if utilization > Money::new(rust_decimal::Decimal::new(8, 1)) {
                assessment
                    .warnings
                    .push(format!("margin utilization {utilization} above 0.8"));
                score += 12;
            }
        }

        // 5. Position size.
        if post_notional > ctx.limits.max_position_notional {
            assessment.rejections.push(format!(
                "position notional {post_notional} would exceed limit {}",
                ctx.limits.max_position_notional
            ));
            score += 35;
        }

        // 6. Daily volume.
        let day_volume = ctx.activity.traded_notional.checked_add(notional)?;
        if day_volume > ctx.limits.max_daily_volume {
            assessment.rejections.push(format!(
                "daily volume {day_volume} would exceed limit {}",
                ctx.limits.max_daily_volume
            ));
            score += 30;
        }

        // 7. Daily loss.
        let day_pnl = ctx
            .activity
            .realized_pnl
            .checked_add(ctx.position.unrealized_pnl)?;
        if day_pnl < -ctx.limits.max_daily_loss {
            assessment.rejections.push(format!(
                "daily loss {day_pnl} breaches limit -{}",
                ctx.limits.max_daily_loss
            ));
            score += 35;
        }

        // 8. Concentration (warning only).
        if ctx.portfolio_value.is_positive() {
            let position_value = post_notional;
            let share = position_value.checked_div(ctx.portfolio_value)?;
            if share > ctx.limits.concentration_limit {
                assessment.warnings.push(format!(
                    "concentration {share} above limit {}",
                    ctx.limits.concentration_limit
                ));
                score += 12;
            }
        }

        // Volatility component: a wide relative spread adds up to 10.
        if let Some(rel) = ctx.relative_spread {
            // 1% relative spread saturates the component.
            let scaled = rel
                .checked_mul(Money::from_int(1000))?
                .round_dp(0)
                .inner()
                .to_i64()
                .unwrap_or(10);
            score += scaled.clamp(0, 10) as u32;
        }

        assessment.risk_score = score.min(100) as u8;
        assessment.passed = assessment.rejections.is_empty();

        if assessment.risk_score >= HIGH_RISK_THRESHOLD {
            warn!(
                order_id = %order.id,
                user_id = %order.user_id,
                score = assessment.risk_score,
                passed = assessment.passed,
                "high-risk order"
            );
        }
        Ok(assessment)
    }
}
