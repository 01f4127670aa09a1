//! C8 — Sizer: budget-based lot sizing (spec.md §4.8).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeReason {
    Ok,
    InsufficientBudget,
}

#[derive(Debug, Clone, Copy)]
pub struct SizeResult {
    pub quantity: u32,
    pub lots: u32,
    pub reason: SizeReason,
}

#[derive(Debug, Clone, Copy)]
pub struct SizerConfig {
    pub allocation_pct: Decimal,
    pub slippage_buffer_pct: Decimal,
    pub max_lots_per_trade: u32,
}

pub struct Sizer {
    config: SizerConfig,
}

impl Sizer {
    pub fn new(config: SizerConfig) -> Self {
        Self { config }
    }

    /// `effective_price = premium * (1 + slippage)`, `per_lot_cost = effective_price * lot_size`,
    /// `lots = floor(available_funds * allocation_pct / per_lot_cost)`, capped at `max_lots_per_trade`.
    pub fn size(&self, premium: Decimal, lot_size: u32, available_funds: Decimal) -> SizeResult {
        if premium <= Decimal::ZERO || lot_size == 0 {
            return SizeResult {
                quantity: 0,
                lots: 0,
                reason: SizeReason::InsufficientBudget,
            };
        }
        let effective_price = premium * (Decimal::ONE + self.config.slippage_buffer_pct);
        let per_lot_cost = effective_price * Decimal::from(lot_size);
        let budget = available_funds * self.config.allocation_pct;
        let lots_raw = (budget / per_lot_cost).floor();
        let mut lots = lots_raw.max(Decimal::ZERO).to_u32_or_zero();
        lots = lots.min(self.config.max_lots_per_trade);

        if lots < 1 {
            return SizeResult {
                quantity: 0,
                lots: 0,
                reason: SizeReason::InsufficientBudget,
            };
        }
        SizeResult {
            quantity: lots * lot_size,
            lots,
            reason: SizeReason::Ok,
        }
    }
}

trait ToU32OrZero {
    fn to_u32_or_zero(self) -> u32;
}

impl ToU32OrZero for Decimal {
    fn to_u32_or_zero(self) -> u32 {
        use rust_decimal::prelude::ToPrimitive;
        self.to_u32().unwrap_or(0)
    }
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            allocation_pct: dec!(0.30),
            slippage_buffer_pct: dec!(0.01),
            max_lots_per_trade: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_within_budget() {
        let sizer = Sizer::new(SizerConfig {
            allocation_pct: dec!(0.30),
            slippage_buffer_pct: dec!(0.0),
            max_lots_per_trade: 10,
        });
        // budget = 100000*0.30 = 30000; per_lot_cost = 100*75 = 7500; lots = 4
        let result = sizer.size(dec!(100), 75, dec!(100000));
        assert_eq!(result.lots, 4);
        assert_eq!(result.quantity, 300);
        assert_eq!(result.reason, SizeReason::Ok);
    }

    #[test]
    fn insufficient_budget_returns_zero_lots() {
        let sizer = Sizer::new(SizerConfig::default());
        let result = sizer.size(dec!(100000), 75, dec!(1000));
        assert_eq!(result.lots, 0);
        assert_eq!(result.quantity, 0);
        assert_eq!(result.reason, SizeReason::InsufficientBudget);
    }

    #[test]
    fn max_lots_per_trade_caps_the_result() {
        let sizer = Sizer::new(SizerConfig {
            allocation_pct: dec!(1.0),
            slippage_buffer_pct: dec!(0.0),
            max_lots_per_trade: 2,
        });
        let result = sizer.size(dec!(10), 75, dec!(1_000_000));
        assert_eq!(result.lots, 2);
    }

    #[test]
    fn slippage_buffer_reduces_lots() {
        let no_slip = Sizer::new(SizerConfig {
            allocation_pct: dec!(0.30),
            slippage_buffer_pct: dec!(0.0),
            max_lots_per_trade: 100,
        })
        .size(dec!(100), 75, dec!(100000));
        let with_slip = Sizer::new(SizerConfig {
            allocation_pct: dec!(0.30),
            slippage_buffer_pct: dec!(0.50),
            max_lots_per_trade: 100,
        })
        .size(dec!(100), 75, dec!(100000));
        assert!(with_slip.lots <= no_slip.lots);
    }
}
