//! C4 — PositionStore: weighted-average long-only positions keyed by
//! (segment, security_id, side). A single mutex guards the whole map so a
//! buy/sell mutation can never interleave with another on the same key
//! (spec.md §4.4, §5).

use crate::domain::errors::PositionError;
use crate::domain::types::{OptionType, Position, PositionKey, Segment, Side};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

/// Result of a partial (or full) sell against an open position.
#[derive(Debug, Clone)]
pub struct SellOutcome {
    pub position: Position,
    pub realized_pnl: Decimal,
    pub net_proceeds: Decimal,
    pub sold_qty: u32,
    /// Cost basis (at the pre-sell weighted-average buy price) released by
    /// this sale — what OrderGateway passes to `Wallet::credit`.
    pub cost_basis_released: Decimal,
}

pub struct PositionStore {
    positions: Mutex<HashMap<PositionKey, Position>>,
}

impl Default for PositionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionStore {
    pub fn new() -> Self {
        Self {
            positions: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_buy(
        &self,
        segment: Segment,
        security_id: i64,
        symbol: &str,
        qty: u32,
        price: Decimal,
        fee: Decimal,
        option_type: Option<OptionType>,
    ) -> Result<Position, PositionError> {
        if qty == 0 {
            return Err(PositionError::InvalidQuantity(qty));
        }
        let key = PositionKey {
            segment,
            security_id,
            side: Side::Long,
        };
        let now = Utc::now();
        let mut positions = self.positions.lock().expect("position store lock poisoned");
        let position = positions.entry(key.clone()).or_insert_with(|| Position {
            key: key.clone(),
            symbol: symbol.to_string(),
            buy_qty: 0,
            buy_avg: Decimal::ZERO,
            sell_qty: 0,
            sell_avg: Decimal::ZERO,
            net_qty: 0,
            day_buy_qty: 0,
            day_sell_qty: 0,
            current_price: price,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            entry_fee: Decimal::ZERO,
            created_at: now,
            last_updated: now,
            option_type,
        });

        let qty_dec = Decimal::from(qty);
        let prior_qty_dec = Decimal::from(position.buy_qty);
        let new_qty_dec = prior_qty_dec + qty_dec;
        position.buy_avg = (position.buy_avg * prior_qty_dec + price * qty_dec) / new_qty_dec;
        position.buy_qty += qty;
        position.net_qty += qty;
        position.day_buy_qty += qty;
        position.entry_fee += fee;
        position.current_price = price;
        position.last_updated = now;
        Ok(position.clone())
    }

    /// Clamps `qty` to `min(qty, net_qty)`; fails only when the position is
    /// already flat. Realized PnL uses the CE/PE-aware formula from §4.4.
    pub fn partial_sell(
        &self,
        segment: Segment,
        security_id: i64,
        qty: u32,
        price: Decimal,
        fee: Decimal,
    ) -> Result<SellOutcome, PositionError> {
        if qty == 0 {
            return Err(PositionError::InvalidQuantity(qty));
        }
        let key = PositionKey {
            segment,
            security_id,
            side: Side::Long,
        };
        let mut positions = self.positions.lock().expect("position store lock poisoned");
        let position = positions.get_mut(&key).ok_or(PositionError::FlatPosition)?;
        if position.net_qty == 0 {
            return Err(PositionError::FlatPosition);
        }

        let sold_qty = qty.min(position.net_qty);
        let sold_qty_dec = Decimal::from(sold_qty);

        let realized_pnl = match position.option_type {
            Some(OptionType::Pe) => (position.buy_avg - price) * sold_qty_dec,
            _ => (price - position.buy_avg) * sold_qty_dec,
        };
        let cost_basis_released = position.buy_avg * sold_qty_dec;
        let gross_proceeds = price * sold_qty_dec;
        let net_proceeds = gross_proceeds - fee;

        let prior_sell_qty_dec = Decimal::from(position.sell_qty);
        let new_sell_qty_dec = prior_sell_qty_dec + sold_qty_dec;
        position.sell_avg = (position.sell_avg * prior_sell_qty_dec + price * sold_qty_dec) / new_sell_qty_dec;
        position.sell_qty += sold_qty;
        position.net_qty -= sold_qty;
        position.day_sell_qty += sold_qty;
        position.realized_pnl += realized_pnl;
        position.current_price = price;
        position.last_updated = Utc::now();

        Ok(SellOutcome {
            position: position.clone(),
            realized_pnl,
            net_proceeds,
            sold_qty,
            cost_basis_released,
        })
    }

    pub fn get(&self, key: &PositionKey) -> Option<Position> {
        self.positions.lock().expect("position store lock poisoned").get(key).cloned()
    }

    pub fn list(&self) -> Vec<Position> {
        self.positions
            .lock()
            .expect("position store lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Positions still eligible for risk evaluation (net_qty > 0). Closed
    /// positions are retained by `list()` for reporting but excluded here
    /// (spec.md §9 Open Question resolution).
    pub fn open_positions(&self) -> Vec<Position> {
        self.list().into_iter().filter(|p| p.is_open()).collect()
    }

    pub fn update_price(&self, key: &PositionKey, ltp: Decimal) {
        let mut positions = self.positions.lock().expect("position store lock poisoned");
        if let Some(position) = positions.get_mut(key) {
            position.current_price = ltp;
            position.last_updated = Utc::now();
        }
    }

    pub fn update_unrealized(&self, key: &PositionKey, pnl: Decimal) {
        let mut positions = self.positions.lock().expect("position store lock poisoned");
        if let Some(position) = positions.get_mut(key) {
            position.unrealized_pnl = pnl;
        }
    }

    /// Resets per-day counters at a trading-day boundary.
    pub fn reset_day_counters(&self) {
        let mut positions = self.positions.lock().expect("position store lock poisoned");
        for position in positions.values_mut() {
            position.day_buy_qty = 0;
            position.day_sell_qty = 0;
        }
    }

    /// Reconciler (C12): broker reports a position the tracker has no record
    /// of — insert one synthesized from the broker's own avg/qty.
    pub fn insert_synthetic(&self, segment: Segment, security_id: i64, symbol: &str, qty: u32, avg_price: Decimal) {
        let key = PositionKey {
            segment,
            security_id,
            side: Side::Long,
        };
        let now = Utc::now();
        self.positions.lock().expect("position store lock poisoned").insert(
            key.clone(),
            Position {
                key,
                symbol: symbol.to_string(),
                buy_qty: qty,
                buy_avg: avg_price,
                sell_qty: 0,
                sell_avg: Decimal::ZERO,
                net_qty: qty,
                day_buy_qty: 0,
                day_sell_qty: 0,
                current_price: avg_price,
                realized_pnl: Decimal::ZERO,
                unrealized_pnl: Decimal::ZERO,
                entry_fee: Decimal::ZERO,
                created_at: now,
                last_updated: now,
                option_type: None,
            },
        );
    }

    /// Reconciler (C12): align the tracker's net quantity to the broker's.
    pub fn align_quantity(&self, key: &PositionKey, broker_net_qty: u32) {
        let mut positions = self.positions.lock().expect("position store lock poisoned");
        if let Some(position) = positions.get_mut(key) {
            position.buy_qty = broker_net_qty + position.sell_qty;
            position.net_qty = broker_net_qty;
            position.last_updated = Utc::now();
        }
    }

    /// Reconciler (C12): the broker no longer reports this position — force
    /// it flat at the last known price, reason `RECONCILED_MISSING`.
    pub fn close_reconciled_missing(&self, key: &PositionKey, last_price: Decimal) -> Option<Position> {
        let mut positions = self.positions.lock().expect("position store lock poisoned");
        let position = positions.get_mut(key)?;
        let sold_qty = position.net_qty;
        let sold_qty_dec = Decimal::from(sold_qty);
        let realized_pnl = match position.option_type {
            Some(OptionType::Pe) => (position.buy_avg - last_price) * sold_qty_dec,
            _ => (last_price - position.buy_avg) * sold_qty_dec,
        };
        position.sell_qty += sold_qty;
        position.net_qty = 0;
        position.realized_pnl += realized_pnl;
        position.current_price = last_price;
        position.last_updated = Utc::now();
        Some(position.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn seg() -> Segment {
        Segment::from("NSE_FNO")
    }

    #[test]
    fn weighted_average_buy() {
        let store = PositionStore::new();
        store.add_buy(seg(), 1, "NIFTY", 75, dec!(100), dec!(20), Some(OptionType::Ce)).unwrap();
        let p = store
            .add_buy(seg(), 1, "NIFTY", 75, dec!(140), dec!(20), Some(OptionType::Ce))
            .unwrap();
        assert_eq!(p.buy_avg, dec!(120));
        assert_eq!(p.net_qty, 150);
    }

    #[test]
    fn partial_sell_weighted_average_and_pnl() {
        let store = PositionStore::new();
        store.add_buy(seg(), 1, "NIFTY", 75, dec!(100), dec!(20), Some(OptionType::Ce)).unwrap();
        store.add_buy(seg(), 1, "NIFTY", 75, dec!(140), dec!(20), Some(OptionType::Ce)).unwrap();

        let outcome = store.partial_sell(seg(), 1, 75, dec!(160), dec!(20)).unwrap();
        assert_eq!(outcome.realized_pnl, dec!(3000));
        assert_eq!(outcome.net_proceeds, dec!(11980));
        assert_eq!(outcome.sold_qty, 75);
        assert_eq!(outcome.cost_basis_released, dec!(9000));
        assert_eq!(outcome.position.net_qty, 75);
        assert_eq!(outcome.position.sell_avg, dec!(160));
    }

    #[test]
    fn oversell_clamps_to_net_qty() {
        let store = PositionStore::new();
        store.add_buy(seg(), 1, "NIFTY", 75, dec!(100), dec!(0), Some(OptionType::Ce)).unwrap();
        let outcome = store.partial_sell(seg(), 1, 1000, dec!(110), dec!(0)).unwrap();
        assert_eq!(outcome.sold_qty, 75);
        assert_eq!(outcome.position.net_qty, 0);
    }

    #[test]
    fn sell_on_flat_position_fails() {
        let store = PositionStore::new();
        let err = store.partial_sell(seg(), 1, 10, dec!(100), dec!(0)).unwrap_err();
        assert!(matches!(err, PositionError::FlatPosition));
    }

    #[test]
    fn put_option_pnl_formula_is_inverted() {
        let store = PositionStore::new();
        store.add_buy(seg(), 2, "NIFTY", 75, dec!(100), dec!(0), Some(OptionType::Pe)).unwrap();
        let outcome = store.partial_sell(seg(), 2, 75, dec!(80), dec!(0)).unwrap();
        // PE profits when price falls: (buy_avg - price) * qty = (100-80)*75 = 1500
        assert_eq!(outcome.realized_pnl, dec!(1500));
    }

    #[test]
    fn round_trip_buy_then_sell_same_price_zero_fee_has_zero_pnl() {
        let store = PositionStore::new();
        store.add_buy(seg(), 3, "NIFTY", 75, dec!(100), dec!(0), Some(OptionType::Ce)).unwrap();
        let outcome = store.partial_sell(seg(), 3, 75, dec!(100), dec!(0)).unwrap();
        assert_eq!(outcome.realized_pnl, dec!(0));
        assert_eq!(outcome.position.net_qty, 0);
    }

    #[test]
    fn closed_position_excluded_from_open_positions() {
        let store = PositionStore::new();
        store.add_buy(seg(), 4, "NIFTY", 75, dec!(100), dec!(0), Some(OptionType::Ce)).unwrap();
        store.partial_sell(seg(), 4, 75, dec!(100), dec!(0)).unwrap();
        assert!(store.open_positions().is_empty());
        assert_eq!(store.list().len(), 1);
    }
}
