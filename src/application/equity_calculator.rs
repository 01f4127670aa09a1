//! C6 — EquityCalculator + MtmRefresher: recomputes unrealized PnL on every
//! fresh tick for a held instrument and derives session equity (spec.md
//! §4.6). `refresh_one` is rate-limited per (segment, security_id) so a burst
//! of ticks on one held instrument cannot dominate compute.

use crate::application::position_store::PositionStore;
use crate::application::tick_cache::TickCache;
use crate::application::wallet::Wallet;
use crate::domain::types::{OptionType, PositionKey};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RefreshOutcome {
    pub unrealized_pnl: Decimal,
    pub equity: Decimal,
}

#[derive(Debug, Clone)]
pub struct EquityBreakdown {
    pub wallet_total: Decimal,
    pub unrealized_total: Decimal,
    pub equity: Decimal,
    pub per_position: Vec<(PositionKey, Decimal)>,
}

pub struct EquityCalculator {
    wallet: Arc<Wallet>,
    positions: Arc<PositionStore>,
    min_interval: Duration,
    last_refresh: Mutex<HashMap<PositionKey, Instant>>,
}

fn unrealized_pnl(option_type: Option<OptionType>, buy_avg: Decimal, ltp: Decimal, net_qty: u32) -> Decimal {
    let qty = Decimal::from(net_qty);
    match option_type {
        Some(OptionType::Pe) => (buy_avg - ltp) * qty,
        _ => (ltp - buy_avg) * qty,
    }
}

impl EquityCalculator {
    pub fn new(wallet: Arc<Wallet>, positions: Arc<PositionStore>) -> Self {
        Self {
            wallet,
            positions,
            min_interval: Duration::from_secs(1),
            last_refresh: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Updates one position's mark and unrealized PnL from a fresh tick,
    /// subject to the per-instrument rate limit. Returns `None` when the
    /// instrument isn't held or the refresh was rate-limited.
    pub fn refresh_one(&self, key: &PositionKey, ltp: Decimal) -> Option<RefreshOutcome> {
        let position = self.positions.get(key)?;
        if !position.is_open() {
            return None;
        }
        {
            let mut last = self.last_refresh.lock().expect("last refresh lock poisoned");
            if let Some(at) = last.get(key) {
                if at.elapsed() < self.min_interval {
                    return None;
                }
            }
            last.insert(key.clone(), Instant::now());
        }

        let pnl = unrealized_pnl(position.option_type, position.buy_avg, ltp, position.net_qty);
        self.positions.update_price(key, ltp);
        self.positions.update_unrealized(key, pnl);

        Some(RefreshOutcome {
            unrealized_pnl: pnl,
            equity: self.equity_breakdown().equity,
        })
    }

    /// Forces a refresh of every open position from the tick cache, ignoring
    /// the rate limit — used by the Scheduler's periodic MTM pass.
    pub fn refresh_all(&self, tick_cache: &TickCache) -> EquityBreakdown {
        for position in self.positions.open_positions() {
            if let Some(tick) = tick_cache.get(&position.key.segment, position.key.security_id) {
                let pnl = unrealized_pnl(position.option_type, position.buy_avg, tick.ltp, position.net_qty);
                self.positions.update_price(&position.key, tick.ltp);
                self.positions.update_unrealized(&position.key, pnl);
                self.last_refresh
                    .lock()
                    .expect("last refresh lock poisoned")
                    .insert(position.key.clone(), Instant::now());
            }
        }
        self.equity_breakdown()
    }

    /// Snapshot-only: sums the currently stored unrealized PnL fields without
    /// touching the tick cache or rate limiter.
    pub fn equity_breakdown(&self) -> EquityBreakdown {
        let wallet_total = self.wallet.snapshot().total;
        let open = self.positions.open_positions();
        let unrealized_total: Decimal = open.iter().map(|p| p.unrealized_pnl).sum();
        let per_position = open.iter().map(|p| (p.key.clone(), p.unrealized_pnl)).collect();
        EquityBreakdown {
            wallet_total,
            unrealized_total,
            equity: wallet_total + unrealized_total,
            per_position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Segment;
    use rust_decimal_macros::dec;
    use std::thread::sleep;

    fn setup() -> (Arc<Wallet>, Arc<PositionStore>, EquityCalculator) {
        let wallet = Arc::new(Wallet::new(dec!(100000)));
        let positions = Arc::new(PositionStore::new());
        let calc = EquityCalculator::new(wallet.clone(), positions.clone())
            .with_min_interval(Duration::from_millis(10));
        (wallet, positions, calc)
    }

    #[test]
    fn refresh_one_computes_ce_unrealized_pnl_and_equity() {
        let (wallet, positions, calc) = setup();
        positions
            .add_buy(Segment::from("NSE_FNO"), 1, "NIFTY", 75, dec!(100), dec!(0), Some(OptionType::Ce))
            .unwrap();
        wallet.debit(dec!(7500), dec!(0)).unwrap();

        let key = PositionKey {
            segment: Segment::from("NSE_FNO"),
            security_id: 1,
            side: crate::domain::types::Side::Long,
        };
        let outcome = calc.refresh_one(&key, dec!(120)).unwrap();
        assert_eq!(outcome.unrealized_pnl, dec!(1500));
        assert_eq!(outcome.equity, wallet.snapshot().total + dec!(1500));
    }

    #[test]
    fn refresh_one_is_rate_limited() {
        let (_wallet, positions, calc) = setup();
        positions
            .add_buy(Segment::from("NSE_FNO"), 1, "NIFTY", 75, dec!(100), dec!(0), Some(OptionType::Ce))
            .unwrap();
        let key = PositionKey {
            segment: Segment::from("NSE_FNO"),
            security_id: 1,
            side: crate::domain::types::Side::Long,
        };
        assert!(calc.refresh_one(&key, dec!(110)).is_some());
        assert!(calc.refresh_one(&key, dec!(120)).is_none());
        sleep(Duration::from_millis(15));
        assert!(calc.refresh_one(&key, dec!(130)).is_some());
    }

    #[test]
    fn closed_position_is_not_refreshed() {
        let (_wallet, positions, calc) = setup();
        positions
            .add_buy(Segment::from("NSE_FNO"), 1, "NIFTY", 75, dec!(100), dec!(0), Some(OptionType::Ce))
            .unwrap();
        positions
            .partial_sell(Segment::from("NSE_FNO"), 1, 75, dec!(100), dec!(0))
            .unwrap();
        let key = PositionKey {
            segment: Segment::from("NSE_FNO"),
            security_id: 1,
            side: crate::domain::types::Side::Long,
        };
        assert!(calc.refresh_one(&key, dec!(150)).is_none());
    }
}
