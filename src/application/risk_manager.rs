//! C10 — RiskManager: per-position TP/SL/trailing/time-stop/technical-invalid
//! checks plus the session-wide daily-loss cap and post-loss cooldown
//! (spec.md §4.10). `evaluate()` is driven periodically by the Scheduler.
//!
//! OrderGateway remains the sole writer of Wallet/PositionStore (spec.md
//! §9); this component only decides *that* an exit is due and issues the
//! SELL through the gateway.

use crate::application::equity_calculator::EquityCalculator;
use crate::application::order_gateway::OrderGateway;
use crate::application::position_store::PositionStore;
use crate::application::signal_engine::SignalEngine;
use crate::domain::ports::{NotificationEvent, Notifier};
use crate::domain::types::{
    ExitReason, IdempotencyKey, OptionType, OrderRequest, OrderSide, OrderType, Position, PositionKey,
    SignalDirection,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RiskConfig {
    pub tp_pct: Decimal,
    pub sl_pct: Decimal,
    pub trail_pct: Decimal,
    pub time_stop_seconds: i64,
    pub max_daily_loss_rs: Decimal,
    pub cooldown_after_loss_seconds: i64,
    pub enable_time_stop: bool,
    pub enable_daily_loss_cap: bool,
    pub enable_cooldown: bool,
}

pub struct RiskManager {
    positions: Arc<PositionStore>,
    gateway: Arc<OrderGateway>,
    equity: Arc<EquityCalculator>,
    signal_engine: Arc<SignalEngine>,
    notifier: Option<Arc<dyn Notifier>>,
    config: RiskConfig,
    starting_equity: Decimal,
    high_water: Mutex<HashMap<PositionKey, Decimal>>,
    last_loss_at: Mutex<Option<DateTime<Utc>>>,
    pending_exits: Mutex<HashSet<IdempotencyKey>>,
    completed_exits: Mutex<HashSet<IdempotencyKey>>,
    entries_disabled: AtomicBool,
    last_exit_reasons: Mutex<HashMap<i64, ExitReason>>,
}

impl RiskManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        positions: Arc<PositionStore>,
        gateway: Arc<OrderGateway>,
        equity: Arc<EquityCalculator>,
        signal_engine: Arc<SignalEngine>,
        notifier: Option<Arc<dyn Notifier>>,
        config: RiskConfig,
        starting_equity: Decimal,
    ) -> Self {
        Self {
            positions,
            gateway,
            equity,
            signal_engine,
            notifier,
            config,
            starting_equity,
            high_water: Mutex::new(HashMap::new()),
            last_loss_at: Mutex::new(None),
            pending_exits: Mutex::new(HashSet::new()),
            completed_exits: Mutex::new(HashSet::new()),
            entries_disabled: AtomicBool::new(false),
            last_exit_reasons: Mutex::new(HashMap::new()),
        }
    }

    pub fn entries_disabled(&self) -> bool {
        self.entries_disabled.load(Ordering::SeqCst)
    }

    /// Consumes the most recent exit reason recorded for `security_id`, if any.
    /// Lets the engine attribute a completed trade to the check that closed it
    /// without RiskManager knowing about SessionReporter (spec.md §9).
    pub fn take_last_exit_reason(&self, security_id: i64) -> Option<ExitReason> {
        self.last_exit_reasons.lock().expect("last exit reasons lock poisoned").remove(&security_id)
    }

    pub async fn evaluate(&self) {
        let breakdown = self.equity.equity_breakdown();

        if self.config.enable_daily_loss_cap && self.starting_equity - breakdown.equity > self.config.max_daily_loss_rs {
            self.entries_disabled.store(true, Ordering::SeqCst);
            if let Some(notifier) = &self.notifier {
                notifier
                    .notify(NotificationEvent::DailyLossCapTripped {
                        current_equity: breakdown.equity,
                        starting_equity: self.starting_equity,
                    })
                    .await;
            }
            for position in self.positions.open_positions() {
                self.issue_exit(&position, ExitReason::DailyLossCap).await;
            }
            return;
        }

        if self.config.enable_cooldown {
            let in_cooldown = self.last_loss_at.lock().expect("last loss lock poisoned").is_some_and(|at| {
                Utc::now().signed_duration_since(at).num_seconds() < self.config.cooldown_after_loss_seconds
            });
            if in_cooldown {
                return;
            }
        }

        for position in self.positions.open_positions() {
            self.evaluate_position(&position).await;
        }
    }

    fn gain_pct(&self, position: &Position) -> Decimal {
        if position.buy_avg.is_zero() {
            return Decimal::ZERO;
        }
        match position.option_type {
            Some(OptionType::Pe) => (position.buy_avg - position.current_price) / position.buy_avg,
            _ => (position.current_price - position.buy_avg) / position.buy_avg,
        }
    }

    fn update_high_water(&self, position: &Position) -> Decimal {
        let mut hw = self.high_water.lock().expect("high water lock poisoned");
        let entry = hw.entry(position.key.clone()).or_insert(position.current_price);
        if position.current_price > *entry {
            *entry = position.current_price;
        }
        *entry
    }

    async fn evaluate_position(&self, position: &Position) {
        let gain_pct = self.gain_pct(position);

        if gain_pct >= self.config.tp_pct {
            self.issue_exit(position, ExitReason::TakeProfit).await;
            return;
        }
        if gain_pct <= -self.config.sl_pct {
            self.issue_exit(position, ExitReason::StopLoss).await;
            return;
        }
        if self.config.enable_time_stop {
            let held_seconds = Utc::now().signed_duration_since(position.created_at).num_seconds();
            if held_seconds >= self.config.time_stop_seconds {
                self.issue_exit(position, ExitReason::TimeStop).await;
                return;
            }
        }
        let water = self.update_high_water(position);
        if water > Decimal::ZERO && position.current_price < water * (Decimal::ONE - self.config.trail_pct) {
            self.issue_exit(position, ExitReason::TrailingStop).await;
            return;
        }
        let direction = self.signal_engine.signal(&position.symbol);
        if direction == SignalDirection::Short {
            self.issue_exit(position, ExitReason::TechnicalInvalid).await;
        }
    }

    /// Idempotent: at most one exit order is transmitted per `(security_id,
    /// reason)` for the life of this RiskManager (spec.md §8).
    async fn issue_exit(&self, position: &Position, reason: ExitReason) {
        let key = IdempotencyKey {
            security_id: position.key.security_id,
            reason,
        };
        {
            let completed = self.completed_exits.lock().expect("completed exits lock poisoned");
            if completed.contains(&key) {
                return;
            }
            let mut pending = self.pending_exits.lock().expect("pending exits lock poisoned");
            if pending.contains(&key) {
                return;
            }
            pending.insert(key.clone());
        }

        let req = OrderRequest {
            symbol: position.symbol.clone(),
            security_id: position.key.security_id,
            segment: position.key.segment.clone(),
            side: OrderSide::Sell,
            quantity: position.net_qty,
            price: position.current_price,
            order_type: OrderType::Market,
            option_type: position.option_type,
            strike: None,
        };
        let outcome = self.gateway.place(req).await;
        self.pending_exits.lock().expect("pending exits lock poisoned").remove(&key);

        if outcome.success {
            info!(security_id = position.key.security_id, reason = %reason, "RiskManager: exit issued");
            self.completed_exits.lock().expect("completed exits lock poisoned").insert(key);
            self.last_exit_reasons
                .lock()
                .expect("last exit reasons lock poisoned")
                .insert(position.key.security_id, reason);
            if matches!(reason, ExitReason::StopLoss | ExitReason::DailyLossCap) {
                *self.last_loss_at.lock().expect("last loss lock poisoned") = Some(Utc::now());
            }
            if let Some(notifier) = &self.notifier {
                notifier
                    .notify(NotificationEvent::ExitIssued {
                        security_id: position.key.security_id,
                        reason,
                        quantity: position.net_qty,
                    })
                    .await;
            }
        } else {
            warn!(security_id = position.key.security_id, reason = %reason, error = ?outcome.error, "RiskManager: exit failed, will retry next tick");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::signal_engine::SignalConfig;
    use crate::application::wallet::Wallet;
    use crate::domain::errors::{OrderError, TransientNetworkError};
    use crate::domain::ports::{Broker, BrokerFill, BrokerPosition, CandleSource};
    use crate::domain::session::Mode;
    use crate::domain::types::{Candle, OrderStatus, Segment, Side};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct AlwaysFillBroker;
    #[async_trait]
    impl Broker for AlwaysFillBroker {
        async fn place(&self, req: &OrderRequest) -> Result<BrokerFill, OrderError> {
            Ok(BrokerFill {
                order_id: "ORD-1".into(),
                fill_price: req.price,
                fill_quantity: req.quantity,
            })
        }
        async fn cancel(&self, _order_id: &str) -> Result<(), OrderError> {
            Ok(())
        }
        async fn get_order_status(&self, _order_id: &str) -> Result<OrderStatus, TransientNetworkError> {
            Ok(OrderStatus::Filled)
        }
        async fn get_positions(&self) -> Result<Vec<BrokerPosition>, TransientNetworkError> {
            Ok(vec![])
        }
        async fn get_funds(&self) -> Result<Decimal, TransientNetworkError> {
            Ok(Decimal::ZERO)
        }
    }

    struct NoCandles;
    impl CandleSource for NoCandles {
        fn candles(&self, _symbol: &str, _timeframe_minutes: u32) -> Vec<Candle> {
            vec![]
        }
    }

    fn harness(tp_pct: Decimal, max_daily_loss_rs: Decimal) -> (Arc<PositionStore>, Arc<Wallet>, RiskManager) {
        let positions = Arc::new(PositionStore::new());
        let wallet = Arc::new(Wallet::new(dec!(200000)));
        let broker = Arc::new(AlwaysFillBroker);
        let gateway = Arc::new(OrderGateway::new(broker, positions.clone(), wallet.clone(), Mode::Paper, false, dec!(0)));
        let equity = Arc::new(EquityCalculator::new(wallet.clone(), positions.clone()));
        let signal_engine = Arc::new(SignalEngine::new(Arc::new(NoCandles), SignalConfig::default()));
        let config = RiskConfig {
            tp_pct,
            sl_pct: dec!(1.0),
            trail_pct: dec!(1.0),
            time_stop_seconds: i64::MAX,
            max_daily_loss_rs,
            cooldown_after_loss_seconds: 0,
            enable_time_stop: false,
            enable_daily_loss_cap: true,
            enable_cooldown: false,
        };
        let risk = RiskManager::new(positions.clone(), gateway, equity, signal_engine, None, config, dec!(200000));
        (positions, wallet, risk)
    }

    #[tokio::test]
    async fn take_profit_fires_once() {
        let (positions, _wallet, risk) = harness(dec!(0.35), dec!(1_000_000));
        positions
            .add_buy(Segment::from("NSE_FNO"), 1, "NIFTY", 75, dec!(100), dec!(0), Some(OptionType::Ce))
            .unwrap();
        positions.update_price(
            &PositionKey {
                segment: Segment::from("NSE_FNO"),
                security_id: 1,
                side: Side::Long,
            },
            dec!(135),
        );
        risk.evaluate().await;
        assert!(positions.get(&PositionKey {
            segment: Segment::from("NSE_FNO"),
            security_id: 1,
            side: Side::Long,
        }).unwrap().net_qty == 0);

        // A second tick above target must not issue a second exit.
        positions
            .add_buy(Segment::from("NSE_FNO"), 1, "NIFTY", 75, dec!(100), dec!(0), Some(OptionType::Ce))
            .unwrap();
        positions.update_price(
            &PositionKey {
                segment: Segment::from("NSE_FNO"),
                security_id: 1,
                side: Side::Long,
            },
            dec!(140),
        );
        // Exit already completed for (security_id=1, TAKE_PROFIT) this session: no-op.
        risk.evaluate().await;
        assert_eq!(
            positions
                .get(&PositionKey { segment: Segment::from("NSE_FNO"), security_id: 1, side: Side::Long })
                .unwrap()
                .net_qty,
            75
        );
    }

    #[tokio::test]
    async fn daily_loss_cap_closes_all_positions_and_disables_entries() {
        let (positions, _wallet, risk) = harness(dec!(10.0), dec!(2000));
        positions
            .add_buy(Segment::from("NSE_FNO"), 1, "NIFTY", 75, dec!(100), dec!(0), Some(OptionType::Ce))
            .unwrap();
        positions
            .add_buy(Segment::from("NSE_FNO"), 2, "BANKNIFTY", 25, dec!(200), dec!(0), Some(OptionType::Ce))
            .unwrap();
        positions.update_unrealized(&PositionKey { segment: Segment::from("NSE_FNO"), security_id: 1, side: Side::Long }, dec!(-1500));
        positions.update_unrealized(&PositionKey { segment: Segment::from("NSE_FNO"), security_id: 2, side: Side::Long }, dec!(-1000));

        risk.evaluate().await;

        assert!(risk.entries_disabled());
        assert!(positions.open_positions().is_empty());
    }
}
