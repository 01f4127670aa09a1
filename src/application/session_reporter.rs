//! C13 — SessionReporter: per-trading-day session lifecycle (spec.md §4.13).
//! `load_or_create` resumes an existing session for the current trading day
//! rather than starting a fresh one, so a restart mid-session doesn't lose
//! the day's trade history.

use crate::domain::ports::PersistStore;
use crate::domain::session::{self, Mode, PositionSnapshot, Session, SessionReport, TradeRecord};
use crate::domain::types::Position;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::info;

pub struct SessionReporter {
    store: Arc<dyn PersistStore>,
    session: Mutex<Session>,
}

impl SessionReporter {
    /// Resumes the record for today's trading day if one exists, else
    /// creates a new session (spec.md §3, §4.13).
    pub async fn load_or_create(store: Arc<dyn PersistStore>, mode: Mode, starting_balance: Decimal) -> Self {
        let now = Utc::now();
        let day = session::trading_day(now);
        let session_id = session::session_id(mode, day);
        let key = format!("dhan_scalper:v1:session:{session_id}");

        let session = match store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Session>(&raw) {
                Ok(existing) => {
                    info!(session_id = %existing.session_id, "SessionReporter: resuming existing session");
                    existing
                }
                Err(e) => {
                    tracing::warn!("SessionReporter: failed to parse stored session, starting fresh: {e}");
                    Session::new(mode, starting_balance, now)
                }
            },
            _ => Session::new(mode, starting_balance, now),
        };

        let reporter = Self {
            store,
            session: Mutex::new(session),
        };
        reporter.persist().await;
        reporter
    }

    pub fn session_id(&self) -> String {
        self.session.lock().expect("session lock poisoned").session_id.clone()
    }

    pub fn record_trade(&self, trade: TradeRecord) {
        self.session.lock().expect("session lock poisoned").trades.push(trade);
    }

    pub async fn persist(&self) {
        let (key, body) = {
            let session = self.session.lock().expect("session lock poisoned");
            let key = format!("dhan_scalper:v1:session:{}", session.session_id);
            let body = serde_json::to_string(&*session).unwrap_or_default();
            (key, body)
        };
        if let Err(e) = self.store.set(&key, &body, Some(24 * 3600)).await {
            tracing::warn!("SessionReporter: failed to persist session: {e}");
        }
    }

    /// Computes the final report and marks the session ended. Does not
    /// persist — callers decide whether/where to write the JSON out.
    pub fn finalize(&self, ending_balance: Decimal, open_positions: &[Position]) -> SessionReport {
        let mut session = self.session.lock().expect("session lock poisoned");
        let end_time = Utc::now();
        session.end_time = Some(end_time);
        session.ending_balance = Some(ending_balance);
        session.positions = open_positions
            .iter()
            .map(|p| PositionSnapshot {
                symbol: p.symbol.clone(),
                security_id: p.key.security_id,
                net_qty: p.net_qty,
                buy_avg: p.buy_avg,
                realized_pnl: p.realized_pnl,
                unrealized_pnl: p.unrealized_pnl,
            })
            .collect();

        let total_trades = session.trades.len();
        let successful_trades = session.trades.iter().filter(|t| t.pnl > Decimal::ZERO).count();
        let failed_trades = total_trades - successful_trades;
        let total_pnl: Decimal = session.trades.iter().map(|t| t.pnl).sum();
        let max_profit = session.trades.iter().map(|t| t.pnl).fold(Decimal::ZERO, Decimal::max);
        let max_drawdown = session.trades.iter().map(|t| t.pnl).fold(Decimal::ZERO, Decimal::min);
        let win_rate = if total_trades == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(successful_trades) / Decimal::from(total_trades)
        };
        let average_trade_pnl = if total_trades == 0 {
            Decimal::ZERO
        } else {
            total_pnl / Decimal::from(total_trades)
        };
        let mut symbols_traded: Vec<String> = session.trades.iter().map(|t| t.symbol.clone()).collect();
        symbols_traded.sort();
        symbols_traded.dedup();

        SessionReport {
            session_id: session.session_id.clone(),
            mode: session.mode,
            trading_day: session.trading_day,
            start_time: session.start_time,
            end_time,
            duration_minutes: end_time.signed_duration_since(session.start_time).num_minutes(),
            starting_balance: session.starting_balance,
            ending_balance,
            total_trades,
            successful_trades,
            failed_trades,
            total_pnl,
            max_profit,
            max_drawdown,
            win_rate,
            average_trade_pnl,
            symbols_traded,
            positions: session.positions.clone(),
            trades: session.trades.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::TransientNetworkError;
    use crate::domain::types::{ExitReason, OrderSide};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct InMemoryStore(StdMutex<HashMap<String, String>>);

    #[async_trait]
    impl PersistStore for InMemoryStore {
        async fn set(&self, key: &str, value: &str, _ttl_seconds: Option<i64>) -> Result<(), TransientNetworkError> {
            self.0.lock().unwrap().insert(key.to_string(), value.to_string());
            Ok(())
        }
        async fn get(&self, key: &str) -> Result<Option<String>, TransientNetworkError> {
            Ok(self.0.lock().unwrap().get(key).cloned())
        }
        async fn delete(&self, key: &str) -> Result<(), TransientNetworkError> {
            self.0.lock().unwrap().remove(key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn resumes_existing_session_for_same_trading_day() {
        let store = Arc::new(InMemoryStore(StdMutex::new(HashMap::new())));
        let first = SessionReporter::load_or_create(store.clone(), Mode::Paper, dec!(100000)).await;
        first.record_trade(TradeRecord {
            symbol: "NIFTY".into(),
            side: OrderSide::Buy,
            entry_price: dec!(100),
            exit_price: Some(dec!(120)),
            quantity: 75,
            pnl: dec!(1500),
            entry_timestamp: Utc::now(),
            exit_timestamp: Some(Utc::now()),
            reason: Some(ExitReason::TakeProfit),
        });
        first.persist().await;

        let second = SessionReporter::load_or_create(store.clone(), Mode::Paper, dec!(999999)).await;
        assert_eq!(second.session_id(), first.session_id());
        let report = second.finalize(dec!(101500), &[]);
        assert_eq!(report.total_trades, 1);
        assert_eq!(report.total_pnl, dec!(1500));
        assert_eq!(report.starting_balance, dec!(100000));
    }

    #[tokio::test]
    async fn finalize_computes_win_rate_and_drawdown() {
        let store = Arc::new(InMemoryStore(StdMutex::new(HashMap::new())));
        let reporter = SessionReporter::load_or_create(store, Mode::Paper, dec!(100000)).await;
        for pnl in [dec!(1000), dec!(-500), dec!(200)] {
            reporter.record_trade(TradeRecord {
                symbol: "NIFTY".into(),
                side: OrderSide::Buy,
                entry_price: dec!(100),
                exit_price: None,
                quantity: 75,
                pnl,
                entry_timestamp: Utc::now(),
                exit_timestamp: None,
                reason: None,
            });
        }
        let report = reporter.finalize(dec!(100700), &[]);
        assert_eq!(report.total_trades, 3);
        assert_eq!(report.successful_trades, 2);
        assert_eq!(report.failed_trades, 1);
        assert_eq!(report.max_profit, dec!(1000));
        assert_eq!(report.max_drawdown, dec!(-500));
        assert_eq!(report.total_pnl, dec!(700));
    }
}
