use crate::domain::types::{ExitReason, OrderSide};
use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Paper,
    Live,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Paper => write!(f, "PAPER"),
            Mode::Live => write!(f, "LIVE"),
        }
    }
}

/// Weekends resolve to the previous Friday (spec.md §3).
pub fn trading_day(now: DateTime<Utc>) -> NaiveDate {
    let date = now.date_naive();
    match date.weekday() {
        Weekday::Sat => date - Days::new(1),
        Weekday::Sun => date - Days::new(2),
        _ => date,
    }
}

pub fn session_id(mode: Mode, day: NaiveDate) -> String {
    format!("{}_{}", mode, day.format("%Y%m%d"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: OrderSide,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub quantity: u32,
    pub pnl: Decimal,
    pub entry_timestamp: DateTime<Utc>,
    pub exit_timestamp: Option<DateTime<Utc>>,
    pub reason: Option<ExitReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub security_id: i64,
    pub net_qty: u32,
    pub buy_avg: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub trading_day: NaiveDate,
    pub mode: Mode,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub starting_balance: Decimal,
    pub ending_balance: Option<Decimal>,
    pub trades: Vec<TradeRecord>,
    pub positions: Vec<PositionSnapshot>,
}

impl Session {
    pub fn new(mode: Mode, starting_balance: Decimal, now: DateTime<Utc>) -> Self {
        let day = trading_day(now);
        Self {
            session_id: session_id(mode, day),
            trading_day: day,
            mode,
            start_time: now,
            end_time: None,
            starting_balance,
            ending_balance: None,
            trades: Vec::new(),
            positions: Vec::new(),
        }
    }
}

/// The session report JSON schema from spec.md §6 (minimum fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub mode: Mode,
    pub trading_day: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub starting_balance: Decimal,
    pub ending_balance: Decimal,
    pub total_trades: usize,
    pub successful_trades: usize,
    pub failed_trades: usize,
    pub total_pnl: Decimal,
    pub max_profit: Decimal,
    pub max_drawdown: Decimal,
    pub win_rate: Decimal,
    pub average_trade_pnl: Decimal,
    pub symbols_traded: Vec<String>,
    pub positions: Vec<PositionSnapshot>,
    pub trades: Vec<TradeRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn weekend_resolves_to_previous_friday() {
        // 2026-08-01 is a Saturday.
        let sat = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap();
        assert_eq!(trading_day(sat), Utc.with_ymd_and_hms(2026, 7, 31, 0, 0, 0).unwrap().date_naive());

        let sun = Utc.with_ymd_and_hms(2026, 8, 2, 10, 0, 0).unwrap();
        assert_eq!(trading_day(sun), Utc.with_ymd_and_hms(2026, 7, 31, 0, 0, 0).unwrap().date_naive());
    }

    #[test]
    fn weekday_is_unchanged() {
        let mon = Utc.with_ymd_and_hms(2026, 8, 3, 10, 0, 0).unwrap();
        assert_eq!(trading_day(mon), mon.date_naive());
    }

    #[test]
    fn session_id_format() {
        let day = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();
        assert_eq!(session_id(Mode::Paper, day), "PAPER_20260803");
        assert_eq!(session_id(Mode::Live, day), "LIVE_20260803");
    }
}
