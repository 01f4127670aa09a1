//! Engine configuration (spec.md §6). `EngineConfig::from_env` assembles the
//! same shape the teacher's `Config::from_env` builds: `std::env::var` reads
//! with documented defaults, wrapped in `anyhow::Context` for actionable
//! startup errors. YAML config-file parsing is an external collaborator's
//! job (SPEC_FULL.md §6 AMBIENT) — this module only reads environment
//! variables and exposes an already-assembled struct to the rest of the core.

use crate::domain::session::Mode;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse::<T>().map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_decimal(key: &str, default: Decimal) -> Result<Decimal> {
    match env::var(key) {
        Ok(raw) => Decimal::from_str(&raw).with_context(|| format!("invalid {key}: {raw}")),
        Err(_) => Ok(default),
    }
}

fn required_env(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("missing required environment variable: {key}"))
}

/// Per-symbol configuration (spec.md §6 "Per-symbol" table).
#[derive(Debug, Clone)]
pub struct SymbolConfig {
    pub symbol: String,
    pub idx_sid: i64,
    pub seg_idx: String,
    pub seg_opt: String,
    pub strike_step: Decimal,
    pub lot_size: u32,
    pub qty_multiplier: u32,
    pub expiry_wday: u32,
}

/// Global strategy/risk knobs (spec.md §6 "Global" table).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: Mode,
    pub min_profit_target: Decimal,
    pub max_day_loss: Decimal,
    pub charge_per_order: Decimal,
    pub allocation_pct: Decimal,
    pub slippage_buffer_pct: Decimal,
    pub max_lots_per_trade: u32,
    pub decision_interval_seconds: u64,
    pub log_level: String,
    pub tp_pct: Decimal,
    pub sl_pct: Decimal,
    pub trail_pct: Decimal,
    pub risk_check_interval_seconds: u64,
    pub time_stop_seconds: i64,
    pub enable_time_stop: bool,
    pub max_daily_loss_rs: Decimal,
    pub enable_daily_loss_cap: bool,
    pub cooldown_after_loss_seconds: i64,
    pub enable_cooldown: bool,
    pub use_multi_timeframe: bool,
    pub secondary_timeframe_minutes: u32,
    pub session_hours: String,
    pub enforce_market_hours: bool,
    pub starting_balance: Decimal,
    /// Minimum streak age before SignalEngine's direction is acted on (spec.md §4.7
    /// "callers MAY require `now - streak_start ≥ gate_minutes`"). 0 disables the gate.
    pub entry_gate_seconds: i64,
    pub reconcile_interval_seconds: u64,
    pub symbols: Vec<SymbolConfig>,
}

impl EngineConfig {
    /// Assembles config from environment variables for the given mode. Per-
    /// symbol entries are supplied by the caller (parsed from the YAML config
    /// file the CLI was pointed at — outside this core's scope).
    pub fn from_env(mode: Mode, symbols: Vec<SymbolConfig>) -> Result<Self> {
        Ok(Self {
            mode,
            min_profit_target: env_decimal("MIN_PROFIT_TARGET", Decimal::new(1000, 0))?,
            max_day_loss: env_decimal("MAX_DAY_LOSS", Decimal::new(2000, 0))?,
            charge_per_order: env_decimal("CHARGE_PER_ORDER", Decimal::new(20, 0))?,
            allocation_pct: env_decimal("ALLOCATION_PCT", Decimal::new(30, 2))?,
            slippage_buffer_pct: env_decimal("SLIPPAGE_BUFFER_PCT", Decimal::new(1, 2))?,
            max_lots_per_trade: env_or("MAX_LOTS_PER_TRADE", 10u32)?,
            decision_interval_seconds: env_or("DECISION_INTERVAL", 5u64)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            tp_pct: env_decimal("TP_PCT", Decimal::new(35, 2))?,
            sl_pct: env_decimal("SL_PCT", Decimal::new(20, 2))?,
            trail_pct: env_decimal("TRAIL_PCT", Decimal::new(15, 2))?,
            risk_check_interval_seconds: env_or("RISK_CHECK_INTERVAL", 3u64)?,
            time_stop_seconds: env_or("TIME_STOP_SECONDS", 900i64)?,
            enable_time_stop: env_or("ENABLE_TIME_STOP", true)?,
            max_daily_loss_rs: env_decimal("MAX_DAILY_LOSS_RS", Decimal::new(2000, 0))?,
            enable_daily_loss_cap: env_or("ENABLE_DAILY_LOSS_CAP", true)?,
            cooldown_after_loss_seconds: env_or("COOLDOWN_AFTER_LOSS_SECONDS", 60i64)?,
            enable_cooldown: env_or("ENABLE_COOLDOWN", true)?,
            use_multi_timeframe: env_or("USE_MULTI_TIMEFRAME", true)?,
            secondary_timeframe_minutes: env_or("SECONDARY_TIMEFRAME", 5u32)?,
            session_hours: env::var("SESSION_HOURS").unwrap_or_else(|_| "09:15-15:30".to_string()),
            enforce_market_hours: env_or("ENFORCE_MARKET_HOURS", true)?,
            starting_balance: env_decimal("STARTING_BALANCE", Decimal::new(100000, 0))?,
            entry_gate_seconds: env_or("ENTRY_GATE_SECONDS", 0i64)?,
            reconcile_interval_seconds: env_or("RECONCILE_INTERVAL_SECONDS", 300u64)?,
            symbols,
        })
    }
}

/// Process-boundary credentials/runtime knobs (spec.md §6 env var list) —
/// read directly by the CLI layer rather than folded into `EngineConfig`,
/// since they gate live-broker wiring, not strategy behavior.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub access_token: String,
    pub base_url: String,
    pub redis_url: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl Credentials {
    pub fn from_env_for_mode(mode: Mode) -> Result<Self> {
        let (client_id, access_token) = match mode {
            Mode::Live => (required_env("CLIENT_ID")?, required_env("ACCESS_TOKEN")?),
            Mode::Paper => (
                env::var("CLIENT_ID").unwrap_or_else(|_| "paper".to_string()),
                env::var("ACCESS_TOKEN").unwrap_or_else(|_| "paper".to_string()),
            ),
        };
        Ok(Self {
            client_id,
            access_token,
            base_url: env::var("BASE_URL").unwrap_or_else(|_| "https://api.dhan.co".to_string()),
            redis_url: env::var("REDIS_URL").ok(),
            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: env::var("TELEGRAM_CHAT_ID").ok(),
        })
    }
}

/// Parses the per-symbol table embedded in the parsed YAML config (kept as a
/// plain map here since the YAML parser itself is out of this core's scope).
pub fn symbol_configs_from_map(raw: &HashMap<String, HashMap<String, String>>) -> Result<Vec<SymbolConfig>> {
    let mut out = Vec::with_capacity(raw.len());
    for (symbol, fields) in raw {
        let get = |k: &str| -> Result<&String> { fields.get(k).with_context(|| format!("{symbol}: missing {k}")) };
        out.push(SymbolConfig {
            symbol: symbol.clone(),
            idx_sid: get("idx_sid")?.parse().with_context(|| format!("{symbol}: invalid idx_sid"))?,
            seg_idx: get("seg_idx")?.clone(),
            seg_opt: get("seg_opt")?.clone(),
            strike_step: Decimal::from_str(get("strike_step")?).with_context(|| format!("{symbol}: invalid strike_step"))?,
            lot_size: get("lot_size")?.parse().with_context(|| format!("{symbol}: invalid lot_size"))?,
            qty_multiplier: fields.get("qty_multiplier").map(|s| s.parse()).transpose()?.unwrap_or(1),
            expiry_wday: get("expiry_wday")?.parse().with_context(|| format!("{symbol}: invalid expiry_wday"))?,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paper_mode_defaults_credentials_without_env() {
        let creds = Credentials::from_env_for_mode(Mode::Paper).unwrap();
        assert_eq!(creds.client_id, "paper");
    }

    #[test]
    fn symbol_config_parses_required_fields() {
        let mut fields = HashMap::new();
        fields.insert("idx_sid".to_string(), "13".to_string());
        fields.insert("seg_idx".to_string(), "IDX_I".to_string());
        fields.insert("seg_opt".to_string(), "NSE_FNO".to_string());
        fields.insert("strike_step".to_string(), "50".to_string());
        fields.insert("lot_size".to_string(), "75".to_string());
        fields.insert("expiry_wday".to_string(), "3".to_string());
        let mut raw = HashMap::new();
        raw.insert("NIFTY".to_string(), fields);

        let symbols = symbol_configs_from_map(&raw).unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].lot_size, 75);
        assert_eq!(symbols[0].qty_multiplier, 1);
    }
}
