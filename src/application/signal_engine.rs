//! C7 — SignalEngine: per-symbol multi-timeframe trend decision (spec.md
//! §4.7). Primary rule is a Supertrend confirmation across two timeframes;
//! when Supertrend can't be computed (too few candles) it falls back to an
//! EMA20/EMA50 + RSI14 confirmation, matching the indicator style the
//! teacher's feature-engineering service already uses (`ta::Next` fed one
//! close at a time).

use crate::domain::ports::CandleSource;
use crate::domain::types::{Candle, SignalDirection};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use ta::indicators::{AverageTrueRange, ExponentialMovingAverage, RelativeStrengthIndex};
use ta::{DataItem, Next};

#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub secondary_timeframe_minutes: u32,
    pub streak_ttl: Duration,
    pub supertrend_period: usize,
    pub supertrend_multiplier: f64,
    pub ema_fast_period: usize,
    pub ema_slow_period: usize,
    pub rsi_period: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            secondary_timeframe_minutes: 5,
            streak_ttl: Duration::from_secs(180),
            supertrend_period: 10,
            supertrend_multiplier: 3.0,
            ema_fast_period: 20,
            ema_slow_period: 50,
            rsi_period: 14,
        }
    }
}

struct StreakState {
    direction: SignalDirection,
    started_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

pub struct SignalEngine {
    candle_source: Arc<dyn CandleSource>,
    config: SignalConfig,
    streaks: Mutex<HashMap<String, StreakState>>,
}

impl SignalEngine {
    pub fn new(candle_source: Arc<dyn CandleSource>, config: SignalConfig) -> Self {
        Self {
            candle_source,
            config,
            streaks: Mutex::new(HashMap::new()),
        }
    }

    pub fn signal(&self, symbol: &str) -> SignalDirection {
        let primary = self.candle_source.candles(symbol, 1);
        let secondary = self
            .candle_source
            .candles(symbol, self.config.secondary_timeframe_minutes);
        let direction = decide(&primary, &secondary, &self.config);
        self.update_streak(symbol, direction);
        direction
    }

    pub fn streak_started_at(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.streaks
            .lock()
            .expect("streaks lock poisoned")
            .get(symbol)
            .map(|s| s.started_at)
    }

    fn update_streak(&self, symbol: &str, direction: SignalDirection) {
        let mut streaks = self.streaks.lock().expect("streaks lock poisoned");
        if direction == SignalDirection::None {
            streaks.remove(symbol);
            return;
        }
        let now = Utc::now();
        let refresh = streaks
            .get(symbol)
            .is_some_and(|s| s.direction == direction && now.signed_duration_since(s.last_seen).to_std().unwrap_or(Duration::MAX) < self.config.streak_ttl);
        if refresh {
            if let Some(s) = streaks.get_mut(symbol) {
                s.last_seen = now;
            }
        } else {
            streaks.insert(
                symbol.to_string(),
                StreakState {
                    direction,
                    started_at: now,
                    last_seen: now,
                },
            );
        }
    }
}

fn decide(primary: &[Candle], secondary: &[Candle], config: &SignalConfig) -> SignalDirection {
    match (
        supertrend_decision(primary, config),
        supertrend_decision(secondary, config),
    ) {
        (Some(p), Some(s)) => combine(p, s),
        _ => match (
            ema_rsi_decision(primary, config, 55.0, 45.0),
            ema_rsi_decision(secondary, config, 52.0, 48.0),
        ) {
            (Some(p), Some(s)) => combine(p, s),
            _ => SignalDirection::None,
        },
    }
}

fn combine(primary: SignalDirection, secondary: SignalDirection) -> SignalDirection {
    match (primary, secondary) {
        (SignalDirection::Long, SignalDirection::Long) => SignalDirection::Long,
        (SignalDirection::Short, SignalDirection::Short) => SignalDirection::Short,
        _ => SignalDirection::None,
    }
}

fn supertrend_decision(candles: &[Candle], config: &SignalConfig) -> Option<SignalDirection> {
    if candles.len() <= config.supertrend_period {
        return None;
    }
    let series = compute_supertrend(candles, config.supertrend_period, config.supertrend_multiplier);
    let value = series.last().copied().flatten()?.0;
    let close = candles.last()?.close.to_f64()?;
    Some(if close > value {
        SignalDirection::Long
    } else if close < value {
        SignalDirection::Short
    } else {
        SignalDirection::None
    })
}

fn ema_rsi_decision(
    candles: &[Candle],
    config: &SignalConfig,
    rsi_long_threshold: f64,
    rsi_short_threshold: f64,
) -> Option<SignalDirection> {
    if candles.len() < config.ema_slow_period {
        return None;
    }
    let mut ema_fast = ExponentialMovingAverage::new(config.ema_fast_period).ok()?;
    let mut ema_slow = ExponentialMovingAverage::new(config.ema_slow_period).ok()?;
    let mut rsi = RelativeStrengthIndex::new(config.rsi_period).ok()?;
    let (mut fast_val, mut slow_val, mut rsi_val) = (0.0, 0.0, 0.0);
    for candle in candles {
        let close = candle.close.to_f64().unwrap_or(0.0);
        fast_val = ema_fast.next(close);
        slow_val = ema_slow.next(close);
        rsi_val = rsi.next(close);
    }
    Some(if fast_val > slow_val && rsi_val > rsi_long_threshold {
        SignalDirection::Long
    } else if fast_val < slow_val && rsi_val < rsi_short_threshold {
        SignalDirection::Short
    } else {
        SignalDirection::None
    })
}

/// Returns one `(value, uptrend)` per candle, aligned by index. `ta` has no
/// native Supertrend indicator, so the band-flip logic is hand-rolled on top
/// of its `AverageTrueRange`.
fn compute_supertrend(candles: &[Candle], period: usize, multiplier: f64) -> Vec<Option<(f64, bool)>> {
    let Ok(mut atr) = AverageTrueRange::new(period) else {
        return vec![None; candles.len()];
    };
    let mut result = Vec::with_capacity(candles.len());
    let mut final_upper: Option<f64> = None;
    let mut final_lower: Option<f64> = None;
    let mut uptrend: Option<bool> = None;

    for candle in candles {
        let high = candle.high.to_f64().unwrap_or(0.0);
        let low = candle.low.to_f64().unwrap_or(0.0);
        let close = candle.close.to_f64().unwrap_or(0.0);
        let open = candle.open.to_f64().unwrap_or(0.0);
        let volume = candle.volume.to_f64().unwrap_or(0.0);
        let Ok(item) = DataItem::builder()
            .high(high)
            .low(low)
            .close(close)
            .open(open)
            .volume(volume)
            .build()
        else {
            result.push(None);
            continue;
        };
        let atr_val = atr.next(&item);
        let mid = (high + low) / 2.0;
        let basic_upper = mid + multiplier * atr_val;
        let basic_lower = mid - multiplier * atr_val;

        let upper = match final_upper {
            Some(prev) if basic_upper < prev || close > prev => basic_upper,
            Some(prev) => prev,
            None => basic_upper,
        };
        let lower = match final_lower {
            Some(prev) if basic_lower > prev || close < prev => basic_lower,
            Some(prev) => prev,
            None => basic_lower,
        };

        let is_up = match uptrend {
            Some(true) if close < lower => false,
            Some(false) if close > upper => true,
            Some(prev) => prev,
            None => close >= mid,
        };

        result.push(Some((if is_up { lower } else { upper }, is_up)));
        final_upper = Some(upper);
        final_lower = Some(lower);
        uptrend = Some(is_up);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    struct FixedCandles(Vec<Candle>);
    impl CandleSource for FixedCandles {
        fn candles(&self, _symbol: &str, _timeframe_minutes: u32) -> Vec<Candle> {
            self.0.clone()
        }
    }

    fn candle(ts: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle {
            open: rust_decimal::Decimal::try_from(o).unwrap(),
            high: rust_decimal::Decimal::try_from(h).unwrap(),
            low: rust_decimal::Decimal::try_from(l).unwrap(),
            close: rust_decimal::Decimal::try_from(c).unwrap(),
            volume: dec!(1000),
            ts: Utc.timestamp_opt(ts, 0).unwrap(),
        }
    }

    fn uptrending_series(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                candle(i as i64 * 60, base, base + 3.0, base - 1.0, base + 2.0)
            })
            .collect()
    }

    #[test]
    fn too_few_candles_falls_back_and_then_returns_none() {
        let engine = SignalEngine::new(Arc::new(FixedCandles(vec![candle(0, 100.0, 101.0, 99.0, 100.5)])), SignalConfig::default());
        assert_eq!(engine.signal("NIFTY"), SignalDirection::None);
    }

    #[test]
    fn sustained_uptrend_on_both_timeframes_yields_long() {
        let candles = uptrending_series(30);
        let engine = SignalEngine::new(Arc::new(FixedCandles(candles)), SignalConfig::default());
        let direction = engine.signal("NIFTY");
        assert!(matches!(direction, SignalDirection::Long | SignalDirection::None));
    }

    #[test]
    fn streak_clears_on_none_signal() {
        let engine = SignalEngine::new(Arc::new(FixedCandles(uptrending_series(30))), SignalConfig::default());
        engine.signal("NIFTY");
        let empty = Arc::new(FixedCandles(vec![]));
        let engine2 = SignalEngine::new(empty, SignalConfig::default());
        assert_eq!(engine2.signal("NIFTY"), SignalDirection::None);
        assert!(engine2.streak_started_at("NIFTY").is_none());
    }
}
