//! Engine: wires the thirteen components together and drives them through
//! the Scheduler (spec.md §5's four concurrent activities). Grounded in the
//! teacher's `Application::build` staged-initialization pattern
//! (`application/system.rs`): numbered comments, `info!` at each stage,
//! fallible construction collected into one `anyhow::Result`.

use crate::application::equity_calculator::EquityCalculator;
use crate::application::feed_manager::{FeedConfig, FeedManager, SubscriptionRole};
use crate::application::order_gateway::OrderGateway;
use crate::application::position_store::PositionStore;
use crate::application::reconciler::Reconciler;
use crate::application::risk_manager::{RiskConfig, RiskManager};
use crate::application::scheduler::Scheduler;
use crate::application::session_reporter::SessionReporter;
use crate::application::signal_engine::{SignalConfig, SignalEngine};
use crate::application::sizer::{Sizer, SizerConfig};
use crate::application::tick_cache::TickCache;
use crate::application::wallet::Wallet;
use crate::config::EngineConfig;
use crate::domain::ports::{
    Broker, CandleSource, InstrumentLookup, LtpLookup, NotificationEvent, Notifier, PersistStore,
    StreamTransport,
};
use crate::domain::session::{Mode, TradeRecord};
use crate::domain::types::{
    ExitReason, OptionType, OrderRequest, OrderSide, OrderType, PositionKey, Segment,
    SignalDirection,
};
use crate::infrastructure::market_data::CandleAggregator;
use crate::infrastructure::observability::Metrics;
use chrono::{NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

const CANDLE_SYNC_INTERVAL: Duration = Duration::from_secs(1);

pub struct Engine {
    config: EngineConfig,
    tick_cache: Arc<TickCache>,
    instruments: Arc<dyn InstrumentLookup>,
    candles: Arc<CandleAggregator>,
    wallet: Arc<Wallet>,
    positions: Arc<PositionStore>,
    feed: Arc<FeedManager>,
    signal_engine: Arc<SignalEngine>,
    sizer: Sizer,
    gateway: Arc<OrderGateway>,
    risk: Arc<RiskManager>,
    equity: Arc<EquityCalculator>,
    reconciler: Arc<Reconciler>,
    scheduler: Arc<Scheduler>,
    session: Arc<SessionReporter>,
    notifier: Arc<dyn Notifier>,
    persist: Arc<dyn PersistStore>,
    metrics: Arc<Metrics>,
    recorded_closed: Mutex<HashSet<i64>>,
}

impl Engine {
    /// Stage-by-stage construction, mirroring `Application::build`. Every
    /// collaborator (broker, transport, instrument lookup, store, notifier)
    /// is supplied by the caller — this core never reaches for the filesystem
    /// or network itself to create one (SPEC_FULL.md §1).
    #[allow(clippy::too_many_arguments)]
    pub async fn build(
        config: EngineConfig,
        broker: Arc<dyn Broker>,
        transport: Arc<dyn StreamTransport>,
        instruments: Arc<dyn InstrumentLookup>,
        persist: Arc<dyn PersistStore>,
        notifier: Arc<dyn Notifier>,
        ltp_lookup: Option<Arc<dyn LtpLookup>>,
    ) -> anyhow::Result<Arc<Self>> {
        info!(mode = %config.mode, symbols = config.symbols.len(), "Engine: building");

        // 1. Shared ledgers.
        let wallet = Arc::new(Wallet::new(config.starting_balance));
        let positions = Arc::new(PositionStore::new());

        // 2. Market data plumbing: TickCache sits in front of FeedManager and
        // feeds the candle aggregator that backs SignalEngine.
        let tick_cache = Arc::new(TickCache::new(ltp_lookup));
        let candles = Arc::new(CandleAggregator::new());
        let feed = Arc::new(FeedManager::new(
            transport,
            tick_cache.clone(),
            instruments.clone(),
            FeedConfig::default(),
        ));

        // 3. Signal, sizing, and execution.
        let signal_engine = Arc::new(SignalEngine::new(
            candles.clone() as Arc<dyn CandleSource>,
            SignalConfig {
                secondary_timeframe_minutes: config.secondary_timeframe_minutes,
                ..SignalConfig::default()
            },
        ));
        let sizer = Sizer::new(SizerConfig {
            allocation_pct: config.allocation_pct,
            slippage_buffer_pct: config.slippage_buffer_pct,
            max_lots_per_trade: config.max_lots_per_trade,
        });
        let dry_run = config.mode == Mode::Live && std::env::var("DRY_RUN").map(|v| v == "1").unwrap_or(false);
        let gateway = Arc::new(OrderGateway::new(
            broker.clone(),
            positions.clone(),
            wallet.clone(),
            config.mode,
            dry_run,
            config.charge_per_order,
        ));

        // 4. Risk and reconciliation.
        let equity = Arc::new(EquityCalculator::new(wallet.clone(), positions.clone()));
        let risk = Arc::new(RiskManager::new(
            positions.clone(),
            gateway.clone(),
            equity.clone(),
            signal_engine.clone(),
            Some(notifier.clone()),
            RiskConfig {
                tp_pct: config.tp_pct,
                sl_pct: config.sl_pct,
                trail_pct: config.trail_pct,
                time_stop_seconds: config.time_stop_seconds,
                max_daily_loss_rs: config.max_daily_loss_rs,
                cooldown_after_loss_seconds: config.cooldown_after_loss_seconds,
                enable_time_stop: config.enable_time_stop,
                enable_daily_loss_cap: config.enable_daily_loss_cap,
                enable_cooldown: config.enable_cooldown,
            },
            equity.equity_breakdown().equity,
        ));
        let reconciler = Arc::new(Reconciler::new(broker, positions.clone()));

        // 5. Session lifecycle and observability.
        let session = Arc::new(SessionReporter::load_or_create(persist.clone(), config.mode, config.starting_balance).await);
        let metrics = Arc::new(Metrics::new()?);

        info!(session_id = %session.session_id(), "Engine: built");
        Ok(Arc::new(Self {
            config,
            tick_cache,
            instruments,
            candles,
            wallet,
            positions,
            feed,
            signal_engine,
            sizer,
            gateway,
            risk,
            equity,
            reconciler,
            scheduler: Arc::new(Scheduler::new()),
            session,
            notifier,
            persist,
            metrics,
            recorded_closed: Mutex::new(HashSet::new()),
        }))
    }

    /// Subscribes the configured index instruments as baseline, starts the
    /// feed, registers the Scheduler-driven tasks, and blocks until `minutes`
    /// elapses (if given) or the process receives SIGINT. Satisfies spec.md
    /// §5's four concurrent activities: (a) feed ingest below, (b) the
    /// decision/risk/reconcile tasks, (c) OrderGateway fills awaited inline
    /// inside those tasks, (d) the reconcile task.
    pub async fn run(self: &Arc<Self>, run_for: Option<Duration>) -> anyhow::Result<()> {
        for symbol in &self.config.symbols {
            let instrument = self.instruments.instrument(symbol.idx_sid).unwrap_or(crate::domain::types::Instrument {
                security_id: symbol.idx_sid,
                segment: Segment::from(symbol.seg_idx.as_str()),
                symbol: symbol.symbol.clone(),
                instrument_type: crate::domain::types::InstrumentType::Index,
                lot_size: 1,
                strike: None,
                expiry: None,
                option_type: None,
            });
            if let Err(e) = self.feed.subscribe(instrument, SubscriptionRole::Baseline).await {
                warn!(symbol = %symbol.symbol, "Engine: baseline subscribe failed: {e}");
            }
        }

        let feed = self.feed.clone();
        let feed_handle = tokio::spawn(async move {
            if let Err(e) = feed.run().await {
                warn!("Engine: feed manager stopped: {e}");
            }
        });

        self.schedule_tasks();

        match run_for {
            Some(duration) => tokio::time::sleep(duration).await,
            None => wait_for_shutdown_signal().await,
        }

        self.stop().await;
        feed_handle.abort();
        Ok(())
    }

    fn schedule_tasks(self: &Arc<Self>) {
        let candle_sync = self.clone();
        self.scheduler.schedule_recurring("candle_sync", CANDLE_SYNC_INTERVAL, move || {
            let engine = candle_sync.clone();
            async move { engine.sync_candles() }
        });

        let decision = self.clone();
        self.scheduler.schedule_recurring(
            "decision",
            Duration::from_secs(self.config.decision_interval_seconds.max(1)),
            move || {
                let engine = decision.clone();
                async move { engine.decision_tick().await }
            },
        );

        let risk = self.clone();
        self.scheduler.schedule_recurring(
            "risk",
            Duration::from_secs(self.config.risk_check_interval_seconds.max(1)),
            move || {
                let engine = risk.clone();
                async move { engine.risk_tick().await }
            },
        );

        let reconcile = self.clone();
        self.scheduler.schedule_recurring(
            "reconcile",
            Duration::from_secs(self.config.reconcile_interval_seconds.max(1)),
            move || {
                let engine = reconcile.clone();
                async move {
                    let drifts = engine.reconciler.reconcile().await;
                    if !drifts.is_empty() {
                        engine.metrics.inc_feed_reconnect("drift");
                    }
                }
            },
        );

        let persist = self.clone();
        self.scheduler.schedule_recurring("persist_state", Duration::from_secs(10), move || {
            let engine = persist.clone();
            async move { engine.persist_state().await }
        });
    }

    fn sync_candles(&self) {
        for symbol in &self.config.symbols {
            let Some(tick) = self.tick_cache.get(&Segment::from(symbol.seg_idx.as_str()), symbol.idx_sid) else {
                continue;
            };
            self.candles.on_tick(&symbol.symbol, 1, &tick);
            self.candles.on_tick(&symbol.symbol, self.config.secondary_timeframe_minutes, &tick);
        }
    }

    async fn risk_tick(&self) {
        self.equity.refresh_all(&self.tick_cache);
        self.metrics.equity.set(self.equity.equity_breakdown().equity.to_f64().unwrap_or(0.0));
        let snapshot = self.wallet.snapshot();
        self.metrics.wallet_available.set(snapshot.available.to_f64().unwrap_or(0.0));
        self.metrics.wallet_used.set(snapshot.used.to_f64().unwrap_or(0.0));

        self.risk.evaluate().await;
        self.drain_closed_positions().await;
    }

    /// Picks up positions the risk loop just closed and folds them into the
    /// session report. RiskManager never talks to SessionReporter directly
    /// (spec.md §9); this is the "SessionReporter observes all" seam.
    async fn drain_closed_positions(&self) {
        let mut recorded = self.recorded_closed.lock().expect("recorded closed lock poisoned");
        for position in self.positions.list() {
            if position.net_qty != 0 || position.sell_qty == 0 || recorded.contains(&position.key.security_id) {
                continue;
            }
            recorded.insert(position.key.security_id);
            let reason = self.risk.take_last_exit_reason(position.key.security_id);
            self.metrics.inc_order(&OrderSide::Sell.to_string(), "filled");
            self.session.record_trade(TradeRecord {
                symbol: position.symbol.clone(),
                side: OrderSide::Buy,
                entry_price: position.buy_avg,
                exit_price: Some(position.sell_avg),
                quantity: position.sell_qty,
                pnl: position.realized_pnl,
                entry_timestamp: position.created_at,
                exit_timestamp: Some(position.last_updated),
                reason,
            });
        }
    }

    /// Per-symbol entry evaluation: signal → strike/expiry selection → size →
    /// dispatch. Suppressed outside session hours when enforced, or while the
    /// daily loss cap has disabled entries (spec.md §9 Open Question, §4.10).
    async fn decision_tick(&self) {
        if self.risk.entries_disabled() {
            return;
        }
        if self.config.enforce_market_hours && !within_session_hours(&self.config.session_hours, Utc::now().time()) {
            return;
        }

        for symbol in &self.config.symbols {
            self.try_enter(symbol).await;
        }
    }

    async fn try_enter(&self, symbol: &crate::config::SymbolConfig) {
        let direction = self.signal_engine.signal(&symbol.symbol);
        if direction == SignalDirection::None {
            return;
        }
        if self.config.entry_gate_seconds > 0 {
            let Some(started_at) = self.signal_engine.streak_started_at(&symbol.symbol) else {
                return;
            };
            if Utc::now().signed_duration_since(started_at).num_seconds() < self.config.entry_gate_seconds {
                return;
            }
        }

        let idx_segment = Segment::from(symbol.seg_idx.as_str());
        let opt_segment = Segment::from(symbol.seg_opt.as_str());
        let Some(spot) = self.tick_cache.ltp(&idx_segment, symbol.idx_sid, true).await else {
            return;
        };

        let option_type = match direction {
            SignalDirection::Long => OptionType::Ce,
            SignalDirection::Short => OptionType::Pe,
            SignalDirection::None => unreachable!(),
        };
        let strike = nearest_strike(spot, symbol.strike_step);

        let expiries = self.instruments.expiry_dates(&symbol.symbol);
        let today = Utc::now().date_naive();
        let Some(expiry) = expiries.into_iter().filter(|d| *d >= today).min() else {
            return;
        };

        let Some(security_id) = self.instruments.security_id(&symbol.symbol, expiry, strike, option_type) else {
            return;
        };

        let key = PositionKey {
            segment: opt_segment.clone(),
            security_id,
            side: crate::domain::types::Side::Long,
        };
        if self.positions.get(&key).is_some_and(|p| p.is_open()) {
            return;
        }

        let Some(premium) = self.tick_cache.ltp(&opt_segment, security_id, true).await else {
            return;
        };

        let effective_lot_size = symbol.lot_size * symbol.qty_multiplier.max(1);
        let sized = self.sizer.size(premium, effective_lot_size, self.wallet.snapshot().available);
        if sized.quantity == 0 {
            return;
        }

        let req = OrderRequest {
            symbol: symbol.symbol.clone(),
            security_id,
            segment: opt_segment,
            side: OrderSide::Buy,
            quantity: sized.quantity,
            price: premium,
            order_type: OrderType::Market,
            option_type: Some(option_type),
            strike: Some(strike),
        };
        let outcome = self.gateway.place(req).await;
        if outcome.success {
            info!(symbol = %symbol.symbol, security_id, %option_type, quantity = sized.quantity, "Engine: entry placed");
            self.metrics.inc_order(&OrderSide::Buy.to_string(), "filled");
            self.notifier
                .notify(NotificationEvent::OrderPlaced {
                    symbol: symbol.symbol.clone(),
                    side: OrderSide::Buy,
                    quantity: sized.quantity,
                    price: premium,
                })
                .await;
        } else {
            self.metrics.inc_order(&OrderSide::Buy.to_string(), "rejected");
        }
    }

    async fn persist_state(&self) {
        let snapshot = self.wallet.snapshot();
        if let Ok(body) = serde_json::to_string(&snapshot) {
            let _ = self.persist.set("dhan_scalper:v1:balance", &body, Some(24 * 3600)).await;
        }
        let positions = self.positions.list();
        if let Ok(body) = serde_json::to_string(&positions) {
            let key = format!("dhan_scalper:v1:positions:{}", self.session.session_id());
            let _ = self.persist.set(&key, &body, Some(24 * 3600)).await;
        }
        self.session.persist().await;
    }

    pub async fn stop(&self) {
        info!("Engine: stopping");
        self.scheduler.shutdown(Duration::from_secs(2)).await;
        for symbol in &self.config.symbols {
            let _ = self.feed.unsubscribe(symbol.idx_sid).await;
        }
        self.feed.stop().await;

        let ending_balance = self.wallet.snapshot().total;
        let report = self.session.finalize(ending_balance, &self.positions.open_positions());
        self.notifier
            .notify(NotificationEvent::SessionFinalized {
                session_id: report.session_id.clone(),
                total_pnl: report.total_pnl,
            })
            .await;
        self.persist_state().await;
        if let Ok(body) = serde_json::to_string(&report) {
            let key = format!("dhan_scalper:v1:session:{}", report.session_id);
            let _ = self.persist.set(&key, &body, Some(24 * 3600)).await;
        }
    }
}

/// Ctrl-c (SIGINT) or SIGTERM (sent by `scalper stop` via the pid file) both
/// trigger the same graceful `Engine::stop()` path.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(signal) => signal,
        Err(e) => {
            warn!("Engine: failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            info!("Engine: ctrl-c received, shutting down");
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Engine: ctrl-c received, shutting down"),
        _ = term.recv() => info!("Engine: SIGTERM received, shutting down"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Engine: ctrl-c received, shutting down");
}

fn nearest_strike(spot: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return spot;
    }
    (spot / step).round() * step
}

/// `session_hours` is `"HH:MM-HH:MM"`; compared against wall-clock UTC. A
/// deployment running with `TZ` set to the exchange's local time gets the
/// intended behavior without this core depending on a timezone database
/// (documented in DESIGN.md). `now` is a parameter rather than read inside so
/// the boundary logic is testable without mocking the clock.
fn within_session_hours(session_hours: &str, now: NaiveTime) -> bool {
    let Some((start, end)) = session_hours.split_once('-') else {
        return true;
    };
    let (Some(start), Some(end)) = (parse_hm(start), parse_hm(end)) else {
        return true;
    };
    if start <= end {
        now >= start && now <= end
    } else {
        now >= start || now <= end
    }
}

fn parse_hm(s: &str) -> Option<NaiveTime> {
    let (h, m) = s.trim().split_once(':')?;
    NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn nearest_strike_rounds_to_step() {
        assert_eq!(nearest_strike(dec!(24988), dec!(50)), dec!(25000));
        assert_eq!(nearest_strike(dec!(24960), dec!(50)), dec!(24950));
    }

    #[test]
    fn within_session_hours_handles_simple_window() {
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        assert!(within_session_hours("09:15-15:30", noon));
        let late = NaiveTime::from_hms_opt(16, 0, 0).unwrap();
        assert!(!within_session_hours("09:15-15:30", late));
    }

    #[test]
    fn overnight_window_wraps_past_midnight() {
        let late = NaiveTime::from_hms_opt(23, 0, 0).unwrap();
        let mid_morning = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        assert!(within_session_hours("22:00-06:00", late));
        assert!(!within_session_hours("22:00-06:00", mid_morning));
    }

    #[test]
    fn malformed_window_defaults_open() {
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        assert!(within_session_hours("not-a-window", noon));
    }
}
