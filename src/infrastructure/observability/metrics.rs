//! Prometheus metrics (SPEC_FULL.md §7 SUPPLEMENT). Push-based, no embedded
//! HTTP server — rendered on demand via `TextEncoder`, same division as the
//! teacher's `infrastructure::observability::metrics::Metrics`.

use prometheus::{
    core::{AtomicF64, GenericGauge},
    CounterVec, Gauge, GaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub equity: GenericGauge<AtomicF64>,
    pub wallet_available: GenericGauge<AtomicF64>,
    pub wallet_used: GenericGauge<AtomicF64>,
    pub open_positions: GenericGauge<AtomicF64>,
    pub orders_total: CounterVec,
    pub daily_loss_cap_trips_total: CounterVec,
    pub feed_reconnects_total: CounterVec,
    pub position_unrealized_pnl: GaugeVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let equity = Gauge::with_opts(Opts::new("scalper_equity", "Current mark-to-market equity"))?;
        registry.register(Box::new(equity.clone()))?;

        let wallet_available = Gauge::with_opts(Opts::new("scalper_wallet_available", "Wallet available balance"))?;
        registry.register(Box::new(wallet_available.clone()))?;

        let wallet_used = Gauge::with_opts(Opts::new("scalper_wallet_used", "Wallet cost basis blocked in open positions"))?;
        registry.register(Box::new(wallet_used.clone()))?;

        let open_positions = Gauge::with_opts(Opts::new("scalper_open_positions", "Number of open positions"))?;
        registry.register(Box::new(open_positions.clone()))?;

        let orders_total = CounterVec::new(
            Opts::new("scalper_orders_total", "Total orders placed by side and outcome"),
            &["side", "outcome"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let daily_loss_cap_trips_total = CounterVec::new(
            Opts::new("scalper_daily_loss_cap_trips_total", "Times the daily loss cap has tripped"),
            &["session_id"],
        )?;
        registry.register(Box::new(daily_loss_cap_trips_total.clone()))?;

        let feed_reconnects_total = CounterVec::new(
            Opts::new("scalper_feed_reconnects_total", "Feed reconnect attempts"),
            &["outcome"],
        )?;
        registry.register(Box::new(feed_reconnects_total.clone()))?;

        let position_unrealized_pnl = GaugeVec::new(
            Opts::new("scalper_position_unrealized_pnl", "Unrealized PnL per open position"),
            &["symbol", "security_id"],
        )?;
        registry.register(Box::new(position_unrealized_pnl.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            equity,
            wallet_available,
            wallet_used,
            open_positions,
            orders_total,
            daily_loss_cap_trips_total,
            feed_reconnects_total,
            position_unrealized_pnl,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder.encode_to_string(&families).unwrap_or_default()
    }

    pub fn inc_order(&self, side: &str, outcome: &str) {
        self.orders_total.with_label_values(&[side, outcome]).inc();
    }

    pub fn inc_daily_loss_cap_trip(&self, session_id: &str) {
        self.daily_loss_cap_trips_total.with_label_values(&[session_id]).inc();
    }

    pub fn inc_feed_reconnect(&self, outcome: &str) {
        self.feed_reconnects_total.with_label_values(&[outcome]).inc();
    }

    pub fn set_position_unrealized_pnl(&self, symbol: &str, security_id: i64, pnl: f64) {
        self.position_unrealized_pnl.with_label_values(&[symbol, &security_id.to_string()]).set(pnl);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to construct default Metrics registry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_scalper_prefix() {
        let metrics = Metrics::new().unwrap();
        metrics.equity.set(125000.0);
        let output = metrics.render();
        assert!(output.contains("scalper_equity 125000"));
    }

    #[test]
    fn order_counter_tracks_side_and_outcome() {
        let metrics = Metrics::new().unwrap();
        metrics.inc_order("BUY", "filled");
        metrics.inc_order("SELL", "rejected");
        let output = metrics.render();
        assert!(output.contains("scalper_orders_total"));
    }
}
