//! C9 — OrderGateway: the sole writer of Wallet and PositionStore for order
//! effects (spec.md §4.9, §9). Dedupes identical requests within a short TTL
//! and treats the fund check, broker dispatch, and ledger update as one
//! logical operation per request.

use crate::application::position_store::PositionStore;
use crate::application::wallet::Wallet;
use crate::domain::ports::Broker;
use crate::domain::session::Mode;
use crate::domain::types::{DedupeKey, OrderRequest, OrderSide};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PlaceOutcome {
    pub success: bool,
    pub order_id: Option<String>,
    pub mode: Mode,
    pub error: Option<String>,
}

pub struct OrderGateway {
    broker: Arc<dyn Broker>,
    positions: Arc<PositionStore>,
    wallet: Arc<Wallet>,
    mode: Mode,
    dry_run: bool,
    fee_per_order: Decimal,
    dedupe_ttl: Duration,
    dedupe: Mutex<HashMap<DedupeKey, Instant>>,
}

impl OrderGateway {
    pub fn new(
        broker: Arc<dyn Broker>,
        positions: Arc<PositionStore>,
        wallet: Arc<Wallet>,
        mode: Mode,
        dry_run: bool,
        fee_per_order: Decimal,
    ) -> Self {
        Self {
            broker,
            positions,
            wallet,
            mode,
            dry_run,
            fee_per_order,
            dedupe_ttl: Duration::from_secs(10),
            dedupe: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_dedupe_ttl(mut self, ttl: Duration) -> Self {
        self.dedupe_ttl = ttl;
        self
    }

    fn reserve_dedupe(&self, key: &DedupeKey) -> bool {
        let mut dedupe = self.dedupe.lock().expect("dedupe lock poisoned");
        dedupe.retain(|_, at| at.elapsed() < self.dedupe_ttl);
        if dedupe.contains_key(key) {
            return false;
        }
        dedupe.insert(key.clone(), Instant::now());
        true
    }

    fn release_dedupe(&self, key: &DedupeKey) {
        self.dedupe.lock().expect("dedupe lock poisoned").remove(key);
    }

    pub async fn place(&self, req: OrderRequest) -> PlaceOutcome {
        let dedupe_key = DedupeKey::for_request(&req);
        if !self.reserve_dedupe(&dedupe_key) {
            return PlaceOutcome {
                success: false,
                order_id: None,
                mode: self.mode,
                error: Some("duplicate".into()),
            };
        }

        if self.mode == Mode::Live && self.dry_run {
            let order_id = format!("DRYRUN-{}", Uuid::new_v4());
            info!(order_id = %order_id, symbol = %req.symbol, "OrderGateway: dry-run, not transmitted");
            return PlaceOutcome {
                success: true,
                order_id: Some(order_id),
                mode: self.mode,
                error: None,
            };
        }

        match req.side {
            OrderSide::Buy => self.place_buy(req, dedupe_key).await,
            OrderSide::Sell => self.place_sell(req, dedupe_key).await,
        }
    }

    async fn place_buy(&self, req: OrderRequest, dedupe_key: DedupeKey) -> PlaceOutcome {
        let cost_basis = req.price * Decimal::from(req.quantity);
        if let Err(e) = self.wallet.debit(cost_basis, self.fee_per_order) {
            self.release_dedupe(&dedupe_key);
            return PlaceOutcome {
                success: false,
                order_id: None,
                mode: self.mode,
                error: Some(e.to_string()),
            };
        }

        match self.broker.place(&req).await {
            Ok(fill) => {
                match self.positions.add_buy(
                    req.segment.clone(),
                    req.security_id,
                    &req.symbol,
                    fill.fill_quantity,
                    fill.fill_price,
                    self.fee_per_order,
                    req.option_type,
                ) {
                    Ok(_) => PlaceOutcome {
                        success: true,
                        order_id: Some(fill.order_id),
                        mode: self.mode,
                        error: None,
                    },
                    Err(e) => {
                        warn!("OrderGateway: position update failed after broker fill: {e}");
                        PlaceOutcome {
                            success: false,
                            order_id: Some(fill.order_id),
                            mode: self.mode,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }
            Err(e) => {
                self.wallet.credit(cost_basis + self.fee_per_order, Decimal::ZERO, cost_basis);
                self.release_dedupe(&dedupe_key);
                PlaceOutcome {
                    success: false,
                    order_id: None,
                    mode: self.mode,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn place_sell(&self, req: OrderRequest, dedupe_key: DedupeKey) -> PlaceOutcome {
        match self.broker.place(&req).await {
            Ok(fill) => {
                match self
                    .positions
                    .partial_sell(req.segment.clone(), req.security_id, fill.fill_quantity, fill.fill_price, self.fee_per_order)
                {
                    Ok(outcome) => {
                        self.wallet.credit(
                            fill.fill_price * Decimal::from(outcome.sold_qty),
                            self.fee_per_order,
                            outcome.cost_basis_released,
                        );
                        self.wallet.record_realized(outcome.realized_pnl);
                        PlaceOutcome {
                            success: true,
                            order_id: Some(fill.order_id),
                            mode: self.mode,
                            error: None,
                        }
                    }
                    Err(e) => {
                        warn!("OrderGateway: sell fill could not be applied to position store: {e}");
                        PlaceOutcome {
                            success: false,
                            order_id: Some(fill.order_id),
                            mode: self.mode,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }
            Err(e) => {
                self.release_dedupe(&dedupe_key);
                PlaceOutcome {
                    success: false,
                    order_id: None,
                    mode: self.mode,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{OrderError, TransientNetworkError};
    use crate::domain::ports::{BrokerFill, BrokerPosition};
    use crate::domain::types::{OptionType, OrderStatus, OrderType, Segment};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PaperBroker {
        calls: AtomicUsize,
        reject: bool,
    }

    #[async_trait]
    impl Broker for PaperBroker {
        async fn place(&self, req: &OrderRequest) -> Result<crate::domain::ports::BrokerFill, OrderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                return Err(OrderError::BrokerRejection("rejected".into()));
            }
            Ok(BrokerFill {
                order_id: format!("ORD-{}", self.calls.load(Ordering::SeqCst)),
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

    fn buy_req(price: Decimal, qty: u32) -> OrderRequest {
        OrderRequest {
            symbol: "NIFTY".into(),
            security_id: 1,
            segment: Segment::from("NSE_FNO"),
            side: OrderSide::Buy,
            quantity: qty,
            price,
            order_type: OrderType::Market,
            option_type: Some(OptionType::Ce),
            strike: Some(dec!(25000)),
        }
    }

    #[tokio::test]
    async fn insufficient_funds_never_reaches_broker() {
        let broker = Arc::new(PaperBroker { calls: AtomicUsize::new(0), reject: false });
        let positions = Arc::new(PositionStore::new());
        let wallet = Arc::new(Wallet::new(dec!(1000)));
        let gateway = OrderGateway::new(broker.clone(), positions.clone(), wallet.clone(), Mode::Paper, false, dec!(20));

        let outcome = gateway.place(buy_req(dec!(100), 75)).await;
        assert!(!outcome.success);
        assert_eq!(broker.calls.load(Ordering::SeqCst), 0);
        assert_eq!(wallet.snapshot().available, dec!(1000));
        assert!(positions.list().is_empty());
    }

    #[tokio::test]
    async fn duplicate_request_within_ttl_calls_broker_once() {
        let broker = Arc::new(PaperBroker { calls: AtomicUsize::new(0), reject: false });
        let positions = Arc::new(PositionStore::new());
        let wallet = Arc::new(Wallet::new(dec!(100000)));
        let gateway = OrderGateway::new(broker.clone(), positions, wallet, Mode::Paper, false, dec!(20));

        let first = gateway.place(buy_req(dec!(100), 75)).await;
        let second = gateway.place(buy_req(dec!(100), 75)).await;
        assert!(first.success);
        assert!(!second.success);
        assert_eq!(second.error.as_deref(), Some("duplicate"));
        assert_eq!(broker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn broker_rejection_rolls_back_debit_and_releases_dedupe() {
        let broker = Arc::new(PaperBroker { calls: AtomicUsize::new(0), reject: true });
        let positions = Arc::new(PositionStore::new());
        let wallet = Arc::new(Wallet::new(dec!(100000)));
        let gateway = OrderGateway::new(broker, positions, wallet.clone(), Mode::Paper, false, dec!(20));

        let outcome = gateway.place(buy_req(dec!(100), 75)).await;
        assert!(!outcome.success);
        let snap = wallet.snapshot();
        assert_eq!(snap.available, dec!(100000));
        assert_eq!(snap.used, dec!(0));
    }

    #[tokio::test]
    async fn live_dry_run_does_not_transmit() {
        let broker = Arc::new(PaperBroker { calls: AtomicUsize::new(0), reject: false });
        let positions = Arc::new(PositionStore::new());
        let wallet = Arc::new(Wallet::new(dec!(100000)));
        let gateway = OrderGateway::new(broker.clone(), positions, wallet, Mode::Live, true, dec!(20));

        let outcome = gateway.place(buy_req(dec!(100), 75)).await;
        assert!(outcome.success);
        assert_eq!(broker.calls.load(Ordering::SeqCst), 0);
        assert!(outcome.order_id.unwrap().starts_with("DRYRUN-"));
    }
}
