//! C12 — Reconciler: periodic pull of broker positions against the tracker
//! (spec.md §4.12). Errors are logged and never abort the caller's loop.

use crate::application::position_store::PositionStore;
use crate::domain::errors::ReconciliationDrift;
use crate::domain::ports::Broker;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};

pub struct Reconciler {
    broker: Arc<dyn Broker>,
    positions: Arc<PositionStore>,
}

impl Reconciler {
    pub fn new(broker: Arc<dyn Broker>, positions: Arc<PositionStore>) -> Self {
        Self { broker, positions }
    }

    /// Pulls broker positions, diffs against the tracker, and repairs
    /// drift in place. Returns the classified discrepancies found.
    pub async fn reconcile(&self) -> Vec<ReconciliationDrift> {
        let broker_positions = match self.broker.get_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                warn!("Reconciler: broker pull failed, skipping this cycle: {e}");
                return Vec::new();
            }
        };

        let mut drifts = Vec::new();
        let tracker_positions = self.positions.open_positions();
        let broker_by_id: HashMap<i64, _> = broker_positions.iter().map(|p| (p.security_id, p)).collect();

        for bp in &broker_positions {
            match tracker_positions.iter().find(|tp| tp.key.security_id == bp.security_id) {
                None => {
                    self.positions
                        .insert_synthetic(bp.segment.clone(), bp.security_id, "", bp.net_qty, bp.avg_price);
                    drifts.push(ReconciliationDrift::MissingInTracker(bp.security_id));
                }
                Some(tp) if tp.net_qty != bp.net_qty => {
                    self.positions.align_quantity(&tp.key, bp.net_qty);
                    drifts.push(ReconciliationDrift::QuantityMismatch {
                        security_id: bp.security_id,
                        tracker_qty: tp.net_qty,
                        broker_qty: bp.net_qty,
                    });
                }
                Some(_) => {}
            }
        }

        for tp in &tracker_positions {
            if !broker_by_id.contains_key(&tp.key.security_id) {
                self.positions.close_reconciled_missing(&tp.key, tp.current_price);
                drifts.push(ReconciliationDrift::MissingInBroker(tp.key.security_id));
            }
        }

        if !drifts.is_empty() {
            for drift in &drifts {
                error!("Reconciler: {drift}");
            }
        }
        drifts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{OrderError, TransientNetworkError};
    use crate::domain::ports::{BrokerFill, BrokerPosition};
    use crate::domain::types::{OrderRequest, OrderStatus, Segment};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct FixedBroker(Vec<BrokerPosition>);

    #[async_trait]
    impl Broker for FixedBroker {
        async fn place(&self, _req: &OrderRequest) -> Result<BrokerFill, OrderError> {
            unimplemented!()
        }
        async fn cancel(&self, _order_id: &str) -> Result<(), OrderError> {
            Ok(())
        }
        async fn get_order_status(&self, _order_id: &str) -> Result<OrderStatus, TransientNetworkError> {
            Ok(OrderStatus::Filled)
        }
        async fn get_positions(&self) -> Result<Vec<BrokerPosition>, TransientNetworkError> {
            Ok(self.0.clone())
        }
        async fn get_funds(&self) -> Result<Decimal, TransientNetworkError> {
            Ok(Decimal::ZERO)
        }
    }

    #[tokio::test]
    async fn missing_in_tracker_inserts_synthetic_position() {
        let broker = Arc::new(FixedBroker(vec![BrokerPosition {
            segment: Segment::from("NSE_FNO"),
            security_id: 99,
            net_qty: 75,
            avg_price: dec!(120),
        }]));
        let positions = Arc::new(PositionStore::new());
        let reconciler = Reconciler::new(broker, positions.clone());

        let drifts = reconciler.reconcile().await;
        assert_eq!(drifts.len(), 1);
        assert!(matches!(drifts[0], ReconciliationDrift::MissingInTracker(99)));
        assert_eq!(positions.open_positions().len(), 1);
    }

    #[tokio::test]
    async fn missing_in_broker_closes_tracker_position() {
        let broker = Arc::new(FixedBroker(vec![]));
        let positions = Arc::new(PositionStore::new());
        positions
            .add_buy(Segment::from("NSE_FNO"), 5, "NIFTY", 75, dec!(100), dec!(0), None)
            .unwrap();
        let reconciler = Reconciler::new(broker, positions.clone());

        let drifts = reconciler.reconcile().await;
        assert_eq!(drifts.len(), 1);
        assert!(matches!(drifts[0], ReconciliationDrift::MissingInBroker(5)));
        assert!(positions.open_positions().is_empty());
    }

    #[tokio::test]
    async fn quantity_mismatch_aligns_tracker_to_broker() {
        let broker = Arc::new(FixedBroker(vec![BrokerPosition {
            segment: Segment::from("NSE_FNO"),
            security_id: 7,
            net_qty: 50,
            avg_price: dec!(100),
        }]));
        let positions = Arc::new(PositionStore::new());
        positions
            .add_buy(Segment::from("NSE_FNO"), 7, "NIFTY", 75, dec!(100), dec!(0), None)
            .unwrap();
        let reconciler = Reconciler::new(broker, positions.clone());

        let drifts = reconciler.reconcile().await;
        assert_eq!(drifts.len(), 1);
        assert!(matches!(drifts[0], ReconciliationDrift::QuantityMismatch { .. }));
        assert_eq!(positions.get(&crate::domain::types::PositionKey {
            segment: Segment::from("NSE_FNO"),
            security_id: 7,
            side: crate::domain::types::Side::Long,
        }).unwrap().net_qty, 50);
    }
}
