//! Paper-trading `Broker` adapter: fills every request immediately at the
//! requested price/quantity and keeps its own little position book so the
//! Reconciler (C12) has broker-truth to diff against, exactly like a real
//! broker would (spec.md §1 Non-goals keep the *live* broker API out of
//! scope, but paper mode is core).

use crate::domain::errors::{OrderError, TransientNetworkError};
use crate::domain::ports::{Broker, BrokerFill, BrokerPosition};
use crate::domain::types::{OrderRequest, OrderSide, OrderStatus, Segment};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

struct BookEntry {
    segment: Segment,
    net_qty: u32,
    avg_price: Decimal,
}

pub struct PaperBroker {
    funds: Mutex<Decimal>,
    book: Mutex<HashMap<i64, BookEntry>>,
}

impl PaperBroker {
    pub fn new(starting_funds: Decimal) -> Self {
        Self {
            funds: Mutex::new(starting_funds),
            book: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn place(&self, req: &OrderRequest) -> Result<BrokerFill, OrderError> {
        let mut book = self.book.lock().expect("paper broker book lock poisoned");
        let entry = book.entry(req.security_id).or_insert_with(|| BookEntry {
            segment: req.segment.clone(),
            net_qty: 0,
            avg_price: Decimal::ZERO,
        });

        match req.side {
            OrderSide::Buy => {
                let prior_qty = Decimal::from(entry.net_qty);
                let new_qty = prior_qty + Decimal::from(req.quantity);
                entry.avg_price = (entry.avg_price * prior_qty + req.price * Decimal::from(req.quantity)) / new_qty;
                entry.net_qty += req.quantity;
            }
            OrderSide::Sell => {
                entry.net_qty = entry.net_qty.saturating_sub(req.quantity);
            }
        }

        Ok(BrokerFill {
            order_id: format!("PAPER-{}", Uuid::new_v4()),
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
        let book = self.book.lock().expect("paper broker book lock poisoned");
        Ok(book
            .iter()
            .filter(|(_, entry)| entry.net_qty > 0)
            .map(|(security_id, entry)| BrokerPosition {
                segment: entry.segment.clone(),
                security_id: *security_id,
                net_qty: entry.net_qty,
                avg_price: entry.avg_price,
            })
            .collect())
    }

    async fn get_funds(&self) -> Result<Decimal, TransientNetworkError> {
        Ok(*self.funds.lock().expect("paper broker funds lock poisoned"))
    }
}
