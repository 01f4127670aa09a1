//! Live broker `Broker` adapter: signs and sends REST requests the way the
//! teacher's Alpaca/Binance execution services do (reqwest client + per-call
//! auth headers), except this venue requires an HMAC-SHA256 request signature
//! rather than a static key pair. The wire format itself (endpoints, exact
//! JSON shapes) is an external collaborator's concern (spec.md §1) — this
//! adapter only needs to satisfy the `Broker` port faithfully.

use crate::domain::errors::{OrderError, TransientNetworkError};
use crate::domain::ports::{Broker, BrokerFill, BrokerPosition};
use crate::domain::types::{OrderRequest, OrderSide, OrderStatus, Segment};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

pub struct DhanLiveBroker {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    access_token: String,
}

impl DhanLiveBroker {
    pub fn new(base_url: String, client_id: String, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            client_id,
            access_token,
        }
    }

    fn signature(&self, method: &str, path: &str, body: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(self.access_token.as_bytes()).expect("hmac accepts any key length");
        mac.update(format!("{method}{path}{body}{timestamp}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp(&self) -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs() as i64
    }
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    order_id: String,
    fill_price: Decimal,
    fill_quantity: u32,
}

#[derive(Debug, Deserialize)]
struct PositionResponse {
    segment: String,
    security_id: i64,
    net_qty: u32,
    avg_price: Decimal,
}

#[derive(Debug, Deserialize)]
struct FundsResponse {
    available_balance: Decimal,
}

#[async_trait]
impl Broker for DhanLiveBroker {
    async fn place(&self, req: &OrderRequest) -> Result<BrokerFill, OrderError> {
        let path = "/orders";
        let body = serde_json::json!({
            "dhanClientId": self.client_id,
            "securityId": req.security_id,
            "exchangeSegment": req.segment.0,
            "transactionType": match req.side { OrderSide::Buy => "BUY", OrderSide::Sell => "SELL" },
            "quantity": req.quantity,
            "price": req.price.to_string(),
            "orderType": format!("{}", req.order_type),
        })
        .to_string();

        let ts = self.timestamp();
        let signature = self.signature("POST", path, &body, ts);

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("access-token", &self.access_token)
            .header("x-signature", signature)
            .header("x-timestamp", ts.to_string())
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| OrderError::Transient(TransientNetworkError::Broker(e.to_string())))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(OrderError::BrokerRejection(format!("{status}: {text}")));
        }

        let parsed: OrderResponse = response
            .json()
            .await
            .map_err(|e| OrderError::Transient(TransientNetworkError::Broker(format!("malformed order response: {e}"))))?;

        Ok(BrokerFill {
            order_id: parsed.order_id,
            fill_price: parsed.fill_price,
            fill_quantity: parsed.fill_quantity,
        })
    }

    async fn cancel(&self, order_id: &str) -> Result<(), OrderError> {
        let path = format!("/orders/{order_id}");
        let ts = self.timestamp();
        let signature = self.signature("DELETE", &path, "", ts);
        let response = self
            .client
            .delete(format!("{}{}", self.base_url, path))
            .header("access-token", &self.access_token)
            .header("x-signature", signature)
            .header("x-timestamp", ts.to_string())
            .send()
            .await
            .map_err(|e| OrderError::Transient(TransientNetworkError::Broker(e.to_string())))?;
        if !response.status().is_success() {
            return Err(OrderError::BrokerRejection(format!("cancel failed: {}", response.status())));
        }
        Ok(())
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatus, TransientNetworkError> {
        let path = format!("/orders/{order_id}");
        let ts = self.timestamp();
        let signature = self.signature("GET", &path, "", ts);
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("access-token", &self.access_token)
            .header("x-signature", signature)
            .header("x-timestamp", ts.to_string())
            .send()
            .await
            .map_err(|e| TransientNetworkError::Broker(e.to_string()))?;

        #[derive(Deserialize)]
        struct StatusResponse {
            status: String,
        }
        let parsed: StatusResponse = response.json().await.map_err(|e| TransientNetworkError::Broker(e.to_string()))?;
        Ok(match parsed.status.as_str() {
            "FILLED" => OrderStatus::Filled,
            "CANCELLED" => OrderStatus::Cancelled,
            "REJECTED" => OrderStatus::Rejected,
            _ => OrderStatus::Pending,
        })
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, TransientNetworkError> {
        let path = "/positions";
        let ts = self.timestamp();
        let signature = self.signature("GET", path, "", ts);
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("access-token", &self.access_token)
            .header("x-signature", signature)
            .header("x-timestamp", ts.to_string())
            .send()
            .await
            .map_err(|e| TransientNetworkError::Broker(e.to_string()))?;

        let parsed: Vec<PositionResponse> = response.json().await.map_err(|e| {
            warn!("DhanLiveBroker: malformed positions response: {e}");
            TransientNetworkError::Broker(e.to_string())
        })?;

        Ok(parsed
            .into_iter()
            .map(|p| BrokerPosition {
                segment: Segment::from(p.segment.as_str()),
                security_id: p.security_id,
                net_qty: p.net_qty,
                avg_price: p.avg_price,
            })
            .collect())
    }

    async fn get_funds(&self) -> Result<Decimal, TransientNetworkError> {
        let path = "/funds";
        let ts = self.timestamp();
        let signature = self.signature("GET", path, "", ts);
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("access-token", &self.access_token)
            .header("x-signature", signature)
            .header("x-timestamp", ts.to_string())
            .send()
            .await
            .map_err(|e| TransientNetworkError::Broker(e.to_string()))?;

        let parsed: FundsResponse = response.json().await.map_err(|e| TransientNetworkError::Broker(e.to_string()))?;
        Ok(parsed.available_balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_for_same_inputs() {
        let broker = DhanLiveBroker::new("https://api.dhan.co".into(), "C1".into(), "secret".into());
        let a = broker.signature("POST", "/orders", "{}", 1000);
        let b = broker.signature("POST", "/orders", "{}", 1000);
        assert_eq!(a, b);
    }

    #[test]
    fn signature_changes_with_body() {
        let broker = DhanLiveBroker::new("https://api.dhan.co".into(), "C1".into(), "secret".into());
        let a = broker.signature("POST", "/orders", "{\"a\":1}", 1000);
        let b = broker.signature("POST", "/orders", "{\"a\":2}", 1000);
        assert_ne!(a, b);
    }
}
