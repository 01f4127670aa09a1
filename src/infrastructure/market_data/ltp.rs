//! REST LTP fallback (C1 collaborator, spec.md §4.1) — a plain `reqwest` GET,
//! used by `TickCache::ltp` only when no recent tick exists for a key.

use crate::domain::errors::TransientNetworkError;
use crate::domain::ports::LtpLookup;
use crate::domain::types::Segment;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

pub struct RestLtpLookup {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl RestLtpLookup {
    pub fn new(base_url: String, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            access_token,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LtpResponse {
    ltp: Decimal,
}

#[async_trait]
impl LtpLookup for RestLtpLookup {
    async fn fetch_ltp(&self, segment: &Segment, security_id: i64) -> Result<Decimal, TransientNetworkError> {
        let response = self
            .client
            .get(format!("{}/marketfeed/ltp", self.base_url))
            .header("access-token", &self.access_token)
            .query(&[("segment", segment.0.as_str()), ("security_id", &security_id.to_string())])
            .send()
            .await
            .map_err(|e| TransientNetworkError::Stream(e.to_string()))?;

        let parsed: LtpResponse = response.json().await.map_err(|e| TransientNetworkError::Stream(e.to_string()))?;
        Ok(parsed.ltp)
    }
}
