//! C5 — FeedManager: resilient subscription manager over the streaming
//! transport. Exponential backoff + jitter reconnect, heartbeat-based
//! liveness, baseline+position resubscription on reconnect, and an
//! out-of-order/stale tick filter ahead of TickCache (spec.md §4.5).

use crate::application::tick_cache::TickCache;
use crate::domain::errors::{FeedError, TransientNetworkError};
use crate::domain::ports::{InstrumentLookup, RawPacket, StreamTransport};
use crate::domain::types::Instrument;
use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Connected,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionRole {
    Baseline,
    Position,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub heartbeat_timeout: Duration,
    pub heartbeat_poll_interval: Duration,
    /// Packets older than this (wall-clock now - packet ts) are dropped as stale.
    pub dedup_window: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            max_attempts: 10,
            heartbeat_timeout: Duration::from_secs(10),
            heartbeat_poll_interval: Duration::from_secs(2),
            dedup_window: Duration::from_secs(5),
        }
    }
}

struct Subscription {
    role: SubscriptionRole,
    instrument: Instrument,
}

pub struct FeedManager {
    transport: Arc<dyn StreamTransport>,
    tick_cache: Arc<TickCache>,
    instrument_lookup: Arc<dyn InstrumentLookup>,
    config: FeedConfig,
    state: Mutex<FeedState>,
    subscriptions: Mutex<HashMap<i64, Subscription>>,
    last_tick_at: Mutex<Instant>,
    reconnect_callbacks: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
}

impl FeedManager {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        tick_cache: Arc<TickCache>,
        instrument_lookup: Arc<dyn InstrumentLookup>,
        config: FeedConfig,
    ) -> Self {
        Self {
            transport,
            tick_cache,
            instrument_lookup,
            config,
            state: Mutex::new(FeedState::Disconnected),
            subscriptions: Mutex::new(HashMap::new()),
            last_tick_at: Mutex::new(Instant::now()),
            reconnect_callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> FeedState {
        *self.state.lock().expect("feed state lock poisoned")
    }

    pub fn on_reconnect(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.reconnect_callbacks
            .lock()
            .expect("reconnect callbacks lock poisoned")
            .push(Box::new(callback));
    }

    /// Records the instrument for later (re)subscription and, if already
    /// connected, subscribes on the transport immediately. Idempotent.
    pub async fn subscribe(
        &self,
        instrument: Instrument,
        role: SubscriptionRole,
    ) -> Result<(), TransientNetworkError> {
        let security_id = instrument.security_id;
        let segment = instrument.segment.clone();
        self.subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .insert(security_id, Subscription { role, instrument });
        if self.state() == FeedState::Connected {
            self.transport.subscribe(&segment, security_id).await?;
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, security_id: i64) -> Result<(), TransientNetworkError> {
        self.subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .remove(&security_id);
        if self.state() == FeedState::Connected {
            self.transport.unsubscribe(security_id).await?;
        }
        Ok(())
    }

    /// The set of instruments that must be subscribed at any moment: exactly
    /// baseline ∪ positions (spec.md §8 invariant).
    pub fn subscribed_security_ids(&self) -> Vec<i64> {
        self.subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    async fn resubscribe_all(&self) -> Result<(), TransientNetworkError> {
        let subs: Vec<(i64, Subscription)> = {
            let guard = self.subscriptions.lock().expect("subscriptions lock poisoned");
            guard
                .iter()
                .map(|(id, s)| {
                    (
                        *id,
                        Subscription {
                            role: s.role,
                            instrument: s.instrument.clone(),
                        },
                    )
                })
                .collect()
        };
        let (baseline, position): (Vec<_>, Vec<_>) =
            subs.into_iter().partition(|(_, s)| s.role == SubscriptionRole::Baseline);
        for (id, s) in baseline.iter().chain(position.iter()) {
            self.transport.subscribe(&s.instrument.segment, *id).await?;
        }
        Ok(())
    }

    fn invoke_reconnect_callbacks(&self) {
        for cb in self.reconnect_callbacks.lock().expect("reconnect callbacks lock poisoned").iter() {
            cb();
        }
    }

    fn resolve_instrument(&self, raw: &RawPacket) -> Instrument {
        let (segment, security_id) = raw.key();
        if let Some(sub) = self.subscriptions.lock().expect("subscriptions lock poisoned").get(&security_id) {
            return sub.instrument.clone();
        }
        self.instrument_lookup
            .instrument(security_id)
            .unwrap_or_else(|| Instrument {
                security_id,
                segment,
                symbol: String::new(),
                instrument_type: crate::domain::types::InstrumentType::Index,
                lot_size: 1,
                strike: None,
                expiry: None,
                option_type: None,
            })
    }

    fn handle_packet(&self, raw: RawPacket) {
        let age = Utc::now().signed_duration_since(raw.ts());
        if age.num_milliseconds() > self.config.dedup_window.as_millis() as i64 {
            warn!(security_id = raw.key().1, age_ms = age.num_milliseconds(), "FeedManager: dropping stale packet");
            return;
        }
        let instrument = self.resolve_instrument(&raw);
        self.tick_cache.put_raw(raw, &instrument);
        *self.last_tick_at.lock().expect("last tick lock poisoned") = Instant::now();
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.config.base_delay, self.config.max_delay)
    }

    /// Drives the connect/resubscribe/heartbeat/reconnect state machine until
    /// `stop()` is called or `max_attempts` reconnects are exhausted.
    pub async fn run(self: Arc<Self>) -> Result<(), FeedError> {
        let mut attempt: u32 = 0;
        loop {
            if self.state() == FeedState::Stopped {
                return Ok(());
            }
            *self.state.lock().expect("feed state lock poisoned") = FeedState::Connecting;
            match self.transport.connect().await {
                Ok(mut rx) => {
                    attempt = 0;
                    *self.state.lock().expect("feed state lock poisoned") = FeedState::Connected;
                    if let Err(e) = self.resubscribe_all().await {
                        warn!("FeedManager: resubscribe after connect failed: {e}");
                    }
                    self.invoke_reconnect_callbacks();
                    *self.last_tick_at.lock().expect("last tick lock poisoned") = Instant::now();

                    loop {
                        if self.state() == FeedState::Stopped {
                            return Ok(());
                        }
                        tokio::select! {
                            packet = rx.recv() => {
                                match packet {
                                    Some(raw) => self.handle_packet(raw),
                                    None => {
                                        warn!("FeedManager: stream closed, reconnecting");
                                        break;
                                    }
                                }
                            }
                            _ = tokio::time::sleep(self.config.heartbeat_poll_interval) => {
                                let stale = self.last_tick_at.lock().expect("last tick lock poisoned").elapsed()
                                    > self.config.heartbeat_timeout;
                                if stale {
                                    warn!("FeedManager: heartbeat timeout, forcing reconnect");
                                    break;
                                }
                            }
                        }
                    }
                    *self.state.lock().expect("feed state lock poisoned") = FeedState::Disconnected;
                }
                Err(e) => {
                    warn!("FeedManager: connect failed: {e}");
                }
            }

            attempt += 1;
            if attempt > self.config.max_attempts {
                *self.state.lock().expect("feed state lock poisoned") = FeedState::Stopped;
                return Err(FeedError::MaxAttemptsExceeded(self.config.max_attempts));
            }
            tokio::time::sleep(self.backoff_delay(attempt)).await;
        }
    }

    pub async fn stop(&self) {
        *self.state.lock().expect("feed state lock poisoned") = FeedState::Stopped;
        self.transport.disconnect().await;
    }
}

fn backoff_delay(attempt: u32, base: Duration, max_delay: Duration) -> Duration {
    let exp = base.as_secs_f64() * 2f64.powi(attempt.saturating_sub(1) as i32);
    let capped = exp.min(max_delay.as_secs_f64());
    let jitter_pct: f64 = rand::rng().random_range(0.0..=0.10);
    Duration::from_secs_f64(capped + capped * jitter_pct)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_is_capped() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(300);
        let d1 = backoff_delay(1, base, max);
        let d2 = backoff_delay(2, base, max);
        let d3 = backoff_delay(10, base, max);
        assert!(d1.as_secs_f64() >= 1.0 && d1.as_secs_f64() <= 1.1);
        assert!(d2.as_secs_f64() >= 2.0 && d2.as_secs_f64() <= 2.2);
        assert!(d3.as_secs_f64() <= 330.0);
        assert!(d3.as_secs_f64() >= 300.0);
    }
}
