//! `StreamTransport` adapter over a websocket feed, grounded in the teacher's
//! `AlpacaWebSocketManager` connect/subscribe-command/broadcast shape — here
//! simplified to the single-consumer `mpsc` channel FeedManager (C5) already
//! expects from the `StreamTransport` port.

use crate::domain::errors::TransientNetworkError;
use crate::domain::ports::{RawPacket, StreamTransport};
use crate::domain::types::Segment;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Mutex;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct WireTick {
    segment: String,
    security_id: i64,
    ltp: Decimal,
    #[serde(default)]
    open: Decimal,
    #[serde(default)]
    high: Decimal,
    #[serde(default)]
    low: Decimal,
    #[serde(default)]
    close: Decimal,
    #[serde(default)]
    volume: Decimal,
}

pub struct WebSocketTransport {
    url: String,
    access_token: String,
    command_tx: Mutex<Option<Sender<String>>>,
}

impl WebSocketTransport {
    pub fn new(url: String, access_token: String) -> Self {
        Self {
            url,
            access_token,
            command_tx: Mutex::new(None),
        }
    }

    fn send_command(&self, command: String) -> Result<(), TransientNetworkError> {
        let guard = self.command_tx.lock().expect("websocket command lock poisoned");
        match guard.as_ref() {
            Some(tx) => tx.try_send(command).map_err(|e| TransientNetworkError::Stream(e.to_string())),
            None => Err(TransientNetworkError::Stream("not connected".into())),
        }
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn connect(&self) -> Result<Receiver<RawPacket>, TransientNetworkError> {
        let url = format!("{}?token={}", self.url, self.access_token);
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| TransientNetworkError::Stream(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let (packet_tx, packet_rx) = mpsc::channel(1024);
        let (command_tx, mut command_rx) = mpsc::channel::<String>(64);
        *self.command_tx.lock().expect("websocket command lock poisoned") = Some(command_tx);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(packet) = parse_wire_tick(&text) {
                                    if packet_tx.send(packet).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                warn!("WebSocketTransport: stream closed by peer");
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocketTransport: read error: {e}");
                                break;
                            }
                            _ => {}
                        }
                    }
                    cmd = command_rx.recv() => {
                        match cmd {
                            Some(cmd) => {
                                if write.send(Message::Text(cmd.into())).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(packet_rx)
    }

    async fn disconnect(&self) {
        *self.command_tx.lock().expect("websocket command lock poisoned") = None;
    }

    async fn subscribe(&self, segment: &Segment, security_id: i64) -> Result<(), TransientNetworkError> {
        let cmd = serde_json::json!({
            "action": "subscribe",
            "segment": segment.0,
            "security_id": security_id,
        })
        .to_string();
        self.send_command(cmd)
    }

    async fn unsubscribe(&self, security_id: i64) -> Result<(), TransientNetworkError> {
        let cmd = serde_json::json!({
            "action": "unsubscribe",
            "security_id": security_id,
        })
        .to_string();
        self.send_command(cmd)
    }
}

fn parse_wire_tick(text: &str) -> Option<RawPacket> {
    let wire: WireTick = serde_json::from_str(text).ok()?;
    Some(RawPacket::Full {
        segment: Segment::from(wire.segment.as_str()),
        security_id: wire.security_id,
        ltp: wire.ltp,
        open: wire.open,
        high: wire.high,
        low: wire.low,
        close: wire.close,
        volume: wire.volume,
        day_high: wire.high,
        day_low: wire.low,
        atp: wire.ltp,
        oi: None,
        ts: chrono::Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_payload_is_dropped() {
        assert!(parse_wire_tick("not json").is_none());
    }

    #[test]
    fn valid_payload_parses_into_full_packet() {
        let packet = parse_wire_tick(r#"{"segment":"NSE_FNO","security_id":1,"ltp":"100.5"}"#).unwrap();
        match packet {
            RawPacket::Full { security_id, ltp, .. } => {
                assert_eq!(security_id, 1);
                assert_eq!(ltp, Decimal::new(1005, 1));
            }
            _ => panic!("expected Full packet"),
        }
    }
}
