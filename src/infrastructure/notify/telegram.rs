//! Telegram `Notifier` stub (SPEC_FULL.md §4 SUPPLEMENT): builds the HTTP
//! payload from `TELEGRAM_BOT_TOKEN`/`TELEGRAM_CHAT_ID` and sends it with
//! `reqwest`. Human-readable message formatting stays an external
//! collaborator's job — this only supplies structured fields as the message
//! body, same division of labor as `ConsoleNotifier`.

use crate::domain::ports::{NotificationEvent, Notifier};
use async_trait::async_trait;
use tracing::warn;

pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token,
            chat_id,
        }
    }

    fn render(event: &NotificationEvent) -> String {
        match event {
            NotificationEvent::OrderPlaced { symbol, side, quantity, price } => {
                format!("order placed: {side} {quantity} {symbol} @ {price}")
            }
            NotificationEvent::ExitIssued { security_id, reason, quantity } => {
                format!("exit issued: security_id={security_id} reason={reason} qty={quantity}")
            }
            NotificationEvent::DailyLossCapTripped { current_equity, starting_equity } => {
                format!("daily loss cap tripped: equity={current_equity} starting={starting_equity}")
            }
            NotificationEvent::FeedReconnected { attempt } => format!("feed reconnected on attempt {attempt}"),
            NotificationEvent::SessionFinalized { session_id, total_pnl } => {
                format!("session {session_id} finalized: pnl={total_pnl}")
            }
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, event: NotificationEvent) {
        let text = Self::render(&event);
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let result = self
            .client
            .post(&url)
            .query(&[("chat_id", self.chat_id.as_str()), ("text", text.as_str())])
            .send()
            .await;
        if let Err(e) = result {
            warn!("TelegramNotifier: send failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_reason_and_security_id() {
        let text = TelegramNotifier::render(&NotificationEvent::ExitIssued {
            security_id: 42,
            reason: crate::domain::types::ExitReason::TakeProfit,
            quantity: 75,
        });
        assert!(text.contains("42"));
        assert!(text.contains("TAKE_PROFIT"));
    }
}
