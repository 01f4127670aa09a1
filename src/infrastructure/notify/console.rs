//! C14 (ambient) — default `Notifier`: logs structured fields via `tracing`.
//! Rendering human-readable text from these fields is an external
//! collaborator's job (SPEC_FULL.md §4 SUPPLEMENT).

use crate::domain::ports::{NotificationEvent, Notifier};
use async_trait::async_trait;
use tracing::info;

pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&self, event: NotificationEvent) {
        match event {
            NotificationEvent::OrderPlaced { symbol, side, quantity, price } => {
                info!(%symbol, side = %side, quantity, %price, "notify: order placed");
            }
            NotificationEvent::ExitIssued { security_id, reason, quantity } => {
                info!(security_id, reason = %reason, quantity, "notify: exit issued");
            }
            NotificationEvent::DailyLossCapTripped { current_equity, starting_equity } => {
                info!(%current_equity, %starting_equity, "notify: daily loss cap tripped");
            }
            NotificationEvent::FeedReconnected { attempt } => {
                info!(attempt, "notify: feed reconnected");
            }
            NotificationEvent::SessionFinalized { session_id, total_pnl } => {
                info!(%session_id, %total_pnl, "notify: session finalized");
            }
        }
    }
}
