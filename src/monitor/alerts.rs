//! Turns price-check outcomes into emitted alerts

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::models::{PriceAlert, PriceCheckOutcome};
use crate::notifier::NotificationDispatcher;
use crate::traits::AlertRepository;

/// Emits the alert a price check decided on, if any.
///
/// Thresholds are not recomputed here: the outcome's `alert` is trusted as
/// the price check's decision. Persisting the alert is part of generating it
/// and can fail; dispatching the email is a side effect and cannot.
pub struct AlertGenerator {
    alerts: Arc<dyn AlertRepository>,
    dispatcher: Option<NotificationDispatcher>,
}

impl AlertGenerator {
    /// `dispatcher` is `None` when email notifications are turned off
    pub fn new(alerts: Arc<dyn AlertRepository>, dispatcher: Option<NotificationDispatcher>) -> Self {
        Self { alerts, dispatcher }
    }

    pub async fn generate(
        &self,
        user_id: &str,
        outcome: PriceCheckOutcome,
    ) -> Result<Option<PriceAlert>> {
        let Some(alert) = outcome.alert else {
            return Ok(None);
        };

        if alert.user_id != user_id || alert.saved_search_id != outcome.saved_search_id {
            warn!(
                "Dropping alert {} addressed to {}/{} while processing {}/{}",
                alert.id, alert.user_id, alert.saved_search_id, user_id, outcome.saved_search_id
            );
            return Ok(None);
        }

        self.alerts.save_alert(&alert).await?;

        info!(
            "Price alert for search {}: {:.2} -> {:.2} ({:+.1}%)",
            alert.saved_search_id, alert.previous_price, alert.current_price, alert.percent_change
        );

        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.dispatch(&alert).await;
        }

        Ok(Some(alert))
    }
}
