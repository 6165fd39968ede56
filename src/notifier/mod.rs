//! # Price Alert Email Notifications
//!
//! This module turns a generated [`PriceAlert`] into an email and hands it to
//! an [`EmailTransport`]. Delivery is strictly best-effort: the dispatcher
//! never returns an error to its caller, it only logs and counts failures.
//!
//! ## Email Structure
//!
//! Each notification includes:
//! - **Subject**: `Price Alert: <origin> → <destination> now <currency> <price>`
//! - **Body**: previous price, current price, percent change, route,
//!   departure time, airline, and when the alert expires
//! - **Priority**: always `high`
//!
//! ## Environment Configuration
//!
//! Set `EMAIL_API_URL` (and optionally `EMAIL_API_KEY`, `EMAIL_FROM`) to
//! enable the HTTP transport. If `EMAIL_API_URL` is not set, sends are
//! skipped with a log line.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::EmailConfig;
use crate::models::PriceAlert;
use crate::traits::{EmailMessage, EmailPriority, EmailTransport, MetricsSink, UserDirectory};

/// Best-effort delivery of price alerts to the owning user's inbox.
///
/// Holds the transport and the directory used to resolve a user's address.
/// Cloning is cheap; every field is an `Arc`.
#[derive(Clone)]
pub struct NotificationDispatcher {
    transport: Arc<dyn EmailTransport>,
    directory: Arc<dyn UserDirectory>,
    metrics: Arc<dyn MetricsSink>,
}

impl NotificationDispatcher {
    pub fn new(
        transport: Arc<dyn EmailTransport>,
        directory: Arc<dyn UserDirectory>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            transport,
            directory,
            metrics,
        }
    }

    /// Sends the alert email, swallowing every failure.
    ///
    /// ## Error Handling
    ///
    /// - **Unknown email address**: logged as a warning, nothing is sent
    /// - **Transport failure**: logged as an error
    ///
    /// In both cases the alert itself stays valid; callers keep counting it
    /// as generated.
    pub async fn dispatch(&self, alert: &PriceAlert) {
        match self.try_dispatch(alert).await {
            Ok(to) => {
                self.metrics.increment_counter("alerts.dispatched", &[]);
                info!("Price alert {} emailed to {}", alert.id, to);
            }
            Err(e) => {
                self.metrics.increment_counter("alerts.dispatch_failed", &[]);
                error!(
                    "Failed to send price alert {} to user {}: {:#}",
                    alert.id, alert.user_id, e
                );
            }
        }
    }

    async fn try_dispatch(&self, alert: &PriceAlert) -> Result<String> {
        let to = self
            .directory
            .get_user_email(&alert.user_id)
            .await
            .context("email lookup failed")?
            .context("user has no email address")?;

        let message = compose_email(alert, &to);
        self.transport.send_email(&message).await?;
        Ok(to)
    }
}

/// Builds the deterministic subject and HTML body for an alert.
pub fn compose_email(alert: &PriceAlert, to: &str) -> EmailMessage {
    let offer = &alert.offer;
    let currency = &offer.currency;

    let subject = format!(
        "Price Alert: {} → {} now {} {:.2}",
        offer.origin, offer.destination, currency, alert.current_price
    );

    let html = format!(
        "<h2>{subject}</h2>\
         <p>Good news, the price for your saved search has changed ({trigger}).</p>\
         <table>\
         <tr><td>Previous price</td><td>{currency} {previous:.2}</td></tr>\
         <tr><td>Current price</td><td><strong>{currency} {current:.2}</strong></td></tr>\
         <tr><td>Change</td><td>{percent:+.1}%</td></tr>\
         <tr><td>Route</td><td>{origin} → {destination}</td></tr>\
         <tr><td>Departure</td><td>{departure}</td></tr>\
         <tr><td>Airline</td><td>{airline}</td></tr>\
         </table>\
         <p>This alert expires on {expires}.</p>",
        trigger = alert.trigger,
        previous = alert.previous_price,
        current = alert.current_price,
        percent = alert.percent_change,
        origin = offer.origin,
        destination = offer.destination,
        departure = offer.departure_time.format("%Y-%m-%d %H:%M UTC"),
        airline = offer.airline,
        expires = alert.expires_at.format("%Y-%m-%d %H:%M UTC"),
    );

    EmailMessage {
        to: to.to_string(),
        subject,
        html,
        priority: EmailPriority::High,
    }
}

/// Email API request payload
#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    priority: EmailPriority,
}

/// Email transport that posts JSON to an HTTP email API.
///
/// ## Design Principles
///
/// - **Optional Integration**: Functions normally even when no API URL is configured
/// - **Environment Driven**: Configuration comes from [`EmailConfig`]
pub struct HttpEmailTransport {
    client: Client,
    config: EmailConfig,
}

impl HttpEmailTransport {
    pub fn new(config: EmailConfig) -> Self {
        if config.api_url.is_none() {
            warn!("EMAIL_API_URL not set - email notifications will be disabled");
        }

        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl EmailTransport for HttpEmailTransport {
    async fn send_email(&self, message: &EmailMessage) -> Result<()> {
        let Some(api_url) = &self.config.api_url else {
            info!("Email delivery disabled, skipping: {}", message.subject);
            return Ok(());
        };

        let payload = SendEmailRequest {
            from: &self.config.from_address,
            to: &message.to,
            subject: &message.subject,
            html: &message.html,
            priority: message.priority,
        };

        let mut request = self.client.post(api_url).json(&payload);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Email API rejected message: {}",
                response.status()
            ));
        }

        Ok(())
    }
}
