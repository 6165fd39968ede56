//! Collaborator interfaces consumed by the price monitor

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{
    FlightOffer, NotificationFrequency, PriceAlert, PriceCheckOutcome, SavedSearch, SearchQuery,
};

/// Notification kind key for price alerts in user preferences
pub const PRICE_ALERTS: &str = "priceAlerts";

/// Shared key-value store with per-key expiry
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// List live keys matching a glob pattern (`*` and `?` wildcards)
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite `key`, expiring it after `ttl_seconds` when given
    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()>;
}

/// Access to users' saved searches and their price re-evaluation
#[async_trait]
pub trait SavedSearchService: Send + Sync {
    async fn get_saved_searches(&self, user_id: &str) -> Result<Vec<SavedSearch>>;

    /// Re-price the given searches of `user_id` and decide whether each crossed an alert threshold
    async fn check_saved_search_prices(
        &self,
        user_id: &str,
        searches: &[SavedSearch],
    ) -> Result<Vec<PriceCheckOutcome>>;
}

/// Persistence for generated alerts
#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn save_alert(&self, alert: &PriceAlert) -> Result<()>;
}

#[async_trait]
pub trait PreferencesService: Send + Sync {
    async fn is_notification_enabled(&self, user_id: &str, kind: &str) -> Result<bool>;

    /// `None` when the user never chose a frequency
    async fn get_notification_frequency(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationFrequency>>;
}

/// Lookup of contact details for a user
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user_email(&self, user_id: &str) -> Result<Option<String>>;
}

/// Source of current flight prices
#[async_trait]
pub trait FlightPriceProvider: Send + Sync {
    /// Cheapest offer currently available for `query`, if any
    async fn lowest_offer(&self, query: &SearchQuery) -> Result<Option<FlightOffer>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailPriority {
    High,
}

/// Outbound email handed to the transport
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub priority: EmailPriority,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send_email(&self, message: &EmailMessage) -> Result<()>;
}

/// Fire-and-forget counters and histograms
pub trait MetricsSink: Send + Sync {
    fn increment_counter(&self, name: &str, tags: &[(&str, &str)]);

    fn record_histogram(&self, name: &str, value: f64);
}

/// Fire-and-forget sink for top-level failures
pub trait ErrorTracker: Send + Sync {
    fn capture_error(&self, error: &(dyn std::error::Error + Send + Sync));
}

/// Wall clock, injectable so cooldown windows can be tested
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
