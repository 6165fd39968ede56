//! Data models for saved searches, price checks, alerts and batch results

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Flight search criteria of a saved search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    #[serde(default)]
    pub return_date: Option<NaiveDate>,
    #[serde(default = "default_passengers")]
    pub passengers: u32,
    #[serde(default)]
    pub cabin_class: Option<String>,
}

fn default_passengers() -> u32 {
    1
}

/// Alert settings attached to a saved search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceAlertSettings {
    pub enabled: bool,
    #[serde(default)]
    pub target_price: Option<f64>,
    #[serde(default)]
    pub check_frequency_hours: Option<u32>,
}

/// A user's persisted monitoring request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSearch {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub query: SearchQuery,
    pub price_alerts: PriceAlertSettings,
    pub is_active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Best price observed so far, written back by the price check
    #[serde(default)]
    pub lowest_price_seen: Option<f64>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SavedSearch {
    /// Active, alert-enabled and not expired at `now`.
    pub fn is_monitorable(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.price_alerts.enabled
            && self.expires_at.is_none_or(|expires| expires > now)
    }
}

/// Per-user notification cadence preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationFrequency {
    Instant,
    Hourly,
    Daily,
    Weekly,
    Never,
}

impl NotificationFrequency {
    /// Cooldown window in hours, `None` for `Never`.
    pub fn cooldown_hours(self) -> Option<i64> {
        match self {
            Self::Instant | Self::Hourly => Some(1),
            Self::Daily => Some(24),
            Self::Weekly => Some(168),
            Self::Never => None,
        }
    }
}

impl FromStr for NotificationFrequency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INSTANT" => Ok(Self::Instant),
            "HOURLY" => Ok(Self::Hourly),
            "DAILY" => Ok(Self::Daily),
            "WEEKLY" => Ok(Self::Weekly),
            "NEVER" => Ok(Self::Never),
            other => Err(anyhow::anyhow!("Unknown notification frequency: {other}")),
        }
    }
}

/// A concrete bookable offer returned by the flight price provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightOffer {
    pub id: String,
    pub origin: String,
    pub destination: String,
    pub departure_time: DateTime<Utc>,
    #[serde(default)]
    pub return_time: Option<DateTime<Utc>>,
    pub airline: String,
    pub price: f64,
    pub currency: String,
    #[serde(default)]
    pub booking_url: Option<String>,
}

/// What made a price check produce an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertTrigger {
    PriceDrop,
    TargetPriceReached,
}

impl fmt::Display for AlertTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PriceDrop => f.write_str("price drop"),
            Self::TargetPriceReached => f.write_str("target price reached"),
        }
    }
}

/// The unit of notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceAlert {
    pub id: String,
    pub user_id: String,
    pub saved_search_id: String,
    pub trigger: AlertTrigger,
    pub offer: FlightOffer,
    pub previous_price: f64,
    pub current_price: f64,
    pub price_change: f64,
    pub percent_change: f64,
    pub alerted_at: DateTime<Utc>,
    pub is_read: bool,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of re-checking one saved search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceCheckOutcome {
    pub saved_search_id: String,
    pub current_lowest_price: Option<f64>,
    pub previous_best_price: Option<f64>,
    #[serde(default)]
    pub alert: Option<PriceAlert>,
}

/// Counts contributed by one user's processing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOutcome {
    pub processed_count: usize,
    pub alerts_generated: usize,
}

/// Aggregate of one batch run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub processed_count: usize,
    pub alerts_generated: usize,
    pub errors: Vec<String>,
    pub duration: Duration,
}

impl ProcessingResult {
    /// Fold one user's settled outcome into the aggregate.
    pub fn absorb(&mut self, user_id: &str, outcome: anyhow::Result<UserOutcome>) {
        match outcome {
            Ok(counts) => {
                self.processed_count += counts.processed_count;
                self.alerts_generated += counts.alerts_generated;
            }
            Err(e) => self.errors.push(format!("{user_id}: {e:#}")),
        }
    }
}
