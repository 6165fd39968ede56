//! Environment-driven configuration

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

/// Batch tuning, fixed for the lifetime of a scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConfig {
    /// Users per outer chunk
    pub batch_size: usize,
    /// Users processed simultaneously within a chunk
    pub max_concurrent: usize,
    /// Retries of a failed price check after the first attempt
    pub retry_attempts: u32,
    /// Delay before the first retry, doubled on each further retry
    pub retry_delay: Duration,
    /// Cooldown used when neither the user nor the search sets one
    pub alert_cooldown_hours: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_concurrent: 10,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            alert_cooldown_hours: 24,
        }
    }
}

impl BatchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_or("BATCH_SIZE", defaults.batch_size).max(1),
            max_concurrent: env_or("BATCH_MAX_CONCURRENT", defaults.max_concurrent).max(1),
            retry_attempts: env_or("BATCH_RETRY_ATTEMPTS", defaults.retry_attempts),
            retry_delay: Duration::from_millis(env_or(
                "BATCH_RETRY_DELAY_MS",
                u64::try_from(defaults.retry_delay.as_millis()).unwrap_or(1000),
            )),
            alert_cooldown_hours: env_or("ALERT_COOLDOWN_HOURS", defaults.alert_cooldown_hours),
        }
    }
}

/// Flight price provider endpoint
#[derive(Debug, Clone)]
pub struct FlightApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// Email API endpoint; `api_url` of `None` disables delivery
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub from_address: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub cron_expression: String,
    pub email_notifications: bool,
    /// Prometheus scrape endpoint; unset keeps metrics in-process
    pub metrics_addr: Option<SocketAddr>,
    pub batch: BatchConfig,
    pub flight_api: FlightApiConfig,
    pub email: EmailConfig,
}

pub const DEFAULT_DATABASE_URL: &str = "sqlite:database/price_monitor.db";
pub const DEFAULT_CRON: &str = "0 0 * * * *";
const DEFAULT_FLIGHT_API_URL: &str = "http://localhost:8080/api/flights";
const DEFAULT_FROM_ADDRESS: &str = "alerts@flight-price-monitor.local";

impl AppConfig {
    /// Load `.env` (if present) and read every setting from the environment
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            cron_expression: std::env::var("MONITOR_CRON")
                .unwrap_or_else(|_| DEFAULT_CRON.to_string()),
            email_notifications: env_or("ENABLE_EMAIL_NOTIFICATIONS", true),
            metrics_addr: std::env::var("METRICS_ADDR").ok().and_then(|raw| {
                raw.trim()
                    .parse()
                    .map_err(|_| warn!("Ignoring invalid value {raw:?} for METRICS_ADDR"))
                    .ok()
            }),
            batch: BatchConfig::from_env(),
            flight_api: FlightApiConfig {
                base_url: std::env::var("FLIGHT_API_URL")
                    .unwrap_or_else(|_| DEFAULT_FLIGHT_API_URL.to_string()),
                api_key: std::env::var("FLIGHT_API_KEY").ok(),
                timeout: Duration::from_secs(env_or("FLIGHT_API_TIMEOUT_SECS", 30)),
            },
            email: EmailConfig {
                api_url: std::env::var("EMAIL_API_URL").ok(),
                api_key: std::env::var("EMAIL_API_KEY").ok(),
                from_address: std::env::var("EMAIL_FROM")
                    .unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
            },
        }
    }
}

fn env_or<T: FromStr + Copy>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .map_or(default, |raw| parse_or(name, &raw, default))
}

fn parse_or<T: FromStr + Copy>(name: &str, raw: &str, default: T) -> T {
    raw.trim().parse().unwrap_or_else(|_| {
        warn!("Ignoring invalid value {raw:?} for {name}, using default");
        default
    })
}
