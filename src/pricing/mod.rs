//! Flight price lookups and the alert threshold decision

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::FlightApiConfig;
use crate::models::{AlertTrigger, FlightOffer, PriceAlert, SavedSearch, SearchQuery};
use crate::traits::FlightPriceProvider;

/// Minimum drop against the best price seen, in percent, that counts as an alert
pub const MIN_DROP_PERCENT: f64 = 5.0;

/// How long a generated alert stays relevant
pub const ALERT_TTL_DAYS: i64 = 7;

/// HTTP client for the flight offers API
#[derive(Clone)]
pub struct HttpFlightProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OffersResponse {
    #[serde(default)]
    offers: Vec<FlightOffer>,
}

impl HttpFlightProvider {
    pub fn new(config: &FlightApiConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("flight-price-monitor/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn build_offers_url(&self, query: &SearchQuery) -> String {
        let mut url = format!(
            "{}/offers?origin={}&destination={}&departureDate={}&adults={}",
            self.base_url,
            urlencoding::encode(&query.origin),
            urlencoding::encode(&query.destination),
            query.departure_date,
            query.passengers,
        );

        if let Some(return_date) = query.return_date {
            url.push_str(&format!("&returnDate={return_date}"));
        }
        if let Some(cabin) = &query.cabin_class {
            url.push_str(&format!("&cabin={}", urlencoding::encode(cabin)));
        }

        url
    }
}

#[async_trait]
impl FlightPriceProvider for HttpFlightProvider {
    async fn lowest_offer(&self, query: &SearchQuery) -> Result<Option<FlightOffer>> {
        let url = self.build_offers_url(query);
        debug!("Fetching offers for {} -> {}", query.origin, query.destination);

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Failed to fetch offers for {} -> {}: {}",
                query.origin,
                query.destination,
                response.status()
            ));
        }

        let body: OffersResponse = response.json().await?;
        let cheapest = body
            .offers
            .into_iter()
            .filter(|offer| offer.price.is_finite())
            .min_by(|a, b| a.price.total_cmp(&b.price));

        if let Some(offer) = &cheapest {
            info!(
                "Cheapest {} -> {}: {} {} ({})",
                query.origin, query.destination, offer.price, offer.currency, offer.airline
            );
        }

        Ok(cheapest)
    }
}

/// Decide whether `offer` is worth alerting about for `search`.
///
/// A reached target price wins over a plain drop. Neither fires unless the
/// offer beats the best price recorded so far, so a steady price never
/// alerts twice.
pub fn evaluate_price_change(
    search: &SavedSearch,
    previous_best: Option<f64>,
    offer: &FlightOffer,
    now: DateTime<Utc>,
) -> Option<PriceAlert> {
    let current = offer.price;
    let improved = previous_best.is_none_or(|previous| current < previous);

    let trigger = match (search.price_alerts.target_price, previous_best) {
        (Some(target), _) if current <= target && improved => AlertTrigger::TargetPriceReached,
        (_, Some(previous))
            if previous > 0.0 && drop_percent(previous, current) >= MIN_DROP_PERCENT =>
        {
            AlertTrigger::PriceDrop
        }
        _ => return None,
    };

    let previous = previous_best.unwrap_or(current);
    let change = current - previous;
    let percent_change = if previous > 0.0 {
        change / previous * 100.0
    } else {
        0.0
    };

    Some(PriceAlert {
        id: format!("{:x}", md5::compute(format!("{}:{}", search.id, now.to_rfc3339()))),
        user_id: search.user_id.clone(),
        saved_search_id: search.id.clone(),
        trigger,
        offer: offer.clone(),
        previous_price: previous,
        current_price: current,
        price_change: round_cents(change),
        percent_change: round_cents(percent_change),
        alerted_at: now,
        is_read: false,
        expires_at: now + Duration::days(ALERT_TTL_DAYS),
    })
}

fn drop_percent(previous: f64, current: f64) -> f64 {
    (previous - current) / previous * 100.0
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
