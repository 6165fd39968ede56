//! Saved searches, their price re-evaluation and generated alerts, kept in the shared store

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::models::{PriceAlert, PriceCheckOutcome, SavedSearch};
use crate::pricing::evaluate_price_change;
use crate::traits::{
    AlertRepository, Clock, FlightPriceProvider, KeyValueStore, SavedSearchService,
};

/// Namespace of saved-search keys: `saved-search:<userId>:<searchId>`
pub const SAVED_SEARCH_PREFIX: &str = "saved-search:";
const PRICE_ALERT_PREFIX: &str = "price-alert:";

pub fn saved_search_key(user_id: &str, search_id: &str) -> String {
    format!("{SAVED_SEARCH_PREFIX}{user_id}:{search_id}")
}

/// Quote glob metacharacters so `text` only matches itself
pub fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '*' | '?' | '[' => {
                escaped.push('[');
                escaped.push(c);
                escaped.push(']');
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Owner id encoded in a saved-search key
pub fn user_id_from_key(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(SAVED_SEARCH_PREFIX)?;
    let (user_id, _) = rest.split_once(':')?;
    (!user_id.is_empty()).then_some(user_id)
}

pub struct SearchRepository {
    store: Arc<dyn KeyValueStore>,
    provider: Arc<dyn FlightPriceProvider>,
    clock: Arc<dyn Clock>,
}

impl SearchRepository {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        provider: Arc<dyn FlightPriceProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            provider,
            clock,
        }
    }

    pub async fn save_search(&self, search: &SavedSearch) -> Result<()> {
        let json = serde_json::to_string(search)?;
        self.store
            .set(&saved_search_key(&search.user_id, &search.id), &json, None)
            .await
    }

    async fn check_one(&self, search: &SavedSearch) -> Result<PriceCheckOutcome> {
        let offer = self
            .provider
            .lowest_offer(&search.query)
            .await
            .with_context(|| format!("price lookup for search {}", search.id))?;

        let now = self.clock.now();
        let previous_best = search.lowest_price_seen;

        let Some(offer) = offer else {
            debug!("No offers for search {}", search.id);
            return Ok(PriceCheckOutcome {
                saved_search_id: search.id.clone(),
                current_lowest_price: None,
                previous_best_price: previous_best,
                alert: None,
            });
        };

        let alert = evaluate_price_change(search, previous_best, &offer, now);

        let mut updated = search.clone();
        updated.lowest_price_seen = Some(previous_best.map_or(offer.price, |p| p.min(offer.price)));
        updated.last_checked_at = Some(now);
        updated.updated_at = now;
        self.save_search(&updated).await?;

        Ok(PriceCheckOutcome {
            saved_search_id: search.id.clone(),
            current_lowest_price: Some(offer.price),
            previous_best_price: previous_best,
            alert,
        })
    }
}

#[async_trait]
impl SavedSearchService for SearchRepository {
    async fn get_saved_searches(&self, user_id: &str) -> Result<Vec<SavedSearch>> {
        let pattern = format!("{SAVED_SEARCH_PREFIX}{}:*", escape_glob(user_id));
        let keys = self.store.keys(&pattern).await?;

        let mut searches = Vec::with_capacity(keys.len());
        for key in keys {
            // Entry may have expired between listing and reading
            let Some(json) = self.store.get(&key).await? else {
                continue;
            };
            let search: SavedSearch =
                serde_json::from_str(&json).with_context(|| format!("corrupt entry {key}"))?;
            if search.user_id != user_id {
                warn!("Skipping {key}: owned by {}", search.user_id);
                continue;
            }
            searches.push(search);
        }

        Ok(searches)
    }

    async fn check_saved_search_prices(
        &self,
        user_id: &str,
        searches: &[SavedSearch],
    ) -> Result<Vec<PriceCheckOutcome>> {
        let mut outcomes = Vec::with_capacity(searches.len());
        for search in searches.iter().filter(|s| s.user_id == user_id) {
            outcomes.push(self.check_one(search).await?);
        }
        Ok(outcomes)
    }
}

#[async_trait]
impl AlertRepository for SearchRepository {
    async fn save_alert(&self, alert: &PriceAlert) -> Result<()> {
        let ttl = (alert.expires_at - self.clock.now()).num_seconds().max(0);
        let key = format!("{PRICE_ALERT_PREFIX}{}:{}", alert.user_id, alert.id);
        let json = serde_json::to_string(alert)?;

        self.store
            .set(&key, &json, Some(u64::try_from(ttl).unwrap_or(0)))
            .await?;

        info!(
            "Stored {} alert {} for search {}",
            alert.trigger, alert.id, alert.saved_search_id
        );
        Ok(())
    }
}
