//! One user's unit of work within a batch

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_retry::Retry;
use tracing::{debug, info, warn};

use crate::models::{NotificationFrequency, PriceCheckOutcome, SavedSearch, UserOutcome};
use crate::monitor::alerts::AlertGenerator;
use crate::monitor::cooldown::CooldownGate;
use crate::traits::{Clock, PRICE_ALERTS, PreferencesService, SavedSearchService};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Retry delays: `delay`, then doubling, `attempts` times
fn backoff(delay: Duration, attempts: u32) -> impl Iterator<Item = Duration> {
    (0..attempts).map(move |n| {
        delay
            .saturating_mul(2u32.saturating_pow(n))
            .min(MAX_RETRY_DELAY)
    })
}

pub struct UserProcessor {
    searches: Arc<dyn SavedSearchService>,
    preferences: Arc<dyn PreferencesService>,
    gate: CooldownGate,
    alerts: AlertGenerator,
    clock: Arc<dyn Clock>,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl UserProcessor {
    pub fn new(
        searches: Arc<dyn SavedSearchService>,
        preferences: Arc<dyn PreferencesService>,
        gate: CooldownGate,
        alerts: AlertGenerator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            searches,
            preferences,
            gate,
            alerts,
            clock,
            retry_attempts: 0,
            retry_delay: Duration::ZERO,
        }
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    /// Check every eligible search of `user_id`.
    ///
    /// Only failing to read the user's preferences or searches is an error;
    /// a failing search is logged and left out of the counts.
    pub async fn process_user(&self, user_id: &str) -> Result<UserOutcome> {
        let enabled = self
            .preferences
            .is_notification_enabled(user_id, PRICE_ALERTS)
            .await
            .context("failed to read notification preferences")?;
        if !enabled {
            debug!("User {user_id} has price alerts disabled");
            return Ok(UserOutcome::default());
        }

        let searches = self
            .searches
            .get_saved_searches(user_id)
            .await
            .context("failed to fetch saved searches")?;

        let now = self.clock.now();
        let active: Vec<SavedSearch> = searches
            .into_iter()
            .filter(|search| search.is_monitorable(now))
            .collect();

        if active.is_empty() {
            debug!("User {user_id} has no active searches");
            return Ok(UserOutcome::default());
        }

        let frequency = match self.preferences.get_notification_frequency(user_id).await {
            Ok(frequency) => frequency,
            Err(e) => {
                warn!("Frequency lookup failed for {user_id}, using search defaults: {e:#}");
                None
            }
        };

        let mut outcome = UserOutcome::default();
        for search in &active {
            match self.process_search(user_id, search, frequency).await {
                Ok(None) => {}
                Ok(Some(alerted)) => {
                    outcome.processed_count += 1;
                    if alerted {
                        outcome.alerts_generated += 1;
                    }
                }
                Err(e) => warn!("Search {} of user {} failed: {:#}", search.id, user_id, e),
            }
        }

        info!(
            "User {}: {} of {} searches checked, {} alerts",
            user_id,
            outcome.processed_count,
            active.len(),
            outcome.alerts_generated
        );

        Ok(outcome)
    }

    /// `None` when the search is still cooling down, otherwise whether it alerted
    async fn process_search(
        &self,
        user_id: &str,
        search: &SavedSearch,
        frequency: Option<NotificationFrequency>,
    ) -> Result<Option<bool>> {
        if !self.gate.try_acquire(search, frequency).await? {
            return Ok(None);
        }

        let outcome = self.check_price(user_id, search).await?;
        let alert = self.alerts.generate(user_id, outcome).await?;

        Ok(Some(alert.is_some()))
    }

    async fn check_price(&self, user_id: &str, search: &SavedSearch) -> Result<PriceCheckOutcome> {
        let searches = std::slice::from_ref(search);
        let mut attempt = 0u32;

        let outcomes = Retry::start(backoff(self.retry_delay, self.retry_attempts), || {
            attempt += 1;
            if attempt > 1 {
                debug!("Retrying price check for {} (attempt {})", search.id, attempt);
            }
            self.searches.check_saved_search_prices(user_id, searches)
        })
        .await
        .context("price check failed")?;

        outcomes
            .into_iter()
            .find(|outcome| outcome.saved_search_id == search.id)
            .context("price check returned no result for the search")
    }
}
