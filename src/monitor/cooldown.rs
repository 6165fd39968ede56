//! Per-search cooldown between price checks

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::models::{NotificationFrequency, SavedSearch};
use crate::traits::{Clock, KeyValueStore};

const COOLDOWN_PREFIX: &str = "last-price-check:";

/// Records are kept at least this long so a weekly cadence can be enforced
const MIN_RECORD_TTL_HOURS: i64 = 168;

pub fn cooldown_key(search_id: &str) -> String {
    format!("{COOLDOWN_PREFIX}{search_id}")
}

/// Interval a search must wait between checks; `None` means never check.
///
/// The user's frequency wins; the search's own setting and then
/// `default_hours` only apply when the user has none.
pub fn resolve_interval(
    frequency: Option<NotificationFrequency>,
    search: &SavedSearch,
    default_hours: u32,
) -> Option<Duration> {
    match frequency {
        Some(frequency) => frequency.cooldown_hours().map(Duration::hours),
        None => {
            let hours = search
                .price_alerts
                .check_frequency_hours
                .unwrap_or(default_hours);
            Some(Duration::hours(i64::from(hours)))
        }
    }
}

pub struct CooldownGate {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    default_hours: u32,
}

impl CooldownGate {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, default_hours: u32) -> Self {
        Self {
            store,
            clock,
            default_hours,
        }
    }

    /// Whether `search` may be checked now. Does not write anything.
    pub async fn is_eligible(
        &self,
        search: &SavedSearch,
        frequency: Option<NotificationFrequency>,
    ) -> Result<bool> {
        let Some(interval) = resolve_interval(frequency, search, self.default_hours) else {
            debug!("Search {} belongs to a user who opted out of checks", search.id);
            return Ok(false);
        };

        let elapsed = self.interval_elapsed(&search.id, interval).await?;
        if !elapsed {
            debug!("Search {} is cooling down", search.id);
        }
        Ok(elapsed)
    }

    /// Check eligibility and, if eligible, stamp the cooldown record before
    /// returning so the window is consumed even if the price check fails.
    pub async fn try_acquire(
        &self,
        search: &SavedSearch,
        frequency: Option<NotificationFrequency>,
    ) -> Result<bool> {
        if !self.is_eligible(search, frequency).await? {
            return Ok(false);
        }

        // eligible implies the interval resolved
        if let Some(interval) = resolve_interval(frequency, search, self.default_hours) {
            self.commit(&search.id, interval).await?;
        }
        Ok(true)
    }

    async fn interval_elapsed(&self, search_id: &str, interval: Duration) -> Result<bool> {
        Ok(match self.last_check(search_id).await? {
            Some(last_check) => self.clock.now() - last_check >= interval,
            None => true,
        })
    }

    async fn commit(&self, search_id: &str, interval: Duration) -> Result<()> {
        let ttl = interval.max(Duration::hours(MIN_RECORD_TTL_HOURS));
        let ttl = u64::try_from(ttl.num_seconds()).unwrap_or(0);

        self.store
            .set(
                &cooldown_key(search_id),
                &self.clock.now().to_rfc3339(),
                Some(ttl),
            )
            .await
    }

    async fn last_check(&self, search_id: &str) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.store.get(&cooldown_key(search_id)).await? else {
            return Ok(None);
        };

        match DateTime::parse_from_rfc3339(&raw) {
            Ok(timestamp) => Ok(Some(timestamp.with_timezone(&Utc))),
            Err(e) => {
                warn!("Ignoring unreadable cooldown record for {search_id}: {e}");
                Ok(None)
            }
        }
    }
}
