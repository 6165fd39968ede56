//! In-memory fakes shared by the unit tests

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::config::BatchConfig;
use crate::models::{
    AlertTrigger, FlightOffer, NotificationFrequency, PriceAlert, PriceAlertSettings,
    PriceCheckOutcome, SavedSearch, SearchQuery,
};
use crate::monitor::{AlertGenerator, CooldownGate, PriceMonitor, UserProcessor};
use crate::notifier::NotificationDispatcher;
use crate::preferences::UserPreferences;
use crate::searches::saved_search_key;
use crate::traits::{
    AlertRepository, Clock, EmailMessage, EmailTransport, ErrorTracker, FlightPriceProvider,
    KeyValueStore, MetricsSink, PRICE_ALERTS, PreferencesService, SavedSearchService,
    UserDirectory,
};

pub fn saved_search(user_id: &str, id: &str) -> SavedSearch {
    let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    SavedSearch {
        id: id.to_string(),
        user_id: user_id.to_string(),
        name: format!("{user_id}'s trip"),
        query: SearchQuery {
            origin: "CDG".to_string(),
            destination: "LIS".to_string(),
            departure_date: NaiveDate::from_ymd_opt(2025, 4, 10).unwrap(),
            return_date: None,
            passengers: 1,
            cabin_class: None,
        },
        price_alerts: PriceAlertSettings {
            enabled: true,
            target_price: None,
            check_frequency_hours: None,
        },
        is_active: true,
        expires_at: None,
        lowest_price_seen: None,
        last_checked_at: None,
        created_at: created,
        updated_at: created,
    }
}

pub fn flight_offer(price: f64) -> FlightOffer {
    FlightOffer {
        id: "offer-1".to_string(),
        origin: "CDG".to_string(),
        destination: "LIS".to_string(),
        departure_time: Utc.with_ymd_and_hms(2025, 4, 10, 7, 30, 0).unwrap(),
        return_time: None,
        airline: "TAP Air Portugal".to_string(),
        price,
        currency: "EUR".to_string(),
        booking_url: None,
    }
}

pub fn price_alert(
    user_id: &str,
    search_id: &str,
    previous: f64,
    current: f64,
    now: DateTime<Utc>,
) -> PriceAlert {
    let change = current - previous;
    PriceAlert {
        id: format!("alert-{search_id}"),
        user_id: user_id.to_string(),
        saved_search_id: search_id.to_string(),
        trigger: AlertTrigger::PriceDrop,
        offer: flight_offer(current),
        previous_price: previous,
        current_price: current,
        price_change: change,
        percent_change: (change / previous * 100.0 * 100.0).round() / 100.0,
        alerted_at: now,
        is_read: false,
        expires_at: now + chrono::Duration::days(7),
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.split_first(), text.split_first()) {
        (None, None) => true,
        (Some((b'*', rest)), _) => {
            glob_match(rest, text) || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some((b'?', rest)), Some((_, text_rest))) => glob_match(rest, text_rest),
        // `[...]` set; a `]` right after the opening bracket is a member
        (Some((b'[', rest)), Some((t, text_rest))) => {
            let Some(close) = rest.iter().skip(1).position(|&c| c == b']') else {
                return false;
            };
            let (set, after) = rest.split_at(close + 1);
            set.contains(t) && glob_match(&after[1..], text_rest)
        }
        (Some((p, rest)), Some((t, text_rest))) if p == t => glob_match(rest, text_rest),
        _ => false,
    }
}

/// Key-value store that records TTLs instead of expiring entries
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, (String, Option<u64>)>>,
    fail_keys: AtomicBool,
}

impl InMemoryStore {
    pub fn insert(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), None));
    }

    pub fn ttl_of(&self, key: &str) -> Option<Option<u64>> {
        self.entries.lock().unwrap().get(key).map(|(_, ttl)| *ttl)
    }

    pub fn fail_keys(&self) {
        self.fail_keys.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        if self.fail_keys.load(Ordering::SeqCst) {
            bail!("store connection lost");
        }
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .unwrap()
            .keys()
            .filter(|key| glob_match(pattern.as_bytes(), key.as_bytes()))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(key)
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), ttl_seconds));
        Ok(())
    }
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Provider answering with a fixed price per destination
pub struct StaticProvider {
    prices: HashMap<String, f64>,
}

impl StaticProvider {
    pub fn new(prices: &[(&str, f64)]) -> Self {
        Self {
            prices: prices
                .iter()
                .map(|(destination, price)| ((*destination).to_string(), *price))
                .collect(),
        }
    }
}

#[async_trait]
impl FlightPriceProvider for StaticProvider {
    async fn lowest_offer(&self, query: &SearchQuery) -> Result<Option<FlightOffer>> {
        Ok(self
            .prices
            .get(&query.destination)
            .map(|price| flight_offer(*price)))
    }
}

#[derive(Default)]
struct SearchState {
    searches: BTreeMap<String, Vec<SavedSearch>>,
    alerts: HashMap<String, PriceAlert>,
    failing_checks: HashSet<String>,
    failing_fetches: HashSet<String>,
    saved_alerts: Vec<PriceAlert>,
    check_delay: Duration,
}

/// Saved-search service with call and concurrency instrumentation
#[derive(Default)]
pub struct FakeSearchService {
    store: Arc<InMemoryStore>,
    state: Mutex<SearchState>,
    fail_next: AtomicU32,
    fetch_calls: AtomicUsize,
    check_calls: AtomicUsize,
    active_checks: AtomicUsize,
    max_active_checks: AtomicUsize,
}

impl FakeSearchService {
    /// Searches added are also registered in `store` so users can be enumerated
    pub fn with_store(store: Arc<InMemoryStore>) -> Self {
        Self {
            store,
            ..Default::default()
        }
    }

    pub fn add_search(&self, search: SavedSearch) {
        self.store.insert(
            &saved_search_key(&search.user_id, &search.id),
            &serde_json::to_string(&search).unwrap(),
        );
        self.state
            .lock()
            .unwrap()
            .searches
            .entry(search.user_id.clone())
            .or_default()
            .push(search);
    }

    pub fn set_alert(&self, alert: PriceAlert) {
        self.state
            .lock()
            .unwrap()
            .alerts
            .insert(alert.saved_search_id.clone(), alert);
    }

    pub fn fail_checks_for(&self, search_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_checks
            .insert(search_id.to_string());
    }

    pub fn fail_fetch_for(&self, user_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_fetches
            .insert(user_id.to_string());
    }

    pub fn fail_next_checks(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn set_check_delay(&self, delay: Duration) {
        self.state.lock().unwrap().check_delay = delay;
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_checks(&self) -> usize {
        self.max_active_checks.load(Ordering::SeqCst)
    }

    pub fn saved_alerts(&self) -> Vec<PriceAlert> {
        self.state.lock().unwrap().saved_alerts.clone()
    }

    fn outcomes(&self, searches: &[SavedSearch]) -> Result<Vec<PriceCheckOutcome>> {
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            bail!("provider timeout");
        }

        let state = self.state.lock().unwrap();
        searches
            .iter()
            .map(|search| {
                if state.failing_checks.contains(&search.id) {
                    bail!("provider rejected search {}", search.id);
                }
                let alert = state.alerts.get(&search.id).cloned();
                Ok(PriceCheckOutcome {
                    saved_search_id: search.id.clone(),
                    current_lowest_price: Some(alert.as_ref().map_or(480.0, |a| a.current_price)),
                    previous_best_price: alert.as_ref().map(|a| a.previous_price),
                    alert,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SavedSearchService for FakeSearchService {
    async fn get_saved_searches(&self, user_id: &str) -> Result<Vec<SavedSearch>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.failing_fetches.contains(user_id) {
            bail!("saved-search service unreachable");
        }
        Ok(state.searches.get(user_id).cloned().unwrap_or_default())
    }

    async fn check_saved_search_prices(
        &self,
        _user_id: &str,
        searches: &[SavedSearch],
    ) -> Result<Vec<PriceCheckOutcome>> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active_checks.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_checks.fetch_max(active, Ordering::SeqCst);

        let delay = self.state.lock().unwrap().check_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = self.outcomes(searches);
        self.active_checks.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl AlertRepository for FakeSearchService {
    async fn save_alert(&self, alert: &PriceAlert) -> Result<()> {
        self.state.lock().unwrap().saved_alerts.push(alert.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePreferences {
    users: Mutex<HashMap<String, UserPreferences>>,
}

impl FakePreferences {
    fn update(&self, user_id: &str, apply: impl FnOnce(&mut UserPreferences)) {
        apply(self.users.lock().unwrap().entry(user_id.to_string()).or_default());
    }

    pub fn set_frequency(&self, user_id: &str, frequency: NotificationFrequency) {
        self.update(user_id, |prefs| prefs.frequency = Some(frequency));
    }

    pub fn set_email(&self, user_id: &str, email: &str) {
        self.update(user_id, |prefs| prefs.email = Some(email.to_string()));
    }

    pub fn disable_price_alerts(&self, user_id: &str) {
        self.update(user_id, |prefs| {
            prefs.notifications.insert(PRICE_ALERTS.to_string(), false);
        });
    }

    fn get(&self, user_id: &str) -> UserPreferences {
        self.users
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PreferencesService for FakePreferences {
    async fn is_notification_enabled(&self, user_id: &str, kind: &str) -> Result<bool> {
        Ok(self.get(user_id).notifications.get(kind).copied().unwrap_or(true))
    }

    async fn get_notification_frequency(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationFrequency>> {
        Ok(self.get(user_id).frequency)
    }
}

#[async_trait]
impl UserDirectory for FakePreferences {
    async fn get_user_email(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.get(user_id).email)
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    emails: HashMap<String, String>,
}

impl FakeDirectory {
    pub fn with_email(user_id: &str, email: &str) -> Self {
        Self {
            emails: HashMap::from([(user_id.to_string(), email.to_string())]),
        }
    }
}

#[async_trait]
impl UserDirectory for FakeDirectory {
    async fn get_user_email(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.emails.get(user_id).cloned())
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<EmailMessage>>,
    fail: bool,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailTransport for RecordingTransport {
    async fn send_email(&self, message: &EmailMessage) -> Result<()> {
        if self.fail {
            bail!("SMTP relay refused connection");
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingMetrics {
    counters: Mutex<HashMap<String, u64>>,
    histograms: Mutex<HashMap<String, Vec<f64>>>,
}

impl RecordingMetrics {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn histogram(&self, name: &str) -> Vec<f64> {
        self.histograms
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

impl MetricsSink for RecordingMetrics {
    fn increment_counter(&self, name: &str, _tags: &[(&str, &str)]) {
        *self
            .counters
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default() += 1;
    }

    fn record_histogram(&self, name: &str, value: f64) {
        self.histograms
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push(value);
    }
}

#[derive(Default)]
pub struct RecordingErrorTracker {
    captured: Mutex<Vec<String>>,
}

impl RecordingErrorTracker {
    pub fn captured(&self) -> Vec<String> {
        self.captured.lock().unwrap().clone()
    }
}

impl ErrorTracker for RecordingErrorTracker {
    fn capture_error(&self, error: &(dyn std::error::Error + Send + Sync)) {
        self.captured.lock().unwrap().push(error.to_string());
    }
}

/// Every collaborator of the monitor, faked and wired together
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub searches: Arc<FakeSearchService>,
    pub preferences: Arc<FakePreferences>,
    pub transport: Arc<RecordingTransport>,
    pub metrics: Arc<RecordingMetrics>,
    pub tracker: Arc<RecordingErrorTracker>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::default());
        Self {
            searches: Arc::new(FakeSearchService::with_store(store.clone())),
            store,
            clock: Arc::new(ManualClock::default()),
            preferences: Arc::new(FakePreferences::default()),
            transport: Arc::new(RecordingTransport::default()),
            metrics: Arc::new(RecordingMetrics::default()),
            tracker: Arc::new(RecordingErrorTracker::default()),
        }
    }

    fn build_processor(&self, default_cooldown_hours: u32) -> UserProcessor {
        let dispatcher = NotificationDispatcher::new(
            self.transport.clone(),
            self.preferences.clone(),
            self.metrics.clone(),
        );
        UserProcessor::new(
            self.searches.clone(),
            self.preferences.clone(),
            CooldownGate::new(self.store.clone(), self.clock.clone(), default_cooldown_hours),
            AlertGenerator::new(self.searches.clone(), Some(dispatcher)),
            self.clock.clone(),
        )
    }

    pub fn processor(&self) -> UserProcessor {
        self.build_processor(24)
    }

    pub fn monitor(&self, config: BatchConfig) -> PriceMonitor {
        let processor = self.build_processor(config.alert_cooldown_hours);
        PriceMonitor::new(
            config,
            self.store.clone(),
            processor,
            self.metrics.clone(),
            self.tracker.clone(),
        )
    }
}
