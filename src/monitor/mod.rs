//! Batch orchestration of price checks across all users

pub mod alerts;
pub mod cooldown;
pub mod processor;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::config::BatchConfig;
use crate::error::MonitorError;
use crate::models::ProcessingResult;
use crate::searches::{SAVED_SEARCH_PREFIX, user_id_from_key};
use crate::traits::{ErrorTracker, KeyValueStore, MetricsSink};

pub use alerts::AlertGenerator;
pub use cooldown::CooldownGate;
pub use processor::UserProcessor;

/// Clears the running flag on every exit path of a batch
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PriceMonitor {
    config: BatchConfig,
    store: Arc<dyn KeyValueStore>,
    processor: Arc<UserProcessor>,
    metrics: Arc<dyn MetricsSink>,
    errors: Arc<dyn ErrorTracker>,
    running: AtomicBool,
}

impl PriceMonitor {
    pub fn new(
        config: BatchConfig,
        store: Arc<dyn KeyValueStore>,
        processor: UserProcessor,
        metrics: Arc<dyn MetricsSink>,
        errors: Arc<dyn ErrorTracker>,
    ) -> Self {
        let processor = processor.with_retry(config.retry_attempts, config.retry_delay);

        Self {
            config,
            store,
            processor: Arc::new(processor),
            metrics,
            errors,
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Whether a batch is executing right now
    pub fn is_processing(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one sweep over every user with saved searches.
    ///
    /// Fails fast with [`MonitorError::Conflict`] if a sweep is already in
    /// flight. Individual user failures are reported in the result's
    /// `errors`; only failing to enumerate users fails the whole run.
    pub async fn run_batch(&self) -> Result<ProcessingResult, MonitorError> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            warn!("Price-monitoring batch already running, rejecting new run");
            let err = MonitorError::Conflict;
            self.report_failure(&err);
            return Err(err);
        };

        self.metrics.increment_counter("batch.started", &[]);
        let started = Instant::now();
        info!("Starting price-monitoring batch");

        match self.sweep().await {
            Ok(mut result) => {
                result.duration = started.elapsed();

                self.metrics.increment_counter("batch.completed", &[]);
                self.metrics
                    .record_histogram("batch.duration_ms", result.duration.as_secs_f64() * 1000.0);
                self.metrics
                    .record_histogram("batch.processed", result.processed_count as f64);
                self.metrics
                    .record_histogram("batch.alerts", result.alerts_generated as f64);

                info!(
                    "Batch finished in {:.2?}: {} searches checked, {} alerts, {} errors",
                    result.duration,
                    result.processed_count,
                    result.alerts_generated,
                    result.errors.len()
                );
                Ok(result)
            }
            Err(e) => {
                let err = MonitorError::Service(e);
                error!("Price-monitoring batch failed: {}", err);
                self.report_failure(&err);
                Err(err)
            }
        }
    }

    fn report_failure(&self, err: &MonitorError) {
        let reason = match err {
            MonitorError::Conflict => "conflict",
            MonitorError::Service(_) => "service",
        };
        self.metrics
            .increment_counter("batch.failed", &[("reason", reason)]);
        self.errors.capture_error(err);
    }

    async fn sweep(&self) -> Result<ProcessingResult> {
        let users = self.active_user_ids().await?;
        info!("Found {} users with saved searches", users.len());

        let mut result = ProcessingResult::default();

        for chunk in users.chunks(self.config.batch_size.max(1)) {
            for group in chunk.chunks(self.config.max_concurrent.max(1)) {
                self.process_group(group, &mut result).await;
            }
        }

        Ok(result)
    }

    /// Process `group` concurrently and fold each user in once all have settled
    async fn process_group(&self, group: &[String], result: &mut ProcessingResult) {
        let mut handles = Vec::with_capacity(group.len());

        for user_id in group {
            let processor = Arc::clone(&self.processor);
            let task_user = user_id.clone();
            let handle = tokio::spawn(async move { processor.process_user(&task_user).await });
            handles.push((user_id, handle));
        }

        for (user_id, handle) in handles {
            match handle.await {
                Ok(outcome) => {
                    if let Err(e) = &outcome {
                        warn!("User {} failed: {:#}", user_id, e);
                    }
                    result.absorb(user_id, outcome);
                }
                Err(e) => {
                    error!("Task panic for user {}: {}", user_id, e);
                    result.absorb(user_id, Err(anyhow::anyhow!("task failed: {e}")));
                }
            }
        }
    }

    async fn active_user_ids(&self) -> Result<Vec<String>> {
        let keys = self
            .store
            .keys(&format!("{SAVED_SEARCH_PREFIX}*"))
            .await
            .context("Failed to enumerate users with saved searches")?;

        let users: BTreeSet<String> = keys
            .iter()
            .filter_map(|key| user_id_from_key(key))
            .map(str::to_string)
            .collect();

        Ok(users.into_iter().collect())
    }
}
