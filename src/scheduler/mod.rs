//! Recurring trigger for price-monitoring batches

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::error::MonitorError;
use crate::models::ProcessingResult;
use crate::monitor::PriceMonitor;

/// Snapshot returned by [`Scheduler::get_status`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    /// A recurring trigger is registered
    pub is_running: bool,
    /// A batch is executing right now
    pub is_processing: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub config: BatchConfig,
}

struct RegisteredJob {
    scheduler: JobScheduler,
    job_id: Uuid,
}

pub struct Scheduler {
    monitor: Arc<PriceMonitor>,
    job: Mutex<Option<RegisteredJob>>,
}

impl Scheduler {
    pub fn new(monitor: Arc<PriceMonitor>) -> Self {
        Self {
            monitor,
            job: Mutex::new(None),
        }
    }

    /// Register the recurring trigger and fire one catch-up run right away.
    ///
    /// Calling this while already scheduled only logs a warning.
    pub async fn start(&self, cron_expression: &str) -> Result<()> {
        let mut job = self.job.lock().await;
        if job.is_some() {
            warn!("Price monitor scheduler already started, ignoring start request");
            return Ok(());
        }

        let scheduler = JobScheduler::new().await?;

        let job_monitor = Arc::clone(&self.monitor);
        let job_id = scheduler
            .add(
                Job::new_async(cron_expression, move |_uuid, _l| {
                    let monitor = Arc::clone(&job_monitor);
                    Box::pin(async move {
                        run_logged(&monitor, "scheduled").await;
                    })
                })
                .with_context(|| format!("Invalid cron expression {cron_expression:?}"))?,
            )
            .await?;

        scheduler.start().await?;
        *job = Some(RegisteredJob { scheduler, job_id });
        info!("Scheduler started with cron expression {cron_expression}");

        let initial = Arc::clone(&self.monitor);
        tokio::spawn(async move {
            run_logged(&initial, "initial").await;
        });

        Ok(())
    }

    /// Cancel the recurring trigger. A batch already running is not interrupted.
    pub async fn stop(&self) -> Result<()> {
        let Some(RegisteredJob { mut scheduler, .. }) = self.job.lock().await.take() else {
            info!("Scheduler already stopped");
            return Ok(());
        };

        scheduler.shutdown().await?;
        info!("Scheduler stopped");
        Ok(())
    }

    /// Run a batch immediately, outside the cron cadence
    pub async fn process_now(&self) -> Result<ProcessingResult, MonitorError> {
        info!("Manual price-monitoring run requested");
        self.monitor.run_batch().await
    }

    pub async fn get_status(&self) -> SchedulerStatus {
        let mut job = self.job.lock().await;

        let next_run = match job.as_mut() {
            Some(RegisteredJob { scheduler, job_id }) => {
                match scheduler.next_tick_for_job(*job_id).await {
                    Ok(next) => next,
                    Err(e) => {
                        warn!("Could not read next run time: {e:?}");
                        None
                    }
                }
            }
            None => None,
        };

        SchedulerStatus {
            is_running: job.is_some(),
            is_processing: self.monitor.is_processing(),
            next_run,
            config: self.monitor.config().clone(),
        }
    }
}

async fn run_logged(monitor: &PriceMonitor, trigger: &str) {
    match monitor.run_batch().await {
        Ok(result) => info!(
            "{} batch done: {} checked, {} alerts, {} errors",
            trigger,
            result.processed_count,
            result.alerts_generated,
            result.errors.len()
        ),
        Err(MonitorError::Conflict) => {
            warn!("Skipping {trigger} batch: previous run still in progress");
        }
        Err(e) => error!("Error during {} batch: {}", trigger, e),
    }
}
