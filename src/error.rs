/// Top-level failures of a batch run.
///
/// Per-user and per-search failures never surface here; they are folded into
/// [`crate::models::ProcessingResult::errors`] instead.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Conflict: a price-monitoring batch is already running")]
    Conflict,

    #[error("Service error: {0:#}")]
    Service(anyhow::Error),
}
