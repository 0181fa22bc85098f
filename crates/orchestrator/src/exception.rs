//! Exception sink: the single place stage failures become control decisions

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::worker::FailureReport;
use trishul_common::{StageRole, TrishulResult};

/// Receives every failure report surfaced by a stage.
///
/// Returning `Err` means the scan must stop; the router lets that error
/// propagate untouched.
pub trait ExceptionSink: Send + Sync {
    fn handle(&self, report: FailureReport) -> TrishulResult<()>;

    /// Recoverable failures recorded so far.
    fn recorded(&self) -> Vec<RecordedFailure> {
        Vec::new()
    }
}

/// A recoverable failure kept for the final report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFailure {
    pub stage: StageRole,
    pub plugin: Option<String>,
    pub message: String,
}

impl From<&FailureReport> for RecordedFailure {
    fn from(report: &FailureReport) -> Self {
        Self {
            stage: report.stage,
            plugin: report.plugin.clone(),
            message: format!("{:#}", report.error),
        }
    }
}

/// Default sink: logs and records recoverable reports, aborts on fatal ones.
#[derive(Debug, Default)]
pub struct ExceptionHandler {
    recorded: Mutex<Vec<RecordedFailure>>,
}

impl ExceptionHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExceptionSink for ExceptionHandler {
    fn handle(&self, report: FailureReport) -> TrishulResult<()> {
        if report.is_fatal() {
            error!("Fatal failure in {}", report);
            return Err(report.into_error());
        }
        warn!("Recoverable failure in {}", report);
        self.recorded.lock().push(RecordedFailure::from(&report));
        Ok(())
    }

    fn recorded(&self) -> Vec<RecordedFailure> {
        self.recorded.lock().clone()
    }
}
