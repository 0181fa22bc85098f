//! Worker contract shared by every pipeline stage

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use trishul_common::{is_fatal_error, StageRole, TrishulError, TrishulResult, WorkItem};

/// One envelope read from a stage's result channel.
#[derive(Debug)]
pub enum StageResult {
    Item(WorkItem),
    /// The stage will never produce further output.
    EndOfWork,
    Failure(FailureReport),
}

/// Outcome of [`Worker::fetch_result`].
#[derive(Debug)]
pub enum Fetch {
    Ready(StageResult),
    /// Nothing arrived within the timeout while the stage still had work.
    TimedOut,
    /// Nothing buffered; ask [`Worker::has_pending_work`] whether the stage is drained.
    Empty,
}

/// A failure raised inside a stage, carried on its result channel.
pub struct FailureReport {
    pub stage: StageRole,
    pub plugin: Option<String>,
    pub error: anyhow::Error,
    pub fatal: bool,
}

impl FailureReport {
    /// Fatal when the error chain holds a must-stop error.
    pub fn new(stage: StageRole, plugin: Option<&str>, error: anyhow::Error) -> Self {
        let fatal = is_fatal_error(&error);
        Self {
            stage,
            plugin: plugin.map(str::to_string),
            error,
            fatal,
        }
    }

    pub fn recoverable(stage: StageRole, plugin: Option<&str>, error: anyhow::Error) -> Self {
        Self {
            stage,
            plugin: plugin.map(str::to_string),
            error,
            fatal: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Recover the error to surface to the caller, keeping its original kind
    /// when it is a `TrishulError`.
    pub fn into_error(self) -> TrishulError {
        let stage = self.stage;
        match self.error.downcast::<TrishulError>() {
            Ok(err) => err,
            Err(other) => TrishulError::must_stop(format!("{} stage failed: {:#}", stage, other), other),
        }
    }
}

impl fmt::Debug for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureReport")
            .field("stage", &self.stage)
            .field("plugin", &self.plugin)
            .field("error", &format_args!("{:#}", self.error))
            .field("fatal", &self.fatal)
            .finish()
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.plugin {
            Some(plugin) => write!(f, "{}/{}: {:#}", self.stage, plugin, self.error),
            None => write!(f, "{}: {:#}", self.stage, self.error),
        }
    }
}

/// Uniform interface of a pipeline stage.
///
/// Every method except `join` is called from the single control context;
/// `fetch_result` is the only call that waits, and it is always bounded.
#[async_trait]
pub trait Worker: Send + Sync {
    fn role(&self) -> StageRole;

    /// Spawn the stage's task. Starting twice is an error.
    fn start(&mut self) -> TrishulResult<()>;

    /// Enqueue routed work. Blocks only while the bounded input queue is
    /// full; fails with `QueueClosed` after `terminate` or `join`.
    async fn submit(&self, _item: WorkItem) -> TrishulResult<()> {
        Err(TrishulError::NotRoutable(self.role()))
    }

    /// Next buffered result, waiting at most `timeout` when work is pending.
    async fn fetch_result(&mut self, timeout: Duration) -> Fetch;

    /// Queued, in-progress or emitted-but-unfetched work exists.
    fn has_pending_work(&self) -> bool;

    /// Discard queued input and ask the stage to stop. Idempotent.
    fn terminate(&self);

    /// Let the stage drain its queue and wait for its task to exit.
    async fn join(&mut self) -> TrishulResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_follows_error_kind() {
        let fatal = FailureReport::new(StageRole::Grep, Some("error_pages"), TrishulError::MustStopByUserRequest.into());
        assert!(fatal.is_fatal());

        let soft = FailureReport::new(StageRole::Audit, None, anyhow::anyhow!("connection reset"));
        assert!(!soft.is_fatal());
        assert_eq!(soft.to_string(), "audit: connection reset");
    }

    #[test]
    fn into_error_keeps_original_kind() {
        let report = FailureReport::new(StageRole::Grep, None, TrishulError::MustStopByUserRequest.into());
        assert!(matches!(report.into_error(), TrishulError::MustStopByUserRequest));

        let report = FailureReport::new(StageRole::Auth, Some("cookie_session"), anyhow::anyhow!("login form changed"));
        let err = report.into_error();
        assert!(err.to_string().contains("login form changed"));
    }
}
