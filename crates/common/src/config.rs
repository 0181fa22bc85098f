//! Scan configuration
//!
//! Built once by the caller and shared read-only (`Arc<ScanConfig>`) with the
//! lifecycle manager and every stage.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::error::{TrishulError, TrishulResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub targets: Vec<Url>,
    /// Timeout used by the router for each `fetch_result` poll.
    pub poll_timeout: Duration,
    /// Capacity of every stage input queue.
    pub queue_capacity: usize,
    /// How often the auth stage re-checks its sessions.
    pub auth_interval: Duration,
    /// Discovery declares end of work once this much time has elapsed.
    pub max_discovery_time: Option<Duration>,
    pub request_timeout: Duration,
    pub retries: u32,
    pub user_agent: String,
    /// Serve repeated cacheable GETs from the transport cache.
    pub http_cache: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            poll_timeout: Duration::from_millis(200),
            queue_capacity: 128,
            auth_interval: Duration::from_secs(5),
            max_discovery_time: None,
            request_timeout: Duration::from_secs(10),
            retries: 1,
            user_agent: format!("trishul/{}", crate::VERSION),
            http_cache: true,
        }
    }
}

impl ScanConfig {
    #[inline]
    #[must_use]
    pub fn new(targets: Vec<Url>) -> Self {
        Self {
            targets,
            ..Default::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_auth_interval(mut self, interval: Duration) -> Self {
        self.auth_interval = interval;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_discovery_time(mut self, limit: Option<Duration>) -> Self {
        self.max_discovery_time = limit;
        self
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> TrishulResult<()> {
        if self.queue_capacity == 0 {
            return Err(TrishulError::Config("queue capacity must be at least 1".into()));
        }
        if self.poll_timeout.is_zero() {
            return Err(TrishulError::Config("poll timeout must be non-zero".into()));
        }
        if self.auth_interval.is_zero() {
            return Err(TrishulError::Config("auth interval must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ScanConfig::default();
        assert_eq!(cfg.poll_timeout, Duration::from_millis(200));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_capacity_rejected() {
        let cfg = ScanConfig::default().with_queue_capacity(0);
        assert!(matches!(cfg.validate(), Err(TrishulError::Config(_))));
    }
}
