//! TOML scan profiles
//!
//! ```toml
//! targets = ["http://example.com/"]
//!
//! [scan]
//! poll_timeout_ms = 200
//! max_discovery_time_secs = 600
//!
//! [plugins]
//! crawl = ["web_spider"]
//! audit = ["reflected_input"]
//!
//! [plugins.options.web_spider]
//! max_links = "50"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use trishul_common::ScanConfig;
use trishul_plugins::PluginSelection;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanProfile {
    pub targets: Vec<String>,
    pub scan: ScanSettings,
    pub plugins: PluginSelection,
}

impl ScanProfile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid profile {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

/// Scan settings; unset values keep the `ScanConfig` defaults.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanSettings {
    pub poll_timeout_ms: Option<u64>,
    pub queue_capacity: Option<usize>,
    pub auth_interval_secs: Option<u64>,
    pub max_discovery_time_secs: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub user_agent: Option<String>,
    pub http_cache: Option<bool>,
}

impl ScanSettings {
    /// Values set in `overrides` win.
    pub fn overridden_by(self, overrides: ScanSettings) -> Self {
        Self {
            poll_timeout_ms: overrides.poll_timeout_ms.or(self.poll_timeout_ms),
            queue_capacity: overrides.queue_capacity.or(self.queue_capacity),
            auth_interval_secs: overrides.auth_interval_secs.or(self.auth_interval_secs),
            max_discovery_time_secs: overrides.max_discovery_time_secs.or(self.max_discovery_time_secs),
            request_timeout_ms: overrides.request_timeout_ms.or(self.request_timeout_ms),
            retries: overrides.retries.or(self.retries),
            user_agent: overrides.user_agent.or(self.user_agent),
            http_cache: overrides.http_cache.or(self.http_cache),
        }
    }

    pub fn apply(&self, mut config: ScanConfig) -> ScanConfig {
        if let Some(ms) = self.poll_timeout_ms {
            config.poll_timeout = Duration::from_millis(ms);
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(secs) = self.auth_interval_secs {
            config.auth_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.max_discovery_time_secs {
            config.max_discovery_time = Some(Duration::from_secs(secs));
        }
        if let Some(ms) = self.request_timeout_ms {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(user_agent) = &self.user_agent {
            config.user_agent = user_agent.clone();
        }
        if let Some(enabled) = self.http_cache {
            config.http_cache = enabled;
        }
        config
    }
}
