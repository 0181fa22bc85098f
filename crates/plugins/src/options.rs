//! Plugin selection and per-plugin options

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// String options for one plugin, as written in a scan profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginOptions(BTreeMap<String, String>);

impl PluginOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn require(&self, plugin: &str, key: &str) -> Result<&str> {
        self.get(key)
            .with_context(|| format!("plugin {} requires option '{}'", plugin, key))
    }

    /// Comma separated list; blank entries are dropped.
    pub fn list(&self, key: &str) -> Option<Vec<String>> {
        self.get(key).map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }

    pub fn parse<T>(&self, plugin: &str, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>()
                    .with_context(|| format!("invalid value '{}' for {}.{}", raw, plugin, key))
            })
            .transpose()
    }

    fn merge(&mut self, other: PluginOptions) {
        self.0.extend(other.0);
    }
}

/// Plugin names per role plus their options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSelection {
    pub crawl: Vec<String>,
    pub infrastructure: Vec<String>,
    pub audit: Vec<String>,
    pub bruteforce: Vec<String>,
    pub auth: Vec<String>,
    pub grep: Vec<String>,
    pub options: BTreeMap<String, PluginOptions>,
}

impl PluginSelection {
    pub fn is_empty(&self) -> bool {
        self.crawl.is_empty()
            && self.infrastructure.is_empty()
            && self.audit.is_empty()
            && self.bruteforce.is_empty()
            && self.auth.is_empty()
            && self.grep.is_empty()
    }

    pub fn options_for(&self, plugin: &str) -> PluginOptions {
        self.options.get(plugin).cloned().unwrap_or_default()
    }

    /// Layer `overrides` on top: a non-empty role list replaces ours, and
    /// options are merged key by key.
    pub fn overridden_by(mut self, overrides: PluginSelection) -> Self {
        fn replace(base: &mut Vec<String>, other: Vec<String>) {
            if !other.is_empty() {
                *base = other;
            }
        }
        replace(&mut self.crawl, overrides.crawl);
        replace(&mut self.infrastructure, overrides.infrastructure);
        replace(&mut self.audit, overrides.audit);
        replace(&mut self.bruteforce, overrides.bruteforce);
        replace(&mut self.auth, overrides.auth);
        replace(&mut self.grep, overrides.grep);
        for (plugin, options) in overrides.options {
            self.options.entry(plugin).or_default().merge(options);
        }
        self
    }
}
