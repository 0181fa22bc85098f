//! Knowledge base: the results registry shared by every stage.
//!
//! Cloning is cheap; all clones see the same data.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::types::{Finding, FuzzableRequest};

#[derive(Debug, Default)]
struct KbInner {
    known_requests: HashSet<FuzzableRequest>,
    findings: Vec<Finding>,
    info: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    inner: Arc<RwLock<KbInner>>,
}

/// Point-in-time copy of the knowledge base, used for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct KbSnapshot {
    pub known_requests: usize,
    pub findings: Vec<Finding>,
    pub info: BTreeMap<String, Vec<String>>,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fuzzable request; returns false when it was already known.
    pub fn add_fuzzable_request(&self, request: &FuzzableRequest) -> bool {
        let mut inner = self.inner.write();
        if inner.known_requests.contains(request) {
            return false;
        }
        inner.known_requests.insert(request.clone());
        true
    }

    pub fn is_known(&self, request: &FuzzableRequest) -> bool {
        self.inner.read().known_requests.contains(request)
    }

    pub fn known_request_count(&self) -> usize {
        self.inner.read().known_requests.len()
    }

    pub fn add_finding(&self, finding: Finding) {
        self.inner.write().findings.push(finding);
    }

    pub fn findings(&self) -> Vec<Finding> {
        self.inner.read().findings.clone()
    }

    /// Append a free-form value under `key`, skipping duplicates.
    pub fn add_info(&self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        let mut inner = self.inner.write();
        let values = inner.info.entry(key.into()).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
    }

    pub fn info(&self, key: &str) -> Vec<String> {
        self.inner.read().info.get(key).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> KbSnapshot {
        let inner = self.inner.read();
        KbSnapshot {
            known_requests: inner.known_requests.len(),
            findings: inner.findings.clone(),
            info: inner.info.clone(),
        }
    }
}
