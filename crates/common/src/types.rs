//! Core data types for the Trishul pipeline
//!
//! Work items are cheap descriptors: they are cloned on fan-out and never
//! tracked after a consumer accepts them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Pipeline stage roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageRole {
    Seed,
    Discovery,
    Bruteforce,
    Audit,
    Auth,
    Grep,
}

impl StageRole {
    pub const ALL: [StageRole; 6] = [
        StageRole::Seed,
        StageRole::Discovery,
        StageRole::Bruteforce,
        StageRole::Audit,
        StageRole::Auth,
        StageRole::Grep,
    ];

    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            StageRole::Seed => "seed",
            StageRole::Discovery => "discovery",
            StageRole::Bruteforce => "bruteforce",
            StageRole::Audit => "audit",
            StageRole::Auth => "auth",
            StageRole::Grep => "grep",
        }
    }
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP methods a work item can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
}

impl HttpMethod {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discovered request descriptor: the unit of work routed between stages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuzzableRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Routed work items are fuzzable requests.
pub type WorkItem = FuzzableRequest;

impl FuzzableRequest {
    #[inline]
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn post(url: Url, body: String) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            headers: Vec::new(),
            body: Some(body),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Query parameters in order of appearance.
    pub fn query_params(&self) -> Vec<(String, String)> {
        self.url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// Checks the request can be sent by the transport.
    ///
    /// Only absolute http(s) URLs with a host are routable; a GET or HEAD
    /// must not carry a body.
    pub fn check_well_formed(&self) -> Result<(), String> {
        match self.url.scheme() {
            "http" | "https" => {}
            other => return Err(format!("unsupported scheme '{}' in {}", other, self.url)),
        }
        if self.url.cannot_be_a_base() || self.url.host_str().map_or(true, str::is_empty) {
            return Err(format!("{} has no host", self.url));
        }
        if self.body.is_some() && matches!(self.method, HttpMethod::Get | HttpMethod::Head) {
            return Err(format!("{} {} carries a body", self.method, self.url));
        }
        Ok(())
    }
}

impl fmt::Display for FuzzableRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Response returned by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    pub url: Url,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// Wall time spent on the exchange (Duration::ZERO for cache hits).
    pub elapsed: Duration,
}

impl HttpResponse {
    #[inline]
    #[must_use]
    pub fn new(url: Url, status: u16) -> Self {
        Self {
            url,
            status,
            reason: String::new(),
            headers: Vec::new(),
            body: String::new(),
            elapsed: Duration::ZERO,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[inline]
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.header("content-type")
            .map_or(true, |ct| ct.starts_with("text/") || ct.contains("html") || ct.contains("json"))
    }
}

/// Finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        f.write_str(s)
    }
}

/// A vulnerability or information record published by a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub plugin: String,
    pub severity: Severity,
    pub title: String,
    pub url: Url,
    pub description: String,
}

impl Finding {
    #[must_use]
    pub fn new(plugin: impl Into<String>, severity: Severity, title: impl Into<String>, url: Url) -> Self {
        Self {
            plugin: plugin.into(),
            severity,
            title: title.into(),
            url,
            description: String::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}
