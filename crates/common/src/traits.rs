//! Core traits for Trishul pipeline components
//!
//! The transport, the 404 detector and the plugins are collaborators of the
//! orchestrator: it only sees them through these traits.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

use crate::kb::KnowledgeBase;
use crate::types::{FuzzableRequest, HttpResponse};

/// Receives every response the transport produces (the grep sink).
#[async_trait]
pub trait ResponseObserver: Send + Sync {
    async fn observe(&self, request: &FuzzableRequest, response: &HttpResponse);
}

/// HTTP transport used by stages and plugins.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request; `cached` allows serving a previous GET response.
    async fn send(&self, request: &FuzzableRequest, cached: bool) -> Result<HttpResponse>;

    /// Plain GET, the operation the bootstrap step relies on.
    async fn get(&self, url: &Url, cached: bool) -> Result<HttpResponse> {
        self.send(&FuzzableRequest::get(url.clone()), cached).await
    }

    /// Install (or clear) the observer fed with every response.
    fn set_observer(&self, observer: Option<Arc<dyn ResponseObserver>>);

    /// Header added to every outgoing request, replacing a previous value.
    fn set_default_header(&self, name: &str, value: &str);

    fn default_header(&self, name: &str) -> Option<String>;
}

/// Classifies "not found" responses.
#[async_trait]
pub trait NotFoundDetector: Send + Sync {
    /// Learn what a missing page looks like on the response's site.
    async fn prime(&self, transport: &dyn Transport, response: &HttpResponse) -> Result<()>;

    fn is_404(&self, response: &HttpResponse) -> bool;
}

/// Everything a plugin may touch while running.
#[derive(Clone)]
pub struct PluginContext {
    pub transport: Arc<dyn Transport>,
    pub kb: KnowledgeBase,
    pub not_found: Arc<dyn NotFoundDetector>,
}

impl PluginContext {
    pub fn new(
        transport: Arc<dyn Transport>,
        kb: KnowledgeBase,
        not_found: Arc<dyn NotFoundDetector>,
    ) -> Self {
        Self {
            transport,
            kb,
            not_found,
        }
    }
}

/// Behaviour shared by every plugin kind.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Called once when the owning stage shuts down in order.
    async fn end(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }
}

/// Crawl and infrastructure plugins: find new requests from a known one.
#[async_trait]
pub trait DiscoveryPlugin: Plugin {
    async fn discover(&self, request: &FuzzableRequest, ctx: &PluginContext) -> Result<Vec<FuzzableRequest>>;
}

/// Audit plugins publish findings to the knowledge base.
#[async_trait]
pub trait AuditPlugin: Plugin {
    async fn audit(&self, request: &FuzzableRequest, ctx: &PluginContext) -> Result<()>;
}

/// Credential bruteforcers; successful logins yield new requests.
#[async_trait]
pub trait BruteforcePlugin: Plugin {
    async fn bruteforce(&self, request: &FuzzableRequest, ctx: &PluginContext) -> Result<Vec<FuzzableRequest>>;
}

/// Session keepers.
#[async_trait]
pub trait AuthPlugin: Plugin {
    async fn is_logged(&self, ctx: &PluginContext) -> Result<bool>;

    async fn login(&self, ctx: &PluginContext) -> Result<()>;
}

/// Passive response inspectors.
#[async_trait]
pub trait GrepPlugin: Plugin {
    async fn grep(&self, request: &FuzzableRequest, response: &HttpResponse, ctx: &PluginContext) -> Result<()>;
}

/// Configured plugin instances per role; an empty list disables the stage.
#[derive(Clone, Default)]
pub struct PluginSet {
    pub crawl: Vec<Arc<dyn DiscoveryPlugin>>,
    pub infrastructure: Vec<Arc<dyn DiscoveryPlugin>>,
    pub audit: Vec<Arc<dyn AuditPlugin>>,
    pub bruteforce: Vec<Arc<dyn BruteforcePlugin>>,
    pub auth: Vec<Arc<dyn AuthPlugin>>,
    pub grep: Vec<Arc<dyn GrepPlugin>>,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Crawl plugins followed by infrastructure plugins.
    pub fn discovery(&self) -> Vec<Arc<dyn DiscoveryPlugin>> {
        self.crawl.iter().chain(self.infrastructure.iter()).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.crawl.is_empty()
            && self.infrastructure.is_empty()
            && self.audit.is_empty()
            && self.bruteforce.is_empty()
            && self.auth.is_empty()
            && self.grep.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        names.extend(self.crawl.iter().map(|p| p.name().to_string()));
        names.extend(self.infrastructure.iter().map(|p| p.name().to_string()));
        names.extend(self.audit.iter().map(|p| p.name().to_string()));
        names.extend(self.bruteforce.iter().map(|p| p.name().to_string()));
        names.extend(self.auth.iter().map(|p| p.name().to_string()));
        names.extend(self.grep.iter().map(|p| p.name().to_string()));
        names
    }
}

impl std::fmt::Debug for PluginSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSet").field("plugins", &self.names()).finish()
    }
}
