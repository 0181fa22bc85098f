//! server_header: records what each site says about its software stack

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::debug;

use trishul_common::{DiscoveryPlugin, Finding, FuzzableRequest, Plugin, PluginContext, Severity};

pub const NAME: &str = "server_header";

/// (response header, knowledge base key)
const DISCLOSING_HEADERS: [(&str, &str); 3] = [
    ("server", "server"),
    ("x-powered-by", "powered_by"),
    ("x-aspnet-version", "aspnet_version"),
];

/// Inspects each origin's root page once.
#[derive(Default)]
pub struct ServerHeader {
    origins: Mutex<HashSet<String>>,
}

impl ServerHeader {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Plugin for ServerHeader {
    fn name(&self) -> &str {
        NAME
    }
}

#[async_trait]
impl DiscoveryPlugin for ServerHeader {
    async fn discover(&self, request: &FuzzableRequest, ctx: &PluginContext) -> Result<Vec<FuzzableRequest>> {
        let origin = request.url.origin().ascii_serialization();
        if !self.origins.lock().insert(origin.clone()) {
            return Ok(Vec::new());
        }
        let root = request.url.join("/")?;
        let response = ctx.transport.get(&root, true).await?;
        for (header, key) in DISCLOSING_HEADERS {
            if let Some(value) = response.header(header) {
                debug!("{} discloses {}: {}", origin, header, value);
                ctx.kb.add_info(key, format!("{} {}", origin, value));
                ctx.kb.add_finding(
                    Finding::new(NAME, Severity::Info, format!("{} header disclosure", header), root.clone())
                        .with_description(value),
                );
            }
        }
        Ok(vec![FuzzableRequest::get(root)])
    }
}
