//! Name -> plugin registry

use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::basic_auth::{self, BasicAuth};
use crate::cookie_session::{self, CookieSession};
use crate::error_pages::{self, ErrorPages};
use crate::options::{PluginOptions, PluginSelection};
use crate::reflected_input::{self, ReflectedInput};
use crate::server_header::{self, ServerHeader};
use crate::web_spider::{self, WebSpider};
use trishul_common::{
    AuditPlugin, AuthPlugin, BruteforcePlugin, DiscoveryPlugin, GrepPlugin, PluginSet,
};

/// Which plugin list a plugin belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Crawl,
    Infrastructure,
    Audit,
    Bruteforce,
    Auth,
    Grep,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Crawl => "crawl",
            PluginKind::Infrastructure => "infrastructure",
            PluginKind::Audit => "audit",
            PluginKind::Bruteforce => "bruteforce",
            PluginKind::Auth => "auth",
            PluginKind::Grep => "grep",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: &'static str,
    pub kind: PluginKind,
    pub description: &'static str,
}

/// Every built-in plugin.
pub fn available_plugins() -> Vec<PluginInfo> {
    vec![
        PluginInfo {
            name: web_spider::NAME,
            kind: PluginKind::Crawl,
            description: "Follows same-origin links, sources and form actions",
        },
        PluginInfo {
            name: server_header::NAME,
            kind: PluginKind::Infrastructure,
            description: "Records Server and X-Powered-By headers of each site",
        },
        PluginInfo {
            name: reflected_input::NAME,
            kind: PluginKind::Audit,
            description: "Finds query parameters echoed back without encoding",
        },
        PluginInfo {
            name: basic_auth::NAME,
            kind: PluginKind::Bruteforce,
            description: "Guesses HTTP Basic credentials from a word list",
        },
        PluginInfo {
            name: cookie_session::NAME,
            kind: PluginKind::Auth,
            description: "Logs in through a form and keeps the session cookie",
        },
        PluginInfo {
            name: error_pages::NAME,
            kind: PluginKind::Grep,
            description: "Flags database errors and stack traces in responses",
        },
    ]
}

fn unknown(kind: PluginKind, name: &str) -> anyhow::Error {
    let known: Vec<&str> = available_plugins()
        .into_iter()
        .filter(|p| p.kind == kind)
        .map(|p| p.name)
        .collect();
    anyhow::anyhow!("unknown {} plugin '{}' (available: {})", kind, name, known.join(", "))
}

/// Names in order, duplicates dropped.
fn unique<'a>(kind: PluginKind, names: &'a [String]) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| {
            let fresh = seen.insert(*n);
            if !fresh {
                warn!("{} plugin {} selected twice", kind, n);
            }
            fresh
        })
        .collect()
}

fn discovery_plugin(kind: PluginKind, name: &str, options: &PluginOptions) -> Result<Arc<dyn DiscoveryPlugin>> {
    let plugin: Arc<dyn DiscoveryPlugin> = match (kind, name) {
        (PluginKind::Crawl, web_spider::NAME) => Arc::new(WebSpider::from_options(options)?),
        (PluginKind::Infrastructure, server_header::NAME) => Arc::new(ServerHeader::new()),
        _ => return Err(unknown(kind, name)),
    };
    Ok(plugin)
}

/// Instantiate the selected plugins. Unknown names and bad options are
/// errors.
pub fn build_plugins(selection: &PluginSelection) -> Result<PluginSet> {
    let mut set = PluginSet::new();

    for name in unique(PluginKind::Crawl, &selection.crawl) {
        set.crawl.push(discovery_plugin(PluginKind::Crawl, name, &selection.options_for(name))?);
    }
    for name in unique(PluginKind::Infrastructure, &selection.infrastructure) {
        set.infrastructure.push(discovery_plugin(PluginKind::Infrastructure, name, &selection.options_for(name))?);
    }
    for name in unique(PluginKind::Audit, &selection.audit) {
        let plugin: Arc<dyn AuditPlugin> = match name {
            reflected_input::NAME => Arc::new(ReflectedInput::new()),
            _ => return Err(unknown(PluginKind::Audit, name)),
        };
        set.audit.push(plugin);
    }
    for name in unique(PluginKind::Bruteforce, &selection.bruteforce) {
        let plugin: Arc<dyn BruteforcePlugin> = match name {
            basic_auth::NAME => Arc::new(BasicAuth::from_options(&selection.options_for(name))?),
            _ => return Err(unknown(PluginKind::Bruteforce, name)),
        };
        set.bruteforce.push(plugin);
    }
    for name in unique(PluginKind::Auth, &selection.auth) {
        let plugin: Arc<dyn AuthPlugin> = match name {
            cookie_session::NAME => Arc::new(CookieSession::from_options(&selection.options_for(name))?),
            _ => return Err(unknown(PluginKind::Auth, name)),
        };
        set.auth.push(plugin);
    }
    for name in unique(PluginKind::Grep, &selection.grep) {
        let plugin: Arc<dyn GrepPlugin> = match name {
            error_pages::NAME => Arc::new(ErrorPages::new()),
            _ => return Err(unknown(PluginKind::Grep, name)),
        };
        set.grep.push(plugin);
    }

    let built = set.names();
    let unused: Vec<&String> = selection.options.keys().filter(|n| !built.contains(n)).collect();
    if !unused.is_empty() {
        bail!("options given for plugins that are not selected: {:?}", unused);
    }
    debug!("Built plugins {:?}", built);
    Ok(set)
}
