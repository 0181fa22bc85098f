//! Target Resolver - target URL parsing and normalisation
//!
//! Takes a comma-separated target string and expands it into a
//! deduplicated list of absolute URLs. Supported token forms:
//! - full URL: "http://example.com/app/"
//! - bare host, optionally with port and path: "example.com:8080/app"

use anyhow::{Context, Result};
use url::Url;

pub struct TargetResolver;

impl TargetResolver {
    pub fn new() -> Self { Self }

    /// Resolve a comma-separated target string into unique target URLs,
    /// preserving the order in which they were given.
    pub fn resolve_targets(targets: &str) -> Result<Vec<Url>> {
        if targets.trim().is_empty() {
            anyhow::bail!("No targets specified");
        }

        let mut urls: Vec<Url> = Vec::new();
        for token in targets.split(',') {
            let t = token.trim();
            if t.is_empty() { continue; }

            let url = parse_target(t)?;
            if !urls.contains(&url) { urls.push(url); }
        }

        if urls.is_empty() {
            anyhow::bail!("No valid targets found in input");
        }
        Ok(urls)
    }
}

impl Default for TargetResolver {
    fn default() -> Self { Self::new() }
}

/// Parse one target token, defaulting the scheme to http.
fn parse_target(token: &str) -> Result<Url> {
    let candidate = if token.contains("://") {
        token.to_string()
    } else {
        format!("http://{}", token)
    };

    let mut url = Url::parse(&candidate).with_context(|| format!("Invalid target: {}", token))?;
    match url.scheme() {
        "http" | "https" => {}
        other => anyhow::bail!("Invalid target {}: unsupported scheme '{}'", token, other),
    }
    if url.host_str().map_or(true, str::is_empty) {
        anyhow::bail!("Invalid target {}: missing host", token);
    }

    // fragments never reach the server
    url.set_fragment(None);
    Ok(url)
}
