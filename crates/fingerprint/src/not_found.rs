//! "Not found" page detection
//!
//! Many sites answer unknown paths with `200 OK` and a custom error page.
//! Priming requests a random path on each site once and remembers what that
//! page looks like; later responses are compared against it word by word.

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use trishul_common::{HttpResponse, NotFoundDetector, Transport};

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]{2,}").unwrap());

const DEFAULT_SIMILARITY: f64 = 0.8;

#[derive(Debug, Clone)]
struct Signature {
    status: u16,
    words: HashSet<String>,
}

/// Per-site 404 fingerprints.
pub struct NotFoundFingerprint {
    signatures: RwLock<HashMap<String, Vec<Signature>>>,
    similarity: f64,
}

impl NotFoundFingerprint {
    pub fn new() -> Self {
        Self {
            signatures: RwLock::new(HashMap::new()),
            similarity: DEFAULT_SIMILARITY,
        }
    }

    /// Minimum word-set similarity for a response to match a stored 404 page.
    pub fn with_similarity(mut self, similarity: f64) -> Self {
        self.similarity = similarity.clamp(0.0, 1.0);
        self
    }

    pub fn is_primed(&self, url: &Url) -> bool {
        self.signatures.read().contains_key(&site_key(url))
    }

    fn learn(&self, site: &str, response: &HttpResponse, token: &str) {
        let body = response.body.replace(token, "");
        let signature = Signature {
            status: response.status,
            words: words(&body),
        };
        self.signatures.write().entry(site.to_string()).or_default().push(signature);
    }
}

impl Default for NotFoundFingerprint {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotFoundDetector for NotFoundFingerprint {
    async fn prime(&self, transport: &dyn Transport, response: &HttpResponse) -> Result<()> {
        let site = site_key(&response.url);
        if self.signatures.read().contains_key(&site) {
            return Ok(());
        }

        let token = Uuid::new_v4().simple().to_string();
        let probes = [format!("/{}", token), format!("{}.html", token)];
        for probe in probes {
            let probe_url = response
                .url
                .join(&probe)
                .with_context(|| format!("Failed to build 404 probe for {}", response.url))?;
            let probe_response = transport
                .get(&probe_url, false)
                .await
                .with_context(|| format!("404 probe {} failed", probe_url))?;
            debug!("404 probe {} answered {}", probe_url, probe_response.status);
            self.learn(&site, &probe_response, &token);
        }
        Ok(())
    }

    fn is_404(&self, response: &HttpResponse) -> bool {
        if matches!(response.status, 404 | 410) {
            return true;
        }

        let signatures = self.signatures.read();
        let Some(site) = signatures.get(&site_key(&response.url)) else {
            return false;
        };
        let candidate = words(&response.body);
        site.iter()
            .filter(|sig| sig.status == response.status)
            .any(|sig| similarity(&sig.words, &candidate) >= self.similarity)
    }
}

fn site_key(url: &Url) -> String {
    url.origin().ascii_serialization()
}

fn words(body: &str) -> HashSet<String> {
    WORD_RE
        .find_iter(body)
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect()
}

/// Jaccard similarity; two empty bodies are identical.
fn similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
