//! web_spider: follows same-origin links found in HTML pages

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;
use url::Url;

use crate::options::PluginOptions;
use trishul_common::{DiscoveryPlugin, FuzzableRequest, Plugin, PluginContext};

pub const NAME: &str = "web_spider";

static LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b(?:href|src|action)\s*=\s*["']([^"'\s]+)["']"#).unwrap());

const DEFAULT_MAX_LINKS: usize = 200;

pub struct WebSpider {
    max_links: usize,
    ignore: Option<Regex>,
}

impl WebSpider {
    pub fn new() -> Self {
        Self {
            max_links: DEFAULT_MAX_LINKS,
            ignore: None,
        }
    }

    /// Options: `max_links` (per page), `ignore_regex` (URLs never followed).
    pub fn from_options(options: &PluginOptions) -> Result<Self> {
        let ignore = options
            .get("ignore_regex")
            .map(|raw| Regex::new(raw).with_context(|| format!("invalid {}.ignore_regex '{}'", NAME, raw)))
            .transpose()?;
        Ok(Self {
            max_links: options.parse(NAME, "max_links")?.unwrap_or(DEFAULT_MAX_LINKS),
            ignore,
        })
    }

    fn extract_links(&self, base: &Url, body: &str) -> Vec<Url> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for caps in LINK_RE.captures_iter(body) {
            let Ok(mut link) = base.join(&caps[1]) else {
                continue;
            };
            link.set_fragment(None);
            if !matches!(link.scheme(), "http" | "https") || link.origin() != base.origin() {
                continue;
            }
            if self.ignore.as_ref().is_some_and(|re| re.is_match(link.as_str())) {
                continue;
            }
            if seen.insert(link.clone()) {
                links.push(link);
            }
            if links.len() >= self.max_links {
                break;
            }
        }
        links
    }
}

impl Default for WebSpider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for WebSpider {
    fn name(&self) -> &str {
        NAME
    }
}

#[async_trait]
impl DiscoveryPlugin for WebSpider {
    async fn discover(&self, request: &FuzzableRequest, ctx: &PluginContext) -> Result<Vec<FuzzableRequest>> {
        let response = ctx.transport.send(request, true).await?;
        if ctx.not_found.is_404(&response) || !response.is_text() {
            return Ok(Vec::new());
        }
        let links = self.extract_links(&request.url, &response.body);
        debug!("{} links on {}", links.len(), request.url);
        Ok(links.into_iter().map(FuzzableRequest::get).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, request, FakeSite};
    use trishul_common::HttpResponse;

    const PAGE: &str = r#"
        <a href="/about">About</a>
        <a href='contact.html#form'>Contact</a>
        <a href="/about">Again</a>
        <img src="http://cdn.example.net/logo.png">
        <a href="mailto:admin@target.test">Mail</a>
        <form action="/logout" method="post"></form>
    "#;

    fn site() -> std::sync::Arc<FakeSite> {
        FakeSite::new(|req| match req.url.path() {
            "/missing" => HttpResponse::new(req.url.clone(), 404).with_body(PAGE),
            _ => HttpResponse::new(req.url.clone(), 200).with_body(PAGE),
        })
    }

    fn paths(found: &[FuzzableRequest]) -> Vec<&str> {
        found.iter().map(|r| r.url.path()).collect()
    }

    #[tokio::test]
    async fn follows_same_origin_links_once() {
        let found = WebSpider::new()
            .discover(&request("http://target.test/docs/index.html"), &context(site()))
            .await
            .unwrap();
        assert_eq!(paths(&found), vec!["/about", "/docs/contact.html", "/logout"]);
        assert!(found.iter().all(|r| r.url.fragment().is_none()));
    }

    #[tokio::test]
    async fn honours_ignore_regex_and_limit() {
        let options = PluginOptions::new().with("ignore_regex", "logout").with("max_links", "1");
        let spider = WebSpider::from_options(&options).unwrap();
        let found = spider.discover(&request("http://target.test/"), &context(site())).await.unwrap();
        assert_eq!(paths(&found), vec!["/about"]);
    }

    #[tokio::test]
    async fn not_found_pages_are_not_crawled() {
        let found = WebSpider::new()
            .discover(&request("http://target.test/missing"), &context(site()))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn bad_ignore_regex_is_rejected() {
        let options = PluginOptions::new().with("ignore_regex", "(");
        assert!(WebSpider::from_options(&options).is_err());
    }
}
