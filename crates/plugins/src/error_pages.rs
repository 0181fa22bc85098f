//! error_pages: database errors and stack traces leaking into responses

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

use trishul_common::{Finding, FuzzableRequest, GrepPlugin, HttpResponse, Plugin, PluginContext, Severity};

pub const NAME: &str = "error_pages";

struct ErrorPattern {
    regex: Regex,
    title: &'static str,
    severity: Severity,
}

static ERROR_PATTERNS: Lazy<Vec<ErrorPattern>> = Lazy::new(|| {
    [
        (r"(?i)you have an error in your sql syntax", "MySQL error message", Severity::Medium),
        (r"(?i)unclosed quotation mark after the character string", "SQL Server error message", Severity::Medium),
        (r"(?i)microsoft ole db provider for", "OLE DB error message", Severity::Medium),
        (r"(?i)pg_query\(\)|org\.postgresql\.util\.PSQLException", "PostgreSQL error message", Severity::Medium),
        (r"Traceback \(most recent call last\)", "Python stack trace", Severity::Low),
        (r"(?m)^\s*at [\w$.]+\(\w+\.java:\d+\)", "Java stack trace", Severity::Low),
        (r"(?i)<b>(?:warning|fatal error)</b>:.+ on line <b>\d+</b>", "PHP error message", Severity::Low),
    ]
    .into_iter()
    .map(|(pattern, title, severity)| ErrorPattern {
        regex: Regex::new(pattern).unwrap(),
        title,
        severity,
    })
    .collect()
});

/// Reports each kind of error once per page (query string ignored).
#[derive(Default)]
pub struct ErrorPages {
    reported: Mutex<HashSet<(String, &'static str)>>,
}

impl ErrorPages {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Plugin for ErrorPages {
    fn name(&self) -> &str {
        NAME
    }

    async fn end(&self, _ctx: &PluginContext) -> Result<()> {
        debug!("{} reported {} error page(s)", NAME, self.reported.lock().len());
        Ok(())
    }
}

#[async_trait]
impl GrepPlugin for ErrorPages {
    async fn grep(&self, request: &FuzzableRequest, response: &HttpResponse, ctx: &PluginContext) -> Result<()> {
        if !response.is_text() {
            return Ok(());
        }
        let mut page = request.url.clone();
        page.set_query(None);
        page.set_fragment(None);

        for pattern in ERROR_PATTERNS.iter() {
            if !pattern.regex.is_match(&response.body) {
                continue;
            }
            if self.reported.lock().insert((page.to_string(), pattern.title)) {
                ctx.kb.add_finding(
                    Finding::new(NAME, pattern.severity, pattern.title, request.url.clone())
                        .with_description(format!("HTTP {} response contains a {}", response.status, pattern.title)),
                );
            }
        }
        Ok(())
    }
}
