//! reflected_input: query parameters echoed back without encoding

use anyhow::Result;
use async_trait::async_trait;
use tracing::trace;
use url::Url;
use uuid::Uuid;

use trishul_common::{AuditPlugin, Finding, FuzzableRequest, Plugin, PluginContext, Severity};

pub const NAME: &str = "reflected_input";

#[derive(Debug, Default)]
pub struct ReflectedInput;

impl ReflectedInput {
    pub fn new() -> Self {
        Self
    }
}

/// Marker with markup characters: finding it verbatim means no encoding.
fn probe_token() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("<trishul{}>", &id[..8])
}

/// Copy of `url` with the `index`-th query parameter set to `value`.
fn with_param(url: &Url, index: usize, value: &str) -> Url {
    let pairs: Vec<(String, String)> = url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
    let mut out = url.clone();
    {
        let mut query = out.query_pairs_mut();
        query.clear();
        for (i, (name, original)) in pairs.iter().enumerate() {
            query.append_pair(name, if i == index { value } else { original.as_str() });
        }
    }
    out
}

#[async_trait]
impl Plugin for ReflectedInput {
    fn name(&self) -> &str {
        NAME
    }
}

#[async_trait]
impl AuditPlugin for ReflectedInput {
    async fn audit(&self, request: &FuzzableRequest, ctx: &PluginContext) -> Result<()> {
        for (index, (param, _)) in request.query_params().iter().enumerate() {
            let token = probe_token();
            let probe = FuzzableRequest {
                url: with_param(&request.url, index, &token),
                ..request.clone()
            };
            trace!("Probing {} with {}", param, probe.url);
            let response = ctx.transport.send(&probe, false).await?;
            if response.body.contains(&token) {
                ctx.kb.add_finding(
                    Finding::new(NAME, Severity::Medium, "Reflected input", request.url.clone())
                        .with_description(format!("Parameter '{}' is echoed back without encoding", param)),
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, request, FakeSite};
    use trishul_common::HttpResponse;

    #[test]
    fn only_the_chosen_parameter_changes() {
        let url = Url::parse("http://target.test/search?q=shoes&page=2").unwrap();
        let mutated = with_param(&url, 1, "X");
        assert_eq!(mutated.query(), Some("q=shoes&page=X"));
    }

    #[tokio::test]
    async fn echoed_parameter_is_reported() {
        // echoes `q` verbatim, html-escapes `page`
        let site = FakeSite::new(|req| {
            let mut body = String::new();
            for (name, value) in req.url.query_pairs() {
                match name.as_ref() {
                    "q" => body.push_str(&value),
                    _ => body.push_str(&value.replace('<', "&lt;").replace('>', "&gt;")),
                }
            }
            HttpResponse::new(req.url.clone(), 200).with_body(body)
        });
        let ctx = context(site.clone());

        ReflectedInput::new()
            .audit(&request("http://target.test/search?q=shoes&page=2"), &ctx)
            .await
            .unwrap();

        let findings = ctx.kb.findings();
        assert_eq!(findings.len(), 1);
        assert!(findings[0].description.contains("'q'"));
        assert_eq!(site.sent().len(), 2);
    }

    #[tokio::test]
    async fn requests_without_parameters_are_skipped() {
        let site = FakeSite::new(|req| HttpResponse::new(req.url.clone(), 200));
        ReflectedInput::new()
            .audit(&request("http://target.test/"), &context(site.clone()))
            .await
            .unwrap();
        assert!(site.sent().is_empty());
    }
}
