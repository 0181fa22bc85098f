//! basic_auth: guesses credentials for HTTP Basic protected resources

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, info};

use crate::options::PluginOptions;
use trishul_common::{BruteforcePlugin, Finding, FuzzableRequest, Plugin, PluginContext, Severity};

pub const NAME: &str = "basic_auth";

const DEFAULT_USERS: [&str; 3] = ["admin", "root", "test"];
const DEFAULT_PASSWORDS: [&str; 5] = ["admin", "password", "123456", "root", "test"];

pub struct BasicAuth {
    users: Vec<String>,
    passwords: Vec<String>,
}

impl BasicAuth {
    pub fn new() -> Self {
        Self {
            users: DEFAULT_USERS.iter().map(|s| s.to_string()).collect(),
            passwords: DEFAULT_PASSWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Options: `users` and `passwords`, comma separated.
    pub fn from_options(options: &PluginOptions) -> Result<Self> {
        let defaults = Self::new();
        Ok(Self {
            users: options.list("users").unwrap_or(defaults.users),
            passwords: options.list("passwords").unwrap_or(defaults.passwords),
        })
    }
}

impl Default for BasicAuth {
    fn default() -> Self {
        Self::new()
    }
}

fn authorization(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
}

#[async_trait]
impl Plugin for BasicAuth {
    fn name(&self) -> &str {
        NAME
    }
}

#[async_trait]
impl BruteforcePlugin for BasicAuth {
    async fn bruteforce(&self, request: &FuzzableRequest, ctx: &PluginContext) -> Result<Vec<FuzzableRequest>> {
        let response = ctx.transport.send(request, true).await?;
        let basic_challenge = response
            .header("www-authenticate")
            .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("basic"));
        if response.status != 401 || !basic_challenge {
            return Ok(Vec::new());
        }

        let mut unauthenticated = request.clone();
        unauthenticated.headers.retain(|(n, _)| !n.eq_ignore_ascii_case("authorization"));
        debug!("Bruteforcing HTTP Basic credentials for {}", request.url);

        for user in &self.users {
            for password in &self.passwords {
                let attempt = unauthenticated.clone().with_header("Authorization", authorization(user, password));
                let response = ctx.transport.send(&attempt, false).await?;
                if response.status != 401 {
                    info!("Found credentials {}:{} for {}", user, password, request.url);
                    ctx.kb.add_finding(
                        Finding::new(NAME, Severity::High, "Guessable HTTP Basic credentials", request.url.clone())
                            .with_description(format!("Valid credentials {}:{}", user, password)),
                    );
                    return Ok(vec![attempt]);
                }
            }
        }
        Ok(Vec::new())
    }
}
