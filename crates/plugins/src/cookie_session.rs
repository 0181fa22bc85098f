//! cookie_session: form login whose session cookie is attached to every request

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use crate::options::PluginOptions;
use trishul_common::{AuthPlugin, FuzzableRequest, Plugin, PluginContext};

pub const NAME: &str = "cookie_session";

#[derive(Debug, Clone)]
pub struct CookieSession {
    login_url: Url,
    check_url: Url,
    username: String,
    password: String,
    username_field: String,
    password_field: String,
    /// Lowercased text present on `check_url` only while logged in.
    logged_in_marker: String,
}

impl CookieSession {
    /// Required options: `login_url`, `username`, `password`. Optional:
    /// `check_url` (defaults to `login_url`), `username_field`,
    /// `password_field`, `logged_in_marker` (defaults to "logout").
    pub fn from_options(options: &PluginOptions) -> Result<Self> {
        let login_url = parse_url(options.require(NAME, "login_url")?)?;
        let check_url = match options.get("check_url") {
            Some(raw) => parse_url(raw)?,
            None => login_url.clone(),
        };
        Ok(Self {
            login_url,
            check_url,
            username: options.require(NAME, "username")?.to_string(),
            password: options.require(NAME, "password")?.to_string(),
            username_field: options.get("username_field").unwrap_or("username").to_string(),
            password_field: options.get("password_field").unwrap_or("password").to_string(),
            logged_in_marker: options.get("logged_in_marker").unwrap_or("logout").to_lowercase(),
        })
    }

    fn login_request(&self) -> FuzzableRequest {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair(&self.username_field, &self.username)
            .append_pair(&self.password_field, &self.password)
            .finish();
        FuzzableRequest::post(self.login_url.clone(), body)
            .with_header("Content-Type", "application/x-www-form-urlencoded")
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).with_context(|| format!("invalid URL '{}' in {} options", raw, NAME))
}

#[async_trait]
impl Plugin for CookieSession {
    fn name(&self) -> &str {
        NAME
    }
}

#[async_trait]
impl AuthPlugin for CookieSession {
    async fn is_logged(&self, ctx: &PluginContext) -> Result<bool> {
        let response = ctx.transport.get(&self.check_url, false).await?;
        let logged = response.body.to_lowercase().contains(&self.logged_in_marker);
        debug!("Session check on {}: logged={}", self.check_url, logged);
        Ok(logged)
    }

    async fn login(&self, ctx: &PluginContext) -> Result<()> {
        let response = ctx
            .transport
            .send(&self.login_request(), false)
            .await
            .with_context(|| format!("login request to {} failed", self.login_url))?;
        let cookies: Vec<&str> = response
            .headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("set-cookie"))
            .filter_map(|(_, value)| value.split(';').next())
            .map(str::trim)
            .filter(|pair| pair.contains('='))
            .collect();
        if cookies.is_empty() {
            anyhow::bail!("login to {} returned no session cookie (HTTP {})", self.login_url, response.status);
        }
        ctx.transport.set_default_header("Cookie", &cookies.join("; "));
        ctx.kb.add_info("auth", format!("{} logged in as {}", self.login_url, self.username));
        info!("Logged in to {} as {}", self.login_url, self.username);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, FakeSite};
    use trishul_common::{HttpMethod, HttpResponse, Transport};

    fn options() -> PluginOptions {
        PluginOptions::new()
            .with("login_url", "http://target.test/login")
            .with("check_url", "http://target.test/account")
            .with("username", "alice")
            .with("password", "s3cret")
    }

    fn site() -> std::sync::Arc<FakeSite> {
        FakeSite::new(|req| match (req.method, req.url.path()) {
            (HttpMethod::Post, "/login") if req.body.as_deref() == Some("username=alice&password=s3cret") => {
                HttpResponse::new(req.url.clone(), 302)
                    .with_header("Set-Cookie", "sid=abc123; Path=/; HttpOnly")
                    .with_header("Set-Cookie", "theme=dark")
            }
            (HttpMethod::Post, "/login") => HttpResponse::new(req.url.clone(), 200).with_body("bad password"),
            (_, "/account") => HttpResponse::new(req.url.clone(), 200).with_body("Hello! <a href=/out>Logout</a>"),
            _ => HttpResponse::new(req.url.clone(), 404),
        })
    }

    #[tokio::test]
    async fn login_installs_the_session_cookie() {
        let site = site();
        let ctx = context(site.clone());
        let plugin = CookieSession::from_options(&options()).unwrap();

        plugin.login(&ctx).await.unwrap();
        assert_eq!(site.default_header("cookie").as_deref(), Some("sid=abc123; theme=dark"));
        assert!(plugin.is_logged(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn rejected_login_is_an_error() {
        let plugin = CookieSession::from_options(&options().with("password", "wrong")).unwrap();
        let err = plugin.login(&context(site())).await.unwrap_err();
        assert!(err.to_string().contains("no session cookie"));
    }

    #[test]
    fn missing_required_option_is_rejected() {
        let err = CookieSession::from_options(&PluginOptions::new().with("username", "alice")).unwrap_err();
        assert!(err.to_string().contains("login_url"));
    }
}
