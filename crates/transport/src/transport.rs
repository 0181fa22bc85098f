// crates/transport/src/transport.rs
//! HTTP transport on a shared reqwest client

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, trace};

use crate::cache::ResponseCache;
use trishul_common::{
    FuzzableRequest, HttpMethod, HttpResponse, ResponseObserver, ScanConfig, Transport, TrishulError,
};

const DEFAULT_MAX_BODY: usize = 1024 * 1024;

/// HTTP client with a bounded GET response cache, default headers, a
/// response observer hook and a user stop switch. Redirects are returned
/// as-is and certificate errors are ignored.
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
    retries: u32,
    user_agent: String,
    max_body: usize,
    cache_enabled: bool,
    cache: Mutex<ResponseCache>,
    default_headers: RwLock<Vec<(String, String)>>,
    observer: RwLock<Option<Arc<dyn ResponseObserver>>>,
    stopped: AtomicBool,
}

impl HttpTransport {
    /// Create a new transport with default settings.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| TrishulError::Config(format!("Failed to build the HTTP client: {}", e)))?;
        Ok(Self {
            client,
            timeout: Duration::from_secs(10),
            retries: 1,
            user_agent: format!("trishul/{}", trishul_common::VERSION),
            max_body: DEFAULT_MAX_BODY,
            cache_enabled: true,
            cache: Mutex::new(ResponseCache::default()),
            default_headers: RwLock::new(Vec::new()),
            observer: RwLock::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn from_config(config: &ScanConfig) -> Result<Self> {
        Ok(Self::new()?
            .with_timeout(config.request_timeout)
            .with_retries(config.retries)
            .with_user_agent(config.user_agent.clone())
            .with_cache(config.http_cache))
    }

    /// Whole-exchange timeout, connect included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extra attempts after a connect failure or a timeout.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_cache_limits(mut self, max_entries: usize, max_bytes: usize) -> Self {
        self.cache = Mutex::new(ResponseCache::new(max_entries, max_bytes));
        self
    }

    /// Bodies are truncated to this many bytes.
    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// Refuse every further request with `MustStopByUserRequest`.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn cached_responses(&self) -> usize {
        self.cache.lock().len()
    }

    /// Header set for one request: fixed headers, then defaults, then the
    /// request's own headers, later entries replacing earlier ones by name.
    fn merged_headers(&self, request: &FuzzableRequest) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = Vec::new();
        let mut put = |name: &str, value: &str| {
            match headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                Some(slot) => slot.1 = value.to_string(),
                None => headers.push((name.to_string(), value.to_string())),
            }
        };

        put("User-Agent", &self.user_agent);
        put("Accept", "*/*");
        for (name, value) in self.default_headers.read().iter() {
            put(name, value);
        }
        for (name, value) in &request.headers {
            put(name, value);
        }
        headers
    }

    fn build(&self, request: &FuzzableRequest) -> reqwest::RequestBuilder {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Head => Method::HEAD,
            HttpMethod::Post => Method::POST,
        };
        let mut builder = self.client.request(method, request.url.clone()).timeout(self.timeout);
        for (name, value) in self.merged_headers(request) {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder
    }

    /// Send once, retrying connect failures and timeouts with a short backoff.
    async fn send_with_retries(&self, request: &FuzzableRequest) -> Result<reqwest::Response, reqwest::Error> {
        let mut attempt = 0;
        loop {
            match self.build(request).send().await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.retries && (e.is_connect() || e.is_timeout()) => {
                    attempt += 1;
                    trace!("Attempt {} for {} failed: {}", attempt, request, e);
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn exchange(&self, request: &FuzzableRequest) -> Result<HttpResponse> {
        let start = Instant::now();
        let mut reply = self
            .send_with_retries(request)
            .await
            .map_err(|e| transport_error(request, &e))?;

        let status = reply.status();
        let mut response = HttpResponse::new(request.url.clone(), status.as_u16());
        response.reason = status.canonical_reason().unwrap_or_default().to_string();
        response.headers = reply
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
            .collect();

        let mut body = Vec::new();
        while let Some(chunk) = reply.chunk().await.map_err(|e| transport_error(request, &e))? {
            let room = self.max_body - body.len();
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                debug!("Response truncated at {} bytes", self.max_body);
                break;
            }
            body.extend_from_slice(&chunk);
        }
        response.body = String::from_utf8_lossy(&body).into_owned();
        response.elapsed = start.elapsed();

        trishul_telemetry::record_http_request(request.method.as_str());
        debug!("{} -> {} ({} bytes)", request, response.status, response.body.len());
        Ok(response)
    }
}

/// Timeouts keep their own variant; every other client failure is an
/// `Http` error carrying the full cause chain.
fn transport_error(request: &FuzzableRequest, err: &reqwest::Error) -> anyhow::Error {
    let mut message = format!("{}: {}", request, err);
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    if err.is_timeout() {
        TrishulError::Timeout(message).into()
    } else {
        TrishulError::Http(message).into()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &FuzzableRequest, cached: bool) -> Result<HttpResponse> {
        if self.is_stopped() {
            return Err(TrishulError::MustStopByUserRequest.into());
        }

        let cacheable = cached && self.cache_enabled && request.method == HttpMethod::Get && request.headers.is_empty();
        if cacheable {
            if let Some(hit) = self.cache.lock().get(request.url.as_str()) {
                debug!("Cache hit for {}", request.url);
                return Ok(hit);
            }
        }

        let response = self.exchange(request).await?;
        if cacheable {
            self.cache.lock().insert(request.url.to_string(), response.clone());
        }

        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer.observe(request, &response).await;
        }
        Ok(response)
    }

    fn set_observer(&self, observer: Option<Arc<dyn ResponseObserver>>) {
        *self.observer.write() = observer;
    }

    fn set_default_header(&self, name: &str, value: &str) {
        let mut headers = self.default_headers.write();
        match headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(slot) => slot.1 = value.to_string(),
            None => headers.push((name.to_string(), value.to_string())),
        }
    }

    fn default_header(&self, name: &str) -> Option<String> {
        self.default_headers
            .read()
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }
}
