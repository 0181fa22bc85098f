//! In-memory transport for plugin tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use trishul_common::{
    FuzzableRequest, HttpResponse, KnowledgeBase, NotFoundDetector, PluginContext, ResponseObserver, Transport,
};

type Handler = Box<dyn Fn(&FuzzableRequest) -> HttpResponse + Send + Sync>;

/// Answers every request through a closure and records what was sent.
pub(crate) struct FakeSite {
    handler: Handler,
    sent: Mutex<Vec<FuzzableRequest>>,
    headers: Mutex<BTreeMap<String, String>>,
}

impl FakeSite {
    pub fn new(handler: impl Fn(&FuzzableRequest) -> HttpResponse + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            sent: Mutex::new(Vec::new()),
            headers: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn sent(&self) -> Vec<FuzzableRequest> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Transport for FakeSite {
    async fn send(&self, request: &FuzzableRequest, _cached: bool) -> anyhow::Result<HttpResponse> {
        self.sent.lock().push(request.clone());
        Ok((self.handler)(request))
    }

    fn set_observer(&self, _observer: Option<Arc<dyn ResponseObserver>>) {}

    fn set_default_header(&self, name: &str, value: &str) {
        self.headers.lock().insert(name.to_ascii_lowercase(), value.to_string());
    }

    fn default_header(&self, name: &str) -> Option<String> {
        self.headers.lock().get(&name.to_ascii_lowercase()).cloned()
    }
}

struct StatusOnly;

#[async_trait]
impl NotFoundDetector for StatusOnly {
    async fn prime(&self, _transport: &dyn Transport, _response: &HttpResponse) -> anyhow::Result<()> {
        Ok(())
    }

    fn is_404(&self, response: &HttpResponse) -> bool {
        response.status == 404
    }
}

pub(crate) fn context(site: Arc<FakeSite>) -> PluginContext {
    PluginContext::new(site, KnowledgeBase::new(), Arc::new(StatusOnly))
}

pub(crate) fn request(url: &str) -> FuzzableRequest {
    FuzzableRequest::get(url::Url::parse(url).unwrap())
}
