//! Scripted workers for router tests

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::registry::StageRegistry;
use crate::worker::{Fetch, FailureReport, StageResult, Worker};
use trishul_common::{
    FuzzableRequest, HttpResponse, KnowledgeBase, NotFoundDetector, PluginContext, ResponseObserver, StageRole,
    Transport, TrishulError, TrishulResult, WorkItem,
};

pub(crate) fn item(path: &str) -> WorkItem {
    FuzzableRequest::get(url::Url::parse("http://target.test/").unwrap().join(path).unwrap())
}

pub(crate) enum Step {
    Item(WorkItem),
    EndOfWork,
    Failure(FailureReport),
    TimedOut,
}

type Reaction = Box<dyn Fn(&WorkItem) -> Vec<Step> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    Fetched(StageRole),
    Submitted(StageRole),
}

/// Interleaving of fetches and submits across several workers.
#[derive(Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    fn push(&self, event: Event) {
        self.0.lock().push(event);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Queue {
    Open,
    Closed,
    Full,
}

/// What a test can still see after the worker moved into a registry.
#[derive(Clone, Default)]
pub(crate) struct Tally {
    pub submitted: Arc<Mutex<Vec<WorkItem>>>,
    pub terminated: Arc<AtomicUsize>,
    pub joined: Arc<AtomicUsize>,
    pub fetches: Arc<AtomicUsize>,
}

impl Tally {
    pub fn submitted(&self) -> Vec<WorkItem> {
        self.submitted.lock().clone()
    }

    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn joined(&self) -> usize {
        self.joined.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

/// Worker that replays a fixed script of results. Once the script is
/// exhausted it reports `Empty` with no pending work.
pub(crate) struct ScriptedWorker {
    role: StageRole,
    script: Mutex<VecDeque<Step>>,
    on_submit: Option<Reaction>,
    queue: Queue,
    log: Option<EventLog>,
    tally: Tally,
}

impl ScriptedWorker {
    pub fn new(role: StageRole) -> Self {
        Self {
            role,
            script: Mutex::new(VecDeque::new()),
            on_submit: None,
            queue: Queue::Open,
            log: None,
            tally: Tally::default(),
        }
    }

    pub fn then(self, step: Step) -> Self {
        self.script.lock().push_back(step);
        self
    }

    /// Steps appended to the script whenever an item is submitted.
    pub fn reacting(mut self, reaction: impl Fn(&WorkItem) -> Vec<Step> + Send + Sync + 'static) -> Self {
        self.on_submit = Some(Box::new(reaction));
        self
    }

    /// Every submit fails with `QueueClosed`.
    pub fn with_closed_queue(mut self) -> Self {
        self.queue = Queue::Closed;
        self
    }

    /// Every submit gives up with `Timeout`, like a stage whose queue
    /// never drains.
    pub fn with_full_queue(mut self) -> Self {
        self.queue = Queue::Full;
        self
    }

    pub fn logging_to(mut self, log: &EventLog) -> Self {
        self.log = Some(log.clone());
        self
    }

    pub fn tally(&self) -> Tally {
        self.tally.clone()
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn role(&self) -> StageRole {
        self.role
    }

    fn start(&mut self) -> TrishulResult<()> {
        Ok(())
    }

    async fn submit(&self, item: WorkItem) -> TrishulResult<()> {
        match self.queue {
            Queue::Open => {}
            Queue::Closed => return Err(TrishulError::QueueClosed(self.role)),
            Queue::Full => {
                tokio::task::yield_now().await;
                return Err(TrishulError::Timeout(format!("{} queue is full", self.role)));
            }
        }
        if let Some(log) = &self.log {
            log.push(Event::Submitted(self.role));
        }
        if let Some(react) = &self.on_submit {
            self.script.lock().extend(react(&item));
        }
        self.tally.submitted.lock().push(item);
        Ok(())
    }

    async fn fetch_result(&mut self, _timeout: Duration) -> Fetch {
        self.tally.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.push(Event::Fetched(self.role));
        }
        let step = self.script.lock().pop_front();
        match step {
            Some(Step::Item(item)) => Fetch::Ready(StageResult::Item(item)),
            Some(Step::EndOfWork) => Fetch::Ready(StageResult::EndOfWork),
            Some(Step::Failure(report)) => Fetch::Ready(StageResult::Failure(report)),
            Some(Step::TimedOut) => {
                tokio::task::yield_now().await;
                Fetch::TimedOut
            }
            None => Fetch::Empty,
        }
    }

    fn has_pending_work(&self) -> bool {
        !self.script.lock().is_empty()
    }

    fn terminate(&self) {
        self.tally.terminated.fetch_add(1, Ordering::SeqCst);
    }

    async fn join(&mut self) -> TrishulResult<()> {
        self.tally.joined.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) fn registry_of<const N: usize>(workers: [ScriptedWorker; N]) -> StageRegistry {
    let mut registry = StageRegistry::new();
    for worker in workers {
        assert!(registry.insert(Box::new(worker)).is_ok(), "duplicate role in test registry");
    }
    registry
}

/// In-memory site: known paths answer with their page, everything else is a
/// plain 404. Requests to `unreachable.test` fail.
#[derive(Default)]
pub(crate) struct StaticSite {
    pages: HashMap<String, (u16, String)>,
    observer: RwLock<Option<Arc<dyn ResponseObserver>>>,
    requests: Mutex<Vec<FuzzableRequest>>,
    headers: Mutex<Vec<(String, String)>>,
}

impl StaticSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, path: &str, status: u16, body: &str) -> Self {
        self.pages.insert(path.to_string(), (status, body.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<FuzzableRequest> {
        self.requests.lock().clone()
    }

    pub fn has_observer(&self) -> bool {
        self.observer.read().is_some()
    }
}

#[async_trait]
impl Transport for StaticSite {
    async fn send(&self, request: &FuzzableRequest, _cached: bool) -> anyhow::Result<HttpResponse> {
        self.requests.lock().push(request.clone());
        if request.url.host_str() == Some("unreachable.test") {
            anyhow::bail!("connection refused");
        }
        let (status, body) = self
            .pages
            .get(request.url.path())
            .cloned()
            .unwrap_or((404, "Not Found".to_string()));
        let response = HttpResponse::new(request.url.clone(), status).with_body(body);
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
        let mut headers = self.headers.lock();
        headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        headers.push((name.to_string(), value.to_string()));
    }

    fn default_header(&self, name: &str) -> Option<String> {
        self.headers
            .lock()
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }
}

/// Status-code-only 404 detection.
pub(crate) struct StatusDetector;

#[async_trait]
impl NotFoundDetector for StatusDetector {
    async fn prime(&self, _transport: &dyn Transport, _response: &HttpResponse) -> anyhow::Result<()> {
        Ok(())
    }

    fn is_404(&self, response: &HttpResponse) -> bool {
        response.status == 404
    }
}

pub(crate) fn context(site: Arc<StaticSite>) -> PluginContext {
    PluginContext::new(site, KnowledgeBase::new(), Arc::new(StatusDetector))
}

/// Drain a stage until it reports `Empty`, failing the test after `limit`.
pub(crate) async fn drain(worker: &mut dyn Worker, limit: Duration) -> Vec<StageResult> {
    let deadline = tokio::time::Instant::now() + limit;
    let mut results = Vec::new();
    loop {
        assert!(tokio::time::Instant::now() < deadline, "{} stage did not drain", worker.role());
        match worker.fetch_result(Duration::from_millis(50)).await {
            Fetch::Ready(result) => results.push(result),
            Fetch::TimedOut => {}
            Fetch::Empty if !worker.has_pending_work() => return results,
            Fetch::Empty => {}
        }
    }
}
