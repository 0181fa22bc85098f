//! Channel plumbing shared by every stage
//!
//! A stage owns a bounded input queue and an unbounded result channel. The
//! result side never blocks the stage, so the router waiting on a full input
//! queue cannot deadlock against a stage waiting on its own output.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::worker::{Fetch, FailureReport, StageResult};
use trishul_common::{StageRole, TrishulError, TrishulResult};

/// Longest a routed `submit` waits for room in a full input queue.
pub const SUBMIT_WAIT: Duration = Duration::from_millis(100);

pub(crate) enum Message<I> {
    Work(I),
    /// Orderly end: everything queued before it is still processed.
    Shutdown,
}

/// Counters and flags shared between a stage handle and its task.
#[derive(Clone)]
struct Shared {
    role: StageRole,
    /// Input accepted but not fully processed.
    pending: Arc<AtomicUsize>,
    /// Results emitted but not fetched yet.
    buffered: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

/// Cloneable writer into a stage's input queue.
pub(crate) struct Feeder<I> {
    tx: mpsc::Sender<Message<I>>,
    shared: Shared,
}

impl<I> Clone for Feeder<I> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<I: Send + 'static> Feeder<I> {
    pub async fn push(&self, input: I) -> TrishulResult<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TrishulError::QueueClosed(self.shared.role));
        }
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Message::Work(input)).await.is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(TrishulError::QueueClosed(self.shared.role));
        }
        Ok(())
    }

    /// Like [`Feeder::push`] but gives up after `wait`.
    pub async fn push_timeout(&self, input: I, wait: Duration) -> TrishulResult<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TrishulError::QueueClosed(self.shared.role));
        }
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        match self.tx.send_timeout(Message::Work(input), wait).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                self.shared.pending.fetch_sub(1, Ordering::SeqCst);
                Err(TrishulError::Timeout(format!("{} stage input queue is full", self.shared.role)))
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                self.shared.pending.fetch_sub(1, Ordering::SeqCst);
                Err(TrishulError::QueueClosed(self.shared.role))
            }
        }
    }
}

/// Writer side of the result channel, used inside the stage task.
#[derive(Clone)]
pub(crate) struct Emitter {
    tx: mpsc::UnboundedSender<StageResult>,
    shared: Shared,
}

impl Emitter {
    pub fn emit(&self, result: StageResult) {
        self.shared.buffered.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(result).is_err() {
            // handle dropped: nobody will fetch this
            self.shared.buffered.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn failure(&self, plugin: Option<&str>, error: anyhow::Error) {
        self.emit(StageResult::Failure(FailureReport::new(self.shared.role, plugin, error)));
    }
}

/// Reader side of the input queue, used inside the stage task.
pub(crate) struct Inbox<I> {
    rx: mpsc::Receiver<Message<I>>,
    shared: Shared,
}

impl<I> Inbox<I> {
    /// Next work item; `None` once the stage must exit.
    ///
    /// On cancellation the queue is closed and drained without processing.
    pub async fn next(&mut self) -> Option<I> {
        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => {
                self.discard_queued();
                None
            }
            msg = self.rx.recv() => match msg {
                Some(Message::Work(input)) => Some(input),
                Some(Message::Shutdown) | None => None,
            },
        }
    }

    /// Mark one input fully processed (its results already emitted).
    pub fn done(&self) {
        self.shared.pending.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    #[cfg(test)]
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.shared.cancel.cancelled()
    }

    fn discard_queued(&mut self) {
        self.rx.close();
        let mut discarded = 0usize;
        while let Ok(msg) = self.rx.try_recv() {
            if let Message::Work(_) = msg {
                self.shared.pending.fetch_sub(1, Ordering::SeqCst);
                discarded += 1;
            }
        }
        if discarded > 0 {
            debug!("{} stage discarded {} queued item(s)", self.shared.role, discarded);
        }
    }
}

/// What a stage task receives when it is spawned.
pub(crate) struct StageContext<I> {
    pub inbox: Inbox<I>,
    pub out: Emitter,
}

/// Handle-side state of one stage: queues, counters and the task handle.
pub(crate) struct StageCore<I> {
    feeder: Feeder<I>,
    inbox: Option<Inbox<I>>,
    emitter: Emitter,
    results: mpsc::UnboundedReceiver<StageResult>,
    handle: Option<JoinHandle<()>>,
}

impl<I: Send + 'static> StageCore<I> {
    pub fn new(role: StageRole, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let shared = Shared {
            role,
            pending: Arc::new(AtomicUsize::new(0)),
            buffered: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        };
        Self {
            feeder: Feeder {
                tx,
                shared: shared.clone(),
            },
            inbox: Some(Inbox {
                rx,
                shared: shared.clone(),
            }),
            emitter: Emitter { tx: out_tx, shared },
            results: out_rx,
            handle: None,
        }
    }

    pub fn role(&self) -> StageRole {
        self.feeder.shared.role
    }

    pub fn feeder(&self) -> Feeder<I> {
        self.feeder.clone()
    }

    /// Emitter usable from the control context, e.g. for synchronous calls.
    pub fn emitter(&self) -> Emitter {
        self.emitter.clone()
    }

    /// Spawn the stage body on the runtime.
    ///
    /// Terminating the stage abandons the body at its next await point. A
    /// panicking body is reported as a `StageCrashed` failure and the stage
    /// is closed, so the router sees it drain instead of waiting on it.
    pub fn spawn<F, Fut>(&mut self, body: F) -> TrishulResult<()>
    where
        F: FnOnce(StageContext<I>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let role = self.role();
        let inbox = self.inbox.take().ok_or(TrishulError::AlreadyStarted(role))?;
        let ctx = StageContext {
            inbox,
            out: self.emitter.clone(),
        };
        let shared = self.feeder.shared.clone();
        let out = self.emitter.clone();
        let mut task = tokio::spawn(body(ctx));
        self.handle = Some(tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                outcome = &mut task => outcome,
                _ = shared.cancel.cancelled() => {
                    task.abort();
                    task.await
                }
            };
            if outcome.is_err() {
                shared.closed.store(true, Ordering::SeqCst);
            }
            // the task is gone: nothing queued or in progress will complete
            shared.pending.store(0, Ordering::SeqCst);
            match outcome {
                Ok(()) => {}
                Err(e) if e.is_panic() => {
                    let message = panic_message(e);
                    error!("{} stage crashed: {}", role, message);
                    out.emit(StageResult::Failure(FailureReport::new(
                        role,
                        None,
                        TrishulError::StageCrashed { role, message }.into(),
                    )));
                }
                Err(_) => debug!("{} stage abandoned its in-flight work", role),
            }
        }));
        debug!("{} stage started", role);
        Ok(())
    }

    /// Routed submit: waits at most [`SUBMIT_WAIT`] for queue room, then
    /// fails with `Timeout` so the caller can retry.
    pub async fn submit(&self, input: I) -> TrishulResult<()> {
        self.feeder.push_timeout(input, SUBMIT_WAIT).await
    }

    pub async fn fetch(&mut self, timeout: Duration) -> Fetch {
        if let Ok(result) = self.results.try_recv() {
            return self.take(result);
        }
        // pending is only decremented after a stage emitted everything for
        // that input, so an idle stage with an empty channel is drained
        if !self.has_pending_work() {
            return Fetch::Empty;
        }
        match tokio::time::timeout(timeout, self.results.recv()).await {
            Ok(Some(result)) => self.take(result),
            Ok(None) => Fetch::Empty,
            Err(_) => Fetch::TimedOut,
        }
    }

    fn take(&self, result: StageResult) -> Fetch {
        self.feeder.shared.buffered.fetch_sub(1, Ordering::SeqCst);
        Fetch::Ready(result)
    }

    pub fn has_pending_work(&self) -> bool {
        let shared = &self.feeder.shared;
        shared.pending.load(Ordering::SeqCst) > 0 || shared.buffered.load(Ordering::SeqCst) > 0
    }

    pub fn terminate(&self) {
        let shared = &self.feeder.shared;
        if !shared.cancel.is_cancelled() {
            debug!("{} stage terminating", shared.role);
        }
        shared.closed.store(true, Ordering::SeqCst);
        shared.cancel.cancel();
    }

    pub async fn join(&mut self) -> TrishulResult<()> {
        let role = self.role();
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.feeder.shared.closed.store(true, Ordering::SeqCst);
        if !self.feeder.shared.cancel.is_cancelled() {
            tokio::select! {
                // a terminated stage stops reading, so never wait on a full queue then
                _ = self.feeder.shared.cancel.cancelled() => {}
                _ = self.feeder.tx.send(Message::Shutdown) => {}
            }
        }
        match handle.await {
            Ok(()) => {
                debug!("{} stage joined", role);
                Ok(())
            }
            Err(e) => Err(TrishulError::StageCrashed {
                role,
                message: e.to_string(),
            }),
        }
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "stage task panicked".to_string()),
        Err(err) => err.to_string(),
    }
}

impl<I> Drop for StageCore<I> {
    fn drop(&mut self) {
        // never leave a detached stage task behind
        if self.handle.is_some() {
            self.feeder.shared.closed.store(true, Ordering::SeqCst);
            self.feeder.shared.cancel.cancel();
        }
    }
}
