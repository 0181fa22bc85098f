//! Grep stage: passive inspection of every HTTP response

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::end_plugins;
use crate::consumer::{Feeder, StageContext, StageCore};
use crate::worker::{Fetch, Worker};
use trishul_common::{
    FuzzableRequest, GrepPlugin, HttpResponse, PluginContext, ResponseObserver, StageRole, TrishulResult,
};

/// How long the transport waits for room in a full grep queue.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// One request/response pair queued for inspection.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub request: FuzzableRequest,
    pub response: HttpResponse,
}

/// Not routable: fed by the transport through a [`GrepSink`].
pub struct GrepStage {
    core: StageCore<Inspection>,
    plugins: Vec<Arc<dyn GrepPlugin>>,
    ctx: PluginContext,
    send_timeout: Duration,
}

impl GrepStage {
    pub fn new(plugins: Vec<Arc<dyn GrepPlugin>>, ctx: PluginContext, capacity: usize) -> Self {
        Self {
            core: StageCore::new(StageRole::Grep, capacity),
            plugins,
            ctx,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Observer to install into the transport.
    pub fn sink(&self) -> GrepSink {
        GrepSink {
            feeder: self.core.feeder(),
            send_timeout: self.send_timeout,
        }
    }
}

/// Feeds responses into the grep queue. A response that cannot be queued in
/// time, or arrives after shutdown, is dropped.
pub struct GrepSink {
    feeder: Feeder<Inspection>,
    send_timeout: Duration,
}

#[async_trait]
impl ResponseObserver for GrepSink {
    async fn observe(&self, request: &FuzzableRequest, response: &HttpResponse) {
        let inspection = Inspection {
            request: request.clone(),
            response: response.clone(),
        };
        if let Err(e) = self.feeder.push_timeout(inspection, self.send_timeout).await {
            debug!("Response for {} not inspected: {}", request.url, e);
        }
    }
}

#[async_trait]
impl Worker for GrepStage {
    fn role(&self) -> StageRole {
        StageRole::Grep
    }

    fn start(&mut self) -> TrishulResult<()> {
        let plugins = self.plugins.clone();
        let ctx = self.ctx.clone();
        self.core.spawn(move |mut stage: StageContext<Inspection>| async move {
            while let Some(inspection) = stage.inbox.next().await {
                for plugin in &plugins {
                    if let Err(e) = plugin.grep(&inspection.request, &inspection.response, &ctx).await {
                        stage.out.failure(Some(plugin.name()), e);
                    }
                }
                stage.inbox.done();
            }
            if !stage.inbox.is_cancelled() {
                end_plugins(&plugins, &ctx, &stage.out).await;
            }
        })
    }

    async fn fetch_result(&mut self, timeout: Duration) -> Fetch {
        self.core.fetch(timeout).await
    }

    fn has_pending_work(&self) -> bool {
        self.core.has_pending_work()
    }

    fn terminate(&self) {
        self.core.terminate();
    }

    async fn join(&mut self) -> TrishulResult<()> {
        self.core.join().await
    }
}
