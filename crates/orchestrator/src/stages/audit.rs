//! Audit stage: vulnerability checks on every routed request

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use super::end_plugins;
use crate::consumer::{StageContext, StageCore};
use crate::worker::{Fetch, Worker};
use trishul_common::{AuditPlugin, PluginContext, StageRole, TrishulResult, WorkItem};

/// Consumer only: findings go to the knowledge base, failures to the
/// result channel.
pub struct AuditStage {
    core: StageCore<WorkItem>,
    plugins: Vec<Arc<dyn AuditPlugin>>,
    ctx: PluginContext,
}

impl AuditStage {
    pub fn new(plugins: Vec<Arc<dyn AuditPlugin>>, ctx: PluginContext, capacity: usize) -> Self {
        Self {
            core: StageCore::new(StageRole::Audit, capacity),
            plugins,
            ctx,
        }
    }
}

#[async_trait]
impl Worker for AuditStage {
    fn role(&self) -> StageRole {
        StageRole::Audit
    }

    fn start(&mut self) -> TrishulResult<()> {
        let plugins = self.plugins.clone();
        let ctx = self.ctx.clone();
        self.core.spawn(move |mut stage: StageContext<WorkItem>| async move {
            while let Some(request) = stage.inbox.next().await {
                for plugin in &plugins {
                    if stage.inbox.is_cancelled() {
                        break;
                    }
                    trace!("{} auditing {}", plugin.name(), request.url);
                    if let Err(e) = plugin.audit(&request, &ctx).await {
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

    async fn submit(&self, item: WorkItem) -> TrishulResult<()> {
        self.core.submit(item).await
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
