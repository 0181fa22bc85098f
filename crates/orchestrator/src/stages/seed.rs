//! Seed stage: turns the configured targets into the first work items

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::consumer::{Emitter, StageContext, StageCore};
use crate::worker::{Fetch, StageResult, Worker};
use trishul_common::{FuzzableRequest, PluginContext, StageRole, TrishulResult, WorkItem};

pub struct SeedStage {
    core: StageCore<WorkItem>,
    ctx: PluginContext,
}

impl SeedStage {
    pub fn new(ctx: PluginContext, capacity: usize) -> Self {
        Self {
            core: StageCore::new(StageRole::Seed, capacity),
            ctx,
        }
    }

    /// Queue one GET request per target, waiting for room as the stage
    /// works. The stage must be started first when there are more targets
    /// than queue slots.
    pub async fn seed_output_queue(&self, targets: &[Url]) -> TrishulResult<()> {
        let feeder = self.core.feeder();
        for target in targets {
            feeder.push(FuzzableRequest::get(target.clone())).await?;
        }
        info!("Seeded {} target(s)", targets.len());
        Ok(())
    }
}

async fn seed_one(ctx: &PluginContext, out: &Emitter, request: FuzzableRequest) {
    match ctx.transport.send(&request, true).await {
        Ok(response) => {
            if ctx.not_found.is_404(&response) {
                warn!("The target URL {} returned a not-found page", request.url);
            }
            ctx.kb.add_fuzzable_request(&request);
            debug!("Seeded {}", request.url);
            out.emit(StageResult::Item(request));
        }
        Err(e) => {
            let url = request.url.clone();
            out.failure(None, e.context(format!("The target URL {} is unreachable", url)));
        }
    }
}

#[async_trait]
impl Worker for SeedStage {
    fn role(&self) -> StageRole {
        StageRole::Seed
    }

    fn start(&mut self) -> TrishulResult<()> {
        let ctx = self.ctx.clone();
        self.core.spawn(move |mut stage: StageContext<WorkItem>| async move {
            while let Some(request) = stage.inbox.next().await {
                seed_one(&ctx, &stage.out, request).await;
                stage.inbox.done();
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
