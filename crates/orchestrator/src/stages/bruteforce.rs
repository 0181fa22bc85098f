//! Bruteforce stage: credential guessing on login forms and protected areas

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::end_plugins;
use crate::consumer::{StageContext, StageCore};
use crate::worker::{Fetch, StageResult, Worker};
use trishul_common::{BruteforcePlugin, PluginContext, StageRole, TrishulResult, WorkItem};

/// Producer and consumer. Each distinct input is attacked once, and each
/// request unlocked by a successful guess is emitted once.
pub struct BruteforceStage {
    core: StageCore<WorkItem>,
    plugins: Vec<Arc<dyn BruteforcePlugin>>,
    ctx: PluginContext,
}

impl BruteforceStage {
    pub fn new(plugins: Vec<Arc<dyn BruteforcePlugin>>, ctx: PluginContext, capacity: usize) -> Self {
        Self {
            core: StageCore::new(StageRole::Bruteforce, capacity),
            plugins,
            ctx,
        }
    }
}

#[async_trait]
impl Worker for BruteforceStage {
    fn role(&self) -> StageRole {
        StageRole::Bruteforce
    }

    fn start(&mut self) -> TrishulResult<()> {
        let plugins = self.plugins.clone();
        let ctx = self.ctx.clone();
        self.core.spawn(move |mut stage: StageContext<WorkItem>| async move {
            let mut attacked: HashSet<WorkItem> = HashSet::new();
            let mut emitted: HashSet<WorkItem> = HashSet::new();
            while let Some(request) = stage.inbox.next().await {
                if attacked.insert(request.clone()) {
                    for plugin in &plugins {
                        if stage.inbox.is_cancelled() {
                            break;
                        }
                        match plugin.bruteforce(&request, &ctx).await {
                            Ok(found) => {
                                for unlocked in found {
                                    if emitted.insert(unlocked.clone()) {
                                        stage.out.emit(StageResult::Item(unlocked));
                                    }
                                }
                            }
                            Err(e) => stage.out.failure(Some(plugin.name()), e),
                        }
                    }
                } else {
                    debug!("Already bruteforced {}", request.url);
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
