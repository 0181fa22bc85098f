//! Discovery stage: crawl and infrastructure plugins

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::end_plugins;
use crate::consumer::{Emitter, StageContext, StageCore};
use crate::worker::{Fetch, StageResult, Worker};
use trishul_common::{DiscoveryPlugin, PluginContext, StageRole, TrishulResult, WorkItem};

/// Runs every discovery plugin on each routed request and emits the requests
/// the knowledge base has not seen yet.
///
/// With a time limit, the first input that arrives after the limit makes the
/// stage emit `EndOfWork` once; everything queued after that is discarded.
pub struct DiscoveryStage {
    core: StageCore<WorkItem>,
    plugins: Vec<Arc<dyn DiscoveryPlugin>>,
    ctx: PluginContext,
    max_time: Option<Duration>,
}

impl DiscoveryStage {
    pub fn new(plugins: Vec<Arc<dyn DiscoveryPlugin>>, ctx: PluginContext, capacity: usize) -> Self {
        Self {
            core: StageCore::new(StageRole::Discovery, capacity),
            plugins,
            ctx,
            max_time: None,
        }
    }

    pub fn with_max_time(mut self, max_time: Option<Duration>) -> Self {
        self.max_time = max_time;
        self
    }
}

async fn discover(plugins: &[Arc<dyn DiscoveryPlugin>], ctx: &PluginContext, out: &Emitter, request: &WorkItem) {
    for plugin in plugins {
        match plugin.discover(request, ctx).await {
            Ok(found) => {
                let mut fresh = 0usize;
                for candidate in found {
                    if ctx.kb.add_fuzzable_request(&candidate) {
                        fresh += 1;
                        out.emit(StageResult::Item(candidate));
                    }
                }
                debug!("{} found {} new request(s) from {}", plugin.name(), fresh, request.url);
            }
            Err(e) => out.failure(Some(plugin.name()), e),
        }
    }
}

#[async_trait]
impl Worker for DiscoveryStage {
    fn role(&self) -> StageRole {
        StageRole::Discovery
    }

    fn start(&mut self) -> TrishulResult<()> {
        let plugins = self.plugins.clone();
        let ctx = self.ctx.clone();
        let max_time = self.max_time;
        self.core.spawn(move |mut stage: StageContext<WorkItem>| async move {
            let started = Instant::now();
            let mut ended = false;
            while let Some(request) = stage.inbox.next().await {
                if !ended && max_time.is_some_and(|limit| started.elapsed() >= limit) {
                    info!("Maximum discovery time reached, ending discovery");
                    stage.out.emit(StageResult::EndOfWork);
                    ended = true;
                }
                if !ended {
                    discover(&plugins, &ctx, &stage.out, &request).await;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, drain, item, StaticSite};
    use anyhow::Result;
    use trishul_common::{FuzzableRequest, Plugin};

    /// Links every page to `/a` and `/b`.
    struct TwoLinks;

    #[async_trait]
    impl Plugin for TwoLinks {
        fn name(&self) -> &str {
            "two_links"
        }
    }

    #[async_trait]
    impl DiscoveryPlugin for TwoLinks {
        async fn discover(&self, request: &FuzzableRequest, _ctx: &PluginContext) -> Result<Vec<FuzzableRequest>> {
            Ok(vec![
                FuzzableRequest::get(request.url.join("/a")?),
                FuzzableRequest::get(request.url.join("/b")?),
            ])
        }
    }

    struct Broken;

    #[async_trait]
    impl Plugin for Broken {
        fn name(&self) -> &str {
            "broken"
        }
    }

    #[async_trait]
    impl DiscoveryPlugin for Broken {
        async fn discover(&self, _request: &FuzzableRequest, _ctx: &PluginContext) -> Result<Vec<FuzzableRequest>> {
            anyhow::bail!("parser crashed")
        }
    }

    fn ctx() -> PluginContext {
        context(Arc::new(StaticSite::new()))
    }

    #[tokio::test]
    async fn known_requests_are_not_emitted_twice() {
        let mut stage = DiscoveryStage::new(vec![Arc::new(TwoLinks), Arc::new(TwoLinks)], ctx(), 4);
        stage.start().unwrap();
        stage.submit(item("/")).await.unwrap();
        stage.submit(item("/a")).await.unwrap();

        let results = drain(&mut stage, Duration::from_secs(5)).await;
        let urls: Vec<_> = results
            .iter()
            .filter_map(|r| match r {
                StageResult::Item(item) => Some(item.url.path().to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(urls, vec!["/a", "/b"]);
        stage.join().await.unwrap();
    }

    #[tokio::test]
    async fn plugin_errors_are_reported_and_do_not_stop_others() {
        let mut stage = DiscoveryStage::new(vec![Arc::new(Broken), Arc::new(TwoLinks)], ctx(), 4);
        stage.start().unwrap();
        stage.submit(item("/")).await.unwrap();

        let results = drain(&mut stage, Duration::from_secs(5)).await;
        assert!(matches!(&results[0], StageResult::Failure(r) if r.plugin.as_deref() == Some("broken")));
        assert_eq!(results.iter().filter(|r| matches!(r, StageResult::Item(_))).count(), 2);
        stage.join().await.unwrap();
    }

    #[tokio::test]
    async fn time_limit_emits_end_of_work_once() {
        let mut stage = DiscoveryStage::new(vec![Arc::new(TwoLinks)], ctx(), 4).with_max_time(Some(Duration::ZERO));
        stage.start().unwrap();
        stage.submit(item("/")).await.unwrap();
        stage.submit(item("/other")).await.unwrap();

        let results = drain(&mut stage, Duration::from_secs(5)).await;
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], StageResult::EndOfWork));
        stage.join().await.unwrap();
    }
}
