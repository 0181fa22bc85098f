//! Auth stage: keeps the scan's sessions alive

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::end_plugins;
use crate::consumer::{Emitter, StageContext, StageCore};
use crate::worker::{Fetch, Worker};
use trishul_common::{AuthPlugin, PluginContext, StageRole, TrishulResult};

/// Not routable: it wakes up every `interval` and logs back in any plugin
/// whose session was lost.
pub struct AuthStage {
    core: StageCore<()>,
    plugins: Vec<Arc<dyn AuthPlugin>>,
    ctx: PluginContext,
    interval: Duration,
}

/// Handle for logging in from the control context, outside the stage task.
#[derive(Clone)]
pub struct AuthLogin {
    plugins: Vec<Arc<dyn AuthPlugin>>,
    ctx: PluginContext,
    out: Emitter,
}

impl AuthLogin {
    /// Run every plugin's login now. Failures are reported on the auth
    /// stage's result channel.
    pub async fn force_login(&self) {
        for plugin in &self.plugins {
            debug!("Forcing login for {}", plugin.name());
            if let Err(e) = plugin.login(&self.ctx).await {
                self.out.failure(Some(plugin.name()), e.context("Forced login failed"));
            }
        }
    }
}

impl AuthStage {
    pub fn new(plugins: Vec<Arc<dyn AuthPlugin>>, ctx: PluginContext, interval: Duration) -> Self {
        Self {
            core: StageCore::new(StageRole::Auth, 1),
            plugins,
            ctx,
            interval,
        }
    }

    pub fn login_handle(&self) -> AuthLogin {
        AuthLogin {
            plugins: self.plugins.clone(),
            ctx: self.ctx.clone(),
            out: self.core.emitter(),
        }
    }
}

async fn check_sessions(plugins: &[Arc<dyn AuthPlugin>], ctx: &PluginContext, out: &Emitter) {
    for plugin in plugins {
        match plugin.is_logged(ctx).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Session lost for {}, logging in again", plugin.name());
                if let Err(e) = plugin.login(ctx).await {
                    out.failure(Some(plugin.name()), e);
                }
            }
            Err(e) => out.failure(Some(plugin.name()), e),
        }
    }
}

#[async_trait]
impl Worker for AuthStage {
    fn role(&self) -> StageRole {
        StageRole::Auth
    }

    fn start(&mut self) -> TrishulResult<()> {
        let plugins = self.plugins.clone();
        let ctx = self.ctx.clone();
        let interval = self.interval;
        self.core.spawn(move |mut stage: StageContext<()>| async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    msg = stage.inbox.next() => match msg {
                        Some(()) => stage.inbox.done(),
                        None => break,
                    },
                    _ = ticker.tick() => check_sessions(&plugins, &ctx, &stage.out).await,
                }
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
