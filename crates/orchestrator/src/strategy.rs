//! Scan strategy: builds the stage set, runs the router and tears
//! everything down in order.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::exception::{ExceptionHandler, ExceptionSink, RecordedFailure};
use crate::graph::{StageGraph, STARTUP_ORDER, TEARDOWN_ORDER};
use crate::progress::{RouteStats, RoutingProgress};
use crate::registry::StageRegistry;
use crate::router::Router;
use crate::stages::{AuditStage, AuthLogin, AuthStage, BruteforceStage, DiscoveryStage, GrepStage, SeedStage};
use crate::worker::{Fetch, StageResult, Worker};
use trishul_common::{PluginContext, PluginSet, ScanConfig, StageRole, TrishulError, TrishulResult};

fn bootstrap_failure(e: anyhow::Error) -> TrishulError {
    match e.downcast::<TrishulError>() {
        Ok(err) if err.is_fatal() => err,
        Ok(err) => TrishulError::must_stop(
            format!("Failed to initialize the 404 detection, original exception was: \"{}\".", err),
            err,
        ),
        Err(other) => TrishulError::must_stop(
            format!("Failed to initialize the 404 detection, original exception was: \"{:#}\".", other),
            other,
        ),
    }
}

/// Stops a running scan from another task.
#[derive(Debug, Clone)]
pub struct ScanController {
    token: CancellationToken,
}

impl ScanController {
    /// Ask the scan to stop. Routing notices within one polling pass.
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            info!("Scan stop requested");
        }
        self.token.cancel();
    }

    pub fn quit(&self) {
        self.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// What a completed scan did.
#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub elapsed: Duration,
    pub stages: Vec<StageRole>,
    pub routing: RouteStats,
    pub known_requests: usize,
    pub findings: usize,
    pub failures: Vec<RecordedFailure>,
}

pub struct ScanStrategy {
    config: Arc<ScanConfig>,
    plugins: PluginSet,
    ctx: PluginContext,
    sink: Arc<dyn ExceptionSink>,
    graph: StageGraph,
    registry: StageRegistry,
    auth: Option<AuthLogin>,
    progress: Arc<RoutingProgress>,
    stop: CancellationToken,
}

impl ScanStrategy {
    pub fn new(config: Arc<ScanConfig>, plugins: PluginSet, ctx: PluginContext) -> Self {
        Self {
            config,
            plugins,
            ctx,
            sink: Arc::new(ExceptionHandler::new()),
            graph: StageGraph::standard(),
            registry: StageRegistry::new(),
            auth: None,
            progress: Arc::new(RoutingProgress::new()),
            stop: CancellationToken::new(),
        }
    }

    pub fn with_exception_sink(mut self, sink: Arc<dyn ExceptionSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn controller(&self) -> ScanController {
        ScanController {
            token: self.stop.clone(),
        }
    }

    pub fn live_stages(&self) -> BTreeSet<StageRole> {
        self.registry.live_roles()
    }

    /// Run the whole scan. On failure every stage is terminated and joined
    /// before the error is returned.
    #[instrument(skip(self), fields(targets = self.config.targets.len()))]
    pub async fn start(&mut self) -> TrishulResult<ScanSummary> {
        self.config.validate()?;
        let started = Instant::now();
        info!("Starting scan with plugins {:?}", self.plugins.names());

        let mut stages = Vec::new();
        match self.run(&mut stages).await {
            Ok(()) => {
                self.progress.print_summary();
                let summary = ScanSummary {
                    elapsed: started.elapsed(),
                    stages,
                    routing: self.progress.snapshot(),
                    known_requests: self.ctx.kb.known_request_count(),
                    findings: self.ctx.kb.findings().len(),
                    failures: self.sink.recorded(),
                };
                info!("Scan finished in {:.2}s", summary.elapsed.as_secs_f64());
                Ok(summary)
            }
            Err(e) => {
                error!("Scan aborted: {}", e);
                self.terminate();
                if let Err(join_err) = self.join_all_stages().await {
                    warn!("Teardown after abort also failed: {}", join_err);
                }
                Err(e)
            }
        }
    }

    async fn run(&mut self, stages: &mut Vec<StageRole>) -> TrishulResult<()> {
        for role in STARTUP_ORDER {
            self.check_stopped()?;
            if role == StageRole::Seed {
                self.setup_not_found_detection().await?;
            }
            self.setup_stage(role).await?;
        }
        stages.extend(self.registry.live_roles());
        info!("Live stages: {:?}", stages);

        self.check_stopped()?;
        let router = Router::new(self.graph.clone(), self.sink.clone(), self.config.poll_timeout)
            .with_progress(self.progress.clone())
            .with_stop(self.stop.clone());
        router.run(&mut self.registry).await?;

        self.join_all_stages().await
    }

    fn check_stopped(&self) -> TrishulResult<()> {
        if self.stop.is_cancelled() {
            return Err(TrishulError::MustStopByUserRequest);
        }
        Ok(())
    }

    async fn setup_stage(&mut self, role: StageRole) -> TrishulResult<()> {
        match role {
            StageRole::Grep => self.setup_grep(),
            StageRole::Auth => self.setup_auth().await,
            StageRole::Discovery => self.setup_discovery(),
            StageRole::Audit => self.setup_audit(),
            StageRole::Bruteforce => self.setup_bruteforce(),
            StageRole::Seed => self.setup_seed().await,
        }
    }

    fn register(&mut self, worker: Box<dyn Worker>) -> TrishulResult<()> {
        let role = worker.role();
        match self.registry.insert(worker) {
            Ok(()) => {
                debug!("{} stage registered", role);
                Ok(())
            }
            Err(duplicate) => {
                duplicate.terminate();
                Err(TrishulError::AlreadyStarted(role))
            }
        }
    }

    fn setup_grep(&mut self) -> TrishulResult<()> {
        if self.plugins.grep.is_empty() {
            return Ok(());
        }
        let mut stage = GrepStage::new(self.plugins.grep.clone(), self.ctx.clone(), self.config.queue_capacity);
        self.ctx.transport.set_observer(Some(Arc::new(stage.sink())));
        stage.start()?;
        self.register(Box::new(stage))
    }

    async fn setup_auth(&mut self) -> TrishulResult<()> {
        if self.plugins.auth.is_empty() {
            return Ok(());
        }
        let mut stage = AuthStage::new(self.plugins.auth.clone(), self.ctx.clone(), self.config.auth_interval);
        stage.start()?;
        let login = stage.login_handle();
        self.register(Box::new(stage))?;
        login.force_login().await;
        self.auth = Some(login);
        Ok(())
    }

    fn setup_discovery(&mut self) -> TrishulResult<()> {
        let plugins = self.plugins.discovery();
        if plugins.is_empty() {
            return Ok(());
        }
        let mut stage = DiscoveryStage::new(plugins, self.ctx.clone(), self.config.queue_capacity)
            .with_max_time(self.config.max_discovery_time);
        stage.start()?;
        self.register(Box::new(stage))
    }

    fn setup_audit(&mut self) -> TrishulResult<()> {
        if self.plugins.audit.is_empty() {
            return Ok(());
        }
        let mut stage = AuditStage::new(self.plugins.audit.clone(), self.ctx.clone(), self.config.queue_capacity);
        stage.start()?;
        self.register(Box::new(stage))
    }

    fn setup_bruteforce(&mut self) -> TrishulResult<()> {
        if self.plugins.bruteforce.is_empty() {
            return Ok(());
        }
        let mut stage =
            BruteforceStage::new(self.plugins.bruteforce.clone(), self.ctx.clone(), self.config.queue_capacity);
        stage.start()?;
        self.register(Box::new(stage))
    }

    /// Seed only when something would consume its output.
    async fn setup_seed(&mut self) -> TrishulResult<()> {
        let live = self.registry.live_roles();
        if self.graph.restrict_to(&live).consumers().is_empty() {
            debug!("No consumer stage configured, skipping seed");
            return Ok(());
        }
        let mut stage = SeedStage::new(self.ctx.clone(), self.config.queue_capacity);
        stage.start()?;
        stage.seed_output_queue(&self.config.targets).await?;
        self.register(Box::new(stage))
    }

    /// Teach the 404 detector what each target's missing pages look like.
    async fn setup_not_found_detection(&self) -> TrishulResult<()> {
        for target in &self.config.targets {
            let primed = async {
                let response = self.ctx.transport.get(target, true).await?;
                self.ctx.not_found.prime(self.ctx.transport.as_ref(), &response).await
            }
            .await;
            primed.map_err(bootstrap_failure)?;
        }
        Ok(())
    }

    /// Join every live stage in teardown order and hand its leftover
    /// failure reports to the exception sink. Stops at nothing: the first
    /// error is returned once every stage is joined.
    pub async fn join_all_stages(&mut self) -> TrishulResult<()> {
        let mut first_err = None;
        for role in TEARDOWN_ORDER {
            let Some(mut worker) = self.registry.take(role) else {
                continue;
            };
            if role == StageRole::Grep {
                self.ctx.transport.set_observer(None);
            }
            if role == StageRole::Auth {
                self.auth = None;
            }
            if let Err(e) = worker.join().await {
                warn!("Joining {} stage failed: {}", role, e);
                first_err.get_or_insert(e);
            }
            while let Fetch::Ready(result) = worker.fetch_result(Duration::ZERO).await {
                if let StageResult::Failure(report) = result {
                    if let Err(e) = self.sink.handle(report) {
                        first_err.get_or_insert(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Terminate every live stage without joining.
    pub fn terminate(&self) {
        self.registry.terminate_all();
    }

    pub fn stop(&self) {
        self.controller().stop();
        self.terminate();
    }

    pub fn quit(&self) {
        self.stop();
    }

    /// Pausing is not supported; the request is only logged.
    pub fn pause(&self, pause: bool) {
        debug!("Ignoring pause({}) request", pause);
    }

    /// Log in every auth plugin right now, if the auth stage is live.
    pub async fn force_auth_login(&self) {
        match &self.auth {
            Some(login) => login.force_login().await,
            None => debug!("No auth stage, nothing to log in"),
        }
    }
}
