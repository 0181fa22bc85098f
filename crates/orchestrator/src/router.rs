//! Router: moves work items from producer stages to consumer stages until
//! every producer is drained or has declared end of work.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::exception::ExceptionSink;
use crate::graph::StageGraph;
use crate::progress::RoutingProgress;
use crate::registry::StageRegistry;
use crate::worker::{Fetch, FailureReport, StageResult};
use trishul_common::{StageRole, TrishulError, TrishulResult, WorkItem};

/// Per-run termination bookkeeping.
///
/// A producer is in at most one of the two sets. `finished` is cleared
/// whenever an item is delivered, because that delivery may create new work
/// for a producer that looked drained.
#[derive(Debug, Default, Clone)]
pub struct RouterSession {
    finished: BTreeSet<StageRole>,
    force_ended: BTreeSet<StageRole>,
}

impl RouterSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(&mut self, role: StageRole) {
        if !self.force_ended.contains(&role) {
            self.finished.insert(role);
        }
    }

    pub fn force_end(&mut self, role: StageRole) {
        self.finished.remove(&role);
        self.force_ended.insert(role);
    }

    pub fn reset_finished(&mut self) {
        self.finished.clear();
    }

    pub fn is_settled(&self, role: StageRole) -> bool {
        self.finished.contains(&role) || self.force_ended.contains(&role)
    }

    pub fn is_force_ended(&self, role: StageRole) -> bool {
        self.force_ended.contains(&role)
    }

    pub fn all_settled(&self, producers: &[StageRole]) -> bool {
        producers.iter().all(|role| self.is_settled(*role))
    }

    pub fn finished(&self) -> &BTreeSet<StageRole> {
        &self.finished
    }

    pub fn force_ended(&self) -> &BTreeSet<StageRole> {
        &self.force_ended
    }
}

pub struct Router {
    graph: StageGraph,
    sink: Arc<dyn ExceptionSink>,
    poll_timeout: Duration,
    progress: Arc<RoutingProgress>,
    stop: CancellationToken,
    settled: Mutex<RouterSession>,
}

impl Router {
    pub fn new(graph: StageGraph, sink: Arc<dyn ExceptionSink>, poll_timeout: Duration) -> Self {
        Self {
            graph,
            sink,
            poll_timeout,
            progress: Arc::new(RoutingProgress::new()),
            stop: CancellationToken::new(),
            settled: Mutex::new(RouterSession::new()),
        }
    }

    pub fn with_progress(mut self, progress: Arc<RoutingProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Routing unwinds with `MustStopByUserRequest` once this token fires.
    pub fn with_stop(mut self, stop: CancellationToken) -> Self {
        self.stop = stop;
        self
    }

    pub fn progress(&self) -> &RoutingProgress {
        &self.progress
    }

    /// How each producer settled in the last completed run.
    pub fn settled(&self) -> RouterSession {
        self.settled.lock().clone()
    }

    /// Route until every live producer is settled. On any error all live
    /// stages are terminated before the error is returned; joining them is
    /// left to the caller.
    #[instrument(skip_all)]
    pub async fn run(&self, registry: &mut StageRegistry) -> TrishulResult<()> {
        let result = self.route(registry).await;
        if let Err(e) = &result {
            warn!("Routing aborted: {}", e);
            registry.terminate_all();
        }
        result
    }

    async fn route(&self, registry: &mut StageRegistry) -> TrishulResult<()> {
        let live = registry.live_roles();
        let graph = self.graph.restrict_to(&live);
        let observed: Vec<StageRole> = graph.observed(&live).collect();
        if graph.producers().is_empty() {
            debug!("No producer stage configured, nothing to route");
            return Ok(());
        }
        info!(
            "Routing from {:?} into {:?}",
            graph.producers(),
            graph.consumers()
        );

        let mut session = RouterSession::new();
        loop {
            if self.stop.is_cancelled() {
                return Err(TrishulError::MustStopByUserRequest);
            }
            self.progress.record_pass();
            self.poll_observed(registry, &observed).await?;
            self.route_pass(registry, &graph, &observed, &mut session).await?;
            if session.all_settled(graph.producers()) {
                break;
            }
            // a pass of immediate fetches must not starve the stage tasks
            tokio::task::yield_now().await;
        }
        for role in session.finished() {
            trishul_telemetry::record_settled(role.as_str(), "finished");
        }
        debug!(
            "Routing complete, finished={:?} force_ended={:?}",
            session.finished(),
            session.force_ended()
        );
        *self.settled.lock() = session;
        Ok(())
    }

    /// Non-producers are only polled for failure reports.
    async fn poll_observed(&self, registry: &mut StageRegistry, observed: &[StageRole]) -> TrishulResult<()> {
        for &role in observed {
            let Some(worker) = registry.get_mut(role) else {
                continue;
            };
            match worker.fetch_result(self.poll_timeout).await {
                Fetch::Ready(StageResult::Failure(report)) => self.report(report)?,
                Fetch::Ready(other) => trace!("Ignoring {:?} from non-producer {}", other, role),
                Fetch::TimedOut | Fetch::Empty => {}
            }
        }
        Ok(())
    }

    async fn route_pass(
        &self,
        registry: &mut StageRegistry,
        graph: &StageGraph,
        observed: &[StageRole],
        session: &mut RouterSession,
    ) -> TrishulResult<()> {
        for &role in graph.producers() {
            if session.all_settled(graph.producers()) {
                return Ok(());
            }
            if session.is_settled(role) {
                continue;
            }
            let Some(worker) = registry.get_mut(role) else {
                session.force_end(role);
                continue;
            };
            match worker.fetch_result(self.poll_timeout).await {
                Fetch::TimedOut => {}
                Fetch::Empty => {
                    if !worker.has_pending_work() {
                        trace!("{} has no pending work", role);
                        session.finish(role);
                    }
                }
                Fetch::Ready(StageResult::EndOfWork) => {
                    info!("{} declared end of work", role);
                    trishul_telemetry::record_settled(role.as_str(), "force_ended");
                    session.force_end(role);
                }
                Fetch::Ready(StageResult::Failure(report)) => self.report(report)?,
                Fetch::Ready(StageResult::Item(item)) => {
                    item.check_well_formed()
                        .map_err(|reason| TrishulError::ProtocolViolation { stage: role, reason })?;
                    self.progress.record_routed(role);
                    self.fan_out(registry, graph, observed, session, item).await?;
                    session.reset_finished();
                }
            }
        }
        Ok(())
    }

    /// A consumer whose queue stays full is retried until it accepts the
    /// item. Between attempts the stop token and the observed stages are
    /// checked, so a stuck consumer cannot hide a stop or a fatal failure.
    async fn fan_out(
        &self,
        registry: &mut StageRegistry,
        graph: &StageGraph,
        observed: &[StageRole],
        session: &RouterSession,
        item: WorkItem,
    ) -> TrishulResult<()> {
        for &consumer in graph.consumers() {
            if session.is_force_ended(consumer) {
                trace!("Skipping force-ended consumer {}", consumer);
                continue;
            }
            loop {
                if self.stop.is_cancelled() {
                    return Err(TrishulError::MustStopByUserRequest);
                }
                let Some(worker) = registry.get(consumer) else {
                    break;
                };
                match worker.submit(item.clone()).await {
                    Ok(()) => {
                        self.progress.record_delivery(consumer);
                        break;
                    }
                    Err(TrishulError::Timeout(_)) => {
                        trace!("{} queue is full, holding {}", consumer, item.url);
                        self.poll_observed(registry, observed).await?;
                    }
                    Err(err @ TrishulError::QueueClosed(_)) => {
                        warn!("Could not deliver {} to {}: {}", item.url, consumer, err);
                        self.report(FailureReport::recoverable(consumer, None, err.into()))?;
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    fn report(&self, report: FailureReport) -> TrishulResult<()> {
        self.progress.record_failure(report.stage, report.is_fatal());
        self.sink.handle(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::ExceptionHandler;
    use crate::testing::{item, registry_of, Event, EventLog, ScriptedWorker, Step};

    fn router(sink: Arc<ExceptionHandler>) -> Router {
        Router::new(StageGraph::standard(), sink, Duration::from_millis(10))
    }

    #[test]
    fn session_keeps_roles_in_one_set() {
        let mut session = RouterSession::new();
        session.finish(StageRole::Seed);
        session.force_end(StageRole::Seed);
        assert!(session.finished().is_empty());
        assert!(session.is_force_ended(StageRole::Seed));

        session.finish(StageRole::Seed);
        assert!(session.finished().is_empty());

        session.finish(StageRole::Discovery);
        session.reset_finished();
        assert!(!session.is_settled(StageRole::Discovery));
        assert!(session.is_settled(StageRole::Seed));
        assert!(session.all_settled(&[StageRole::Seed]));
        assert!(!session.all_settled(&[StageRole::Seed, StageRole::Discovery]));
    }

    #[tokio::test]
    async fn no_producers_returns_immediately() {
        let audit = ScriptedWorker::new(StageRole::Audit);
        let tally = audit.tally();
        let mut registry = registry_of([audit]);

        router(Arc::new(ExceptionHandler::new())).run(&mut registry).await.unwrap();
        assert_eq!(tally.fetches(), 0);
    }

    #[tokio::test]
    async fn discovery_output_is_fed_back_and_audited() {
        let seed = ScriptedWorker::new(StageRole::Seed).then(Step::Item(item("/")));
        let discovery = ScriptedWorker::new(StageRole::Discovery).reacting(|input| {
            if input.url.path() == "/" {
                vec![Step::Item(item("/about"))]
            } else {
                Vec::new()
            }
        });
        let audit = ScriptedWorker::new(StageRole::Audit);
        let (discovery_tally, audit_tally) = (discovery.tally(), audit.tally());

        let mut registry = registry_of([seed, discovery, audit]);
        let sink = Arc::new(ExceptionHandler::new());
        let router = router(sink.clone());
        router.run(&mut registry).await.unwrap();

        assert_eq!(audit_tally.submitted(), vec![item("/"), item("/about")]);
        assert_eq!(discovery_tally.submitted(), vec![item("/"), item("/about")]);
        assert!(sink.recorded().is_empty());
        assert_eq!(router.progress().snapshot().items_routed, 2);
        assert_eq!(router.progress().snapshot().deliveries, 4);
    }

    #[tokio::test]
    async fn finished_producer_is_polled_again_after_delivery() {
        // seed drains on the first pass, discovery keeps emitting afterwards
        let log = EventLog::default();
        let seed = ScriptedWorker::new(StageRole::Seed).logging_to(&log);
        let discovery = ScriptedWorker::new(StageRole::Discovery)
            .then(Step::TimedOut)
            .then(Step::Item(item("/a")))
            .then(Step::Item(item("/b")))
            .logging_to(&log);

        let mut registry = registry_of([seed, discovery]);
        let router = router(Arc::new(ExceptionHandler::new()));
        router.run(&mut registry).await.unwrap();

        let events = log.events();
        let last_delivery = events
            .iter()
            .rposition(|e| *e == Event::Submitted(StageRole::Discovery))
            .unwrap();
        assert!(
            events[last_delivery..].contains(&Event::Fetched(StageRole::Seed)),
            "seed was not polled after the last delivery: {:?}",
            events
        );
        assert!(router.settled().finished().contains(&StageRole::Seed));
    }

    #[tokio::test]
    async fn producer_declaring_end_of_work_is_force_ended() {
        let seed = ScriptedWorker::new(StageRole::Seed).then(Step::Item(item("/")));
        let discovery = ScriptedWorker::new(StageRole::Discovery).reacting(|input| {
            if input.url.path() == "/" {
                vec![Step::Item(item("/a")), Step::EndOfWork]
            } else {
                Vec::new()
            }
        });
        let audit = ScriptedWorker::new(StageRole::Audit);
        let (discovery_tally, audit_tally) = (discovery.tally(), audit.tally());

        let mut registry = registry_of([seed, discovery, audit]);
        let router = router(Arc::new(ExceptionHandler::new()));
        router.run(&mut registry).await.unwrap();

        let settled = router.settled();
        assert!(settled.is_force_ended(StageRole::Discovery));
        assert!(!settled.finished().contains(&StageRole::Discovery));
        assert!(settled.finished().contains(&StageRole::Seed));
        assert_eq!(discovery_tally.submitted(), vec![item("/"), item("/a")]);
        assert_eq!(audit_tally.submitted(), vec![item("/"), item("/a")]);
    }

    #[tokio::test]
    async fn force_ended_consumer_gets_no_more_items() {
        let seed = ScriptedWorker::new(StageRole::Seed)
            .then(Step::Item(item("/one")))
            .then(Step::Item(item("/two")));
        let discovery = ScriptedWorker::new(StageRole::Discovery).then(Step::EndOfWork);
        let audit = ScriptedWorker::new(StageRole::Audit);
        let (discovery_tally, audit_tally) = (discovery.tally(), audit.tally());

        let mut registry = registry_of([seed, discovery, audit]);
        router(Arc::new(ExceptionHandler::new())).run(&mut registry).await.unwrap();

        assert_eq!(discovery_tally.submitted(), vec![item("/one")]);
        assert_eq!(audit_tally.submitted(), vec![item("/one"), item("/two")]);
    }

    #[tokio::test]
    async fn timed_out_producer_is_not_finished() {
        let seed = ScriptedWorker::new(StageRole::Seed)
            .then(Step::TimedOut)
            .then(Step::TimedOut)
            .then(Step::Item(item("/late")));
        let audit = ScriptedWorker::new(StageRole::Audit);
        let audit_tally = audit.tally();

        let mut registry = registry_of([seed, audit]);
        router(Arc::new(ExceptionHandler::new())).run(&mut registry).await.unwrap();

        assert_eq!(audit_tally.submitted(), vec![item("/late")]);
    }

    #[tokio::test]
    async fn recoverable_failures_do_not_stop_routing() {
        let seed = ScriptedWorker::new(StageRole::Seed)
            .then(Step::Failure(FailureReport::new(
                StageRole::Seed,
                None,
                anyhow::anyhow!("The target URL is unreachable"),
            )))
            .then(Step::Item(item("/")));
        let audit = ScriptedWorker::new(StageRole::Audit);
        let audit_tally = audit.tally();

        let mut registry = registry_of([seed, audit]);
        let sink = Arc::new(ExceptionHandler::new());
        router(sink.clone()).run(&mut registry).await.unwrap();

        assert_eq!(sink.recorded().len(), 1);
        assert_eq!(audit_tally.submitted(), vec![item("/")]);
    }

    #[tokio::test]
    async fn fatal_failure_from_observed_stage_terminates_everything() {
        let mut seed = ScriptedWorker::new(StageRole::Seed);
        for _ in 0..100 {
            seed = seed.then(Step::TimedOut);
        }
        let audit = ScriptedWorker::new(StageRole::Audit).then(Step::Failure(FailureReport::new(
            StageRole::Audit,
            Some("reflected_input"),
            TrishulError::MustStopByUserRequest.into(),
        )));
        let (seed_tally, audit_tally) = (seed.tally(), audit.tally());

        let mut registry = registry_of([seed, audit]);
        let err = router(Arc::new(ExceptionHandler::new()))
            .run(&mut registry)
            .await
            .unwrap_err();

        assert!(matches!(err, TrishulError::MustStopByUserRequest));
        assert_eq!(seed_tally.terminated(), 1);
        assert_eq!(audit_tally.terminated(), 1);
        assert_eq!(seed_tally.joined(), 0);
    }

    #[tokio::test]
    async fn malformed_item_is_a_protocol_violation() {
        let bad = trishul_common::FuzzableRequest::get(url::Url::parse("ftp://target.test/pub").unwrap());
        let seed = ScriptedWorker::new(StageRole::Seed).then(Step::Item(bad));
        let audit = ScriptedWorker::new(StageRole::Audit);
        let audit_tally = audit.tally();

        let mut registry = registry_of([seed, audit]);
        let err = router(Arc::new(ExceptionHandler::new()))
            .run(&mut registry)
            .await
            .unwrap_err();

        assert!(matches!(err, TrishulError::ProtocolViolation { stage: StageRole::Seed, .. }));
        assert!(audit_tally.submitted().is_empty());
    }

    #[tokio::test]
    async fn closed_consumer_queue_is_reported_as_recoverable() {
        let seed = ScriptedWorker::new(StageRole::Seed).then(Step::Item(item("/")));
        let audit = ScriptedWorker::new(StageRole::Audit).with_closed_queue();
        let bruteforce = ScriptedWorker::new(StageRole::Bruteforce);
        let bruteforce_tally = bruteforce.tally();

        let mut registry = registry_of([seed, audit, bruteforce]);
        let sink = Arc::new(ExceptionHandler::new());
        router(sink.clone()).run(&mut registry).await.unwrap();

        let recorded = sink.recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].stage, StageRole::Audit);
        assert_eq!(bruteforce_tally.submitted(), vec![item("/")]);
    }

    #[tokio::test]
    async fn stop_request_unwinds_routing() {
        let mut seed = ScriptedWorker::new(StageRole::Seed);
        for _ in 0..100 {
            seed = seed.then(Step::TimedOut);
        }
        let seed_tally = seed.tally();
        let mut registry = registry_of([seed]);

        let stop = CancellationToken::new();
        stop.cancel();
        let err = router(Arc::new(ExceptionHandler::new()))
            .with_stop(stop)
            .run(&mut registry)
            .await
            .unwrap_err();

        assert!(matches!(err, TrishulError::MustStopByUserRequest));
        assert_eq!(seed_tally.terminated(), 1);
    }

    #[tokio::test]
    async fn stop_reaches_a_router_stuck_on_a_full_queue() {
        let seed = ScriptedWorker::new(StageRole::Seed).then(Step::Item(item("/")));
        let audit = ScriptedWorker::new(StageRole::Audit).with_full_queue();
        let audit_tally = audit.tally();
        let mut registry = registry_of([seed, audit]);

        let stop = CancellationToken::new();
        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = tokio::time::timeout(
            Duration::from_secs(2),
            router(Arc::new(ExceptionHandler::new())).with_stop(stop).run(&mut registry),
        )
        .await
        .expect("router ignored the stop request")
        .unwrap_err();

        assert!(matches!(err, TrishulError::MustStopByUserRequest));
        assert!(audit_tally.submitted().is_empty());
        assert_eq!(audit_tally.terminated(), 1);
    }

    #[tokio::test]
    async fn fatal_failure_surfaces_while_a_queue_is_full() {
        let seed = ScriptedWorker::new(StageRole::Seed).then(Step::Item(item("/")));
        let audit = ScriptedWorker::new(StageRole::Audit).with_full_queue();
        let grep = ScriptedWorker::new(StageRole::Grep)
            .then(Step::TimedOut)
            .then(Step::TimedOut)
            .then(Step::Failure(FailureReport::new(
                StageRole::Grep,
                Some("error_pages"),
                TrishulError::MustStop {
                    message: "disk full".to_string(),
                    source: None,
                }
                .into(),
            )));
        let grep_tally = grep.tally();
        let mut registry = registry_of([seed, audit, grep]);

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            router(Arc::new(ExceptionHandler::new())).run(&mut registry),
        )
        .await
        .expect("fatal failure was never polled")
        .unwrap_err();

        assert!(matches!(err, TrishulError::MustStop { .. }));
        assert!(grep_tally.fetches() >= 3);
        assert_eq!(grep_tally.terminated(), 1);
    }
}
