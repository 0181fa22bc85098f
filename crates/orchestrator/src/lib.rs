//! Trishul Orchestrator - stage pipeline, router and scan lifecycle
//!
//! A scan is a small set of long-lived stages connected by queues. The
//! [`ScanStrategy`] builds the stages the plugin configuration asks for, the
//! [`Router`] moves work items between them, and failures are funneled into
//! an [`ExceptionSink`].

mod consumer;
mod exception;
mod graph;
mod progress;
mod registry;
mod router;
pub mod stages;
mod strategy;
mod worker;

#[cfg(test)]
mod testing;

pub use exception::{ExceptionHandler, ExceptionSink, RecordedFailure};
pub use graph::{StageGraph, STARTUP_ORDER, TEARDOWN_ORDER};
pub use progress::{RouteStats, RoutingProgress};
pub use registry::StageRegistry;
pub use router::{Router, RouterSession};
pub use strategy::{ScanController, ScanStrategy, ScanSummary};
pub use worker::{FailureReport, Fetch, StageResult, Worker};
