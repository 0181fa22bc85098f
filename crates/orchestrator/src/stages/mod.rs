//! Pipeline stages
//!
//! Every stage wraps a [`StageCore`](crate::consumer::StageCore) and runs its
//! plugins inside its own task.

mod audit;
mod auth;
mod bruteforce;
mod discovery;
mod grep;
mod seed;

pub use audit::AuditStage;
pub use auth::{AuthLogin, AuthStage};
pub use bruteforce::BruteforceStage;
pub use discovery::DiscoveryStage;
pub use grep::{GrepSink, GrepStage, Inspection};
pub use seed::SeedStage;

use std::sync::Arc;
use tracing::debug;

use crate::consumer::Emitter;
use trishul_common::{Plugin, PluginContext};

/// Give every plugin its `end` call; failures are reported, not raised.
async fn end_plugins<P>(plugins: &[Arc<P>], ctx: &PluginContext, out: &Emitter)
where
    P: Plugin + ?Sized,
{
    for plugin in plugins {
        debug!("Ending plugin {}", plugin.name());
        if let Err(e) = plugin.end(ctx).await {
            out.failure(Some(plugin.name()), e);
        }
    }
}
