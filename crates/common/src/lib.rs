//! Trishul Common - Shared types and traits
//!
//! This crate provides the work item, response and finding types, the
//! error enum, the knowledge base and the collaborator traits used across
//! the Trishul scanning pipeline.

pub mod config;
pub mod error;
pub mod kb;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::ScanConfig;
pub use error::{is_fatal_error, TrishulError, TrishulResult};
pub use kb::{KbSnapshot, KnowledgeBase};
pub use traits::{
    AuditPlugin, AuthPlugin, BruteforcePlugin, DiscoveryPlugin, GrepPlugin, NotFoundDetector, Plugin,
    PluginContext, PluginSet, ResponseObserver, Transport,
};
pub use types::{Finding, FuzzableRequest, HttpMethod, HttpResponse, Severity, StageRole, WorkItem};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
