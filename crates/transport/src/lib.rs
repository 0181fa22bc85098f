//! HTTP transport for the Trishul pipeline
//!
//! HTTP and HTTPS through one shared `reqwest` client. Every fresh response
//! is handed to the installed [`trishul_common::ResponseObserver`], which is
//! how the grep stage sees the traffic of every other stage.

mod cache;
mod transport;

pub use cache::ResponseCache;
pub use transport::HttpTransport;
