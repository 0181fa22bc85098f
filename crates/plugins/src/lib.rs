//! Trishul Plugins - built-in plugins for every stage role
//!
//! Plugins are selected by name per role ([`PluginSelection`]) and built
//! into a [`PluginSet`](trishul_common::PluginSet) with [`build_plugins`].

mod basic_auth;
mod cookie_session;
mod error_pages;
mod options;
mod reflected_input;
mod registry;
mod server_header;
mod web_spider;

#[cfg(test)]
mod testing;

pub use basic_auth::BasicAuth;
pub use cookie_session::CookieSession;
pub use error_pages::ErrorPages;
pub use options::{PluginOptions, PluginSelection};
pub use reflected_input::ReflectedInput;
pub use registry::{available_plugins, build_plugins, PluginInfo, PluginKind};
pub use server_header::ServerHeader;
pub use web_spider::WebSpider;
