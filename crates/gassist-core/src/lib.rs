//! gassist Core Library
//!
//! Credential lifecycle, local attachment delivery and the Google Calendar,
//! Gmail and Tasks tools, plus the MCP server that exposes them to an agent.

pub mod api;
pub mod config;
pub mod delivery;
pub mod error;
pub mod fetcher;
mod local_http;
pub mod mcp;
pub mod mime;
pub mod models;
pub mod oauth;
pub mod services;
pub mod token_store;
pub mod tools;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{Error, Result};
pub use models::*;
pub use services::Services;

/// Application name for config paths
pub const APP_NAME: &str = "gassist";
