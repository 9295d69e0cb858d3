//! Google REST APIs behind one seam
//!
//! Tools and the attachment fetcher talk to Google only through
//! [`RemoteApi`], so tests can substitute a scripted fake.

mod google;

pub use google::GoogleApiClient;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;

use crate::config::HttpConfig;
use crate::error::Result;
use crate::models::ScopeSet;

pub const CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";
pub const GMAIL_API: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
pub const TASKS_API: &str = "https://tasks.googleapis.com/tasks/v1";

/// One REST call
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, url).json(body)
    }

    pub fn put(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, url).json(body)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Add a query parameter
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Value of a query parameter, first match wins
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Authenticated access to Google REST endpoints
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Send `request` with a credential for `scopes` and return the JSON body.
    ///
    /// Empty success bodies come back as `{}`.
    async fn call(&self, scopes: &ScopeSet, request: ApiRequest) -> Result<Value>;
}

/// Build the shared HTTP client with configured timeouts
pub fn build_http_client(config: &HttpConfig) -> Result<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .user_agent(concat!("gassist/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Percent-encode one path segment (event ids, calendar ids, ...)
pub fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}
