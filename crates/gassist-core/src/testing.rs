//! Shared fakes for unit tests

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use crate::api::{ApiRequest, RemoteApi};
use crate::error::{Error, Result};
use crate::models::{CredentialRecord, ScopeSet};
use crate::oauth::{Authorizer, CredentialBroker, TokenEndpoint, TokenResponse};
use crate::token_store::{FileTokenStore, TokenStore};

/// Token endpoint and authorizer that refuse every call
pub(crate) struct Offline;

#[async_trait]
impl TokenEndpoint for Offline {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenResponse> {
        Err(Error::OAuth("offline".to_string()))
    }

    async fn exchange_code(&self, _code: &str, _redirect_uri: &str) -> Result<TokenResponse> {
        Err(Error::OAuth("offline".to_string()))
    }
}

#[async_trait]
impl Authorizer for Offline {
    async fn authorize(&self, _scopes: &ScopeSet) -> Result<CredentialRecord> {
        Err(Error::Authorization("offline".to_string()))
    }
}

/// Broker whose store already holds an unexpired credential for each scope set
pub(crate) async fn broker_with_valid_credentials(
    dir: &Path,
    scope_sets: &[ScopeSet],
) -> Arc<CredentialBroker> {
    let store = Arc::new(FileTokenStore::new(dir));
    for scopes in scope_sets {
        store
            .store(&CredentialRecord {
                access_token: "valid-token".to_string(),
                refresh_token: Some("1//refresh".to_string()),
                expiry: Utc::now() + Duration::hours(1),
                scopes: scopes.clone(),
            })
            .await
            .unwrap();
    }
    Arc::new(CredentialBroker::new(store, Arc::new(Offline), Arc::new(Offline)))
}

type Responder = Box<dyn Fn(&ApiRequest) -> Result<Value> + Send + Sync>;

/// `RemoteApi` that answers from a closure and records every request
pub(crate) struct ScriptedApi {
    responder: Responder,
    pub calls: Mutex<Vec<(ScopeSet, ApiRequest)>>,
}

impl ScriptedApi {
    pub fn new(responder: impl Fn(&ApiRequest) -> Result<Value> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Requests sent so far, in order
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.calls.lock().iter().map(|(_, r)| r.clone()).collect()
    }
}

#[async_trait]
impl RemoteApi for ScriptedApi {
    async fn call(&self, scopes: &ScopeSet, request: ApiRequest) -> Result<Value> {
        self.calls.lock().push((scopes.clone(), request.clone()));
        (self.responder)(&request)
    }
}

/// Error a Google endpoint would produce for `status`
pub(crate) fn remote_error(status: u16) -> Error {
    Error::RemoteApi {
        status,
        message: format!("HTTP {}", status),
    }
}
