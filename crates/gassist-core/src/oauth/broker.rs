//! Credential broker: one valid credential per scope set, on demand

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{CredentialRecord, ScopeSet};
use crate::token_store::TokenStore;

use super::{Authorizer, TokenEndpoint};

/// Snapshot of the stored credential for a scope set
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub scopes: String,
    pub present: bool,
    pub expiry: Option<DateTime<Utc>>,
    pub expired: bool,
    pub refreshable: bool,
}

/// Hands out valid credentials, refreshing or re-authorizing as needed.
///
/// Work for one scope set is serialized so concurrent callers trigger at
/// most one refresh and at most one consent flow. Different scope sets
/// proceed independently.
pub struct CredentialBroker {
    store: Arc<dyn TokenStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    authorizer: Arc<dyn Authorizer>,
    locks: Mutex<HashMap<ScopeSet, Arc<tokio::sync::Mutex<()>>>>,
}

impl CredentialBroker {
    pub fn new(
        store: Arc<dyn TokenStore>,
        endpoint: Arc<dyn TokenEndpoint>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            store,
            endpoint,
            authorizer,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, scopes: &ScopeSet) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(scopes.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Load a record, treating storage read failures as "no record"
    async fn load(&self, scopes: &ScopeSet) -> Option<CredentialRecord> {
        match self.store.load(scopes).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Failed to read stored credential for {}: {}", scopes, e);
                None
            }
        }
    }

    /// Return a credential valid for at least the expiry skew window
    pub async fn acquire(&self, scopes: &ScopeSet) -> Result<CredentialRecord> {
        if let Some(record) = self.load(scopes).await {
            if !record.is_expired() {
                return Ok(record);
            }
        }

        let lock = self.lock_for(scopes);
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited
        let existing = self.load(scopes).await;
        if let Some(record) = &existing {
            if !record.is_expired() {
                debug!("Credential for {} was renewed by another caller", scopes);
                return Ok(record.clone());
            }
        }

        if let Some(record) = existing.filter(|r| r.can_refresh()) {
            if let Some(refreshed) = self.try_refresh(record).await? {
                return Ok(refreshed);
            }
        }

        info!("Starting interactive authorization for {}", scopes);
        let record = self.authorizer.authorize(scopes).await.map_err(|e| match e {
            Error::ResourceExhausted(_) | Error::Authorization(_) => e,
            other => Error::Authorization(other.to_string()),
        })?;
        self.store.store(&record).await?;
        Ok(record)
    }

    /// Refresh once. `None` means the refresh was rejected and consent is needed.
    async fn try_refresh(&self, record: CredentialRecord) -> Result<Option<CredentialRecord>> {
        let Some(refresh_token) = record.refresh_token.clone() else {
            return Ok(None);
        };

        match self.endpoint.refresh(&refresh_token).await {
            Ok(response) => {
                let refreshed = response.into_record(&record.scopes, Some(refresh_token));
                self.store.store(&refreshed).await?;
                info!("Refreshed credential for {}", record.scopes);
                Ok(Some(refreshed))
            }
            Err(e) => {
                warn!("Token refresh for {} failed, re-authorizing: {}", record.scopes, e);
                Ok(None)
            }
        }
    }

    /// Forget the stored credential so the next acquire runs consent again
    pub async fn revoke(&self, scopes: &ScopeSet) -> Result<()> {
        let lock = self.lock_for(scopes);
        let _guard = lock.lock().await;
        self.store.delete(scopes).await
    }

    /// Describe the stored credential without touching the network
    pub async fn status(&self, scopes: &ScopeSet) -> CredentialStatus {
        let record = self.load(scopes).await;
        CredentialStatus {
            scopes: scopes.joined(),
            present: record.is_some(),
            expiry: record.as_ref().map(|r| r.expiry),
            expired: record.as_ref().map(|r| r.is_expired()).unwrap_or(true),
            refreshable: record.as_ref().map(|r| r.can_refresh()).unwrap_or(false),
        }
    }
}
