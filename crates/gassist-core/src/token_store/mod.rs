//! Credential persistence
//!
//! One credential record per scope set. The default store keeps each record
//! in its own JSON file:
//!
//! ```text
//! ~/.local/share/gassist/tokens/token_calendar.json
//! ~/.local/share/gassist/tokens/token_gmail.modify.json
//! ~/.local/share/gassist/tokens/token_calendar+tasks.json
//! ~/.local/share/gassist/tokens/token_tasks.json
//! ```

mod file;

pub use file::FileTokenStore;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::models::{CredentialRecord, ScopeSet};

/// Trait for credential storage backends
///
/// Implementations must be thread-safe (`Send + Sync`); writes for one
/// scope set are serialized by the caller.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the record for a scope set.
    ///
    /// A record that exists but cannot be parsed is reported as `Ok(None)`.
    async fn load(&self, scopes: &ScopeSet) -> Result<Option<CredentialRecord>>;

    /// Persist a record under its own scope set
    async fn store(&self, record: &CredentialRecord) -> Result<()>;

    /// Remove the record for a scope set. Removing a missing record is not an error.
    async fn delete(&self, scopes: &ScopeSet) -> Result<()>;
}

/// Create the token store described by configuration
pub fn create_token_store(config: &Config) -> Arc<dyn TokenStore> {
    Arc::new(FileTokenStore::new(config.oauth.token_dir.clone()))
}
