//! File-based token store
//!
//! Stores each scope set's record in `<token_dir>/token_<slug>.json`.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{CredentialRecord, ScopeSet};

use super::TokenStore;

/// Token store backed by one JSON file per scope set
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the token files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for a scope set
    pub fn path_for(&self, scopes: &ScopeSet) -> PathBuf {
        self.dir.join(scopes.token_file_name())
    }

    #[cfg(unix)]
    async fn restrict_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn restrict_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self, scopes: &ScopeSet) -> Result<Option<CredentialRecord>> {
        let path = self.path_for(scopes);

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No token file for {} at {:?}", scopes, path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let record: CredentialRecord = match serde_json::from_str(&contents) {
            Ok(record) => record,
            Err(e) => {
                warn!("Ignoring unreadable token file {:?}: {}", path, e);
                return Ok(None);
            }
        };

        if &record.scopes != scopes {
            warn!(
                "Token file {:?} holds scopes [{}], expected [{}]; ignoring",
                path,
                record.scopes.joined(),
                scopes.joined()
            );
            return Ok(None);
        }

        debug!("Loaded credential for {} from {:?}", scopes, path);
        Ok(Some(record))
    }

    async fn store(&self, record: &CredentialRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(&record.scopes);
        let tmp = self.dir.join(format!(
            ".{}.{}.tmp",
            record.scopes.token_file_name(),
            uuid::Uuid::new_v4()
        ));

        let data = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, &data).await?;
        Self::restrict_permissions(&tmp).await?;

        // Rename is atomic, readers never see a half-written record
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        info!("Stored credential for {} at {:?}", record.scopes, path);
        Ok(())
    }

    async fn delete(&self, scopes: &ScopeSet) -> Result<()> {
        let path = self.path_for(scopes);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted credential for {}", scopes);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No credential to delete for {}", scopes);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
