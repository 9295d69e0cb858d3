//! OAuth 2.0 for Google APIs
//!
//! - [`TokenEndpoint`]: code exchange and refresh against the token URL
//! - [`InteractiveAuthorizer`]: browser consent with a one-shot local callback
//! - [`CredentialBroker`]: cached, refreshed, persisted credentials per scope set

mod authorizer;
mod broker;

pub use authorizer::{parse_callback, Authorizer, CallbackParams, InteractiveAuthorizer, UrlOpener};
pub use broker::{CredentialBroker, CredentialStatus};

use std::path::Path;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::config::OAuthConfig;
use crate::error::{Error, Result};
use crate::models::{CredentialRecord, ScopeSet};

/// OAuth client identity registered with Google
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    /// OAuth client ID
    pub client_id: String,

    /// OAuth client secret
    pub client_secret: String,
}

/// Shape of the client secrets file downloaded from the Cloud Console
#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecretsEntry>,
    web: Option<ClientSecretsEntry>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsEntry {
    client_id: String,
    client_secret: String,
}

impl ClientCredentials {
    /// Load credentials from env vars, falling back to the client secrets file
    pub fn load(config: &OAuthConfig) -> Result<Self> {
        if let Some(creds) = Self::from_env() {
            debug!("Using OAuth client credentials from environment");
            return Ok(creds);
        }
        Self::from_secrets_file(&config.client_secrets_path)
    }

    /// Read `GASSIST_CLIENT_ID`/`GASSIST_CLIENT_SECRET` (or the `GOOGLE_` variants)
    pub fn from_env() -> Option<Self> {
        let client_id = std::env::var("GASSIST_CLIENT_ID")
            .or_else(|_| std::env::var("GOOGLE_CLIENT_ID"))
            .ok()?;
        let client_secret = std::env::var("GASSIST_CLIENT_SECRET")
            .or_else(|_| std::env::var("GOOGLE_CLIENT_SECRET"))
            .ok()?;
        Some(Self {
            client_id,
            client_secret,
        })
    }

    /// Read a Google client secrets JSON file
    pub fn from_secrets_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Cannot read OAuth client secrets at {:?}: {}",
                path, e
            ))
        })?;
        Self::parse_client_secrets(&contents)
    }

    /// Parse the `installed` (desktop) or `web` section of a client secrets file
    pub fn parse_client_secrets(contents: &str) -> Result<Self> {
        let file: ClientSecretsFile = serde_json::from_str(contents)?;
        let entry = file.installed.or(file.web).ok_or_else(|| {
            Error::Config("Client secrets file has no 'installed' or 'web' section".to_string())
        })?;
        Ok(Self {
            client_id: entry.client_id,
            client_secret: entry.client_secret,
        })
    }
}

/// Response from Google token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

impl TokenResponse {
    /// Turn a token response into a record for `scopes`.
    ///
    /// `previous_refresh` is kept when the endpoint did not issue a new refresh token.
    pub fn into_record(self, scopes: &ScopeSet, previous_refresh: Option<String>) -> CredentialRecord {
        CredentialRecord {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expiry: Utc::now() + Duration::seconds(self.expires_in),
            scopes: scopes.clone(),
        }
    }
}

/// The token URL operations the broker and authorizer depend on
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange a refresh token for a new access token
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse>;

    /// Exchange an authorization code for tokens
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse>;
}

/// Google's token endpoint
pub struct GoogleTokenEndpoint {
    credentials: ClientCredentials,
    token_uri: String,
    client: Client,
}

impl GoogleTokenEndpoint {
    pub fn new(credentials: ClientCredentials, token_uri: impl Into<String>, client: Client) -> Self {
        Self {
            credentials,
            token_uri: token_uri.into(),
            client,
        }
    }

    async fn post_form(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .client
            .post(&self.token_uri)
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Token endpoint returned {}: {}", status, body);
            return Err(Error::OAuth(format!(
                "Token endpoint returned {}: {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::OAuth(format!("Malformed token response: {}", e)))?;
        Ok(token_response)
    }
}

#[async_trait]
impl TokenEndpoint for GoogleTokenEndpoint {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        debug!("Refreshing access token");
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        self.post_form(&params).await
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse> {
        info!("Exchanging authorization code for tokens");
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];
        self.post_form(&params).await
    }
}

/// Generate the OAuth authorization URL for a scope set.
///
/// Requests offline access and forces the consent screen so Google issues a
/// refresh token even when one was granted before.
pub fn authorization_url(
    auth_uri: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &ScopeSet,
    state: &str,
) -> String {
    format!(
        "{}?\
         client_id={}&\
         redirect_uri={}&\
         response_type=code&\
         scope={}&\
         access_type=offline&\
         prompt=consent&\
         state={}",
        auth_uri,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&scopes.joined()),
        urlencoding::encode(state)
    )
}
