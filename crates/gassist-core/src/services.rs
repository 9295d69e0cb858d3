//! Wiring of the long-lived services shared by the binaries

use std::sync::Arc;

use tracing::info;

use crate::api::{build_http_client, GoogleApiClient, RemoteApi};
use crate::config::Config;
use crate::delivery::AttachmentDeliveryServer;
use crate::error::Result;
use crate::fetcher::AttachmentFetcher;
use crate::oauth::{ClientCredentials, CredentialBroker, GoogleTokenEndpoint, InteractiveAuthorizer};
use crate::token_store::create_token_store;
use crate::tools::ToolContext;

/// One instance of every service, built from configuration
pub struct Services {
    pub broker: Arc<CredentialBroker>,
    pub api: Arc<dyn RemoteApi>,
    pub delivery: Arc<AttachmentDeliveryServer>,
    pub fetcher: Arc<AttachmentFetcher>,
}

impl Services {
    /// Build the service graph.
    ///
    /// Fails only when OAuth client credentials cannot be found or the HTTP
    /// client cannot be built; nothing touches the network here.
    pub fn from_config(config: &Config) -> Result<Self> {
        let credentials = ClientCredentials::load(&config.oauth)?;
        let http = build_http_client(&config.http)?;

        let store = create_token_store(config);
        let client_id = credentials.client_id.clone();
        let endpoint = Arc::new(GoogleTokenEndpoint::new(
            credentials,
            config.oauth.token_uri.clone(),
            http.clone(),
        ));
        let authorizer = Arc::new(InteractiveAuthorizer::new(
            endpoint.clone(),
            client_id,
            &config.oauth,
        ));
        let broker = Arc::new(CredentialBroker::new(store, endpoint, authorizer));

        let api: Arc<dyn RemoteApi> = Arc::new(GoogleApiClient::new(http, broker.clone()));
        let delivery = Arc::new(AttachmentDeliveryServer::from_config(config));
        let fetcher = Arc::new(AttachmentFetcher::new(
            api.clone(),
            delivery.clone(),
            config.delivery.download_dir.clone(),
        ));

        info!(
            "Services ready (tokens in {:?}, downloads in {:?})",
            config.oauth.token_dir, config.delivery.download_dir
        );
        Ok(Self {
            broker,
            api,
            delivery,
            fetcher,
        })
    }

    /// Context handed to every tool invocation
    pub fn tool_context(&self) -> ToolContext {
        ToolContext::new(self.api.clone(), self.fetcher.clone())
    }
}
