use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::ScopeSet;
use crate::oauth::CredentialBroker;

use super::{ApiRequest, RemoteApi};

/// Google REST client that authenticates through the credential broker
pub struct GoogleApiClient {
    http: Client,
    broker: Arc<CredentialBroker>,
}

impl GoogleApiClient {
    pub fn new(http: Client, broker: Arc<CredentialBroker>) -> Self {
        Self { http, broker }
    }
}

#[async_trait]
impl RemoteApi for GoogleApiClient {
    async fn call(&self, scopes: &ScopeSet, request: ApiRequest) -> Result<Value> {
        let credential = self.broker.acquire(scopes).await?;

        debug!("{} {}", request.method, request.url);
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .bearer_auth(&credential.access_token);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = google_error_message(&text).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Unknown error")
                    .to_string()
            });
            let message = if status == StatusCode::TOO_MANY_REQUESTS {
                format!("Rate limited by Google, retry later: {}", message)
            } else {
                message
            };
            warn!("{} {} returned {}: {}", request.method, request.url, status, message);
            return Err(Error::RemoteApi {
                status: status.as_u16(),
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// Pull `error.message` out of a Google error body
fn google_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match &value["error"] {
        Value::Object(error) => error.get("message")?.as_str().map(String::from),
        // OAuth-style errors: {"error": "invalid_grant", "error_description": "..."}
        Value::String(code) => Some(
            value["error_description"]
                .as_str()
                .map(|d| format!("{}: {}", code, d))
                .unwrap_or_else(|| code.clone()),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::broker_with_valid_credentials;

    async fn client() -> (GoogleApiClient, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let broker = broker_with_valid_credentials(dir.path(), &[ScopeSet::tasks()]).await;
        (GoogleApiClient::new(Client::new(), broker), dir)
    }

    #[test]
    fn test_google_error_message() {
        let body = r#"{"error":{"code":404,"message":"Not Found","errors":[]}}"#;
        assert_eq!(google_error_message(body).as_deref(), Some("Not Found"));
        assert_eq!(
            google_error_message(r#"{"error":"invalid_grant"}"#).as_deref(),
            Some("invalid_grant")
        );
        assert_eq!(google_error_message("<html>"), None);
    }

    #[tokio::test]
    async fn test_call_sends_bearer_and_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/lists/@default/tasks")
            .match_header("authorization", "Bearer valid-token")
            .match_query(mockito::Matcher::UrlEncoded("maxResults".into(), "5".into()))
            .with_status(200)
            .with_body(r#"{"items":[{"id":"t1"}]}"#)
            .create_async()
            .await;

        let (client, _dir) = client().await;
        let request = ApiRequest::get(format!("{}/lists/@default/tasks", server.url())).query("maxResults", 5);
        let value = client.call(&ScopeSet::tasks(), request).await.unwrap();
        assert_eq!(value["items"][0]["id"], "t1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_body_is_empty_object() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/lists/@default/tasks/t1")
            .with_status(204)
            .create_async()
            .await;

        let (client, _dir) = client().await;
        let value = client
            .call(
                &ScopeSet::tasks(),
                ApiRequest::delete(format!("{}/lists/@default/tasks/t1", server.url())),
            )
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_error_status_carries_google_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/lists/@default/tasks/missing")
            .with_status(404)
            .with_body(r#"{"error":{"code":404,"message":"Task not found."}}"#)
            .create_async()
            .await;

        let (client, _dir) = client().await;
        let err = client
            .call(
                &ScopeSet::tasks(),
                ApiRequest::get(format!("{}/lists/@default/tasks/missing", server.url())),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            Error::RemoteApi { status: 404, message } if message == "Task not found."
        ));
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/users/me/tasklists")
            .with_status(429)
            .with_body(r#"{"error":{"code":429,"message":"Quota exceeded"}}"#)
            .create_async()
            .await;

        let (client, _dir) = client().await;
        let err = client
            .call(
                &ScopeSet::tasks(),
                ApiRequest::get(format!("{}/users/me/tasklists", server.url())),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(429));
        assert!(err.to_string().contains("Rate limited"));
    }
}
