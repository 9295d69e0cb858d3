//! Interactive browser consent with a one-shot local callback listener

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::OAuthConfig;
use crate::error::{Error, Result};
use crate::local_http::{read_request_line, write_html};
use crate::models::{CredentialRecord, ScopeSet};

use super::{authorization_url, TokenEndpoint};

/// Obtains a brand-new credential for a scope set
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, scopes: &ScopeSet) -> Result<CredentialRecord>;
}

/// Presents the consent URL to the user
pub type UrlOpener = Arc<dyn Fn(&str) + Send + Sync>;

/// Browser-based authorization code flow.
///
/// Only one flow may run per process: the callback port is fixed, so a
/// second concurrent caller fails fast with `ResourceExhausted` instead of
/// racing for the port.
pub struct InteractiveAuthorizer {
    endpoint: Arc<dyn TokenEndpoint>,
    client_id: String,
    auth_uri: String,
    port: u16,
    timeout: Duration,
    opener: UrlOpener,
    in_flight: Mutex<()>,
}

impl InteractiveAuthorizer {
    pub fn new(endpoint: Arc<dyn TokenEndpoint>, client_id: impl Into<String>, config: &OAuthConfig) -> Self {
        Self {
            endpoint,
            client_id: client_id.into(),
            auth_uri: config.auth_uri.clone(),
            port: config.callback_port,
            timeout: Duration::from_secs(config.callback_timeout_secs),
            opener: Arc::new(open_in_browser),
            in_flight: Mutex::new(()),
        }
    }

    /// Replace how the consent URL is presented
    pub fn with_opener(mut self, opener: UrlOpener) -> Self {
        self.opener = opener;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Redirect URI registered with Google for this client
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/", self.port)
    }

    async fn run_flow(&self, scopes: &ScopeSet) -> Result<CredentialRecord> {
        let listener = TcpListener::bind(("127.0.0.1", self.port))
            .await
            .map_err(|e| {
                Error::Authorization(format!(
                    "Cannot listen for the OAuth callback on port {}: {}",
                    self.port, e
                ))
            })?;
        debug!("OAuth callback listener on port {}", self.port);

        let state = format!("gassist_{}", uuid::Uuid::new_v4());
        let redirect_uri = self.redirect_uri();
        let url = authorization_url(&self.auth_uri, &self.client_id, &redirect_uri, scopes, &state);

        info!("Waiting for browser consent for {}", scopes);
        (self.opener)(&url);

        let (code, mut browser) =
            match tokio::time::timeout(self.timeout, wait_for_callback(&listener, &state)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(Error::Authorization(format!(
                        "Timed out after {}s waiting for browser consent",
                        self.timeout.as_secs()
                    )))
                }
            };

        // The browser only learns the outcome once the exchange is done
        let tokens = match self.endpoint.exchange_code(&code, &redirect_uri).await {
            Ok(tokens) => {
                write_html(&mut browser, "200 OK", SUCCESS_PAGE).await;
                tokens
            }
            Err(e) => {
                write_html(&mut browser, "200 OK", EXCHANGE_FAILED_PAGE).await;
                return Err(Error::Authorization(format!("Code exchange failed: {}", e)));
            }
        };

        drop(listener);
        debug!("OAuth callback listener on port {} closed", self.port);

        if tokens.refresh_token.is_none() {
            warn!("Google did not issue a refresh token for {}", scopes);
        }
        Ok(tokens.into_record(scopes, None))
    }
}

#[async_trait]
impl Authorizer for InteractiveAuthorizer {
    async fn authorize(&self, scopes: &ScopeSet) -> Result<CredentialRecord> {
        let _guard = self.in_flight.try_lock().map_err(|_| {
            Error::ResourceExhausted(
                "Another browser authorization is already in progress".to_string(),
            )
        })?;
        self.run_flow(scopes).await
    }
}

fn open_in_browser(url: &str) {
    eprintln!("\nOpen this URL in your browser to grant access:\n\n{}\n", url);
    if let Err(e) = open::that(url) {
        debug!("Could not launch a browser: {}", e);
    }
}

/// Query parameters of a callback request
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Parse the request line of a callback request.
///
/// Request line looks like: `GET /?state=yyy&code=xxx HTTP/1.1`
pub fn parse_callback(request_line: &str) -> Result<CallbackParams> {
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(Error::InvalidRequest("Invalid HTTP request".to_string()));
    }

    let mut params = CallbackParams::default();
    let Some((_, query)) = parts[1].split_once('?') else {
        return Ok(params);
    };

    for param in query.split('&') {
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        let value = urlencoding::decode(&value.replace('+', " "))
            .map_err(|e| Error::InvalidRequest(format!("Failed to decode {}: {}", key, e)))?
            .into_owned();
        match key {
            "code" => params.code = Some(value),
            "state" => params.state = Some(value),
            "error" => params.error = Some(value),
            _ => {}
        }
    }

    Ok(params)
}

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>gassist - Success</title>
</head>
<body style="font-family: -apple-system, BlinkMacSystemFont, sans-serif; padding: 40px; text-align: center;">
    <h1>Authentication Successful!</h1>
    <p>You can close this window and return to your assistant.</p>
</body>
</html>"#;

const EXCHANGE_FAILED_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>gassist - Error</title>
</head>
<body style="font-family: -apple-system, BlinkMacSystemFont, sans-serif; padding: 40px; text-align: center;">
    <h1>Authorization could not be completed</h1>
    <p>Google rejected the authorization code. Close this window and try again.</p>
</body>
</html>"#;

/// Serve callback requests until one carries a code or an error.
///
/// Each connection is read on its own task, so a browser preconnect that
/// never sends a request cannot hold up the real redirect. On success the
/// browser's socket is handed back so the final page can be written later.
async fn wait_for_callback(listener: &TcpListener, expected_state: &str) -> Result<(String, TcpStream)> {
    let (tx, mut rx) = mpsc::channel::<(TcpStream, String)>(16);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (mut socket, peer) = accepted?;
                let tx = tx.clone();
                tokio::spawn(async move {
                    match read_request_line(&mut socket).await {
                        Ok(line) => {
                            let _ = tx.send((socket, line)).await;
                        }
                        Err(e) => debug!("Dropping callback connection from {}: {}", peer, e),
                    }
                });
            }
            Some((socket, request_line)) = rx.recv() => {
                if let Some(outcome) = handle_callback(socket, &request_line, expected_state).await {
                    return outcome;
                }
            }
        }
    }
}

/// Answer one callback request. `None` means keep waiting.
async fn handle_callback(
    mut socket: TcpStream,
    request_line: &str,
    expected_state: &str,
) -> Option<Result<(String, TcpStream)>> {
    let params = match parse_callback(request_line) {
        Ok(params) => params,
        Err(_) => {
            write_html(&mut socket, "400 Bad Request", "<h1>Bad request</h1>").await;
            return None;
        }
    };

    if let Some(error) = params.error {
        write_html(
            &mut socket,
            "200 OK",
            "<h1>Authorization was not granted</h1><p>You can close this window.</p>",
        )
        .await;
        return Some(Err(Error::Authorization(format!(
            "Consent was not granted: {}",
            error
        ))));
    }

    let Some(code) = params.code else {
        // favicon.ico and friends
        write_html(&mut socket, "404 Not Found", "<h1>Not found</h1>").await;
        return None;
    };

    if params.state.as_deref() != Some(expected_state) {
        write_html(&mut socket, "400 Bad Request", "<h1>Error: Invalid state</h1>").await;
        return Some(Err(Error::Authorization(
            "OAuth state mismatch - possible CSRF attack".to_string(),
        )));
    }

    Some(Ok((code, socket)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::TokenResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;

    struct FakeEndpoint {
        exchanges: AtomicUsize,
        reject: bool,
    }

    #[async_trait]
    impl TokenEndpoint for FakeEndpoint {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenResponse> {
            Err(Error::OAuth("not used".to_string()))
        }

        async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            assert!(redirect_uri.starts_with("http://localhost:"));
            if self.reject {
                return Err(Error::OAuth("invalid_grant: Bad Request".to_string()));
            }
            Ok(TokenResponse {
                access_token: format!("access-for-{}", code),
                refresh_token: Some("1//refresh".to_string()),
                expires_in: 3600,
                token_type: Some("Bearer".to_string()),
                scope: None,
            })
        }
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn authorizer(port: u16) -> (Arc<InteractiveAuthorizer>, Arc<FakeEndpoint>, mpsc::UnboundedReceiver<String>) {
        authorizer_with(port, false)
    }

    /// Authorizer whose opener hands the consent URL to the test
    fn authorizer_with(
        port: u16,
        reject: bool,
    ) -> (Arc<InteractiveAuthorizer>, Arc<FakeEndpoint>, mpsc::UnboundedReceiver<String>) {
        let endpoint = Arc::new(FakeEndpoint {
            exchanges: AtomicUsize::new(0),
            reject,
        });
        let mut config = OAuthConfig::default();
        config.callback_port = port;
        let (tx, rx) = mpsc::unbounded_channel();
        let auth = InteractiveAuthorizer::new(endpoint.clone(), "client-123", &config)
            .with_opener(Arc::new(move |url: &str| {
                let _ = tx.send(url.to_string());
            }))
            .with_timeout(Duration::from_secs(10));
        (Arc::new(auth), endpoint, rx)
    }

    fn state_from(url: &str) -> String {
        let parsed = url::Url::parse(url).unwrap();
        parsed
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    async fn get(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_parse_callback() {
        let params = parse_callback("GET /?state=gassist_1&code=4%2F0Ab&scope=x HTTP/1.1\r\n").unwrap();
        assert_eq!(params.code.as_deref(), Some("4/0Ab"));
        assert_eq!(params.state.as_deref(), Some("gassist_1"));
        assert_eq!(params.error, None);

        let denied = parse_callback("GET /?error=access_denied&state=s HTTP/1.1").unwrap();
        assert_eq!(denied.error.as_deref(), Some("access_denied"));

        assert_eq!(parse_callback("GET /favicon.ico HTTP/1.1").unwrap(), CallbackParams::default());
        assert!(parse_callback("garbage").is_err());
    }

    #[tokio::test]
    async fn test_full_flow_ignores_stray_requests() {
        let port = free_port();
        let (auth, endpoint, mut urls) = authorizer(port);

        let flow = {
            let auth = auth.clone();
            tokio::spawn(async move { auth.authorize(&ScopeSet::calendar()).await })
        };

        let url = urls.recv().await.unwrap();
        assert!(url.contains("access_type=offline"));
        let state = state_from(&url);

        let stray = get(port, "/favicon.ico").await;
        assert!(stray.starts_with("HTTP/1.1 404"));

        let ok = get(port, &format!("/?state={}&code=abc", state)).await;
        assert!(ok.starts_with("HTTP/1.1 200"));

        let record = flow.await.unwrap().unwrap();
        assert_eq!(record.access_token, "access-for-abc");
        assert_eq!(record.refresh_token.as_deref(), Some("1//refresh"));
        assert_eq!(record.scopes, ScopeSet::calendar());
        assert_eq!(endpoint.exchanges.load(Ordering::SeqCst), 1);

        // Listener is gone once the flow returns
        assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_block_callback() {
        let port = free_port();
        let (auth, _, mut urls) = authorizer(port);

        let flow = {
            let auth = auth.clone();
            tokio::spawn(async move { auth.authorize(&ScopeSet::calendar()).await })
        };
        let url = urls.recv().await.unwrap();

        // A speculative preconnect that never sends a request
        let _idle = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

        let ok = tokio::time::timeout(
            Duration::from_secs(3),
            get(port, &format!("/?state={}&code=abc", state_from(&url))),
        )
        .await
        .expect("callback answered while another connection sits idle");
        assert!(ok.starts_with("HTTP/1.1 200"));
        assert!(ok.contains("Authentication Successful!"));

        let record = flow.await.unwrap().unwrap();
        assert_eq!(record.access_token, "access-for-abc");
    }

    #[tokio::test]
    async fn test_rejected_exchange_shows_failure_page() {
        let port = free_port();
        let (auth, endpoint, mut urls) = authorizer_with(port, true);

        let flow = {
            let auth = auth.clone();
            tokio::spawn(async move { auth.authorize(&ScopeSet::gmail()).await })
        };
        let url = urls.recv().await.unwrap();

        let response = get(port, &format!("/?state={}&code=stale", state_from(&url))).await;
        assert!(response.contains("could not be completed"));
        assert!(!response.contains("Successful"));

        let err = flow.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Authorization(ref msg) if msg.contains("Code exchange failed")));
        assert_eq!(endpoint.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_port_in_use_fails() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();
        let (auth, _, _urls) = authorizer(port);

        let err = auth.authorize(&ScopeSet::tasks()).await.unwrap_err();
        assert!(matches!(err, Error::Authorization(_)));
    }

    #[tokio::test]
    async fn test_second_concurrent_flow_is_rejected() {
        let port = free_port();
        let (auth, _, mut urls) = authorizer(port);

        let first = {
            let auth = auth.clone();
            tokio::spawn(async move { auth.authorize(&ScopeSet::gmail()).await })
        };
        let url = urls.recv().await.unwrap();

        let err = auth.authorize(&ScopeSet::gmail()).await.unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));

        get(port, &format!("/?state={}&code=xyz", state_from(&url))).await;
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_denied_consent() {
        let port = free_port();
        let (auth, endpoint, mut urls) = authorizer(port);

        let flow = {
            let auth = auth.clone();
            tokio::spawn(async move { auth.authorize(&ScopeSet::tasks()).await })
        };
        let url = urls.recv().await.unwrap();
        get(port, &format!("/?state={}&error=access_denied", state_from(&url))).await;

        let err = flow.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Authorization(ref msg) if msg.contains("access_denied")));
        assert_eq!(endpoint.exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_state_mismatch_fails() {
        let port = free_port();
        let (auth, _, mut urls) = authorizer(port);

        let flow = {
            let auth = auth.clone();
            tokio::spawn(async move { auth.authorize(&ScopeSet::tasks()).await })
        };
        urls.recv().await.unwrap();
        let response = get(port, "/?state=forged&code=abc").await;
        assert!(response.starts_with("HTTP/1.1 400"));

        let err = flow.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Authorization(ref msg) if msg.contains("state mismatch")));
    }

    #[tokio::test]
    async fn test_timeout() {
        let port = free_port();
        let (auth, _, _urls) = authorizer(port);
        let auth = Arc::try_unwrap(auth)
            .ok()
            .unwrap()
            .with_timeout(Duration::from_millis(100));

        let err = auth.authorize(&ScopeSet::calendar()).await.unwrap_err();
        assert!(matches!(err, Error::Authorization(ref msg) if msg.contains("Timed out")));
    }
}
