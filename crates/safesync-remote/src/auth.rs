//! OAuth2 PKCE flow for Dropbox
//!
//! Implements the Authorization Code flow with PKCE (RFC 7636) for a
//! native client without a secret. Offline access is requested so the
//! token response carries a refresh token.
//!
//! ## Components
//!
//! - [`OAuth2Config`] - Endpoints, app key, redirect port and scopes
//! - [`PKCEFlow`] - Challenge generation, code exchange and refresh
//! - [`LocalCallbackServer`] - One-shot loopback server for the redirect

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, CsrfToken, EndpointNotSet,
    EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use tracing::{debug, info, warn};

use safesync_core::config::DropboxConfig;
use safesync_core::ports::{RemoteError, Tokens};

use crate::LinkError;

/// Scopes needed to read the account and read/write files
pub const DROPBOX_SCOPES: &[&str] = &[
    "account_info.read",
    "files.metadata.write",
    "files.content.read",
    "files.content.write",
];

/// Lifetime assumed when the token response omits `expires_in`
const DEFAULT_TOKEN_LIFETIME_HOURS: i64 = 4;

// ============================================================================
// OAuth2Config
// ============================================================================

/// Configuration for the OAuth2 PKCE flow
#[derive(Debug, Clone)]
pub struct OAuth2Config {
    pub app_key: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_port: u16,
    pub scopes: Vec<String>,
}

impl OAuth2Config {
    /// Build from the Dropbox section of the configuration
    ///
    /// Fails when no app key is configured.
    pub fn from_dropbox(config: &DropboxConfig) -> Result<Self, LinkError> {
        let app_key = config
            .app_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(LinkError::NotConfigured("dropbox.app_key"))?;
        Ok(Self {
            app_key,
            auth_url: config.auth_url.clone(),
            token_url: config.token_url.clone(),
            redirect_port: config.redirect_port,
            scopes: DROPBOX_SCOPES.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/callback", self.redirect_port)
    }
}

// ============================================================================
// PKCEFlow
// ============================================================================

/// OAuth2 PKCE flow implementation using the `oauth2` crate
pub struct PKCEFlow {
    client: BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>,
    http: reqwest::Client,
    scopes: Vec<String>,
}

impl PKCEFlow {
    pub fn new(config: &OAuth2Config) -> Result<Self> {
        let client = BasicClient::new(ClientId::new(config.app_key.clone()))
            .set_auth_uri(AuthUrl::new(config.auth_url.clone()).context("Invalid authorization URL")?)
            .set_token_uri(TokenUrl::new(config.token_url.clone()).context("Invalid token URL")?)
            .set_redirect_uri(
                RedirectUrl::new(config.redirect_uri()).context("Invalid redirect URI")?,
            );

        // Token endpoints must not follow redirects.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build OAuth HTTP client")?;

        Ok(Self {
            client,
            http,
            scopes: config.scopes.clone(),
        })
    }

    /// Authorization URL with a PKCE challenge
    ///
    /// Returns `(authorization_url, csrf_token, pkce_verifier)`; the
    /// verifier must be kept until the code exchange.
    pub fn generate_auth_url(&self) -> (String, CsrfToken, PkceCodeVerifier) {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut auth_request = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_extra_param("token_access_type", "offline");
        for scope in &self.scopes {
            auth_request = auth_request.add_scope(Scope::new(scope.clone()));
        }

        let (auth_url, csrf_token) = auth_request.set_pkce_challenge(pkce_challenge).url();
        debug!("Generated authorization URL");
        (auth_url.to_string(), csrf_token, pkce_verifier)
    }

    /// Exchange an authorization code for tokens
    pub async fn exchange_code(
        &self,
        code: String,
        pkce_verifier: PkceCodeVerifier,
    ) -> Result<Tokens> {
        info!("Exchanging authorization code for tokens");

        let token_result = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(&self.http)
            .await
            .context("Failed to exchange authorization code")?;

        Ok(Tokens {
            access_token: token_result.access_token().secret().to_string(),
            refresh_token: token_result.refresh_token().map(|t| t.secret().to_string()),
            expires_at: expires_at(token_result.expires_in()),
        })
    }

    /// Obtain a fresh access token
    ///
    /// A rejected refresh token is reported as
    /// [`RemoteError::Unauthorized`]; the previous refresh token is kept
    /// when the response carries none.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<Tokens> {
        debug!("Refreshing access token");

        let token_result = match self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
        {
            Ok(result) => result,
            Err(RequestTokenError::ServerResponse(resp)) => {
                warn!(error = %resp.error(), "Refresh token rejected");
                return Err(RemoteError::Unauthorized(format!("refresh rejected: {}", resp.error())).into());
            }
            Err(err) => return Err(RemoteError::Network(err.to_string()).into()),
        };

        info!("Refreshed access token");
        Ok(Tokens {
            access_token: token_result.access_token().secret().to_string(),
            refresh_token: token_result
                .refresh_token()
                .map(|t| t.secret().to_string())
                .or_else(|| Some(refresh_token.to_string())),
            expires_at: expires_at(token_result.expires_in()),
        })
    }
}

fn expires_at(expires_in: Option<std::time::Duration>) -> chrono::DateTime<Utc> {
    expires_in
        .and_then(|d| Duration::from_std(d).ok())
        .map(|d| Utc::now() + d)
        .unwrap_or_else(|| Utc::now() + Duration::hours(DEFAULT_TOKEN_LIFETIME_HOURS))
}

// ============================================================================
// LocalCallbackServer
// ============================================================================

/// Parameters extracted from the OAuth2 callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
}

/// Minimal HTTP server on the loopback interface that receives the OAuth2
/// redirect
///
/// Binding and waiting are separate so the browser is only opened once
/// the port is ours.
pub struct LocalCallbackServer {
    listener: tokio::net::TcpListener,
}

impl LocalCallbackServer {
    pub async fn bind(port: u16) -> Result<Self> {
        let addr = format!("127.0.0.1:{port}");
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind callback server to {addr}"))?;
        info!(%addr, "OAuth callback server listening");
        Ok(Self { listener })
    }

    /// Serve connections until one carries an authorization code
    pub async fn wait(self) -> Result<CallbackParams> {
        use http_body_util::Full;
        use hyper::body::Bytes;
        use hyper::server::conn::http1;
        use hyper::service::service_fn;
        use hyper::{Request, Response, StatusCode};
        use hyper_util::rt::TokioIo;
        use tokio::sync::mpsc;

        let (tx, mut rx) = mpsc::channel::<CallbackParams>(1);

        loop {
            let (stream, _addr) = tokio::select! {
                accepted = self.listener.accept() => {
                    accepted.context("Failed to accept connection on callback server")?
                }
                Some(params) = rx.recv() => {
                    info!("Received OAuth callback");
                    return Ok(params);
                }
            };

            let tx = tx.clone();
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let tx = tx.clone();
                async move {
                    let uri = req.uri().to_string();
                    debug!(%uri, "Callback server received request");

                    let (status, html) = match parse_callback_params(&uri) {
                        Some(params) => {
                            let _ = tx.send(params).await;
                            (StatusCode::OK, success_html())
                        }
                        None => (
                            StatusCode::BAD_REQUEST,
                            error_html("Missing authorization code in callback"),
                        ),
                    };
                    let mut response = Response::new(Full::new(Bytes::from(html)));
                    *response.status_mut() = status;
                    response.headers_mut().insert(
                        hyper::header::CONTENT_TYPE,
                        hyper::header::HeaderValue::from_static("text/html; charset=utf-8"),
                    );
                    Ok::<_, hyper::Error>(response)
                }
            });

            tokio::spawn(async move {
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    warn!("Callback server connection error: {}", e);
                }
            });
        }
    }
}

/// Parse the authorization code and state from a callback URI
fn parse_callback_params(uri: &str) -> Option<CallbackParams> {
    let url = url::Url::parse(&format!("http://localhost{uri}")).ok()?;
    let mut code = None;
    let mut state = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.to_string()),
            "state" => state = Some(value.to_string()),
            _ => {}
        }
    }

    Some(CallbackParams {
        code: code?,
        state: state.unwrap_or_default(),
    })
}

fn success_html() -> String {
    r#"<!DOCTYPE html>
<html>
<head><title>SafeSync - Account Linked</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 50px;">
    <h1>Account Linked</h1>
    <p>SafeSync can now sync your password safes with Dropbox.</p>
    <p>You can close this window.</p>
</body>
</html>"#
        .to_string()
}

fn error_html(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>SafeSync - Link Failed</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 50px;">
    <h1>Link Failed</h1>
    <p>{message}</p>
    <p>Please close this window and try again.</p>
</body>
</html>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OAuth2Config {
        let mut dropbox = DropboxConfig::default();
        dropbox.app_key = Some("app-key-1".to_string());
        OAuth2Config::from_dropbox(&dropbox).unwrap()
    }

    #[test]
    fn test_config_from_dropbox() {
        let config = config();
        assert_eq!(config.app_key, "app-key-1");
        assert_eq!(config.redirect_uri(), "http://127.0.0.1:8400/callback");
        assert!(config.scopes.contains(&"files.content.write".to_string()));
    }

    #[test]
    fn test_config_requires_app_key() {
        let err = OAuth2Config::from_dropbox(&DropboxConfig::default()).unwrap_err();
        assert!(matches!(err, LinkError::NotConfigured("dropbox.app_key")));
    }

    #[test]
    fn test_auth_url_requests_offline_access() {
        let flow = PKCEFlow::new(&config()).unwrap();
        let (url, csrf, _verifier) = flow.generate_auth_url();

        assert!(url.starts_with("https://www.dropbox.com/oauth2/authorize"));
        assert!(url.contains("client_id=app-key-1"));
        assert!(url.contains("token_access_type=offline"));
        assert!(url.contains("code_challenge"));
        assert!(url.contains(csrf.secret()));
    }

    #[test]
    fn test_parse_callback_params() {
        let params = parse_callback_params("/callback?code=abc123&state=xyz789").unwrap();
        assert_eq!(params.code, "abc123");
        assert_eq!(params.state, "xyz789");

        assert!(parse_callback_params("/callback?state=xyz789").is_none());
        assert_eq!(
            parse_callback_params("/callback?code=abc").unwrap().state,
            ""
        );
    }

    #[test]
    fn test_html_pages() {
        assert!(success_html().contains("Account Linked"));
        assert!(error_html("bad state").contains("bad state"));
    }

    #[tokio::test]
    async fn test_callback_server_receives_code() {
        let server = LocalCallbackServer::bind(0).await.unwrap();
        let port = server.listener.local_addr().unwrap().port();
        let waiter = tokio::spawn(server.wait());

        let body = reqwest::get(format!("http://127.0.0.1:{port}/callback?code=c1&state=s1"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("Account Linked"));

        let params = waiter.await.unwrap().unwrap();
        assert_eq!(
            params,
            CallbackParams {
                code: "c1".to_string(),
                state: "s1".to_string()
            }
        );
    }
}
