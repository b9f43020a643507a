//! Shared HTTP plumbing for the remote stores
//!
//! Builds the `reqwest` client from the network configuration and turns
//! transport failures and error statuses into [`RemoteError`] so the
//! syncer can classify them.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use safesync_core::config::NetworkConfig;
use safesync_core::ports::RemoteError;

/// User agent sent with every request
const USER_AGENT: &str = concat!("safesync/", env!("CARGO_PKG_VERSION"));

/// Longest `Retry-After` honoured
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// HTTP client honouring the configured timeouts
pub fn build_client(network: &NetworkConfig) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(network.timeout_secs))
        .connect_timeout(Duration::from_secs(network.connect_timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

/// Classify a failure to get any response
pub fn send_error(err: reqwest::Error) -> RemoteError {
    RemoteError::Network(err.to_string())
}

/// Classify an error status; `message` is the provider's error text
pub fn status_error(status: StatusCode, retry_after: Option<Duration>, message: String) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED => RemoteError::Unauthorized(message),
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => RemoteError::TooManyRequests { retry_after },
        s if s.is_server_error() => RemoteError::Server(message),
        _ => RemoteError::InvalidResponse(message),
    }
}

/// `Retry-After` of a response, if present and parseable
pub fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}

/// Parse a `Retry-After` value: delay seconds or an HTTP date
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    match chrono::DateTime::parse_from_rfc2822(value) {
        Ok(date) => {
            let wait = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
            Some(wait.to_std().unwrap_or(Duration::ZERO).min(MAX_RETRY_AFTER))
        }
        Err(_) => {
            warn!(value, "Could not parse Retry-After header");
            None
        }
    }
}

/// Stream a response body into `dest`
///
/// The file is created or truncated; a partial file is left behind on
/// failure for the caller to discard.
pub async fn stream_to_file(response: Response, dest: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    let mut written = 0u64;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(send_error)?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;

    debug!(bytes = written, dest = %dest.display(), "Downloaded file");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, None, "x".into()),
            RemoteError::Unauthorized(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, None, "x".into()),
            RemoteError::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, None, "x".into()),
            RemoteError::Server(_)
        ));
        assert!(matches!(
            status_error(StatusCode::CONFLICT, None, "x".into()),
            RemoteError::InvalidResponse(_)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(3)), "x".into()),
            RemoteError::TooManyRequests { retry_after: Some(d) } if d == Duration::from_secs(3)
        ));
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("999999"), Some(MAX_RETRY_AFTER));
    }

    #[test]
    fn test_parse_retry_after_date_in_past() {
        assert_eq!(
            parse_retry_after("Fri, 31 Dec 1999 23:59:59 GMT"),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_parse_retry_after_garbage() {
        assert_eq!(parse_retry_after("soon"), None);
    }
}
