use std::time::Duration;

use log::debug;
use plugwatch_model::{FetchFailure, ResolveError};

/// Applied to every outbound request independently.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How a downloaded asset is turned into a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    /// A plugin binary parsed directly.
    Binary,
    /// A zip archive searched for the plugin binary.
    Archive,
}

impl AssetKind {
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".dll") {
            Some(Self::Binary)
        } else if name.ends_with(".zip") {
            Some(Self::Archive)
        } else {
            None
        }
    }

    /// Classify by the URL's path, ignoring query string and fragment.
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        match reqwest::Url::parse(url) {
            Ok(parsed) => Self::from_file_name(parsed.path()),
            Err(_) => Self::from_file_name(url.split(['?', '#']).next().unwrap_or(url)),
        }
    }
}

/// Build the shared HTTP client.
///
/// # Errors
/// Returns an error when the TLS backend cannot be initialized.
pub fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(format!("plugwatch/{}", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Send a request with the fetch timeout and reject non-success statuses.
///
/// # Errors
/// Returns `FetchFailed` on timeout, transport failure, or a non-success
/// status.
pub async fn send_checked(
    request: reqwest::RequestBuilder,
    url: &str,
) -> Result<reqwest::Response, ResolveError> {
    send_checked_with_timeout(request, url, FETCH_TIMEOUT).await
}

/// [`send_checked`] with a caller-chosen timeout.
///
/// # Errors
/// Returns `FetchFailed` on timeout, transport failure, or a non-success
/// status.
pub async fn send_checked_with_timeout(
    request: reqwest::RequestBuilder,
    url: &str,
    timeout: Duration,
) -> Result<reqwest::Response, ResolveError> {
    let response = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|error| transport_error(url, &error))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ResolveError::fetch(url, FetchFailure::Status(status.as_u16())));
    }
    Ok(response)
}

/// Download a URL into memory.
///
/// # Errors
/// Returns `FetchFailed` when the request or reading the body fails.
pub async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, ResolveError> {
    debug!("GET {url}");
    let response = send_checked(client.get(url), url).await?;
    let bytes = response
        .bytes()
        .await
        .map_err(|error| transport_error(url, &error))?;
    Ok(bytes.to_vec())
}

fn transport_error(url: &str, error: &reqwest::Error) -> ResolveError {
    let reason = if error.is_timeout() {
        FetchFailure::Timeout
    } else {
        FetchFailure::Transport(error.to_string())
    };
    ResolveError::fetch(url, reason)
}
