use log::{debug, info};
use plugwatch_core::send_checked;
use plugwatch_model::{FetchFailure, ResolveError};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const MEDIA_TYPE: &str = "application/vnd.github+json";
const PER_PAGE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GithubAsset {
    pub id: u64,
    pub name: String,
    pub browser_download_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GithubRelease {
    pub id: u64,
    pub tag_name: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<GithubAsset>,
}

pub(crate) struct GithubApi {
    client: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl GithubApi {
    pub(crate) fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base: DEFAULT_API_BASE.to_string(),
            token: None,
        }
    }

    pub(crate) fn set_base(&mut self, base: &str) {
        self.base = base.trim_end_matches('/').to_string();
    }

    pub(crate) fn set_token(&mut self, token: Option<String>) {
        self.token = token.filter(|token| !token.is_empty());
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(url)
            .header(ACCEPT, MEDIA_TYPE)
            .header(USER_AGENT, concat!("plugwatch/", env!("CARGO_PKG_VERSION")));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Every release of `repo`, in the order the API lists them.
    pub(crate) async fn releases(&self, repo: &str) -> Result<Vec<GithubRelease>, ResolveError> {
        let url = format!("{}/repos/{repo}/releases?per_page={PER_PAGE}", self.base);
        debug!("GET {url}");
        let response = send_checked(self.get(&url), &url).await?;
        response
            .json()
            .await
            .map_err(|error| ResolveError::invalid_response(&url, error))
    }

    /// The newest published stable release, or `None` when the repository
    /// has none.
    pub(crate) async fn latest_release(
        &self,
        repo: &str,
    ) -> Result<Option<GithubRelease>, ResolveError> {
        let url = format!("{}/repos/{repo}/releases/latest", self.base);
        debug!("GET {url}");
        let response = match send_checked(self.get(&url), &url).await {
            Ok(response) => response,
            Err(ResolveError::FetchFailed {
                reason: FetchFailure::Status(404),
                ..
            }) => {
                info!("{repo} has no stable release");
                return Ok(None);
            }
            Err(error) => return Err(error),
        };
        response
            .json()
            .await
            .map(Some)
            .map_err(|error| ResolveError::invalid_response(&url, error))
    }
}
