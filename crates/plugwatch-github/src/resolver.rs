use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use plugwatch_core::{AssetKind, ExportProbe, extract_release, fetch_bytes, locate_in_archive};
use plugwatch_model::{
    Channel, ChannelFailure, GithubHost, Release, ReleaseId, ReleaseInfo, ReleaseResolver,
    Resolution, ResolveError,
};

use crate::api::{GithubApi, GithubRelease};

/// Resolves addons published as GitHub releases.
pub struct GithubResolver {
    api: GithubApi,
    probe: Arc<dyn ExportProbe>,
}

impl GithubResolver {
    #[must_use]
    pub fn new(client: reqwest::Client, probe: Arc<dyn ExportProbe>) -> Self {
        Self {
            api: GithubApi::new(client),
            probe,
        }
    }

    #[must_use]
    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api.set_base(base);
        self
    }

    /// Bearer token sent with API requests. Empty tokens are ignored.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.api.set_token(token);
        self
    }

    /// Identify the release published as `entry`.
    ///
    /// Assets are tried in listed order. Unsupported file types and assets
    /// whose content cannot be identified are skipped.
    ///
    /// # Errors
    /// Returns `NoValidReleaseAsset` when no asset yields a release, or the
    /// fetch error of the asset being downloaded.
    pub async fn find_and_create_release(
        &self,
        old: Option<&Release>,
        entry: &GithubRelease,
    ) -> Result<Release, ResolveError> {
        if let Some(old) = old
            && is_unchanged(old, entry)
        {
            debug!("{} is unchanged", entry.tag_name);
            return Ok(old.clone());
        }

        for (index, asset) in entry.assets.iter().enumerate() {
            let Some(kind) = AssetKind::from_file_name(&asset.name) else {
                debug!("Skipping {} in {}: unsupported type", asset.name, entry.tag_name);
                continue;
            };

            let url = asset.browser_download_url.as_str();
            let bytes = fetch_bytes(self.api.client(), url).await?;
            let id = ReleaseId::Asset(asset.id);
            let parsed = match kind {
                AssetKind::Binary => extract_release(&bytes, id, url),
                AssetKind::Archive => {
                    locate_in_archive(&bytes, id, url, self.probe.as_ref()).await
                }
            };

            match parsed {
                Ok(mut release) => {
                    release.asset_index = Some(index);
                    return Ok(Release::supersede(old, release));
                }
                Err(error) if error.is_content_error() => {
                    debug!("Skipping {} in {}: {error}", asset.name, entry.tag_name);
                }
                Err(error) => return Err(error),
            }
        }

        Err(ResolveError::NoValidReleaseAsset {
            tag: entry.tag_name.clone(),
        })
    }

    async fn resolve_channel(
        &self,
        channel: Channel,
        old: Option<&Release>,
        entry: &GithubRelease,
        failures: &mut Vec<ChannelFailure>,
    ) -> Option<Release> {
        match self.find_and_create_release(old, entry).await {
            Ok(release) => Some(release),
            Err(error) => {
                debug!("{channel} {} failed: {error}", entry.tag_name);
                failures.push(ChannelFailure { channel, error });
                old.cloned()
            }
        }
    }
}

/// The recorded asset is still listed at the same position.
fn is_unchanged(old: &Release, entry: &GithubRelease) -> bool {
    old.asset_index
        .and_then(|index| entry.assets.get(index))
        .is_some_and(|asset| old.id == ReleaseId::Asset(asset.id))
}

#[async_trait]
impl ReleaseResolver<GithubHost> for GithubResolver {
    async fn resolve(
        &self,
        host: &GithubHost,
        current: &ReleaseInfo,
    ) -> Result<Resolution, ResolveError> {
        let repo = host.url.as_str();
        let releases = self.api.releases(repo).await?;
        let latest = self.api.latest_release(repo).await?;
        let mut failures = Vec::new();

        let release = match &latest {
            Some(latest) => {
                self.resolve_channel(
                    Channel::Stable,
                    current.release.as_ref(),
                    latest,
                    &mut failures,
                )
                .await
            }
            None => None,
        };

        // Only prereleases listed ahead of the stable release are candidates,
        // and only the first of them is considered.
        let mut prerelease = None;
        for entry in &releases {
            if latest.as_ref().is_some_and(|latest| latest.id == entry.id) {
                break;
            }
            if entry.draft || !entry.prerelease {
                continue;
            }
            prerelease = self
                .resolve_channel(
                    Channel::Prerelease,
                    current.prerelease.as_ref(),
                    entry,
                    &mut failures,
                )
                .await;
            break;
        }

        Ok(Resolution::new(ReleaseInfo::new(release, prerelease), failures))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use plugwatch_core::fixture::{addon_image, zip_archive};
    use plugwatch_model::Version;
    use serde_json::{Value, json};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const REPO: &str = "example/addon";

    fn resolver(server: &MockServer) -> GithubResolver {
        let probe: Arc<dyn ExportProbe> = Arc::new(|_: &Path| true);
        GithubResolver::new(reqwest::Client::new(), probe).with_api_base(&server.uri())
    }

    fn host() -> GithubHost {
        GithubHost {
            url: REPO.to_string(),
        }
    }

    fn asset(server: &MockServer, id: u64, name: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "browser_download_url": format!("{}/download/{id}/{name}", server.uri()),
        })
    }

    fn entry(id: u64, tag: &str, prerelease: bool, assets: Vec<Value>) -> Value {
        json!({
            "id": id,
            "tag_name": tag,
            "draft": false,
            "prerelease": prerelease,
            "assets": assets,
        })
    }

    async fn serve_listing(server: &MockServer, releases: &[Value], latest: Option<&Value>) {
        Mock::given(method("GET"))
            .and(path(format!("/repos/{REPO}/releases")))
            .respond_with(ResponseTemplate::new(200).set_body_json(releases))
            .mount(server)
            .await;
        let latest = match latest {
            Some(latest) => ResponseTemplate::new(200).set_body_json(latest),
            None => ResponseTemplate::new(404),
        };
        Mock::given(method("GET"))
            .and(path(format!("/repos/{REPO}/releases/latest")))
            .respond_with(latest)
            .mount(server)
            .await;
    }

    async fn serve_asset(server: &MockServer, id: u64, name: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(format!("/download/{id}/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(server)
            .await;
    }

    fn recorded(id: u64, index: usize, version: [u16; 4]) -> Release {
        let version = Version::from(version);
        Release {
            id: ReleaseId::Asset(id),
            name: "Recorded".to_string(),
            version,
            version_str: version.to_string(),
            download_url: "https://example.org/recorded.dll".to_string(),
            asset_index: Some(index),
        }
    }

    #[tokio::test]
    async fn stable_release_is_identified_from_latest() {
        let server = MockServer::start().await;
        let stable = entry(1, "v1.0", false, vec![asset(&server, 10, "addon.dll")]);
        serve_listing(&server, &[stable.clone()], Some(&stable)).await;
        serve_asset(&server, 10, "addon.dll", addon_image("Addon", [1, 0, 0, 0])).await;

        let resolution = resolver(&server)
            .resolve(&host(), &ReleaseInfo::default())
            .await
            .expect("resolution should succeed");

        let release = resolution.info.release.expect("stable release");
        assert_eq!(release.id, ReleaseId::Asset(10));
        assert_eq!(release.name, "Addon");
        assert_eq!(release.asset_index, Some(0));
        assert!(resolution.info.prerelease.is_none());
        assert!(resolution.failures.is_empty());
    }

    #[tokio::test]
    async fn unsupported_assets_are_skipped() {
        let server = MockServer::start().await;
        let stable = entry(
            1,
            "v1.0",
            false,
            vec![
                asset(&server, 10, "README.md"),
                asset(&server, 11, "source.tar.gz"),
                asset(&server, 12, "bundle.zip"),
            ],
        );
        serve_listing(&server, &[stable.clone()], Some(&stable)).await;
        let archive = zip_archive(&[("addon.dll", addon_image("Zipped", [1, 2, 0, 0]).as_slice())]);
        serve_asset(&server, 12, "bundle.zip", archive).await;

        let resolution = resolver(&server)
            .resolve(&host(), &ReleaseInfo::default())
            .await
            .expect("resolution should succeed");

        let release = resolution.info.release.expect("stable release");
        assert_eq!(release.name, "Zipped");
        assert_eq!(release.asset_index, Some(2));
    }

    #[tokio::test]
    async fn unidentifiable_binary_falls_through_to_next_asset() {
        let server = MockServer::start().await;
        let stable = entry(
            1,
            "v1.0",
            false,
            vec![asset(&server, 10, "helper.dll"), asset(&server, 11, "addon.dll")],
        );
        serve_listing(&server, &[stable.clone()], Some(&stable)).await;
        serve_asset(&server, 10, "helper.dll", b"not an image".to_vec()).await;
        serve_asset(&server, 11, "addon.dll", addon_image("Addon", [1, 0, 0, 0])).await;

        let resolution = resolver(&server)
            .resolve(&host(), &ReleaseInfo::default())
            .await
            .expect("resolution should succeed");

        let release = resolution.info.release.expect("stable release");
        assert_eq!(release.id, ReleaseId::Asset(11));
        assert_eq!(release.asset_index, Some(1));
    }

    #[tokio::test]
    async fn release_without_usable_assets_keeps_previous_record() {
        let server = MockServer::start().await;
        let stable = entry(2, "v2.0", false, vec![asset(&server, 20, "notes.txt")]);
        serve_listing(&server, &[stable.clone()], Some(&stable)).await;
        let previous = recorded(10, 0, [1, 0, 0, 0]);
        let current = ReleaseInfo {
            release: Some(previous.clone()),
            prerelease: None,
        };

        let resolution = resolver(&server)
            .resolve(&host(), &current)
            .await
            .expect("channel failures are not fatal");

        assert_eq!(resolution.info.release, Some(previous));
        assert_eq!(
            resolution.failures,
            vec![ChannelFailure {
                channel: Channel::Stable,
                error: ResolveError::NoValidReleaseAsset {
                    tag: "v2.0".to_string()
                },
            }]
        );
    }

    #[tokio::test]
    async fn unchanged_asset_is_not_downloaded() {
        let server = MockServer::start().await;
        let stable = entry(
            1,
            "v1.0",
            false,
            vec![asset(&server, 9, "notes.txt"), asset(&server, 10, "addon.dll")],
        );
        serve_listing(&server, &[stable.clone()], Some(&stable)).await;
        Mock::given(method("GET"))
            .and(path("/download/10/addon.dll"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        let previous = recorded(10, 1, [1, 0, 0, 0]);
        let current = ReleaseInfo {
            release: Some(previous.clone()),
            prerelease: None,
        };

        let resolution = resolver(&server)
            .resolve(&host(), &current)
            .await
            .expect("resolution should succeed");

        assert_eq!(resolution.info.release, Some(previous));
        assert!(resolution.failures.is_empty());
    }

    #[tokio::test]
    async fn moved_asset_is_downloaded_again() {
        let server = MockServer::start().await;
        let stable = entry(
            1,
            "v1.0",
            false,
            vec![asset(&server, 10, "addon.dll"), asset(&server, 11, "extra.dll")],
        );
        serve_listing(&server, &[stable.clone()], Some(&stable)).await;
        serve_asset(&server, 10, "addon.dll", addon_image("Addon", [1, 1, 0, 0])).await;
        let previous = recorded(10, 1, [1, 0, 0, 0]);
        let current = ReleaseInfo {
            release: Some(previous),
            prerelease: None,
        };

        let resolution = resolver(&server)
            .resolve(&host(), &current)
            .await
            .expect("resolution should succeed");

        let release = resolution.info.release.expect("stable release");
        assert_eq!(release.version, Version::new(1, 1, 0, 0));
        assert_eq!(release.asset_index, Some(0));
    }

    #[tokio::test]
    async fn newest_prerelease_ahead_of_stable_is_resolved() {
        let server = MockServer::start().await;
        let beta2 = entry(4, "v2.0-beta2", true, vec![asset(&server, 40, "addon.dll")]);
        let beta1 = entry(3, "v2.0-beta1", true, vec![asset(&server, 30, "addon.dll")]);
        let stable = entry(2, "v1.0", false, vec![asset(&server, 20, "addon.dll")]);
        serve_listing(&server, &[beta2, beta1, stable.clone()], Some(&stable)).await;
        serve_asset(&server, 40, "addon.dll", addon_image("Addon Beta", [2, 0, 0, 2])).await;
        serve_asset(&server, 20, "addon.dll", addon_image("Addon", [1, 0, 0, 0])).await;
        Mock::given(method("GET"))
            .and(path("/download/30/addon.dll"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let resolution = resolver(&server)
            .resolve(&host(), &ReleaseInfo::default())
            .await
            .expect("resolution should succeed");

        assert_eq!(resolution.info.release.unwrap().id, ReleaseId::Asset(20));
        let prerelease = resolution.info.prerelease.expect("prerelease");
        assert_eq!(prerelease.id, ReleaseId::Asset(40));
        assert_eq!(prerelease.name, "Addon Beta");
    }

    #[tokio::test]
    async fn prerelease_scan_stops_at_stable_release() {
        let server = MockServer::start().await;
        let stable = entry(3, "v1.1", false, vec![asset(&server, 30, "addon.dll")]);
        let old_beta = entry(2, "v1.1-beta", true, vec![asset(&server, 20, "addon.dll")]);
        serve_listing(&server, &[stable.clone(), old_beta], Some(&stable)).await;
        serve_asset(&server, 30, "addon.dll", addon_image("Addon", [1, 1, 0, 0])).await;
        Mock::given(method("GET"))
            .and(path("/download/20/addon.dll"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let resolution = resolver(&server)
            .resolve(&host(), &ReleaseInfo::default())
            .await
            .expect("resolution should succeed");

        assert!(resolution.info.release.is_some());
        assert!(resolution.info.prerelease.is_none());
    }

    #[tokio::test]
    async fn drafts_are_not_prereleases() {
        let server = MockServer::start().await;
        let mut draft = entry(5, "v3.0-draft", true, vec![asset(&server, 50, "addon.dll")]);
        draft["draft"] = json!(true);
        let beta = entry(4, "v3.0-beta", true, vec![asset(&server, 40, "addon.dll")]);
        serve_listing(&server, &[draft, beta], None).await;
        serve_asset(&server, 40, "addon.dll", addon_image("Addon", [3, 0, 0, 0])).await;

        let resolution = resolver(&server)
            .resolve(&host(), &ReleaseInfo::default())
            .await
            .expect("resolution should succeed");

        assert!(resolution.info.release.is_none());
        assert_eq!(
            resolution.info.prerelease.map(|p| p.id),
            Some(ReleaseId::Asset(40))
        );
    }

    #[tokio::test]
    async fn prerelease_not_newer_than_stable_is_dropped() {
        for beta_version in [[1, 0, 0, 0], [0, 9, 0, 0]] {
            let server = MockServer::start().await;
            let beta = entry(3, "v1.0-hotfix", true, vec![asset(&server, 30, "addon.dll")]);
            let stable = entry(2, "v1.0", false, vec![asset(&server, 20, "addon.dll")]);
            serve_listing(&server, &[beta, stable.clone()], Some(&stable)).await;
            serve_asset(&server, 30, "addon.dll", addon_image("Addon", beta_version)).await;
            serve_asset(&server, 20, "addon.dll", addon_image("Addon", [1, 0, 0, 0])).await;

            let resolution = resolver(&server)
                .resolve(&host(), &ReleaseInfo::default())
                .await
                .expect("resolution should succeed");

            assert!(resolution.info.release.is_some());
            assert!(resolution.info.prerelease.is_none());
        }
    }

    #[tokio::test]
    async fn repository_without_stable_release_still_tracks_prereleases() {
        let server = MockServer::start().await;
        let beta = entry(1, "v0.1-alpha", true, vec![asset(&server, 10, "addon.dll")]);
        serve_listing(&server, &[beta], None).await;
        serve_asset(&server, 10, "addon.dll", addon_image("Addon", [0, 1, 0, 0])).await;

        let resolution = resolver(&server)
            .resolve(&host(), &ReleaseInfo::default())
            .await
            .expect("404 on latest is tolerated");

        assert!(resolution.info.release.is_none());
        assert!(resolution.info.prerelease.is_some());
        assert!(resolution.failures.is_empty());
    }

    #[tokio::test]
    async fn listing_failure_fails_the_addon() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let error = resolver(&server)
            .resolve(&host(), &ReleaseInfo::default())
            .await
            .unwrap_err();
        assert!(matches!(error, ResolveError::FetchFailed { .. }));
    }
}
