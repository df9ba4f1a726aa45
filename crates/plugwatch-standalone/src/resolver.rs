use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use plugwatch_core::{AssetKind, ExportProbe, extract_release, fetch_bytes, locate_in_archive};
use plugwatch_model::{
    Channel, ChannelFailure, Release, ReleaseId, ReleaseInfo, ReleaseResolver, Resolution,
    ResolveError, StandaloneChannel, StandaloneHost,
};
use sha2::{Digest, Sha256};

/// Resolves addons served from fixed URLs: one that changes whenever a new
/// build is published, and one that serves the build.
pub struct StandaloneResolver {
    client: reqwest::Client,
    probe: Arc<dyn ExportProbe>,
}

impl StandaloneResolver {
    #[must_use]
    pub fn new(client: reqwest::Client, probe: Arc<dyn ExportProbe>) -> Self {
        Self { client, probe }
    }

    /// Bring one channel up to date.
    ///
    /// The build is only downloaded when the version content hash differs
    /// from `existing`, and only replaces `existing` when its version is
    /// strictly newer.
    ///
    /// # Errors
    /// Returns an error when either URL cannot be fetched, the download URL
    /// has an unsupported suffix, or the build cannot be identified.
    pub async fn resolve_channel(
        &self,
        channel: &StandaloneChannel,
        existing: Option<&Release>,
    ) -> Result<Release, ResolveError> {
        let marker = fetch_bytes(&self.client, &channel.version_url).await?;
        let hash = content_hash(&marker);

        if let Some(existing) = existing
            && matches!(&existing.id, ReleaseId::Hash(known) if *known == hash)
        {
            debug!("{} is unchanged", channel.version_url);
            return Ok(existing.clone());
        }

        let url = channel.download_url.as_str();
        let kind = AssetKind::from_url(url).ok_or_else(|| ResolveError::UnsupportedAssetType {
            url: url.to_string(),
        })?;
        let bytes = fetch_bytes(&self.client, url).await?;
        let id = ReleaseId::Hash(hash);
        let candidate = match kind {
            AssetKind::Binary => extract_release(&bytes, id, url)?,
            AssetKind::Archive => locate_in_archive(&bytes, id, url, self.probe.as_ref()).await?,
        };

        let release = Release::supersede(existing, candidate);
        if existing.is_some_and(|existing| *existing == release) {
            info!("{url} changed without a version bump, keeping {}", release.version_str);
        }
        Ok(release)
    }
}

#[async_trait]
impl ReleaseResolver<StandaloneHost> for StandaloneResolver {
    async fn resolve(
        &self,
        host: &StandaloneHost,
        current: &ReleaseInfo,
    ) -> Result<Resolution, ResolveError> {
        let mut failures = Vec::new();

        let release = match self
            .resolve_channel(&host.release, current.release.as_ref())
            .await
        {
            Ok(release) => Some(release),
            Err(error) => {
                debug!("Release channel {} failed: {error}", host.release.version_url);
                failures.push(ChannelFailure {
                    channel: Channel::Stable,
                    error,
                });
                current.release.clone()
            }
        };

        // A prerelease is only tracked alongside a known stable release.
        let prerelease = match (&host.prerelease, &release) {
            (Some(channel), Some(_)) => {
                match self
                    .resolve_channel(channel, current.prerelease.as_ref())
                    .await
                {
                    Ok(prerelease) => Some(prerelease),
                    Err(error) => {
                        debug!("Prerelease channel {} failed: {error}", channel.version_url);
                        failures.push(ChannelFailure {
                            channel: Channel::Prerelease,
                            error,
                        });
                        current.prerelease.clone()
                    }
                }
            }
            _ => None,
        };

        Ok(Resolution::new(ReleaseInfo::new(release, prerelease), failures))
    }
}

/// Hex SHA-256 of a version endpoint's body.
#[must_use]
pub fn content_hash(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}
