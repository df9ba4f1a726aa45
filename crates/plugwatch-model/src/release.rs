use serde::{Deserialize, Serialize};
use std::fmt;

use crate::version::Version;

/// Opaque content identity used for change detection only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReleaseId {
    /// Numeric asset identifier assigned by a hosted release API.
    Asset(u64),
    /// Hex content hash of a standalone version endpoint.
    Hash(String),
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asset(id) => write!(f, "asset {id}"),
            Self::Hash(hash) => write!(f, "hash {hash}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub id: ReleaseId,
    pub name: String,
    pub version: Version,
    pub version_str: String,
    pub download_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_index: Option<usize>,
}

impl Release {
    /// Pick `candidate` over `previous` only when it carries a strictly newer
    /// version. A changed build that did not bump its version keeps the
    /// previous record.
    #[must_use]
    pub fn supersede(previous: Option<&Release>, candidate: Release) -> Release {
        match previous {
            Some(previous) if !candidate.version.is_greater(&previous.version) => {
                previous.clone()
            }
            _ => candidate,
        }
    }
}

/// Stable and prerelease records for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<Release>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prerelease: Option<Release>,
}

impl ReleaseInfo {
    /// Build a pair, dropping a prerelease that is not newer than the stable
    /// release.
    #[must_use]
    pub fn new(release: Option<Release>, prerelease: Option<Release>) -> Self {
        let prerelease = match (&release, prerelease) {
            (Some(release), Some(prerelease))
                if !prerelease.version.is_greater(&release.version) =>
            {
                None
            }
            (_, prerelease) => prerelease,
        };
        Self {
            release,
            prerelease,
        }
    }
}
