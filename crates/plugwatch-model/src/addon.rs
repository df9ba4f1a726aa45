use serde::{Deserialize, Serialize};

use crate::release::{Release, ReleaseInfo};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

/// A repository on the hosted release API, written as `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubHost {
    pub url: String,
}

/// One fixed pair of endpoints: the content that identifies the current
/// build, and the build itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandaloneChannel {
    pub version_url: String,
    pub download_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandaloneHost {
    pub release: StandaloneChannel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prerelease: Option<StandaloneChannel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Host {
    Github(GithubHost),
    Standalone(StandaloneHost),
}

impl Host {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Github(_) => "github",
            Self::Standalone(_) => "standalone",
        }
    }
}

/// What the addon definition set declares about an addon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonDefinition {
    pub package: Package,
    pub host: Host,
}

/// A catalog entry: the definition plus everything discovered about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addon {
    pub package: Package,
    pub host: Host,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<Release>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prerelease: Option<Release>,
    #[serde(default)]
    pub addon_names: Vec<String>,
}

impl Addon {
    /// Start a catalog entry from a definition, carrying over discovered
    /// state from a previous entry for the same addon.
    #[must_use]
    pub fn from_definition(definition: AddonDefinition, previous: Option<&Addon>) -> Self {
        let (release, prerelease, addon_names) = previous.map_or_else(
            || (None, None, Vec::new()),
            |prev| {
                (
                    prev.release.clone(),
                    prev.prerelease.clone(),
                    prev.addon_names.clone(),
                )
            },
        );
        Self {
            package: definition.package,
            host: definition.host,
            release,
            prerelease,
            addon_names,
        }
    }

    #[must_use]
    pub fn release_info(&self) -> ReleaseInfo {
        ReleaseInfo {
            release: self.release.clone(),
            prerelease: self.prerelease.clone(),
        }
    }

    /// Replace both channels with a freshly resolved pair and record every
    /// product name seen in it.
    #[must_use]
    pub fn with_release_info(mut self, info: ReleaseInfo) -> Self {
        self.release = info.release;
        self.prerelease = info.prerelease;
        let seen: Vec<String> = [&self.release, &self.prerelease]
            .into_iter()
            .flatten()
            .map(|release| release.name.clone())
            .collect();
        for name in seen {
            if !self.addon_names.contains(&name) {
                self.addon_names.push(name);
            }
        }
        self
    }
}
