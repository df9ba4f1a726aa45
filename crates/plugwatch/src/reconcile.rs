use std::collections::{HashMap, HashSet};
use std::fmt;

use log::{info, warn};
use plugwatch_model::{
    Addon, AddonDefinition, Channel, ChannelFailure, GithubHost, Host, ReleaseInfo,
    ReleaseResolver, ResolveError, StandaloneHost,
};

use crate::manifest::ManifestData;

const LOADER_ID: &str = "loader";

/// Something that could not be updated this pass. `channel` is `None` when
/// the whole addon failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonFailure {
    pub id: String,
    pub channel: Option<Channel>,
    pub error: ResolveError,
}

impl fmt::Display for AddonFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.channel {
            Some(channel) => write!(f, "{}: {channel} not updated: {}", self.id, self.error),
            None => write!(f, "{}: {}", self.id, self.error),
        }
    }
}

/// Outcome of a pass. Removals are logged as they are found; failures are
/// left to the caller to report.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub removed: Vec<String>,
    pub failures: Vec<AddonFailure>,
}

impl ReconcileReport {
    fn record_channels(&mut self, id: &str, failures: Vec<ChannelFailure>) {
        for ChannelFailure { channel, error } in failures {
            self.failures.push(AddonFailure {
                id: id.to_string(),
                channel: Some(channel),
                error,
            });
        }
    }

    fn record_addon(&mut self, id: &str, error: ResolveError) {
        self.failures.push(AddonFailure {
            id: id.to_string(),
            channel: None,
            error,
        });
    }
}

/// Merges freshly resolved releases into the catalog.
pub struct Reconciler<'a> {
    github: &'a dyn ReleaseResolver<GithubHost>,
    standalone: &'a dyn ReleaseResolver<StandaloneHost>,
    loader: Option<GithubHost>,
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub fn new(
        github: &'a dyn ReleaseResolver<GithubHost>,
        standalone: &'a dyn ReleaseResolver<StandaloneHost>,
    ) -> Self {
        Self {
            github,
            standalone,
            loader: None,
        }
    }

    /// Resolve the loader from `repo` as well. Without one the loader
    /// releases are carried over unchanged.
    #[must_use]
    pub fn with_loader_repo(mut self, repo: Option<String>) -> Self {
        self.loader = repo.map(|url| GithubHost { url });
        self
    }

    /// Build the next catalog from the current definitions and the previous
    /// catalog.
    ///
    /// Addons are emitted in definition order. Addons missing from
    /// `definitions` are dropped and reported. A failing addon keeps its
    /// previous releases.
    pub async fn reconcile(
        &self,
        definitions: Vec<AddonDefinition>,
        prior: ManifestData,
    ) -> (ManifestData, ReconcileReport) {
        let mut report = ReconcileReport::default();

        let defined: HashSet<&str> = definitions
            .iter()
            .map(|definition| definition.package.id.as_str())
            .collect();
        for addon in &prior.addons {
            if !defined.contains(addon.package.id.as_str()) {
                warn!(
                    "Addon {} ({}) is no longer defined and was removed",
                    addon.package.name, addon.package.id
                );
                report.removed.push(addon.package.id.clone());
            }
        }

        let previous: HashMap<String, Addon> = prior
            .addons
            .into_iter()
            .map(|addon| (addon.package.id.clone(), addon))
            .collect();

        let mut addons = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let known = previous.get(&definition.package.id);
            let addon = Addon::from_definition(definition, known);
            addons.push(self.update_addon(addon, &mut report).await);
        }

        let loader_release = self.update_loader(prior.loader_release, &mut report).await;

        (
            ManifestData {
                addons,
                loader_release,
            },
            report,
        )
    }

    async fn update_addon(&self, addon: Addon, report: &mut ReconcileReport) -> Addon {
        info!("Checking {} ({})", addon.package.name, addon.package.id);
        let current = addon.release_info();
        let result = match &addon.host {
            Host::Github(host) => self.github.resolve(host, &current).await,
            Host::Standalone(host) => self.standalone.resolve(host, &current).await,
        };

        match result {
            Ok(resolution) => {
                report.record_channels(&addon.package.id, resolution.failures);
                addon.with_release_info(resolution.info)
            }
            Err(error) => {
                report.record_addon(&addon.package.id, error);
                addon
            }
        }
    }

    async fn update_loader(
        &self,
        current: ReleaseInfo,
        report: &mut ReconcileReport,
    ) -> ReleaseInfo {
        let Some(host) = &self.loader else {
            return current;
        };

        info!("Checking loader ({})", host.url);
        match self.github.resolve(host, &current).await {
            Ok(resolution) => {
                report.record_channels(LOADER_ID, resolution.failures);
                resolution.info
            }
            Err(error) => {
                report.record_addon(LOADER_ID, error);
                current
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use plugwatch_model::{
        FetchFailure, Package, Release, ReleaseId, Resolution, StandaloneChannel, Version,
    };

    use super::*;

    /// Answers by host key; hosts without a scripted answer echo `current`.
    #[derive(Default)]
    struct FakeResolver {
        outcomes: HashMap<String, Result<Resolution, ResolveError>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeResolver {
        fn with(mut self, key: &str, outcome: Result<Resolution, ResolveError>) -> Self {
            self.outcomes.insert(key.to_string(), outcome);
            self
        }

        fn answer(&self, key: &str, current: &ReleaseInfo) -> Result<Resolution, ResolveError> {
            self.calls.lock().unwrap().push(key.to_string());
            self.outcomes
                .get(key)
                .cloned()
                .unwrap_or_else(|| Ok(Resolution::new(current.clone(), Vec::new())))
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReleaseResolver<GithubHost> for FakeResolver {
        async fn resolve(
            &self,
            host: &GithubHost,
            current: &ReleaseInfo,
        ) -> Result<Resolution, ResolveError> {
            self.answer(&host.url, current)
        }
    }

    #[async_trait]
    impl ReleaseResolver<StandaloneHost> for FakeResolver {
        async fn resolve(
            &self,
            host: &StandaloneHost,
            current: &ReleaseInfo,
        ) -> Result<Resolution, ResolveError> {
            self.answer(&host.release.version_url, current)
        }
    }

    fn package(id: &str) -> Package {
        Package {
            id: id.to_string(),
            name: format!("Addon {id}"),
            author: None,
            description: None,
            website: None,
        }
    }

    fn github(id: &str) -> AddonDefinition {
        AddonDefinition {
            package: package(id),
            host: Host::Github(GithubHost {
                url: format!("example/{id}"),
            }),
        }
    }

    fn standalone(id: &str) -> AddonDefinition {
        AddonDefinition {
            package: package(id),
            host: Host::Standalone(StandaloneHost {
                release: StandaloneChannel {
                    version_url: format!("https://example.org/{id}.md5"),
                    download_url: format!("https://example.org/{id}.dll"),
                },
                prerelease: None,
            }),
        }
    }

    fn release(name: &str, version: [u16; 4]) -> Release {
        let version = Version::from(version);
        Release {
            id: ReleaseId::Asset(u64::from(version.minor)),
            name: name.to_string(),
            version,
            version_str: version.to_string(),
            download_url: "https://example.org/addon.dll".to_string(),
            asset_index: Some(0),
        }
    }

    fn resolved(release: Release) -> Result<Resolution, ResolveError> {
        Ok(Resolution::new(
            ReleaseInfo {
                release: Some(release),
                prerelease: None,
            },
            Vec::new(),
        ))
    }

    fn cataloged(definition: AddonDefinition, name: &str, version: [u16; 4]) -> Addon {
        Addon::from_definition(definition, None).with_release_info(ReleaseInfo {
            release: Some(release(name, version)),
            prerelease: None,
        })
    }

    #[tokio::test]
    async fn undefined_addons_are_removed_once() {
        let fake = FakeResolver::default();
        let prior = ManifestData {
            addons: vec![
                cataloged(github("kept"), "Kept", [1, 0, 0, 0]),
                cataloged(github("gone"), "Gone", [1, 0, 0, 0]),
            ],
            loader_release: ReleaseInfo::default(),
        };

        let (data, report) = Reconciler::new(&fake, &fake)
            .reconcile(vec![github("kept")], prior.clone())
            .await;

        assert_eq!(report.removed, vec!["gone"]);
        assert!(report.failures.is_empty());
        assert_eq!(data.addons, vec![prior.addons[0].clone()]);
        assert_eq!(fake.calls(), vec!["example/kept"]);
    }

    #[tokio::test]
    async fn failing_addon_keeps_previous_state_and_others_proceed() {
        let error = ResolveError::fetch("https://example.org", FetchFailure::Timeout);
        let fake = FakeResolver::default()
            .with("example/broken", Err(error.clone()))
            .with(
                "https://example.org/fresh.md5",
                resolved(release("Fresh", [2, 0, 0, 0])),
            );
        let previous = cataloged(github("broken"), "Broken", [1, 0, 0, 0]);
        let prior = ManifestData {
            addons: vec![previous.clone()],
            loader_release: ReleaseInfo::default(),
        };

        let (data, report) = Reconciler::new(&fake, &fake)
            .reconcile(vec![github("broken"), standalone("fresh")], prior)
            .await;

        assert_eq!(data.addons[0], previous);
        assert_eq!(
            data.addons[1].release.as_ref().map(|r| r.version),
            Some(Version::new(2, 0, 0, 0))
        );
        assert_eq!(data.addons[1].addon_names, vec!["Fresh"]);
        assert_eq!(
            report.failures,
            vec![AddonFailure {
                id: "broken".to_string(),
                channel: None,
                error,
            }]
        );
    }

    #[tokio::test]
    async fn channel_failures_are_attributed() {
        let failure = ChannelFailure {
            channel: Channel::Prerelease,
            error: ResolveError::NoValidReleaseAsset {
                tag: "v2-beta".to_string(),
            },
        };
        let fake = FakeResolver::default().with(
            "example/partial",
            Ok(Resolution::new(
                ReleaseInfo {
                    release: Some(release("Partial", [1, 0, 0, 0])),
                    prerelease: None,
                },
                vec![failure.clone()],
            )),
        );

        let (data, report) = Reconciler::new(&fake, &fake)
            .reconcile(vec![github("partial")], ManifestData::default())
            .await;

        assert!(data.addons[0].release.is_some());
        assert_eq!(
            report.failures,
            vec![AddonFailure {
                id: "partial".to_string(),
                channel: Some(Channel::Prerelease),
                error: failure.error,
            }]
        );
    }

    #[test]
    fn failures_name_the_addon_and_channel() {
        let error = ResolveError::NoValidReleaseAsset {
            tag: "v2-beta".to_string(),
        };
        let channel_failure = AddonFailure {
            id: "partial".to_string(),
            channel: Some(Channel::Prerelease),
            error: error.clone(),
        };
        let addon_failure = AddonFailure {
            channel: None,
            ..channel_failure.clone()
        };

        assert_eq!(
            channel_failure.to_string(),
            format!("partial: {} not updated: {error}", Channel::Prerelease)
        );
        assert_eq!(addon_failure.to_string(), format!("partial: {error}"));
    }

    #[tokio::test]
    async fn names_accumulate_across_passes() {
        let fake = FakeResolver::default().with(
            "example/renamed",
            resolved(release("New Name", [1, 1, 0, 0])),
        );
        let prior = ManifestData {
            addons: vec![cataloged(github("renamed"), "Old Name", [1, 0, 0, 0])],
            loader_release: ReleaseInfo::default(),
        };

        let (data, _) = Reconciler::new(&fake, &fake)
            .reconcile(vec![github("renamed")], prior)
            .await;

        assert_eq!(data.addons[0].addon_names, vec!["Old Name", "New Name"]);
    }

    #[tokio::test]
    async fn loader_is_carried_over_without_repository() {
        let fake = FakeResolver::default();
        let loader = ReleaseInfo {
            release: Some(release("Loader", [1, 0, 0, 0])),
            prerelease: None,
        };
        let prior = ManifestData {
            addons: Vec::new(),
            loader_release: loader.clone(),
        };

        let (data, _) = Reconciler::new(&fake, &fake).reconcile(Vec::new(), prior).await;

        assert_eq!(data.loader_release, loader);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn loader_is_resolved_from_its_repository() {
        let fake = FakeResolver::default().with(
            "example/loader",
            resolved(release("Loader", [2, 0, 0, 0])),
        );

        let (data, report) = Reconciler::new(&fake, &fake)
            .with_loader_repo(Some("example/loader".to_string()))
            .reconcile(Vec::new(), ManifestData::default())
            .await;

        assert_eq!(
            data.loader_release.release.map(|r| r.name),
            Some("Loader".to_string())
        );
        assert!(report.failures.is_empty());
    }
}
