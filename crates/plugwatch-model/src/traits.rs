use async_trait::async_trait;
use std::fmt;

use crate::error::ResolveError;
use crate::release::ReleaseInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stable,
    Prerelease,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "release"),
            Self::Prerelease => write!(f, "prerelease"),
        }
    }
}

/// A channel that could not be resolved this pass. Its previous record is
/// kept as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFailure {
    pub channel: Channel,
    pub error: ResolveError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub info: ReleaseInfo,
    pub failures: Vec<ChannelFailure>,
}

impl Resolution {
    #[must_use]
    pub fn new(info: ReleaseInfo, failures: Vec<ChannelFailure>) -> Self {
        Self { info, failures }
    }
}

/// Turns one kind of host configuration into an up-to-date release pair.
///
/// `current` is what the catalog knew before this pass. A returned error
/// means nothing could be resolved and the caller keeps `current`.
#[async_trait]
pub trait ReleaseResolver<H>: Send + Sync
where
    H: Sync,
{
    async fn resolve(&self, host: &H, current: &ReleaseInfo) -> Result<Resolution, ResolveError>;
}
