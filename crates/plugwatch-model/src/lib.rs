//! Shared data model for plugwatch.
//!
//! Everything the resolvers and the catalog agree on lives here:
//! - Four-component binary versions and their ordering.
//! - Release records and the per-addon stable/prerelease pair.
//! - Addon definitions with their tagged host configuration.
//! - The resolver error taxonomy and the `ReleaseResolver` seam.

mod addon;
mod error;
mod release;
mod traits;
mod version;

pub use addon::{
    Addon, AddonDefinition, GithubHost, Host, Package, StandaloneChannel, StandaloneHost,
};
pub use error::{FetchFailure, ResolveError};
pub use release::{Release, ReleaseId, ReleaseInfo};
pub use traits::{Channel, ChannelFailure, ReleaseResolver, Resolution};
pub use version::Version;
