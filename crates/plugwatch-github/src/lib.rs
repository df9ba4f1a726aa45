mod api;
mod resolver;

pub use api::{DEFAULT_API_BASE, GithubAsset, GithubRelease};
pub use resolver::GithubResolver;
