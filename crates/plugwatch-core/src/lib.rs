//! Binary identification and download plumbing shared by every release
//! source:
//! - Version-resource extraction from Windows executable images.
//! - Locating the one valid binary inside a zip archive.
//! - The export probe used to tell addon binaries from helper libraries.
//! - Timed HTTP fetches and asset-kind dispatch by file suffix.

mod archive;
mod fetch;
#[cfg(any(test, feature = "test-utils"))]
pub mod fixture;
mod probe;
mod version_info;

/// Archive candidate probing.
pub use archive::locate_in_archive;
/// HTTP helpers with the per-request timeout policy.
pub use fetch::{
    AssetKind, FETCH_TIMEOUT, build_client, fetch_bytes, send_checked, send_checked_with_timeout,
};
/// Validity predicate for candidate binaries.
pub use probe::{
    CommandExportProbe, DEFAULT_PROBE_ARGS, DEFAULT_PROBE_PROGRAM, DEFAULT_REQUIRED_EXPORTS,
    ExportProbe,
};
/// Release construction from a raw executable image.
pub use version_info::{VersionInfo, extract_release};
