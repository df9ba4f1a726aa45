use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("HTTP {0}")]
    Status(u16),
    #[error("timed out")]
    Timeout,
    #[error("{0}")]
    Transport(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Fetching {url} failed: {reason}")]
    FetchFailed { url: String, reason: FetchFailure },

    #[error("Could not parse response from {url}: {details}")]
    InvalidResponse { url: String, details: String },

    #[error("Unsupported asset type: {url}")]
    UnsupportedAssetType { url: String },

    #[error("Not a valid executable image: {reason}")]
    InvalidImage { reason: &'static str },

    #[error("No version resource found in binary")]
    NoVersionResource,

    #[error("No version found in binary")]
    NoVersionFound,

    #[error("No product name found in binary")]
    NoNameFound,

    #[error("Could not read archive: {details}")]
    InvalidArchive { details: String },

    #[error("No valid binary found in archive")]
    NoValidAssetInArchive,

    #[error("No valid asset found in release {tag}")]
    NoValidReleaseAsset { tag: String },

    #[error("IO error ({kind}): {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },
}

impl ResolveError {
    pub fn fetch(url: impl Into<String>, reason: FetchFailure) -> Self {
        Self::FetchFailed {
            url: url.into(),
            reason,
        }
    }

    pub fn invalid_response<E>(url: impl Into<String>, error: E) -> Self
    where
        E: std::fmt::Display,
    {
        Self::InvalidResponse {
            url: url.into(),
            details: error.to_string(),
        }
    }

    pub fn invalid_archive<E>(error: E) -> Self
    where
        E: std::fmt::Display,
    {
        Self::InvalidArchive {
            details: error.to_string(),
        }
    }

    /// Whether the failure comes from the binary's content rather than from
    /// reaching it.
    #[must_use]
    pub fn is_content_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidImage { .. }
                | Self::NoVersionResource
                | Self::NoVersionFound
                | Self::NoNameFound
                | Self::InvalidArchive { .. }
                | Self::NoValidAssetInArchive
        )
    }
}

impl From<std::io::Error> for ResolveError {
    fn from(err: std::io::Error) -> Self {
        ResolveError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
