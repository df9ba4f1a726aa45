use std::io::Write as _;
use std::path::{Path, PathBuf};

use log::info;
use plugwatch_model::{Addon, ReleaseInfo};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MANIFEST_VERSION: u32 = 1;

/// The catalog body: every tracked addon plus the loader's releases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestData {
    pub addons: Vec<Addon>,
    #[serde(rename = "loaderRelease", default)]
    pub loader_release: ReleaseInfo,
}

#[derive(Serialize, Deserialize)]
struct Manifest<T> {
    version: u32,
    data: T,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unrecognized manifest: {details}")]
    InvalidManifest { details: String },
    #[error("failed to serialize manifest: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl ManifestError {
    fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    fn invalid(details: impl std::fmt::Display) -> Self {
        Self::InvalidManifest {
            details: details.to_string(),
        }
    }
}

/// Parse a stored catalog. Older catalogs were a bare list of addons.
///
/// # Errors
/// Returns `InvalidManifest` for anything that is neither shape, or a
/// versioned record with an unknown version.
pub fn parse_manifest(text: &str) -> Result<ManifestData, ManifestError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(ManifestError::invalid)?;

    if value.is_array() {
        let addons = serde_json::from_value(value).map_err(ManifestError::invalid)?;
        return Ok(ManifestData {
            addons,
            loader_release: ReleaseInfo::default(),
        });
    }

    if value.get("version").is_none() {
        return Err(ManifestError::invalid(
            "expected a versioned record or a list of addons",
        ));
    }

    let manifest: Manifest<ManifestData> =
        serde_json::from_value(value).map_err(ManifestError::invalid)?;
    if manifest.version != MANIFEST_VERSION {
        return Err(ManifestError::invalid(format_args!(
            "unsupported version {}",
            manifest.version
        )));
    }
    Ok(manifest.data)
}

/// Read the catalog at `path`; `None` when there is none yet.
///
/// # Errors
/// Returns an error when the file exists but cannot be read or parsed.
pub fn load_manifest(path: &Path) -> Result<Option<ManifestData>, ManifestError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            info!("No manifest at {}, starting empty", path.display());
            return Ok(None);
        }
        Err(error) => return Err(ManifestError::io("read", path, error)),
    };
    parse_manifest(&text).map(Some)
}

/// Write the catalog as pretty JSON, replacing `path` atomically.
///
/// # Errors
/// Returns an error when serialization or any filesystem step fails.
pub fn save_manifest(path: &Path, data: &ManifestData) -> Result<(), ManifestError> {
    let manifest = Manifest {
        version: MANIFEST_VERSION,
        data,
    };
    let mut json = serde_json::to_vec_pretty(&manifest).map_err(ManifestError::Serialize)?;
    json.push(b'\n');

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(parent)
        .map_err(|error| ManifestError::io("create temporary file in", parent, error))?;
    file.write_all(&json)
        .and_then(|()| file.as_file().sync_all())
        .map_err(|error| ManifestError::io("write", file.path(), error))?;
    file.persist(path)
        .map_err(|error| ManifestError::io("replace", path, error.error))?;
    Ok(())
}
