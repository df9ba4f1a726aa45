//! Addon definitions: one TOML file per addon.
//!
//! ```toml
//! [package]
//! id = "boon-table"
//! name = "Boon Table"
//!
//! [host]
//! type = "github"
//! url = "owner/boon-table"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::debug;
use plugwatch_model::AddonDefinition;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid addon definition {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("addon id {id} is defined in both {} and {}", .first.display(), .second.display())]
    DuplicateId {
        id: String,
        first: PathBuf,
        second: PathBuf,
    },
}

impl DefinitionError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Load every `*.toml` file in `dir`, ordered by file name.
///
/// # Errors
/// Fails on the first file that cannot be read or parsed, or when two files
/// declare the same addon id.
pub fn load_definitions(dir: &Path) -> Result<Vec<AddonDefinition>, DefinitionError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|error| DefinitionError::io(dir, error))? {
        let path = entry.map_err(|error| DefinitionError::io(dir, error))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    let mut definitions = Vec::with_capacity(paths.len());
    for path in paths {
        let text =
            std::fs::read_to_string(&path).map_err(|error| DefinitionError::io(&path, error))?;
        let definition = parse_definition(&text, &path)?;
        debug!(
            "Loaded {} ({} host) from {}",
            definition.package.id,
            definition.host.kind(),
            path.display()
        );

        if let Some(first) = seen.get(&definition.package.id) {
            return Err(DefinitionError::DuplicateId {
                id: definition.package.id,
                first: first.clone(),
                second: path,
            });
        }
        seen.insert(definition.package.id.clone(), path);
        definitions.push(definition);
    }
    Ok(definitions)
}

fn parse_definition(text: &str, path: &Path) -> Result<AddonDefinition, DefinitionError> {
    toml::from_str(text).map_err(|source| DefinitionError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
