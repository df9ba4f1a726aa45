use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::Command;

pub const DEFAULT_PROBE_PROGRAM: &str = "winedump";
pub const DEFAULT_PROBE_ARGS: [&str; 2] = ["-j", "export"];
/// Entry points every loadable addon binary exports.
pub const DEFAULT_REQUIRED_EXPORTS: [&str; 2] = ["get_init_addr", "get_release_addr"];

/// Decides whether a binary on disk is a loadable addon.
///
/// Failures to inspect the binary count as "not valid".
#[async_trait]
pub trait ExportProbe: Send + Sync {
    async fn is_valid(&self, binary: &Path) -> bool;
}

#[async_trait]
impl<F> ExportProbe for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    async fn is_valid(&self, binary: &Path) -> bool {
        self(binary)
    }
}

/// Runs an external export-listing tool and looks for the required symbols
/// in its output.
#[derive(Debug, Clone)]
pub struct CommandExportProbe {
    program: PathBuf,
    args: Vec<String>,
    required_exports: Vec<String>,
}

impl CommandExportProbe {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: DEFAULT_PROBE_ARGS.iter().map(ToString::to_string).collect(),
            required_exports: DEFAULT_REQUIRED_EXPORTS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// Resolve `program` on `PATH`.
    ///
    /// # Errors
    /// Returns an error when the program cannot be found.
    pub fn locate(program: &str) -> Result<Self, which::Error> {
        which::which(program).map(Self::new)
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_required_exports<I, S>(mut self, exports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_exports = exports.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl ExportProbe for CommandExportProbe {
    async fn is_valid(&self, binary: &Path) -> bool {
        let output = match Command::new(&self.program)
            .args(&self.args)
            .arg(binary)
            .output()
            .await
        {
            Ok(output) => output,
            Err(error) => {
                warn!("Failed to run {}: {error}", self.program.display());
                return false;
            }
        };

        if !output.status.success() {
            debug!(
                "{} exited with {} for {}",
                self.program.display(),
                output.status,
                binary.display()
            );
            return false;
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        exports_present(&listing, &self.required_exports)
    }
}

fn exports_present(listing: &str, required: &[String]) -> bool {
    let symbols: Vec<&str> = listing
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|token| !token.is_empty())
        .collect();
    required
        .iter()
        .all(|export| symbols.iter().any(|symbol| symbol == export))
}
