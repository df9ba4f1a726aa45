use std::path::{Path, PathBuf};

use clap::Parser;
use plugwatch_core::DEFAULT_PROBE_PROGRAM;
use plugwatch_github::DEFAULT_API_BASE;

/// Refresh the addon release catalog
#[derive(Parser, Debug)]
#[command(name = "plugwatch", version)]
pub struct Cli {
    /// Directory holding one `*.toml` definition per addon
    #[arg(long, default_value = "addons")]
    pub addons: PathBuf,

    /// Catalog from the previous run
    #[arg(long, default_value = "manifest.json")]
    pub manifest: PathBuf,

    /// Where to write the updated catalog [default: the --manifest path]
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Repository (`owner/name`) that publishes the addon loader
    #[arg(long)]
    pub loader_repo: Option<String>,

    /// Base URL of the GitHub REST API
    #[arg(long, default_value = DEFAULT_API_BASE)]
    pub github_api: String,

    /// Program used to list a binary's exports
    #[arg(long, default_value = DEFAULT_PROBE_PROGRAM)]
    pub probe_program: String,

    /// Token sent to the GitHub API
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Log debug output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    #[must_use]
    pub fn output_path(&self) -> &Path {
        self.output.as_deref().unwrap_or(&self.manifest)
    }
}
