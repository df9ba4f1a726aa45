use std::sync::Arc;

use log::{info, warn};
use plugwatch_core::{CommandExportProbe, ExportProbe, build_client};
use plugwatch_github::GithubResolver;
use plugwatch_model::AddonDefinition;
use plugwatch_standalone::StandaloneResolver;
use thiserror::Error;

use crate::cli::Cli;
use crate::definitions::{DefinitionError, load_definitions};
use crate::manifest::{ManifestData, ManifestError, load_manifest, save_manifest};
use crate::reconcile::{ReconcileReport, Reconciler};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Definitions(#[from] DefinitionError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Refresh the catalog once.
///
/// Definitions and the previous catalog are validated before anything is
/// fetched.
///
/// # Errors
/// Returns an error when the inputs are invalid or the catalog cannot be
/// written. Failures of individual addons are only reported.
pub async fn run(cli: &Cli) -> Result<ReconcileReport, RunError> {
    let (definitions, prior) = load_inputs(cli)?;

    let client = build_client().map_err(RunError::Client)?;
    let probe: Arc<dyn ExportProbe> = Arc::new(export_probe(&cli.probe_program));
    let github = GithubResolver::new(client.clone(), Arc::clone(&probe))
        .with_api_base(&cli.github_api)
        .with_token(cli.github_token.clone());
    let standalone = StandaloneResolver::new(client, probe);

    let reconciler =
        Reconciler::new(&github, &standalone).with_loader_repo(cli.loader_repo.clone());
    let (data, report) = reconciler.reconcile(definitions, prior).await;

    let output = cli.output_path();
    save_manifest(output, &data)?;
    info!(
        "Wrote {} addons to {} ({} removed, {} failures)",
        data.addons.len(),
        output.display(),
        report.removed.len(),
        report.failures.len()
    );
    Ok(report)
}

fn load_inputs(cli: &Cli) -> Result<(Vec<AddonDefinition>, ManifestData), RunError> {
    let definitions = load_definitions(&cli.addons)?;
    let prior = load_manifest(&cli.manifest)?.unwrap_or_default();
    info!(
        "Loaded {} addon definitions and {} catalog entries",
        definitions.len(),
        prior.addons.len()
    );
    Ok((definitions, prior))
}

/// Archives can only be searched when the probe program is installed.
/// Without it every archive candidate is rejected.
fn export_probe(program: &str) -> CommandExportProbe {
    CommandExportProbe::locate(program).unwrap_or_else(|error| {
        warn!("{program} is unavailable ({error}); binaries inside archives will be rejected");
        CommandExportProbe::new(program)
    })
}
