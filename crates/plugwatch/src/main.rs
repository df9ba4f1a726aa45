mod cli;
mod definitions;
mod logging;
mod manifest;
mod reconcile;
mod run;

use std::process::ExitCode;

use clap::Parser;
use log::{error, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    logging::init_logging(cli.verbose);

    match run::run(&cli).await {
        Ok(report) => {
            for failure in &report.failures {
                if failure.channel.is_some() {
                    warn!("{failure}");
                } else {
                    error!("{failure}");
                }
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
