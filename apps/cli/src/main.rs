//! leadflow CLI: administrative triggers for the outreach pipeline.
//!
//! Every pipeline stage (discover, enrich, generate, dispatch) runs for one
//! project and prints a JSON summary on stdout.

mod commands;

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;
use leadflow_shared::LeadflowError;

use commands::Cli;

/// Exit status for configuration problems (missing credentials, bad sections).
const CONFIG_ERROR_EXIT: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    match commands::run(cli).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(report)
            if report
                .downcast_ref::<LeadflowError>()
                .is_some_and(LeadflowError::is_config) =>
        {
            eprintln!("error: {report}");
            Ok(ExitCode::from(CONFIG_ERROR_EXIT))
        }
        Err(report) => Err(report),
    }
}
