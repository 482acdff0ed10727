mod bootstrap_helpers;
mod cli_args;
mod doctor;
mod dry_run;
mod review_commands;
mod session_commands;

use anyhow::{bail, Result};
use clap::Parser;

use crate::bootstrap_helpers::{build_executor, init_tracing, load_config};
use crate::cli_args::{Cli, CliCommand};
use crate::doctor::run_doctor;
use crate::dry_run::replay;
use crate::review_commands::run_review_command;
use crate::session_commands::{open_session_manager, run_sessions_command};

async fn run_cli(cli: Cli) -> Result<()> {
    let output = match &cli.command {
        CliCommand::Review { command } => run_review_command(command)?,
        CliCommand::Sessions { command } => {
            let manager = open_session_manager(&load_config(&cli)?)?;
            run_sessions_command(&manager, command)?
        }
        CliCommand::Doctor => {
            let config = load_config(&cli)?;
            let report = run_doctor(&build_executor(&config)).await?;
            println!("{}", report.render());
            if report.unavailable > 0 {
                bail!("{} provider(s) unavailable", report.unavailable);
            }
            return Ok(());
        }
        CliCommand::Replay(args) => replay(load_config(&cli)?, args).await?,
    };
    println!("{output}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_cli(cli).await
}
