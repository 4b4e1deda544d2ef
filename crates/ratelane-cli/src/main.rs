//! Ratelane CLI binary entrypoint.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ratelane_cli::cli::{Cli, Commands};
use ratelane_cli::commands::{AccessCommand, ChannelsCommand, WatchCommand, load_config};
use ratelane_cli::output::OutputFormat;
use ratelane_cli::CliError;
use ratelane_live::AccessGate;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();

    match &cli.command {
        Commands::Watch(args) => {
            let config = load_config(cli.config.as_deref(), cli.url.as_deref())?;
            let cmd = WatchCommand::new(config, &cli.api);
            cmd.execute(&mut stdout, &format, args).await?;
        }
        Commands::Access(args) => {
            let cmd = AccessCommand::new(gate(&cli)?);
            cmd.execute(&mut stdout, &format, args)?;
        }
        Commands::Channels => {
            let cmd = ChannelsCommand::new(gate(&cli)?);
            cmd.execute(&mut stdout, &format)?;
        }
    }

    Ok(())
}

/// Access table, with overrides from `--config` when given.
fn gate(cli: &Cli) -> Result<AccessGate, CliError> {
    match &cli.config {
        Some(path) => Ok(load_config(Some(path), cli.url.as_deref())?.access_gate()?),
        None => Ok(AccessGate::new()),
    }
}
