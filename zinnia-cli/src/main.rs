mod cli;
mod commands;
mod config;
mod error;
mod output;
mod session_file;
mod sink;

use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::{Args, Commands, OutputFormat},
    commands::CommandExecutor,
    config::AppConfig,
    error::CliError,
    output::OutputManager,
};

const DEFAULT_FILTER: &str = "zinnia=info,zinnia_client=info";

#[tokio::main]
async fn main() {
    // Before parsing so `.env` can feed the `ZINNIA_*` flags.
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let format = args.output;

    if let Err(e) = run(args).await {
        let message = match e.downcast_ref::<CliError>() {
            Some(cli_error) => cli_error.to_string(),
            None => format!("{e:#}"),
        };
        error!("Application error: {:#}", e);
        let rendered = OutputManager::new(format).error(&message);
        match format {
            OutputFormat::Json => println!("{rendered}"),
            OutputFormat::Pretty => eprintln!("{rendered}"),
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    init_logging(args.verbose, args.quiet, args.output);

    let config = AppConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    let mut client_config = config.client_config(&args)?;

    if let Commands::Keepalive {
        interval: Some(secs),
    } = &args.command
    {
        if *secs == 0 {
            return Err(CliError::InvalidInput("--interval must be greater than zero".into()).into());
        }
        client_config.keepalive_interval = Some(Duration::from_secs(*secs));
    }

    let session_path = config.session_path()?;
    let mut executor = CommandExecutor::new(client_config, session_path, OutputManager::new(args.output))?;
    executor.execute(args.command).await?;
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool, format: OutputFormat) {
    let filter = if quiet {
        EnvFilter::new("warn")
    } else if verbose {
        EnvFilter::new("zinnia=debug,zinnia_client=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        OutputFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        OutputFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(verbose)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}
