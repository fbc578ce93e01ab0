use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tierforge::cli::{Cli, Command};
use tierforge::{commands, AppConfig, Runtime};
use tracing::{error, info};

fn init_tracing(cli: &Cli) {
    let filter = match &cli.log_level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info".into()),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn execute(cli: Cli) -> Result<bool> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let runtime = Arc::new(Runtime::build(config, cli.offline)?);

    let ok = match cli.command {
        Command::Run(args) => commands::run(runtime.clone(), args).await?,
        Command::Session(args) => {
            commands::session(runtime.clone(), args).await?;
            true
        }
        Command::Tiers => {
            commands::tiers(&runtime);
            true
        }
    };

    runtime.scheduler.shutdown().await;
    Ok(ok)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);
    info!(offline = cli.offline, "tierforge starting");

    match execute(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
