use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::sync::watch;

use link_survey::cli::{Cli, Commands, SurveyCommandHandler};
use link_survey::config::SurveyConfig;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = SurveyConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let handler = SurveyCommandHandler::new(config);

    match cli.command {
        Commands::Run(args) => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Ctrl+C received, shutting down");
                        let _ = shutdown_tx.send(true);
                    }
                    Err(e) => warn!("Unable to listen for Ctrl+C: {}", e),
                }
            });

            handler.handle_run_command(args, shutdown_rx).await?;
        }
        Commands::Check => {
            if !handler.handle_check_command()? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
