#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::{io::Read, time::Duration};

use clap::Parser;
use postbox::{
    cli::{Cli, Command},
    config::Postbox,
    controller::{Controller, SHUTDOWN_BROADCAST, shutdown_on_signal},
};
use postbox_common::{internal, logging, tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.validate()?;

    if let Some(dir) = &cli.chdir {
        std::env::set_current_dir(dir)
            .map_err(|e| anyhow::anyhow!("Unable to change to {}: {e}", dir.display()))?;
    }

    let config_path = cli.lookup().resolve()?;
    let mut config = Postbox::load(&config_path)?;
    cli.apply(&mut config);

    logging::init(&config.logging)?;
    internal!(level = DEBUG, "Loaded configuration from {}", config_path.display());

    let controller = Controller::new(config)?;

    match cli.command() {
        Command::Deliver(_) => {
            tokio::spawn(listen_for_shutdown());

            let report = controller.deliver(&SHUTDOWN_BROADCAST).await?;
            if report.interrupted {
                internal!(level = WARN, "Delivery run interrupted: {report}");
            }
        }
        Command::Serve { interval, .. } => {
            tokio::spawn(listen_for_shutdown());

            controller
                .serve(Duration::from_secs(interval), &SHUTDOWN_BROADCAST)
                .await?;
        }
        Command::Mailq => {
            controller.mailq(&mut std::io::stdout().lock()).await?;
        }
        Command::Enqueue { not_before, file } => {
            let raw = match file {
                Some(path) => std::fs::read(&path)
                    .map_err(|e| anyhow::anyhow!("Unable to read {}: {e}", path.display()))?,
                None => {
                    let mut raw = Vec::new();
                    std::io::stdin().read_to_end(&mut raw)?;
                    raw
                }
            };

            for id in controller.enqueue(&raw, not_before).await? {
                println!("{id}");
            }
        }
    }

    Ok(())
}

/// First signal stops at the next group boundary, a second CTRL+C exits.
async fn listen_for_shutdown() {
    if let Err(err) = shutdown_on_signal().await {
        tracing::error!("Unable to listen for shutdown signals: {err}");
        return;
    }

    if tokio::signal::ctrl_c().await.is_ok() {
        internal!(level = WARN, "Forcing shutdown");
        std::process::exit(130);
    }
}
