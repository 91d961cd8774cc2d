use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use portico_api::app::{build_app, services};
use portico_infra::seed::{self, SeedOptions};
use portico_infra::{AppConfig, SessionSweeper};

#[derive(Parser)]
#[command(name = "portico-api")]
#[command(about = "Session and authorization service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Run the HTTP server (default)
    Serve,

    /// Load reference systems, roles, permissions and menus, then exit
    Seed {
        #[arg(long, default_value = "admin@gerege.mn")]
        admin_email: String,

        #[arg(long, default_value = "Admin@123")]
        admin_password: String,

        #[arg(long, default_value = "portico-web")]
        web_device_uid: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    portico_observability::init();

    let cli = Cli::parse();
    let config = AppConfig::load().context("loading configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Seed {
            admin_email,
            admin_password,
            web_device_uid,
        } => {
            let store = services::open_store(&config).await?;
            let options = SeedOptions {
                admin_email,
                admin_password,
                web_device_uid,
            };
            let report = seed::run(store.as_ref(), &options).await?;
            info!(
                permissions_created = report.permissions_created,
                admin_created = report.admin_created,
                "seed finished"
            );
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let services = Arc::new(services::build_services(&config).await?);
    let sweeper = SessionSweeper::spawn(services.sessions.clone(), config.sweep_interval);

    let addr = config.server.addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, build_app(services))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    if tokio::time::timeout(config.server.shutdown_grace, sweeper.shutdown())
        .await
        .is_err()
    {
        warn!("session sweeper did not stop within the grace period");
    }
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
