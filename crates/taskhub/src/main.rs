//! # taskhub
//!
//! Server binary: loads settings, starts the HTTP/WebSocket server, and waits
//! for a shutdown signal. `taskhub token` mints a development token.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::TimeDelta;
use clap::{Parser, Subcommand};
use taskhub_auth::{TokenVerifier, issue_token};
use taskhub_core::logging::init_subscriber;
use taskhub_server::config::ServerConfig;
use taskhub_server::server::TaskHubServer;
use taskhub_server::shutdown::shutdown_signal;
use taskhub_settings::Settings;

/// Live task-board update server.
#[derive(Parser, Debug)]
#[command(name = "taskhub", about = "Live task-board update server")]
struct Cli {
    /// Host to bind (overrides settings and `HOST`).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings and `PORT`).
    #[arg(long)]
    port: Option<u16>,

    /// JSON settings file (defaults to `TASKHUB_SETTINGS`).
    #[arg(long)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a signed token for local testing.
    Token {
        /// User ID to put in `sub`.
        #[arg(long)]
        sub: String,

        /// Optional email claim.
        #[arg(long)]
        email: Option<String>,

        /// Lifetime in hours.
        #[arg(long, default_value = "24")]
        ttl_hours: i64,
    },
}

impl Cli {
    fn load_settings(&self) -> Result<Settings> {
        let path = self.settings.clone().or_else(taskhub_settings::settings_path);
        let mut settings =
            taskhub_settings::load_settings_from(path.as_deref()).context("Failed to load settings")?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let settings = cli.load_settings()?;
    init_subscriber(&settings.logging.level, settings.logging.format);

    match cli.command {
        Some(Command::Token {
            sub,
            email,
            ttl_hours,
        }) => {
            let token = issue_token(
                &settings.auth.jwt_secret,
                &sub,
                email.as_deref(),
                TimeDelta::hours(ttl_hours),
            )
            .context("Failed to sign token")?;
            println!("{token}");
            Ok(())
        }
        None => serve(&settings).await,
    }
}

async fn serve(settings: &Settings) -> Result<()> {
    let metrics = taskhub_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let config = ServerConfig::from(settings);
    let server = TaskHubServer::new(config, TokenVerifier::new(&settings.auth.jwt_secret))
        .with_metrics(metrics);

    let addr = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        %addr,
        origins = ?server.config().allowed_origins,
        "taskhub listening on http://{addr}"
    );

    shutdown_signal().await;

    tracing::info!("Shutting down...");
    server.shutdown().graceful_shutdown(None).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
