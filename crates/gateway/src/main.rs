use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use pp_domain::config::{Config, ConfigSeverity};
use pp_gateway::{api, bootstrap};

#[derive(Parser)]
#[command(name = "payportald", version, about = "Payment portal session engine")]
struct Cli {
    /// Path to the TOML config file. Missing file = built-in defaults.
    #[arg(long, default_value = "payportal.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Inspect or validate the configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print validation issues and exit non-zero on errors.
    Validate,
    /// Print the effective configuration as TOML.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config(&cli.config)?;

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => run_server(Arc::new(config)).await,
        Some(Command::Config {
            command: ConfigCommand::Validate,
        }) => {
            let issues = config.validate();
            for issue in &issues {
                println!("{issue}");
            }
            if issues
                .iter()
                .any(|i| i.severity == ConfigSeverity::Error)
            {
                std::process::exit(1);
            }
            println!("config ok");
            Ok(())
        }
        Some(Command::Config {
            command: ConfigCommand::Show,
        }) => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::info!(path = %path.display(), "config loaded");
        Ok(config)
    } else {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    let state = bootstrap::build_app_state(config.clone())?;
    bootstrap::spawn_background_tasks(&state);

    let app = api::router(state.clone())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "payportald listening");

    axum::serve(listener, app).await.context("serving HTTP")
}
