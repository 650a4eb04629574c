use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use clap::{Parser, Subcommand};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use sw_domain::config::Config;
use sw_gateway::{api, bootstrap};

#[derive(Parser)]
#[command(name = "switchboard", about = "Conversational request router")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "switchboard.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (the default).
    Serve {
        /// Register the built-in demo handlers and tool fixtures.
        #[arg(long)]
        seed_builtins: bool,
    },
    /// Parse and validate the config file, then exit.
    CheckConfig,
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        None => run_server(&cli.config, false).await,
        Some(Command::Serve { seed_builtins }) => run_server(&cli.config, seed_builtins).await,
        Some(Command::CheckConfig) => check_config(&cli.config),
        Some(Command::Version) => {
            println!("switchboard {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sw_gateway=debug")),
        )
        .json()
        .init();
}

fn check_config(path: &PathBuf) -> anyhow::Result<()> {
    let config = Config::load(path).context("loading config")?;
    println!(
        "config ok: listening on {}:{}, {} handler timeout override(s)",
        config.server.host,
        config.server.port,
        config.executor.per_handler_timeout_s.len()
    );
    Ok(())
}

async fn run_server(config_path: &PathBuf, seed_builtins: bool) -> anyhow::Result<()> {
    init_tracing();
    let config = Arc::new(Config::load(config_path).context("loading config")?);
    tracing::info!(config = %config_path.display(), "switchboard starting");

    let state = bootstrap::build_app_state(config.clone(), seed_builtins).await?;
    bootstrap::spawn_sweeper(state.orchestrator.clone());

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            config
                .server
                .cors_origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok()),
        ))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    let app = api::router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
