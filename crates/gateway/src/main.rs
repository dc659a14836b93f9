use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use cg_domain::config::Config;
use cg_gateway::api;
use cg_gateway::state::AppState;

#[derive(Parser)]
#[command(name = "coursegate", about = "Model routing and streaming gateway")]
struct Cli {
    /// Path to the config file.
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (default).
    Serve,
    /// Parse and validate the config file, then exit.
    ConfigValidate,
    /// Print the effective config (secrets redacted).
    ConfigShow,
    /// Print the version.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Arc::new(load_config(&cli.config)?);
            run_server(config).await
        }
        Some(Command::ConfigValidate) => {
            let config = load_config(&cli.config)?;
            println!(
                "config ok: {} provider(s), {} course override(s)",
                config.llm.providers.len(),
                config.llm.courses.len()
            );
            Ok(())
        }
        Some(Command::ConfigShow) => {
            let mut config = load_config(&cli.config)?;
            for provider in &mut config.llm.providers {
                if provider.api_key.is_some() {
                    provider.api_key = Some("<redacted>".into());
                }
            }
            config.llm.envelope_key = config.llm.envelope_key.map(|_| "<redacted>".into());
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("coursegate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cg_gateway=debug"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            Config::from_toml_str(&raw).with_context(|| format!("loading config from {path}"))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path, "config file not found, starting with defaults");
            Ok(Config::default())
        }
        Err(e) => Err(e).with_context(|| format!("reading config from {path}")),
    }
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    let state = AppState::build(config.clone()).context("building application state")?;

    let mut router = api::router(state);

    if let Some(origin) = &config.server.cors_allow_origin {
        let origin = origin
            .parse::<axum::http::HeaderValue>()
            .context("invalid cors_allow_origin")?;
        router = router.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::exact(origin))
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        );
    }
    let router = router.layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    tracing::info!(addr = %addr, "coursegate listening");
    axum::serve(listener, router).await.context("server error")
}
