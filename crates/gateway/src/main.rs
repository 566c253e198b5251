use anyhow::Context;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use ov_domain::config::ConfigSeverity;
use ov_gateway::cli::{Cli, Command, ConfigCommand};
use ov_gateway::{api, bootstrap};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = ov_gateway::cli::load_config()?;
            run_server(config).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = ov_gateway::cli::load_config()?;
            let issues = config.validate();
            for issue in &issues {
                match issue.severity {
                    ConfigSeverity::Warning => println!("warning: {issue}"),
                    ConfigSeverity::Error => println!("error: {issue}"),
                }
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                anyhow::bail!("{config_path} failed validation");
            }
            println!("{config_path}: ok");
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = ov_gateway::cli::load_config()?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("overture {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ov_gateway=debug")))
        .json()
        .init();
}

async fn run_server(config: ov_domain::config::Config) -> anyhow::Result<()> {
    tracing::info!("overture starting");

    let state = bootstrap::build_app_state(config).context("building app state")?;
    bootstrap::spawn_background_tasks(&state);

    let cors_layer = build_cors_layer();
    let max_concurrent = std::env::var("OVERTURE_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    let bind = state.config.server.bind.clone();

    let app = api::router(state.clone())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind).await.with_context(|| format!("binding to {bind}"))?;
    tracing::info!(addr = %bind, "overture listening");

    axum::serve(listener, app).await.context("axum server error")?;

    Ok(())
}

/// Permissive CORS by default: Overture has no `[server.cors]` config
/// surface (unlike the teacher's allow-listed-origins setup) since its
/// clients are first-party dashboards and automation, not third-party
/// embeds. Tighten this the way the teacher does if that stops being true.
fn build_cors_layer() -> CorsLayer {
    CorsLayer::permissive()
}
