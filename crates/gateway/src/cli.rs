//! CLI surface (§6.5): a small `clap` parser scoped to what Overture
//! actually needs — serving the gateway and inspecting/validating its
//! configuration — modeled on the teacher's `Cli`/`Command` split without
//! carrying over its workspace-specific subcommands (init/import/systemd/...).

use clap::{Parser, Subcommand};

use ov_domain::config::Config;

#[derive(Debug, Parser)]
#[command(name = "overture", version, about = "Intent orchestration engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any warnings/errors.
    Validate,
    /// Dump the resolved configuration as TOML.
    Show,
}

/// Loads the configuration from the path named by `OVERTURE_CONFIG` (or
/// `config.toml` by default). Shared by `serve` and the `config` subcommands
/// so the resolution logic lives in one place.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("OVERTURE_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = Config::load(&config_path).map_err(|e| anyhow::anyhow!("loading {config_path}: {e}"))?;
    Ok((config, config_path))
}
