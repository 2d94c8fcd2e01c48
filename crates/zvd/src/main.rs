//! zvd: ZeroVault daemon
//!
//! Usage:
//!   zvd [--config /etc/zerovault/config.toml] [--log info] [--log-format json|text]
//!
//! `--log` and `--log-format` override `daemon.log_level` and
//! `daemon.log_format` from the config file.

mod daemon;
mod http;
mod metrics;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::Path;
use std::path::PathBuf;
use tracing::{info, warn};
use zv_core::config::ZvConfig;

#[derive(Parser, Debug)]
#[command(name = "zvd", version, about = "ZeroVault encrypted file drop daemon")]
struct Cli {
    /// Path to the zvd configuration file
    #[arg(
        long,
        short = 'c',
        env = "ZV_CONFIG",
        default_value = "/etc/zerovault/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "ZV_LOG")]
    log: Option<String>,

    /// Log format (json, text)
    #[arg(long, env = "ZV_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    fn from_config(value: &str) -> Self {
        if value.eq_ignore_ascii_case("text") {
            LogFormat::Text
        } else {
            LogFormat::Json
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config comes first: it carries the logging defaults
    let (config, found) = load_config(&cli.config).await?;

    let level = cli
        .log
        .clone()
        .unwrap_or_else(|| config.daemon.log_level.clone());
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| LogFormat::from_config(&config.daemon.log_format));
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "zvd starting"
    );
    if !found {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    daemon::run(config).await
}

/// Returns the parsed config and whether the file existed.
async fn load_config(path: &Path) -> Result<(ZvConfig, bool)> {
    if !path.exists() {
        return Ok((ZvConfig::default(), false));
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
    let config = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
    Ok((config, true))
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
