//! Greenlight API server.
//!
//! ```text
//!   CLI flags ─┐
//!   config.toml┴─▶ ServerConfig ─▶ Logger (stdout, JSON lines)
//!                                     │
//!                                     ▼
//!   Router (handlers) ─────────▶ Server::serve ◀── SIGINT / SIGTERM
//!   BackgroundTasks ──────────────────┘
//!                                     │
//!                     Ok ─▶ exit 0    └─▶ Err ─▶ FATAL entry, exit 1
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use greenlight::config::{load_config, validate_config, ConfigError, ServerConfig};
use greenlight::http::handlers;
use greenlight::observability::{diagnostics, metrics};
use greenlight::{props, BackgroundTasks, Level, Logger, Server};

#[derive(Parser)]
#[command(name = "greenlight")]
#[command(about = "Greenlight JSON API server", long_about = None, version)]
struct Cli {
    /// TOML configuration file; flags below override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface to bind.
    #[arg(long)]
    host: Option<String>,

    /// API server port.
    #[arg(long)]
    port: Option<u16>,

    /// Environment (development|staging|production).
    #[arg(long)]
    env: Option<String>,

    /// Minimum log level (info|error|fatal|off).
    #[arg(long)]
    log_level: Option<Level>,

    /// Grace period for in-flight requests on shutdown, in milliseconds.
    #[arg(long)]
    grace_period_ms: Option<u64>,
}

impl Cli {
    fn load(&self) -> Result<ServerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ServerConfig::default(),
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(env) = &self.env {
            config.env = env.clone();
        }
        if let Some(level) = self.log_level {
            config.logging.min_level = level;
        }
        if let Some(grace) = self.grace_period_ms {
            config.shutdown.grace_period_ms = grace;
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    diagnostics::init();
    let cli = Cli::parse();

    let config = match cli.load() {
        Ok(config) => config,
        Err(err) => Logger::stdout(Level::Info).fatal(&err, &props!()).exit(),
    };

    let logger = Arc::new(Logger::stdout(config.logging.min_level));

    tracing::debug!(
        bind_address = %config.bind_address(),
        max_connections = config.listener.max_connections,
        grace_period_ms = config.shutdown.grace_period_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let started = config
            .observability
            .metrics_address
            .parse()
            .map_err(|err: std::net::AddrParseError| err.to_string())
            .and_then(|addr| metrics::init_metrics(addr).map_err(|err| err.to_string()));
        if let Err(err) = started {
            let _ = logger.error(
                err,
                &props! { "metrics_address" => config.observability.metrics_address },
            );
        }
    }

    let tasks = BackgroundTasks::new(Arc::clone(&logger));
    let router = handlers::routes(&config.env);
    let graceful = config.shutdown.graceful;
    let server = Server::new(config, Arc::clone(&logger), tasks, router);

    let result = if graceful {
        server.serve().await
    } else {
        server.serve_simple().await
    };

    if let Err(err) = result {
        logger.fatal(&err, &props!()).exit();
    }
}
