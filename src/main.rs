//! Detecting Gateway Command Line Tool
//!
//! This binary is the command-line interface for the detecting gateway.

use std::path::PathBuf;

use clap::Parser;
use log::{error, info, warn};

use detecting_gateway::common::{init_logger, parse_socket_addr, GatewayError, Result};
use detecting_gateway::config::{
    log_config, BackendConfig, ConfigLoader, ConfigMerger, ConfigValidator, GatewayConfig, ProtocolConfig,
};
use detecting_gateway::{Gateway, GatewayService, APP_NAME, VERSION};

/// Detecting Gateway: route AMQP, MQTT, OpenWire, STOMP, HTTP and TLS from one port
#[derive(Parser, Debug)]
#[clap(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Listen address
    #[clap(short, long)]
    listen: Option<String>,

    /// Backend as scheme://host:port, optionally suffixed with @virtual-host (repeatable)
    #[clap(short, long = "backend")]
    backends: Vec<String>,

    /// Enabled protocols in priority order, comma separated
    #[clap(long, value_delimiter = ',')]
    protocols: Vec<String>,

    /// Log level
    #[clap(long)]
    log_level: Option<String>,

    /// Load configuration from environment variables
    #[clap(long)]
    from_env: bool,

    /// Load configuration from a file
    #[clap(short, long = "config")]
    config_file: Option<PathBuf>,
}

impl Args {
    /// Command line options as a configuration layer
    fn to_config(&self) -> Result<GatewayConfig> {
        let mut config = GatewayConfig::default();

        if let Some(listen) = &self.listen {
            config.listen = parse_socket_addr(listen)?;
        }
        if let Some(log_level) = &self.log_level {
            config.log_level = log_level.clone();
        }
        if !self.protocols.is_empty() {
            config.protocols = self.protocols.iter().map(|name| ProtocolConfig::named(name)).collect();
        }
        config.backends = self
            .backends
            .iter()
            .map(|arg| BackendConfig::from_arg(arg))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logger early with the command line level, if any
    init_logger(args.log_level.as_deref().unwrap_or("info"));

    info!("Starting {} v{}", APP_NAME, VERSION);

    // Defaults < file < environment < command line
    let config = GatewayConfig::load(args.config_file.as_deref(), args.from_env)?.merge(args.to_config()?);

    config.validate()?;
    for warning in config.check_warnings() {
        warn!("{}", warning);
    }

    info!("Configuration loaded successfully");
    log_config(&config);

    let gateway = Gateway::from_config(&config)?;
    let service = GatewayService::bind(config.listen, gateway).await?;
    let (handle, mut task) = service.start();

    info!("Gateway ready, press Ctrl+C to stop");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
            handle.shutdown().await?;
        }
        // The service only stops by itself on a fatal error
        result = &mut task => {
            warn!("Gateway service stopped unexpectedly");
            return result.map_err(|e| GatewayError::Other(format!("Gateway task failed: {}", e)))?;
        }
    }

    task.await
        .map_err(|e| GatewayError::Other(format!("Gateway task failed: {}", e)))?
}
