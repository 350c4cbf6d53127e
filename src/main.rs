/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file main.rs
 * @brief FauxDB server main entry point: wire protocol server plus CDC ingester
 */

use std::path::PathBuf;
use std::sync::Arc;

use fauxdb::backend::PostgresBackend;
use fauxdb::cdc::{CdcIngester, HttpObjectStore};
use fauxdb::destination::KlickhouseStore;
use fauxdb::{init_logger, Config, FauxDBServer, LogLevel};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger(LogLevel::Info, false);

    let cli = CliArgs::parse(std::env::args().skip(1));
    let mut config = Config::load_layered(cli.config_path.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    info!("fauxdb starting up");
    info!("listen address: {}:{}", config.server.host, config.server.port);
    info!("tls enabled: {}", config.ssl.enabled);
    info!("authentication enabled: {}", config.authentication.enabled);
    info!("cdc ingestion enabled: {}", config.cdc.enabled);

    let backend = Arc::new(PostgresBackend::connect(&config.database.uri, config.database.max_connections as usize).await?);

    let server = Arc::new(FauxDBServer::new(config.clone(), backend)?);

    if config.cdc.enabled {
        config.cdc.validate().map_err(|e| fauxdb::FauxDBError::Config(e.to_string()))?;
        spawn_cdc_ingester(&config).await?;
    }

    let server_handle = {
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("server stopped with error: {}", e);
            }
        })
    };

    server_handle.await?;
    Ok(())
}

/// Bootstraps the object-store client and the columnar destination, then
/// spawns the polling ingester as a background task tied to the server's
/// own shutdown signal (§4.7).
async fn spawn_cdc_ingester(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(HttpObjectStore::new(&config.cdc.endpoint, &config.cdc.bucket)?);
    let destination = Arc::new(KlickhouseStore::connect(config.destination.clone()).await?);
    let shutdown = Arc::new(fauxdb::ShutdownManager::new(Default::default()));

    let ingester = CdcIngester::new(config.cdc.clone(), store, destination);

    tokio::spawn(async move {
        if let Err(e) = ingester.run(shutdown).await {
            warn!("cdc ingester stopped with error: {}", e);
        }
    });

    Ok(())
}

/// `--config <path>`, `--host <host>`, `--port <port>`, parsed by hand in
/// the same `--flag value` loop shape the bootstrap scripts already use
/// elsewhere in this codebase, rather than pulling in an argument-parsing
/// crate for three flags.
#[derive(Default)]
struct CliArgs {
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
}

impl CliArgs {
    fn parse(args: impl Iterator<Item = String>) -> Self {
        let args: Vec<String> = args.collect();
        let mut parsed = Self::default();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => {
                    if let Some(value) = args.get(i + 1) {
                        parsed.config_path = Some(PathBuf::from(value));
                        i += 1;
                    }
                }
                "--host" => {
                    if let Some(value) = args.get(i + 1) {
                        parsed.host = Some(value.clone());
                        i += 1;
                    }
                }
                "--port" => {
                    if let Some(value) = args.get(i + 1) {
                        parsed.port = value.parse().ok();
                        i += 1;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        parsed
    }
}
