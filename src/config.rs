/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file config.rs
 * @brief FauxDB configuration management
 */

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub ssl: SslConfig,
    pub authentication: AuthenticationConfig,
    pub cdc: CdcConfig,
    pub destination: DestinationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: u32,
    pub connection_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    /// §5: server-side cursors are swept for idleness on this cadence.
    pub cursor_sweep_interval_secs: u64,
    pub cursor_idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub uri: String,
    pub max_connections: u32,
    pub connection_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub enable_jsonb_extensions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SslConfig {
    pub enabled: bool,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub ca_file: Option<String>,
    pub passphrase: Option<String>,
    pub request_cert: bool,
    pub reject_unauthorized: bool,
    pub min_tls_version: String,
    pub max_tls_version: String,
    pub server_name: Option<String>,
    pub alpn_protocols: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationConfig {
    pub enabled: bool,
    pub default_auth_method: String,
    pub session_timeout_minutes: u64,
    pub scram_conversation_idle_timeout_secs: u64,
    /// Bootstrap credentials for the admin database, per §6.4.
    pub bootstrap_username: Option<String>,
    pub bootstrap_password: Option<String>,
    pub iteration_count: u32,
}

/// Options for the CDC queue ingester (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdcConfig {
    pub enabled: bool,
    /// Object-store base URL; must be HTTPS.
    pub endpoint: String,
    pub bucket: String,
    /// Glob with `*`/`{placeholder}` for files to ingest.
    pub path: String,
    pub format: CdcFormat,
    pub poll_interval_ms: u64,
    pub max_threads: usize,
    pub max_block_size: usize,
    pub after_processing: AfterProcessing,
    pub ordered_mode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CdcFormat {
    Parquet,
    #[serde(rename = "JSONEachRow")]
    JsonEachRow,
    #[serde(rename = "CSV")]
    Csv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AfterProcessing {
    Keep,
    Delete,
}

/// Destination columnar store connection and table-shape options (§4.8, §6.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub url: String,
    pub database: String,
    pub realtime_table: String,
    pub tombstone_table: String,
    pub per_collection_tables: bool,
    pub partition_by_month: bool,
    pub ttl_days: Option<u32>,
    pub tombstone_ttl_days: u32,
}

impl CdcConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enabled && !self.endpoint.starts_with("https://") {
            anyhow::bail!("cdc.endpoint must be HTTPS");
        }
        if self.poll_interval_ms < 100 {
            anyhow::bail!("cdc.poll_interval_ms must be >= 100");
        }
        if self.max_threads == 0 || self.max_threads > 64 {
            anyhow::bail!("cdc.max_threads must be in 1..=64");
        }
        Ok(())
    }

    /// §4.7: ordered mode forces a single worker.
    pub fn effective_max_threads(&self) -> usize {
        if self.ordered_mode {
            1
        } else {
            self.max_threads
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 27018,
                max_connections: 1000,
                connection_timeout_ms: 5000,
                idle_timeout_ms: 60000,
                cursor_sweep_interval_secs: 60,
                cursor_idle_timeout_secs: 600,
            },
            database: DatabaseConfig {
                uri: "postgresql://localhost:5432/fauxdb".to_string(),
                max_connections: 10,
                connection_timeout_ms: 5000,
                idle_timeout_ms: 60000,
                enable_jsonb_extensions: true,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
                output: "stdout".to_string(),
            },
            ssl: SslConfig {
                enabled: false,
                cert_file: None,
                key_file: None,
                ca_file: None,
                passphrase: None,
                request_cert: false,
                reject_unauthorized: true,
                min_tls_version: "1.2".to_string(),
                max_tls_version: "1.3".to_string(),
                server_name: None,
                alpn_protocols: vec![],
            },
            authentication: AuthenticationConfig {
                enabled: true,
                default_auth_method: "SCRAM-SHA-256".to_string(),
                session_timeout_minutes: 30,
                scram_conversation_idle_timeout_secs: 300,
                bootstrap_username: Some("admin".to_string()),
                bootstrap_password: Some("admin123".to_string()),
                iteration_count: 15000,
            },
            cdc: CdcConfig {
                enabled: false,
                endpoint: "https://localhost".to_string(),
                bucket: "cdc".to_string(),
                path: "cdc/*/*/*/*.jsonl".to_string(),
                format: CdcFormat::JsonEachRow,
                poll_interval_ms: 1000,
                max_threads: 4,
                max_block_size: 65536,
                after_processing: AfterProcessing::Keep,
                ordered_mode: false,
            },
            destination: DestinationConfig {
                url: "tcp://localhost:9000".to_string(),
                database: "fauxdb_cdc".to_string(),
                realtime_table: "realtime_changes".to_string(),
                tombstone_table: "tombstones".to_string(),
                per_collection_tables: false,
                partition_by_month: true,
                ttl_days: None,
                tombstone_ttl_days: 30,
            },
        }
    }
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let config = Self::default();
            config.save(path).await?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path).await?;

        let config: Config = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };

        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            Some("toml") => toml::to_string_pretty(self)?,
            _ => toml::to_string_pretty(self)?,
        };

        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Layered load: defaults, then an optional file, then `FAUXDB_*` env
    /// overrides, expressed with the `config` crate's source-chain builder.
    pub fn load_layered(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            if path.exists() {
                builder = builder.add_source(config::File::from(path));
            }
        }

        let builder = builder.add_source(
            config::Environment::with_prefix("FAUXDB")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn connection_string(&self) -> String {
        let scheme = if self.ssl.enabled { "mongodb+tls" } else { "mongodb" };
        format!("{}://{}:{}", scheme, self.server.host, self.server.port)
    }
}
