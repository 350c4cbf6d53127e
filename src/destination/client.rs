/*!
 * @file destination/client.rs
 * @brief Columnar store client: schema, claim markers, dedup upsert (§4.7, §4.8)
 */

use async_trait::async_trait;
use klickhouse::{Client, ClientOptions, QueryBuilder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::ddl::{processed_files_table_ddl, realtime_table_ddl, tombstone_table_ddl};
use crate::config::DestinationConfig;
use crate::error::{FauxDBError, Result};

/// One row of the realtime/CDC table (§3.6).
#[derive(Debug, Clone, Serialize, Deserialize, klickhouse::Row)]
pub struct RealtimeRow {
    pub collection: String,
    pub doc_id: String,
    pub data: String,
    pub updated_at: i64,
    pub version: u64,
    pub is_deleted: u8,
}

#[derive(Debug, Clone, klickhouse::Row)]
struct ProcessedFileMarker {
    path: String,
    status: String,
    error: String,
    processed_at: i64,
}

/// The destination columnar store's consumed interface (§1, §4.7, §4.8):
/// schema bootstrap, dedup-by-version upsert, and the CAS claim marker
/// that gives the ingester at-most-once effect per file.
#[async_trait]
pub trait ColumnarStore: Send + Sync {
    async fn ensure_schema(&self) -> Result<()>;

    /// Atomically claims `path` for processing; returns `false` if a
    /// `done` or `failed` marker already exists (§4.7).
    async fn try_claim_file(&self, path: &str) -> Result<bool>;
    async fn mark_processed(&self, path: &str) -> Result<()>;
    async fn mark_failed(&self, path: &str, error: &str) -> Result<()>;

    async fn upsert_rows(&self, rows: &[RealtimeRow]) -> Result<()>;
}

pub struct KlickhouseStore {
    client: Client,
    config: DestinationConfig,
}

impl KlickhouseStore {
    pub async fn connect(config: DestinationConfig) -> Result<Self> {
        let options = ClientOptions { default_database: config.database.clone(), ..Default::default() };
        let client = Client::connect(&config.url, options)
            .await
            .map_err(|e| FauxDBError::Destination(format!("failed to connect to {}: {}", config.url, e)))?;

        Ok(Self { client, config })
    }

    fn table_name(&self, collection: Option<&str>) -> String {
        match (self.config.per_collection_tables, collection) {
            (true, Some(coll)) => format!("{}_changes", sanitize_identifier(coll)),
            _ => self.config.realtime_table.clone(),
        }
    }
}

#[async_trait]
impl ColumnarStore for KlickhouseStore {
    async fn ensure_schema(&self) -> Result<()> {
        self.client
            .execute(&realtime_table_ddl(&self.config, &self.config.realtime_table))
            .await
            .map_err(|e| FauxDBError::Destination(e.to_string()))?;
        self.client
            .execute(&tombstone_table_ddl(&self.config))
            .await
            .map_err(|e| FauxDBError::Destination(e.to_string()))?;
        self.client
            .execute(&processed_files_table_ddl(&self.config))
            .await
            .map_err(|e| FauxDBError::Destination(e.to_string()))?;
        Ok(())
    }

    async fn try_claim_file(&self, path: &str) -> Result<bool> {
        let existing: Vec<ProcessedFileMarker> = self
            .client
            .query_collect(
                QueryBuilder::new(&format!(
                    "SELECT path, status, error, processed_at FROM {}.processed_files FINAL WHERE path = $1",
                    self.config.database
                ))
                .arg(path),
            )
            .await
            .map_err(|e| FauxDBError::Destination(e.to_string()))?;

        if existing.iter().any(|m| m.status == "done" || m.status == "failed") {
            return Ok(false);
        }

        self.client
            .execute(
                QueryBuilder::new(&format!(
                    "INSERT INTO {}.processed_files (path, status, error, processed_at) VALUES ($1, 'claimed', '', $2)",
                    self.config.database
                ))
                .arg(path)
                .arg(now_millis()),
            )
            .await
            .map_err(|e| FauxDBError::Destination(e.to_string()))?;

        Ok(true)
    }

    async fn mark_processed(&self, path: &str) -> Result<()> {
        self.client
            .execute(
                QueryBuilder::new(&format!(
                    "INSERT INTO {}.processed_files (path, status, error, processed_at) VALUES ($1, 'done', '', $2)",
                    self.config.database
                ))
                .arg(path)
                .arg(now_millis()),
            )
            .await
            .map_err(|e| FauxDBError::Destination(e.to_string()))?;
        info!("cdc file {} marked processed", path);
        Ok(())
    }

    async fn mark_failed(&self, path: &str, error: &str) -> Result<()> {
        self.client
            .execute(
                QueryBuilder::new(&format!(
                    "INSERT INTO {}.processed_files (path, status, error, processed_at) VALUES ($1, 'failed', $2, $3)",
                    self.config.database
                ))
                .arg(path)
                .arg(error)
                .arg(now_millis()),
            )
            .await
            .map_err(|e| FauxDBError::Destination(e.to_string()))?;
        warn!("cdc file {} marked failed: {}", path, error);
        Ok(())
    }

    async fn upsert_rows(&self, rows: &[RealtimeRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        // Rows for different target tables under per-collection mode are
        // rare within one CDC batch (a staged file carries one collection);
        // group defensively rather than assume it.
        use std::collections::HashMap;
        let mut by_table: HashMap<String, Vec<&RealtimeRow>> = HashMap::new();
        for row in rows {
            by_table.entry(self.table_name(Some(&row.collection))).or_default().push(row);
        }

        for (table, rows) in by_table {
            let owned: Vec<RealtimeRow> = rows.into_iter().cloned().collect();
            self.client
                .insert_native_block(&format!("INSERT INTO {}.{} FORMAT Native", self.config.database, table), owned)
                .await
                .map_err(|e| FauxDBError::Destination(e.to_string()))?;
        }

        Ok(())
    }
}

fn sanitize_identifier(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect()
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_identifier_strips_non_alnum() {
        assert_eq!(sanitize_identifier("orders-v2"), "orders_v2");
        assert_eq!(sanitize_identifier("users"), "users");
    }
}
