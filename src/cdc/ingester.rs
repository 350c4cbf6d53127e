/*!
 * @file cdc/ingester.rs
 * @brief Polling ingester: claim, decode, upsert, retire (§4.7)
 *
 * One poll tick lists the configured glob, hands unclaimed files to a
 * bounded worker pool. Each worker claims a file via the destination's
 * compare-and-set marker, decodes it in its configured format, batches
 * rows by `max_block_size`, upserts, then marks the file processed or
 * failed and keeps or deletes the source per `after_processing`.
 */

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::cdc::format::decode;
use crate::cdc::object_store::ObjectStore;
use crate::config::{AfterProcessing, CdcConfig};
use crate::destination::{ColumnarStore, RealtimeRow};
use crate::error::Result;
use crate::shutdown::ShutdownManager;

/// Drives the staged-file queue until shutdown is signalled.
pub struct CdcIngester {
    config: CdcConfig,
    store: Arc<dyn ObjectStore>,
    destination: Arc<dyn ColumnarStore>,
}

impl CdcIngester {
    pub fn new(config: CdcConfig, store: Arc<dyn ObjectStore>, destination: Arc<dyn ColumnarStore>) -> Self {
        Self { config, store, destination }
    }

    pub async fn run(&self, shutdown: Arc<ShutdownManager>) -> Result<()> {
        if !self.config.enabled {
            debug!("cdc ingester disabled, not starting");
            return Ok(());
        }

        self.destination.ensure_schema().await?;

        let mut shutdown_rx = shutdown.subscribe();
        let worker_count = self.config.effective_max_threads();
        // Caps in-flight claims at twice the worker count so a slow poll
        // tick doesn't pile up more claimed-but-unprocessed files than the
        // pool can actually work through (§4.7 backpressure).
        let permits = Arc::new(Semaphore::new(worker_count * 2));

        loop {
            tokio::select! {
                _ = sleep(Duration::from_millis(self.config.poll_interval_ms)) => {
                    if let Err(e) = self.poll_once(&permits).await {
                        warn!("cdc poll tick failed: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("cdc ingester shutting down");
                    return Ok(());
                }
            }
        }
    }

    async fn poll_once(&self, permits: &Arc<Semaphore>) -> Result<()> {
        let mut files = self.store.list(&self.config.path).await?;
        if self.config.ordered_mode {
            files.sort_by(|a, b| a.path.cmp(&b.path));
        }

        if files.is_empty() {
            return Ok(());
        }

        let mut handles = Vec::new();
        for file in files {
            let permit = permits.clone().acquire_owned().await.expect("semaphore not closed");
            let store = self.store.clone();
            let destination = self.destination.clone();
            let config = self.config.clone();
            let path = file.path;

            let handle = tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = process_one(&config, store.as_ref(), destination.as_ref(), &path).await {
                    error!("cdc file {} failed permanently: {}", path, e);
                }
            });

            if config_is_ordered(&self.config) {
                // A single worker processes files strictly in path order;
                // awaiting inline keeps that guarantee without a second pool.
                let _ = handle.await;
            } else {
                handles.push(handle);
            }
        }

        for handle in handles {
            let _ = handle.await;
        }

        Ok(())
    }
}

fn config_is_ordered(config: &CdcConfig) -> bool {
    config.ordered_mode
}

async fn process_one(config: &CdcConfig, store: &dyn ObjectStore, destination: &dyn ColumnarStore, path: &str) -> Result<()> {
    if !destination.try_claim_file(path).await? {
        debug!("cdc file {} already claimed or finished, skipping", path);
        return Ok(());
    }

    match ingest_with_retry(config, store, destination, path).await {
        Ok(()) => {
            destination.mark_processed(path).await?;
            if config.after_processing == AfterProcessing::Delete {
                store.delete(path).await?;
            }
            Ok(())
        }
        Err(e) => {
            destination.mark_failed(path, &e.to_string()).await?;
            Err(e)
        }
    }
}

/// Transient failures (network, store unavailable) retry with bounded
/// exponential backoff; decode/schema failures are not retried since a
/// corrupt file will not parse differently on a second attempt.
async fn ingest_with_retry(config: &CdcConfig, store: &dyn ObjectStore, destination: &dyn ColumnarStore, path: &str) -> Result<()> {
    const MAX_ATTEMPTS: u32 = 5;
    let mut attempt = 0;
    let mut backoff_ms = 200u64;

    loop {
        attempt += 1;
        match ingest_once(config, store, destination, path).await {
            Ok(()) => return Ok(()),
            Err(e @ crate::error::FauxDBError::CdcDecode(_)) => return Err(e),
            Err(e) if attempt >= MAX_ATTEMPTS => return Err(e),
            Err(e) => {
                warn!("cdc file {} transient failure (attempt {}/{}): {}", path, attempt, MAX_ATTEMPTS, e);
                sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(5_000);
            }
        }
    }
}

async fn ingest_once(config: &CdcConfig, store: &dyn ObjectStore, destination: &dyn ColumnarStore, path: &str) -> Result<()> {
    let bytes = store.get(path).await?;
    let records = decode(config.format, &bytes)?;

    for chunk in records.chunks(config.max_block_size.max(1)) {
        let rows: Vec<RealtimeRow> = chunk
            .iter()
            .map(|r| RealtimeRow {
                collection: r.collection.clone(),
                doc_id: r.doc_id.clone(),
                data: r.data.clone(),
                updated_at: r.updated_at,
                version: r.version,
                is_deleted: if r.is_deleted { 1 } else { 0 },
            })
            .collect();
        destination.upsert_rows(&rows).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_is_ordered_reflects_flag() {
        let mut config = default_test_config();
        assert!(!config_is_ordered(&config));
        config.ordered_mode = true;
        assert!(config_is_ordered(&config));
    }

    fn default_test_config() -> CdcConfig {
        CdcConfig {
            enabled: true,
            endpoint: "https://localhost".to_string(),
            bucket: "cdc".to_string(),
            path: "cdc/*.jsonl".to_string(),
            format: crate::config::CdcFormat::JsonEachRow,
            poll_interval_ms: 1000,
            max_threads: 4,
            max_block_size: 1000,
            after_processing: AfterProcessing::Keep,
            ordered_mode: false,
        }
    }
}
