/*!
 * @file cdc/object_store.rs
 * @brief Object-store client: list/get/delete over HTTPS (§4.7, §3.7)
 */

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{FauxDBError, Result};

#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub path: String,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list(&self, path_glob: &str) -> Result<Vec<ObjectMeta>>;
    async fn get(&self, path: &str) -> Result<Vec<u8>>;
    async fn delete(&self, path: &str) -> Result<()>;
}

/// Talks to an HTTPS-compatible object store (S3-style bucket listing +
/// per-object GET/DELETE) behind the configured `endpoint`/`bucket` (§4.7).
pub struct HttpObjectStore {
    client: Client,
    endpoint: String,
    bucket: String,
}

impl HttpObjectStore {
    pub fn new(endpoint: &str, bucket: &str) -> Result<Self> {
        if !endpoint.starts_with("https://") {
            return Err(FauxDBError::Config("cdc.endpoint must be HTTPS".to_string()));
        }
        Ok(Self { client: Client::new(), endpoint: endpoint.trim_end_matches('/').to_string(), bucket: bucket.to_string() })
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, path)
    }

    fn list_url(&self, prefix: &str) -> String {
        format!("{}/{}?list-type=2&prefix={}", self.endpoint, self.bucket, prefix)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn list(&self, path_glob: &str) -> Result<Vec<ObjectMeta>> {
        let prefix = static_prefix_of(path_glob);
        let response = self
            .client
            .get(self.list_url(&prefix))
            .send()
            .await
            .map_err(|e| FauxDBError::ObjectStore(format!("list failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(FauxDBError::ObjectStore(format!("list returned status {}", response.status())));
        }

        let body: ListBucketResult = response
            .json()
            .await
            .map_err(|e| FauxDBError::ObjectStore(format!("list response decode failed: {}", e)))?;

        Ok(body
            .contents
            .into_iter()
            .filter(|entry| super::glob::matches(path_glob, &entry.key))
            .map(|entry| ObjectMeta { path: entry.key, size: entry.size })
            .collect())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.object_url(path))
            .send()
            .await
            .map_err(|e| FauxDBError::ObjectStore(format!("get {} failed: {}", path, e)))?;

        if !response.status().is_success() {
            return Err(FauxDBError::ObjectStore(format!("get {} returned status {}", path, response.status())));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| FauxDBError::ObjectStore(format!("get {} body read failed: {}", path, e)))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.object_url(path))
            .send()
            .await
            .map_err(|e| FauxDBError::ObjectStore(format!("delete {} failed: {}", path, e)))?;

        if !response.status().is_success() && response.status().as_u16() != 404 {
            return Err(FauxDBError::ObjectStore(format!("delete {} returned status {}", path, response.status())));
        }
        Ok(())
    }
}

#[derive(Debug, serde::Deserialize)]
struct ListBucketResult {
    #[serde(default, rename = "Contents")]
    contents: Vec<ListEntry>,
}

#[derive(Debug, serde::Deserialize)]
struct ListEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Size", default)]
    size: u64,
}

/// The longest literal prefix before the first glob metacharacter, used to
/// narrow the store-side listing before client-side glob filtering.
fn static_prefix_of(pattern: &str) -> String {
    let cut = pattern.find(['*', '{']).unwrap_or(pattern.len());
    pattern[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_prefix_stops_at_wildcard() {
        assert_eq!(static_prefix_of("cdc/{database}/{collection}/*/*.parquet"), "cdc/");
        assert_eq!(static_prefix_of("cdc/sales/orders/*.json"), "cdc/sales/orders/");
        assert_eq!(static_prefix_of("cdc/fixed/path.json"), "cdc/fixed/path.json");
    }
}
