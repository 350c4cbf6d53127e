/*!
 * @file backend/mod.rs
 * @brief The `Backend` trait (§6.3) — the storage engine's consumed interface
 */

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use bson::Document;

use crate::error::Result;

pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub filter: Document,
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
    pub batch_size: i64,
}

#[derive(Debug, Clone)]
pub struct UpdateSpec {
    pub query: Document,
    pub update: Document,
    pub multi: bool,
    pub upsert: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOutcome {
    pub matched: i64,
    pub modified: i64,
    pub upserted_id: Option<bson::Bson>,
}

#[derive(Debug, Clone, Default)]
pub struct CollStats {
    pub count: i64,
    pub size: i64,
    pub storage_size: i64,
}

#[derive(Debug, Clone, Default)]
pub struct DbStats {
    pub collections: i64,
    pub objects: i64,
    pub data_size: i64,
}

/// Deliberately out of scope for the core's implementation (§1): this is
/// the consumed interface every command handler is a thin wrapper over.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_databases(&self) -> Result<Vec<String>>;
    async fn create_database(&self, db: &str) -> Result<()>;
    async fn drop_database(&self, db: &str) -> Result<()>;
    async fn database_exists(&self, db: &str) -> Result<bool>;

    async fn list_collections(&self, db: &str) -> Result<Vec<String>>;
    async fn create_collection(&self, db: &str, coll: &str) -> Result<()>;
    async fn drop_collection(&self, db: &str, coll: &str) -> Result<()>;
    async fn collection_exists(&self, db: &str, coll: &str) -> Result<bool>;
    async fn coll_stats(&self, db: &str, coll: &str) -> Result<CollStats>;
    async fn db_stats(&self, db: &str) -> Result<DbStats>;

    async fn find(&self, db: &str, coll: &str, opts: &FindOptions) -> Result<(Vec<Document>, bool)>;
    async fn insert_many(&self, db: &str, coll: &str, docs: Vec<Document>) -> Result<Vec<bson::Bson>>;
    async fn update_many(&self, db: &str, coll: &str, spec: &UpdateSpec) -> Result<UpdateOutcome>;
    async fn delete(&self, db: &str, coll: &str, filter: &Document, limit_one: bool) -> Result<i64>;
    async fn count(&self, db: &str, coll: &str, filter: &Document) -> Result<i64>;
    async fn distinct(&self, db: &str, coll: &str, field: &str, filter: &Document) -> Result<Vec<bson::Bson>>;
    async fn aggregate(&self, db: &str, coll: &str, pipeline: &[Document]) -> Result<Vec<Document>>;

    async fn list_indexes(&self, db: &str, coll: &str) -> Result<Vec<Document>>;
    async fn create_indexes(&self, db: &str, coll: &str, specs: &[Document]) -> Result<Vec<String>>;
    async fn drop_indexes(&self, db: &str, coll: &str, names: &[String]) -> Result<()>;
}
