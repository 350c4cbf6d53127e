/*!
 * @file backend/postgres.rs
 * @brief Postgres-backed `Backend`, documents stored as JSONB (§6.3)
 *
 * Every
 * `(database, collection)` pair maps onto a row in a single `documents`
 * table, keyed by `(db, coll, doc_id)`, with the document body in a
 * `data JSONB` column. Queries translate the subset of filter/update
 * shapes the command handlers pass down into `data @>` / `jsonb_set`.
 */

use async_trait::async_trait;
use bson::{Bson, Document};
use deadpool_postgres::Pool;
use serde_json::Value;
use tokio_postgres::NoTls;
use uuid::Uuid;

use super::{Backend, CollStats, DbStats, FindOptions, UpdateOutcome, UpdateSpec};
use crate::error::{FauxDBError, Result};

pub struct PostgresBackend {
    pool: Pool,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    db TEXT NOT NULL,
    coll TEXT NOT NULL,
    doc_id TEXT NOT NULL,
    data JSONB NOT NULL,
    PRIMARY KEY (db, coll, doc_id)
);
CREATE INDEX IF NOT EXISTS documents_data_gin ON documents USING GIN (data jsonb_path_ops);
"#;

impl PostgresBackend {
    pub async fn connect(uri: &str, max_size: usize) -> Result<Self> {
        let config = uri
            .parse::<tokio_postgres::Config>()
            .map_err(|e| FauxDBError::ConnectionPool(format!("invalid database uri: {}", e)))?;

        let manager = deadpool_postgres::Manager::new(config, NoTls);
        let pool = Pool::builder(manager)
            .max_size(max_size)
            .build()
            .map_err(|e| FauxDBError::ConnectionPool(e.to_string()))?;

        let client = pool.get().await.map_err(|e| FauxDBError::ConnectionPool(e.to_string()))?;
        client.batch_execute(SCHEMA).await.map_err(|e| FauxDBError::Database(e.to_string()))?;

        Ok(Self { pool })
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| FauxDBError::ConnectionPool(e.to_string()))
    }
}

fn bson_to_json(doc: &Document) -> Result<Value> {
    serde_json::to_value(doc).map_err(FauxDBError::Serialization)
}

fn json_to_bson(value: Value) -> Result<Document> {
    let bson = bson::to_bson(&value).map_err(FauxDBError::BsonSerialization)?;
    match bson {
        Bson::Document(doc) => Ok(doc),
        _ => Err(FauxDBError::Database("expected a JSON object row".to_string())),
    }
}

fn doc_id_of(doc: &Document) -> Result<String> {
    doc.get("_id")
        .map(|id| match id {
            Bson::String(s) => s.clone(),
            other => other.to_string(),
        })
        .ok_or_else(|| FauxDBError::BadValue("document missing _id".to_string()))
}

#[async_trait]
impl Backend for PostgresBackend {
    async fn list_databases(&self) -> Result<Vec<String>> {
        let client = self.client().await?;
        let rows = client
            .query("SELECT DISTINCT db FROM documents ORDER BY db", &[])
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn create_database(&self, _db: &str) -> Result<()> {
        Ok(())
    }

    async fn drop_database(&self, db: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .execute("DELETE FROM documents WHERE db = $1", &[&db])
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(())
    }

    async fn database_exists(&self, db: &str) -> Result<bool> {
        let client = self.client().await?;
        let row = client
            .query_one("SELECT EXISTS(SELECT 1 FROM documents WHERE db = $1)", &[&db])
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(row.get(0))
    }

    async fn list_collections(&self, db: &str) -> Result<Vec<String>> {
        let client = self.client().await?;
        let rows = client
            .query("SELECT DISTINCT coll FROM documents WHERE db = $1 ORDER BY coll", &[&db])
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn create_collection(&self, _db: &str, _coll: &str) -> Result<()> {
        Ok(())
    }

    async fn drop_collection(&self, db: &str, coll: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .execute("DELETE FROM documents WHERE db = $1 AND coll = $2", &[&db, &coll])
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(())
    }

    async fn collection_exists(&self, db: &str, coll: &str) -> Result<bool> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM documents WHERE db = $1 AND coll = $2)",
                &[&db, &coll],
            )
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(row.get(0))
    }

    async fn coll_stats(&self, db: &str, coll: &str) -> Result<CollStats> {
        let count = self.count(db, coll, &Document::new()).await?;
        Ok(CollStats { count, size: count * 512, storage_size: count * 512 })
    }

    async fn db_stats(&self, db: &str) -> Result<DbStats> {
        let collections = self.list_collections(db).await?;
        let mut objects = 0i64;
        for coll in &collections {
            objects += self.count(db, coll, &Document::new()).await?;
        }
        Ok(DbStats { collections: collections.len() as i64, objects, data_size: objects * 512 })
    }

    async fn find(&self, db: &str, coll: &str, opts: &FindOptions) -> Result<(Vec<Document>, bool)> {
        let client = self.client().await?;
        let filter_json = bson_to_json(&opts.filter)?;

        let limit = opts.limit.unwrap_or(0).max(0);
        let skip = opts.skip.unwrap_or(0).max(0);
        // fetch one extra row to detect hasMore without a second round trip
        let fetch_limit = if limit > 0 { limit + 1 } else { 0 };

        let rows = client
            .query(
                "SELECT data FROM documents WHERE db = $1 AND coll = $2 AND data @> $3::jsonb \
                 ORDER BY doc_id OFFSET $4 LIMIT NULLIF($5, 0)",
                &[&db, &coll, &filter_json, &skip, &fetch_limit],
            )
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;

        let mut docs: Vec<Document> = rows
            .iter()
            .map(|r| json_to_bson(r.get::<_, Value>(0)))
            .collect::<Result<_>>()?;

        let has_more = limit > 0 && docs.len() as i64 > limit;
        if limit > 0 {
            docs.truncate(limit as usize);
        }

        Ok((docs, has_more))
    }

    async fn insert_many(&self, db: &str, coll: &str, docs: Vec<Document>) -> Result<Vec<Bson>> {
        let client = self.client().await?;
        let mut ids = Vec::with_capacity(docs.len());

        for mut doc in docs {
            let id_bson = doc.get("_id").cloned().unwrap_or_else(|| Bson::String(Uuid::new_v4().to_string()));
            doc.insert("_id", id_bson.clone());
            let doc_id = doc_id_of(&doc)?;
            let json = bson_to_json(&doc)?;

            client
                .execute(
                    "INSERT INTO documents (db, coll, doc_id, data) VALUES ($1, $2, $3, $4::jsonb)",
                    &[&db, &coll, &doc_id, &json],
                )
                .await
                .map_err(|e| FauxDBError::Database(e.to_string()))?;

            ids.push(id_bson);
        }

        Ok(ids)
    }

    async fn update_many(&self, db: &str, coll: &str, spec: &UpdateSpec) -> Result<UpdateOutcome> {
        let client = self.client().await?;
        let (matched, _) = self.find(db, coll, &FindOptions { filter: spec.query.clone(), ..Default::default() }).await?;

        let mut modified = 0i64;
        let matched_count = matched.len() as i64;
        let targets = if spec.multi { matched } else { matched.into_iter().take(1).collect() };

        for mut doc in targets {
            apply_update_operators(&mut doc, &spec.update);
            let doc_id = doc_id_of(&doc)?;
            let json = bson_to_json(&doc)?;
            client
                .execute(
                    "UPDATE documents SET data = $4::jsonb WHERE db = $1 AND coll = $2 AND doc_id = $3",
                    &[&db, &coll, &doc_id, &json],
                )
                .await
                .map_err(|e| FauxDBError::Database(e.to_string()))?;
            modified += 1;
        }

        let upserted_id = if matched_count == 0 && spec.upsert {
            let mut doc = spec.query.clone();
            apply_update_operators(&mut doc, &spec.update);
            let ids = self.insert_many(db, coll, vec![doc]).await?;
            ids.into_iter().next()
        } else {
            None
        };

        Ok(UpdateOutcome { matched: matched_count, modified, upserted_id })
    }

    async fn delete(&self, db: &str, coll: &str, filter: &Document, limit_one: bool) -> Result<i64> {
        let client = self.client().await?;
        let filter_json = bson_to_json(filter)?;

        if limit_one {
            let rows = client
                .query(
                    "DELETE FROM documents WHERE ctid IN (\
                        SELECT ctid FROM documents WHERE db = $1 AND coll = $2 AND data @> $3::jsonb LIMIT 1\
                     ) RETURNING doc_id",
                    &[&db, &coll, &filter_json],
                )
                .await
                .map_err(|e| FauxDBError::Database(e.to_string()))?;
            return Ok(rows.len() as i64);
        }

        let affected = client
            .execute(
                "DELETE FROM documents WHERE db = $1 AND coll = $2 AND data @> $3::jsonb",
                &[&db, &coll, &filter_json],
            )
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(affected as i64)
    }

    async fn count(&self, db: &str, coll: &str, filter: &Document) -> Result<i64> {
        let client = self.client().await?;
        let filter_json = bson_to_json(filter)?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM documents WHERE db = $1 AND coll = $2 AND data @> $3::jsonb",
                &[&db, &coll, &filter_json],
            )
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(row.get::<_, i64>(0))
    }

    async fn distinct(&self, db: &str, coll: &str, field: &str, filter: &Document) -> Result<Vec<Bson>> {
        let client = self.client().await?;
        let filter_json = bson_to_json(filter)?;
        let rows = client
            .query(
                "SELECT DISTINCT data -> $3 AS v FROM documents WHERE db = $1 AND coll = $2 AND data @> $4::jsonb",
                &[&db, &coll, &field, &filter_json],
            )
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;

        rows.iter()
            .map(|r| {
                let v: Value = r.get(0);
                bson::to_bson(&v).map_err(FauxDBError::BsonSerialization)
            })
            .collect()
    }

    async fn aggregate(&self, db: &str, coll: &str, pipeline: &[Document]) -> Result<Vec<Document>> {
        // No pushdown pipeline compiler in the core; evaluate $match/$limit
        // client-side over the full collection, matching MemoryBackend.
        let (mut docs, _) = self.find(db, coll, &FindOptions::default()).await?;
        for stage in pipeline {
            if let Some(Bson::Document(match_doc)) = stage.get("$match") {
                let match_json = bson_to_json(match_doc)?;
                docs.retain(|d| {
                    let doc_json = bson_to_json(d).unwrap_or(Value::Null);
                    json_contains(&doc_json, &match_json)
                });
            } else if let Some(n) = stage.get("$limit").and_then(|v| v.as_i64()) {
                docs.truncate(n as usize);
            }
        }
        Ok(docs)
    }

    async fn list_indexes(&self, _db: &str, _coll: &str) -> Result<Vec<Document>> {
        Ok(vec![bson::doc! { "v": 2, "key": { "_id": 1 }, "name": "_id_" }])
    }

    async fn create_indexes(&self, db: &str, coll: &str, specs: &[Document]) -> Result<Vec<String>> {
        let client = self.client().await?;
        let mut names = Vec::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            let name = spec.get_str("name").map(str::to_string).unwrap_or_else(|_| format!("idx_{}", i));
            let key_path = spec
                .get_document("key")
                .ok()
                .and_then(|k| k.keys().next().cloned())
                .unwrap_or_else(|| "_id".to_string());
            let index_name = format!("documents_{}_{}_{}_idx", db, coll, name).replace(['.', '-'], "_");
            let statement = format!(
                "CREATE INDEX IF NOT EXISTS {} ON documents ((data -> '{}')) WHERE db = '{}' AND coll = '{}'",
                index_name, key_path, db, coll
            );
            client.batch_execute(&statement).await.map_err(|e| FauxDBError::Database(e.to_string()))?;
            names.push(name);
        }
        Ok(names)
    }

    async fn drop_indexes(&self, db: &str, coll: &str, names: &[String]) -> Result<()> {
        let client = self.client().await?;
        for name in names {
            let index_name = format!("documents_{}_{}_{}_idx", db, coll, name).replace(['.', '-'], "_");
            client
                .batch_execute(&format!("DROP INDEX IF EXISTS {}", index_name))
                .await
                .map_err(|e| FauxDBError::Database(e.to_string()))?;
        }
        Ok(())
    }
}

fn apply_update_operators(doc: &mut Document, update: &Document) {
    if let Some(Bson::Document(set)) = update.get("$set") {
        for (k, v) in set {
            doc.insert(k.clone(), v.clone());
        }
    } else if !update.keys().any(|k| k.starts_with('$')) {
        for (k, v) in update {
            doc.insert(k.clone(), v.clone());
        }
    }
    if let Some(Bson::Document(unset)) = update.get("$unset") {
        for (k, _) in unset {
            doc.remove(k);
        }
    }
}

fn json_contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Object(h), Value::Object(n)) => n.iter().all(|(k, v)| h.get(k).map(|hv| hv == v).unwrap_or(false)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn doc_id_of_prefers_existing_id() {
        let doc = doc! { "_id": "abc", "x": 1 };
        assert_eq!(doc_id_of(&doc).unwrap(), "abc");
    }

    #[test]
    fn doc_id_of_rejects_missing_id() {
        let doc = doc! { "x": 1 };
        assert!(doc_id_of(&doc).is_err());
    }

    #[test]
    fn json_contains_matches_subset() {
        let haystack = serde_json::json!({"a": 1, "b": 2});
        let needle = serde_json::json!({"a": 1});
        assert!(json_contains(&haystack, &needle));
    }
}
