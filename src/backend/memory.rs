/*!
 * @file backend/memory.rs
 * @brief In-process `Backend` implementation for tests and local runs
 *
 * Drives the seed scenarios end to end without a live Postgres instance;
 * filter matching covers exact-value equality only, sufficient for the
 * command handlers' contract tests.
 */

use std::collections::HashMap;

use async_trait::async_trait;
use bson::{Bson, Document};
use parking_lot::RwLock;
use uuid::Uuid;

use super::{Backend, CollStats, DbStats, FindOptions, UpdateOutcome, UpdateSpec};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<(String, String), Vec<Document>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/seed helper: pre-populates a collection (used by S1's
    /// "backend stubbed to return two docs" fixture).
    pub fn seed(&self, db: &str, coll: &str, docs: Vec<Document>) {
        self.collections.write().insert((db.to_string(), coll.to_string()), docs);
    }

    fn key(db: &str, coll: &str) -> (String, String) {
        (db.to_string(), coll.to_string())
    }
}

fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(k, v)| doc.get(k) == Some(v))
}

fn apply_set(doc: &mut Document, update: &Document) {
    if let Some(Bson::Document(set)) = update.get("$set") {
        for (k, v) in set {
            doc.insert(k.clone(), v.clone());
        }
    } else if !update.keys().any(|k| k.starts_with('$')) {
        for (k, v) in update {
            doc.insert(k.clone(), v.clone());
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn list_databases(&self) -> Result<Vec<String>> {
        let mut dbs: Vec<String> = self.collections.read().keys().map(|(db, _)| db.clone()).collect();
        dbs.sort();
        dbs.dedup();
        Ok(dbs)
    }

    async fn create_database(&self, _db: &str) -> Result<()> {
        Ok(())
    }

    async fn drop_database(&self, db: &str) -> Result<()> {
        self.collections.write().retain(|(d, _), _| d != db);
        Ok(())
    }

    async fn database_exists(&self, db: &str) -> Result<bool> {
        Ok(self.collections.read().keys().any(|(d, _)| d == db))
    }

    async fn list_collections(&self, db: &str) -> Result<Vec<String>> {
        Ok(self.collections.read().keys().filter(|(d, _)| d == db).map(|(_, c)| c.clone()).collect())
    }

    async fn create_collection(&self, db: &str, coll: &str) -> Result<()> {
        self.collections.write().entry(Self::key(db, coll)).or_default();
        Ok(())
    }

    async fn drop_collection(&self, db: &str, coll: &str) -> Result<()> {
        self.collections.write().remove(&Self::key(db, coll));
        Ok(())
    }

    async fn collection_exists(&self, db: &str, coll: &str) -> Result<bool> {
        Ok(self.collections.read().contains_key(&Self::key(db, coll)))
    }

    async fn coll_stats(&self, db: &str, coll: &str) -> Result<CollStats> {
        let count = self.collections.read().get(&Self::key(db, coll)).map(|d| d.len()).unwrap_or(0) as i64;
        Ok(CollStats { count, size: count * 256, storage_size: count * 256 })
    }

    async fn db_stats(&self, db: &str) -> Result<DbStats> {
        let collections = self.collections.read();
        let relevant: Vec<_> = collections.iter().filter(|((d, _), _)| d == db).collect();
        let objects: i64 = relevant.iter().map(|(_, docs)| docs.len() as i64).sum();
        Ok(DbStats { collections: relevant.len() as i64, objects, data_size: objects * 256 })
    }

    async fn find(&self, db: &str, coll: &str, opts: &FindOptions) -> Result<(Vec<Document>, bool)> {
        let collections = self.collections.read();
        let docs = collections.get(&Self::key(db, coll)).cloned().unwrap_or_default();
        let mut matched: Vec<Document> = docs.into_iter().filter(|d| matches(d, &opts.filter)).collect();

        if let Some(skip) = opts.skip {
            matched = matched.into_iter().skip(skip.max(0) as usize).collect();
        }

        let limit = opts.limit.filter(|&l| l > 0).map(|l| l as usize);
        let has_more = limit.map(|l| matched.len() > l).unwrap_or(false);
        if let Some(limit) = limit {
            matched.truncate(limit);
        }

        Ok((matched, has_more))
    }

    async fn insert_many(&self, db: &str, coll: &str, docs: Vec<Document>) -> Result<Vec<Bson>> {
        let mut ids = Vec::with_capacity(docs.len());
        let mut collections = self.collections.write();
        let target = collections.entry(Self::key(db, coll)).or_default();
        for mut doc in docs {
            let id = doc.get("_id").cloned().unwrap_or_else(|| Bson::String(Uuid::new_v4().to_string()));
            doc.insert("_id", id.clone());
            target.push(doc);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn update_many(&self, db: &str, coll: &str, spec: &UpdateSpec) -> Result<UpdateOutcome> {
        let mut collections = self.collections.write();
        let target = collections.entry(Self::key(db, coll)).or_default();

        let mut matched = 0i64;
        let mut modified = 0i64;
        for doc in target.iter_mut() {
            if matches(doc, &spec.query) {
                matched += 1;
                apply_set(doc, &spec.update);
                modified += 1;
                if !spec.multi {
                    break;
                }
            }
        }

        let upserted_id = if matched == 0 && spec.upsert {
            let mut doc = spec.query.clone();
            apply_set(&mut doc, &spec.update);
            let id = doc.get("_id").cloned().unwrap_or_else(|| Bson::String(Uuid::new_v4().to_string()));
            doc.insert("_id", id.clone());
            target.push(doc);
            Some(id)
        } else {
            None
        };

        Ok(UpdateOutcome { matched, modified, upserted_id })
    }

    async fn delete(&self, db: &str, coll: &str, filter: &Document, limit_one: bool) -> Result<i64> {
        let mut collections = self.collections.write();
        let target = collections.entry(Self::key(db, coll)).or_default();

        if limit_one {
            if let Some(pos) = target.iter().position(|d| matches(d, filter)) {
                target.remove(pos);
                return Ok(1);
            }
            return Ok(0);
        }

        let before = target.len();
        target.retain(|d| !matches(d, filter));
        Ok((before - target.len()) as i64)
    }

    async fn count(&self, db: &str, coll: &str, filter: &Document) -> Result<i64> {
        let collections = self.collections.read();
        let count = collections
            .get(&Self::key(db, coll))
            .map(|docs| docs.iter().filter(|d| matches(d, filter)).count())
            .unwrap_or(0);
        Ok(count as i64)
    }

    async fn distinct(&self, db: &str, coll: &str, field: &str, filter: &Document) -> Result<Vec<Bson>> {
        let collections = self.collections.read();
        let mut values: Vec<Bson> = collections
            .get(&Self::key(db, coll))
            .map(|docs| {
                docs.iter()
                    .filter(|d| matches(d, filter))
                    .filter_map(|d| d.get(field).cloned())
                    .collect()
            })
            .unwrap_or_default();
        values.sort_by_key(|v| v.to_string());
        values.dedup_by_key(|v| v.to_string());
        Ok(values)
    }

    async fn aggregate(&self, db: &str, coll: &str, pipeline: &[Document]) -> Result<Vec<Document>> {
        let collections = self.collections.read();
        let mut docs = collections.get(&Self::key(db, coll)).cloned().unwrap_or_default();

        for stage in pipeline {
            if let Some(Bson::Document(match_doc)) = stage.get("$match") {
                docs.retain(|d| matches(d, match_doc));
            } else if let Some(Bson::Int64(n)) = stage.get("$limit") {
                docs.truncate(*n as usize);
            } else if let Some(Bson::Int32(n)) = stage.get("$limit") {
                docs.truncate(*n as usize);
            }
        }

        Ok(docs)
    }

    async fn list_indexes(&self, _db: &str, _coll: &str) -> Result<Vec<Document>> {
        Ok(vec![bson::doc! { "v": 2, "key": { "_id": 1 }, "name": "_id_" }])
    }

    async fn create_indexes(&self, _db: &str, _coll: &str, specs: &[Document]) -> Result<Vec<String>> {
        Ok(specs
            .iter()
            .enumerate()
            .map(|(i, s)| s.get_str("name").map(str::to_string).unwrap_or_else(|_| format!("idx_{}", i)))
            .collect())
    }

    async fn drop_indexes(&self, _db: &str, _coll: &str, _names: &[String]) -> Result<()> {
        Ok(())
    }
}
