/*!
 * @file handlers/crud.rs
 * @brief find, insert, update, delete, count, distinct (§4.4)
 */

use bson::{doc, Bson, Document};

use crate::backend::{Backend, FindOptions, UpdateSpec};
use crate::cursor::CursorManager;
use crate::error::{FauxDBError, Result};
use crate::wire::ExtractedCommand;

fn collection_name(cmd: &Document, key: &str) -> Result<String> {
    cmd.get_str(key).map(str::to_string).map_err(|_| FauxDBError::BadValue(format!("missing '{}'", key)))
}

pub async fn find(
    cmd: &ExtractedCommand,
    backend: &dyn Backend,
    cursors: &CursorManager,
    connection_id: u64,
) -> Result<Document> {
    let coll = collection_name(&cmd.command_doc, "find")?;
    let filter = cmd.command_doc.get_document("filter").cloned().unwrap_or_default();
    let limit = cmd.command_doc.get_i64("limit").ok().or_else(|| cmd.command_doc.get_i32("limit").ok().map(i64::from));
    let skip = cmd.command_doc.get_i64("skip").ok().or_else(|| cmd.command_doc.get_i32("skip").ok().map(i64::from));
    let batch_size = cmd
        .command_doc
        .get_i64("batchSize")
        .ok()
        .or_else(|| cmd.command_doc.get_i32("batchSize").ok().map(i64::from))
        .unwrap_or(101);

    let opts = FindOptions {
        filter,
        projection: cmd.command_doc.get_document("projection").cloned().ok(),
        sort: cmd.command_doc.get_document("sort").cloned().ok(),
        limit,
        skip,
        batch_size,
    };

    let (mut documents, _has_more_from_backend) = backend.find(&cmd.db, &coll, &opts).await?;
    let ns = format!("{}.{}", cmd.db, coll);

    let first_batch_count = (batch_size.max(0) as usize).min(documents.len());
    let first_batch: Vec<Document> = documents.drain(..first_batch_count).collect();

    let cursor_id = if documents.is_empty() {
        0i64
    } else {
        cursors.create(documents, &ns, batch_size, connection_id)
    };

    Ok(doc! {
        "ok": 1.0,
        "cursor": { "id": cursor_id, "ns": ns, "firstBatch": first_batch },
    })
}

pub async fn insert(cmd: &ExtractedCommand, backend: &dyn Backend) -> Result<Document> {
    let coll = collection_name(&cmd.command_doc, "insert")?;
    let ordered = cmd.command_doc.get_bool("ordered").unwrap_or(true);

    let mut docs: Vec<Document> = cmd
        .command_doc
        .get_array("documents")
        .ok()
        .map(|arr| arr.iter().filter_map(|b| b.as_document().cloned()).collect())
        .unwrap_or_default();
    if docs.is_empty() {
        docs = cmd.document_sequences.get("documents").cloned().unwrap_or_default();
    }

    // §9 open question: unordered insert is treated identically to ordered
    // until partial-success semantics are pinned down.
    let _ = ordered;

    match backend.insert_many(&cmd.db, &coll, docs).await {
        Ok(ids) => Ok(doc! { "ok": 1.0, "n": ids.len() as i32 }),
        Err(e) => Ok(doc! {
            "ok": 1.0,
            "n": 0i32,
            "writeErrors": [{ "index": 0i32, "errmsg": e.to_string() }],
        }),
    }
}

pub async fn update(cmd: &ExtractedCommand, backend: &dyn Backend) -> Result<Document> {
    let coll = collection_name(&cmd.command_doc, "update")?;

    let updates: Vec<Document> = cmd
        .command_doc
        .get_array("updates")
        .ok()
        .map(|arr| arr.iter().filter_map(|b| b.as_document().cloned()).collect())
        .or_else(|| cmd.document_sequences.get("updates").cloned())
        .unwrap_or_default();

    let mut n_matched = 0i64;
    let mut n_modified = 0i64;
    let mut upserted = Vec::new();

    for (index, u) in updates.iter().enumerate() {
        let query = u.get_document("q").cloned().unwrap_or_default();
        let update_doc = u.get_document("u").cloned().unwrap_or_default();
        let multi = u.get_bool("multi").unwrap_or(false);
        let upsert = u.get_bool("upsert").unwrap_or(false);

        let outcome = backend
            .update_many(&cmd.db, &coll, &UpdateSpec { query, update: update_doc, multi, upsert })
            .await?;

        n_matched += outcome.matched;
        n_modified += outcome.modified;
        if let Some(id) = outcome.upserted_id {
            upserted.push(doc! { "index": index as i32, "_id": id });
        }
    }

    Ok(doc! {
        "ok": 1.0,
        "n": n_matched,
        "nModified": n_modified,
        "upserted": upserted,
    })
}

pub async fn delete(cmd: &ExtractedCommand, backend: &dyn Backend) -> Result<Document> {
    let coll = collection_name(&cmd.command_doc, "delete")?;

    let deletes: Vec<Document> = cmd
        .command_doc
        .get_array("deletes")
        .ok()
        .map(|arr| arr.iter().filter_map(|b| b.as_document().cloned()).collect())
        .or_else(|| cmd.document_sequences.get("deletes").cloned())
        .unwrap_or_default();

    let mut n = 0i64;
    for d in &deletes {
        let filter = d.get_document("q").cloned().unwrap_or_default();
        let limit = d.get_i32("limit").unwrap_or(1);
        n += backend.delete(&cmd.db, &coll, &filter, limit != 0).await?;
    }

    Ok(doc! { "ok": 1.0, "n": n })
}

pub async fn count(cmd: &ExtractedCommand, backend: &dyn Backend) -> Result<Document> {
    let coll = collection_name(&cmd.command_doc, "count")?;
    let filter = cmd.command_doc.get_document("query").cloned().unwrap_or_default();
    let total = backend.count(&cmd.db, &coll, &filter).await?;

    let skip = cmd.command_doc.get_i64("skip").unwrap_or(0).max(0);
    let limit = cmd.command_doc.get_i64("limit").unwrap_or(0);

    let after_skip = (total - skip).max(0);
    let n = if limit > 0 { after_skip.min(limit) } else { after_skip };

    Ok(doc! { "ok": 1.0, "n": n })
}

pub async fn distinct(cmd: &ExtractedCommand, backend: &dyn Backend) -> Result<Document> {
    let coll = collection_name(&cmd.command_doc, "distinct")?;
    let field = cmd.command_doc.get_str("key").map_err(|_| FauxDBError::BadValue("missing 'key'".to_string()))?;
    let filter = cmd.command_doc.get_document("query").cloned().unwrap_or_default();

    let values: Vec<Bson> = backend.distinct(&cmd.db, &coll, field, &filter).await?;
    Ok(doc! { "ok": 1.0, "values": values })
}

pub async fn aggregate(cmd: &ExtractedCommand, backend: &dyn Backend) -> Result<Document> {
    let coll = collection_name(&cmd.command_doc, "aggregate")?;
    let pipeline: Vec<Document> = cmd
        .command_doc
        .get_array("pipeline")
        .ok()
        .map(|arr| arr.iter().filter_map(|b| b.as_document().cloned()).collect())
        .unwrap_or_default();

    let documents = backend.aggregate(&cmd.db, &coll, &pipeline).await?;
    let ns = format!("{}.{}", cmd.db, coll);

    Ok(doc! {
        "ok": 1.0,
        "cursor": { "id": 0i64, "ns": ns, "firstBatch": documents },
    })
}
