/*!
 * @file handlers/index.rs
 * @brief listIndexes / createIndexes / dropIndexes — thin Backend passthroughs (§4.4)
 */

use bson::{doc, Document};

use crate::backend::Backend;
use crate::error::Result;
use crate::wire::ExtractedCommand;

fn collection_name(cmd: &Document, key: &str) -> Result<String> {
    cmd.get_str(key)
        .map(str::to_string)
        .map_err(|_| crate::error::FauxDBError::BadValue(format!("missing '{}'", key)))
}

pub async fn list_indexes(cmd: &ExtractedCommand, backend: &dyn Backend) -> Result<Document> {
    let coll = collection_name(&cmd.command_doc, "listIndexes")?;
    let indexes = backend.list_indexes(&cmd.db, &coll).await?;
    let ns = format!("{}.{}", cmd.db, coll);
    Ok(doc! { "ok": 1.0, "cursor": { "id": 0i64, "ns": ns, "firstBatch": indexes } })
}

pub async fn create_indexes(cmd: &ExtractedCommand, backend: &dyn Backend) -> Result<Document> {
    let coll = collection_name(&cmd.command_doc, "createIndexes")?;
    let specs: Vec<Document> = cmd
        .command_doc
        .get_array("indexes")
        .map(|arr| arr.iter().filter_map(|b| b.as_document().cloned()).collect())
        .unwrap_or_default();

    let names = backend.create_indexes(&cmd.db, &coll, &specs).await?;
    Ok(doc! { "ok": 1.0, "numIndexesBefore": 1i32, "numIndexesAfter": (1 + names.len()) as i32 })
}

pub async fn drop_indexes(cmd: &ExtractedCommand, backend: &dyn Backend) -> Result<Document> {
    let coll = collection_name(&cmd.command_doc, "dropIndexes")?;
    let index = cmd.command_doc.get("index");

    let names: Vec<String> = match index {
        Some(bson::Bson::String(s)) => vec![s.clone()],
        Some(bson::Bson::Array(arr)) => arr.iter().filter_map(|b| b.as_str().map(str::to_string)).collect(),
        _ => vec![],
    };

    backend.drop_indexes(&cmd.db, &coll, &names).await?;
    Ok(doc! { "ok": 1.0 })
}
