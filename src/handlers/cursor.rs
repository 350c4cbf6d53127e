/*!
 * @file handlers/cursor.rs
 * @brief getMore / killCursors (§4.4, §4.5)
 */

use bson::{doc, Bson, Document};

use crate::cursor::CursorManager;
use crate::error::{FauxDBError, Result};
use crate::wire::ExtractedCommand;

pub async fn get_more(cmd: &ExtractedCommand, cursors: &CursorManager) -> Result<Document> {
    let cursor_id = cmd
        .command_doc
        .get_i64("getMore")
        .or_else(|_| cmd.command_doc.get_i32("getMore").map(i64::from))
        .map_err(|_| FauxDBError::BadValue("missing 'getMore'".to_string()))?;

    let coll = cmd
        .command_doc
        .get_str("collection")
        .map_err(|_| FauxDBError::BadValue("missing 'collection'".to_string()))?;

    let cursor = cursors.get(cursor_id).ok_or(FauxDBError::CursorNotFound(cursor_id))?;

    let batch_size = cmd
        .command_doc
        .get_i64("batchSize")
        .ok()
        .or_else(|| cmd.command_doc.get_i32("batchSize").ok().map(i64::from))
        .unwrap_or(cursor.batch_size);

    let (batch, next_id) = cursors.advance(cursor_id, batch_size).ok_or(FauxDBError::CursorNotFound(cursor_id))?;
    let ns = format!("{}.{}", cmd.db, coll);

    Ok(doc! {
        "ok": 1.0,
        "cursor": { "id": next_id, "ns": ns, "nextBatch": batch },
    })
}

pub async fn kill_cursors(cmd: &ExtractedCommand, cursors: &CursorManager) -> Result<Document> {
    let ids: Vec<i64> = cmd
        .command_doc
        .get_array("cursors")
        .map(|arr| {
            arr.iter()
                .filter_map(|b| match b {
                    Bson::Int64(v) => Some(*v),
                    Bson::Int32(v) => Some(*v as i64),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    let mut killed = Vec::new();
    let mut not_found = Vec::new();
    for id in ids {
        if cursors.close(id) {
            killed.push(id);
        } else {
            not_found.push(id);
        }
    }

    Ok(doc! { "ok": 1.0, "cursorsKilled": killed, "cursorsNotFound": not_found, "cursorsAlive": Vec::<i64>::new(), "cursorsUnknown": Vec::<i64>::new() })
}
