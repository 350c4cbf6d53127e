/*!
 * @file handlers/admin.rs
 * @brief Handshake, informational, and database/collection admin commands (§4.4, §6.2)
 */

use bson::{doc, Document};

use crate::backend::Backend;
use crate::error::Result;

const MAX_WIRE_VERSION: i32 = 17;
const MIN_WIRE_VERSION: i32 = 0;
const MAX_BSON_OBJECT_SIZE: i32 = 16 * 1024 * 1024;

pub fn hello() -> Document {
    doc! {
        "ok": 1.0,
        "isWritablePrimary": true,
        "maxWireVersion": MAX_WIRE_VERSION,
        "minWireVersion": MIN_WIRE_VERSION,
        "maxBsonObjectSize": MAX_BSON_OBJECT_SIZE,
        "maxMessageSizeBytes": 48_000_000i32,
        "maxWriteBatchSize": 100_000i32,
        "localTime": bson::DateTime::now(),
        "readOnly": false,
    }
}

pub fn ping() -> Document {
    doc! { "ok": 1.0 }
}

pub fn build_info() -> Document {
    doc! {
        "ok": 1.0,
        "version": "7.0.0-fauxdb",
        "gitVersion": "unknown",
        "versionArray": [7i32, 0i32, 0i32, 0i32],
        "bits": 64i32,
        "maxBsonObjectSize": MAX_BSON_OBJECT_SIZE,
    }
}

pub fn host_info() -> Document {
    doc! { "ok": 1.0, "system": { "hostname": hostname() } }
}

pub fn whatsmyuri(peer_addr: &str) -> Document {
    doc! { "ok": 1.0, "you": peer_addr }
}

pub fn get_log() -> Document {
    doc! { "ok": 1.0, "totalLinesWritten": 0i32, "log": Vec::<String>::new() }
}

pub fn get_parameter() -> Document {
    doc! { "ok": 1.0 }
}

pub fn get_cmd_line_opts() -> Document {
    doc! { "ok": 1.0, "argv": Vec::<String>::new(), "parsed": {} }
}

pub fn authenticate() -> Document {
    doc! {
        "ok": 0.0,
        "errmsg": "legacy authenticate command is not supported; use saslStart/saslContinue",
        "code": 59i32,
        "codeName": "CommandNotFound",
    }
}

pub async fn list_databases(backend: &dyn Backend) -> Result<Document> {
    let dbs = backend.list_databases().await?;
    let mut total_size = 0i64;
    let databases: Vec<Document> = {
        let mut out = Vec::with_capacity(dbs.len());
        for db in &dbs {
            let stats = backend.db_stats(db).await?;
            total_size += stats.data_size;
            out.push(doc! { "name": db, "sizeOnDisk": stats.data_size, "empty": stats.objects == 0 });
        }
        out
    };
    Ok(doc! { "ok": 1.0, "databases": databases, "totalSize": total_size })
}

pub async fn list_collections(backend: &dyn Backend, db: &str) -> Result<Document> {
    let colls = backend.list_collections(db).await?;
    let first_batch: Vec<Document> = colls
        .into_iter()
        .map(|name| doc! { "name": name, "type": "collection" })
        .collect();
    Ok(doc! { "ok": 1.0, "cursor": { "id": 0i64, "ns": format!("{}.$cmd.listCollections", db), "firstBatch": first_batch } })
}

pub async fn create(backend: &dyn Backend, db: &str, coll: &str) -> Result<Document> {
    backend.create_collection(db, coll).await?;
    Ok(doc! { "ok": 1.0 })
}

pub async fn drop(backend: &dyn Backend, db: &str, coll: &str) -> Result<Document> {
    backend.drop_collection(db, coll).await?;
    Ok(doc! { "ok": 1.0 })
}

pub async fn drop_database(backend: &dyn Backend, db: &str) -> Result<Document> {
    backend.drop_database(db).await?;
    Ok(doc! { "ok": 1.0, "dropped": db })
}

pub async fn coll_stats(backend: &dyn Backend, db: &str, coll: &str) -> Result<Document> {
    let stats = backend.coll_stats(db, coll).await?;
    Ok(doc! {
        "ok": 1.0,
        "ns": format!("{}.{}", db, coll),
        "count": stats.count,
        "size": stats.size,
        "storageSize": stats.storage_size,
    })
}

pub async fn db_stats(backend: &dyn Backend, db: &str) -> Result<Document> {
    let stats = backend.db_stats(db).await?;
    Ok(doc! {
        "ok": 1.0,
        "db": db,
        "collections": stats.collections,
        "objects": stats.objects,
        "dataSize": stats.data_size,
    })
}

pub fn server_status() -> Document {
    doc! {
        "ok": 1.0,
        "host": hostname(),
        "version": "7.0.0-fauxdb",
        "process": "fauxdb",
        "uptime": 0i64,
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
