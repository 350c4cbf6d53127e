/*!
 * @file cdc/format.rs
 * @brief Row-format decoding for staged CDC files (§3.6, §4.7)
 *
 * Every staged file, regardless of encoding, carries the same logical
 * row shape: `collection, doc_id, data, updated_at, version, is_deleted`.
 * This module turns raw bytes in one of the three supported formats into
 * a vector of `ChangeRecord`, leaving destination-table concerns (table
 * selection, dedup upsert) to the caller.
 */

use std::io::Cursor;

use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::RowAccessor;
use serde::Deserialize;

use crate::config::CdcFormat;
use crate::error::{FauxDBError, Result};

#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub collection: String,
    pub doc_id: String,
    pub data: String,
    pub updated_at: i64,
    pub version: u64,
    pub is_deleted: bool,
}

pub fn decode(format: CdcFormat, bytes: &[u8]) -> Result<Vec<ChangeRecord>> {
    match format {
        CdcFormat::Parquet => decode_parquet(bytes),
        CdcFormat::JsonEachRow => decode_json_each_row(bytes),
        CdcFormat::Csv => decode_csv(bytes),
    }
}

#[derive(Debug, Deserialize)]
struct JsonRow {
    collection: String,
    doc_id: String,
    data: String,
    updated_at: i64,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    is_deleted: bool,
}

/// One JSON object per line, à la ClickHouse's `JSONEachRow` format.
fn decode_json_each_row(bytes: &[u8]) -> Result<Vec<ChangeRecord>> {
    let mut records = Vec::new();
    let stream = serde_json::Deserializer::from_slice(bytes).into_iter::<JsonRow>();
    for row in stream {
        let row = row.map_err(|e| FauxDBError::CdcDecode(format!("malformed JSONEachRow row: {}", e)))?;
        records.push(ChangeRecord {
            collection: row.collection,
            doc_id: row.doc_id,
            data: row.data,
            updated_at: row.updated_at,
            version: row.version,
            is_deleted: row.is_deleted,
        });
    }
    Ok(records)
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    collection: String,
    doc_id: String,
    data: String,
    updated_at: i64,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    is_deleted: bool,
}

fn decode_csv(bytes: &[u8]) -> Result<Vec<ChangeRecord>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(Cursor::new(bytes));
    let mut records = Vec::new();
    for row in reader.deserialize::<CsvRow>() {
        let row = row.map_err(|e| FauxDBError::CdcDecode(format!("malformed CSV row: {}", e)))?;
        records.push(ChangeRecord {
            collection: row.collection,
            doc_id: row.doc_id,
            data: row.data,
            updated_at: row.updated_at,
            version: row.version,
            is_deleted: row.is_deleted,
        });
    }
    Ok(records)
}

fn decode_parquet(bytes: &[u8]) -> Result<Vec<ChangeRecord>> {
    let bytes = bytes::Bytes::copy_from_slice(bytes);
    let reader = SerializedFileReader::new(bytes).map_err(|e| FauxDBError::CdcDecode(format!("invalid parquet file: {}", e)))?;

    let mut records = Vec::new();
    let iter = reader.get_row_iter(None).map_err(|e| FauxDBError::CdcDecode(format!("parquet row iterator failed: {}", e)))?;

    for row in iter {
        let row = row.map_err(|e| FauxDBError::CdcDecode(format!("parquet row read failed: {}", e)))?;
        let collection = row
            .get_string(row.get_column_iter().position(|(name, _)| name == "collection").ok_or_else(|| missing_column("collection"))?)
            .map_err(|e| FauxDBError::CdcDecode(e.to_string()))?
            .clone();
        let doc_id = row
            .get_string(row.get_column_iter().position(|(name, _)| name == "doc_id").ok_or_else(|| missing_column("doc_id"))?)
            .map_err(|e| FauxDBError::CdcDecode(e.to_string()))?
            .clone();
        let data = row
            .get_string(row.get_column_iter().position(|(name, _)| name == "data").ok_or_else(|| missing_column("data"))?)
            .map_err(|e| FauxDBError::CdcDecode(e.to_string()))?
            .clone();
        let updated_at = row
            .get_long(row.get_column_iter().position(|(name, _)| name == "updated_at").ok_or_else(|| missing_column("updated_at"))?)
            .map_err(|e| FauxDBError::CdcDecode(e.to_string()))?;
        let version = row
            .get_column_iter()
            .position(|(name, _)| name == "version")
            .and_then(|idx| row.get_ulong(idx).ok())
            .unwrap_or(0);
        let is_deleted = row
            .get_column_iter()
            .position(|(name, _)| name == "is_deleted")
            .and_then(|idx| row.get_bool(idx).ok())
            .unwrap_or(false);

        records.push(ChangeRecord { collection, doc_id, data, updated_at, version, is_deleted });
    }

    Ok(records)
}

fn missing_column(name: &str) -> FauxDBError {
    FauxDBError::CdcDecode(format!("parquet file missing required column '{}'", name))
}
