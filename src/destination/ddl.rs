/*!
 * @file destination/ddl.rs
 * @brief DDL emitter for the deduplicating columnar destination (§4.8, §6.6)
 *
 * The realtime table is a `ReplacingMergeTree`-style engine keyed so that
 * rows sharing a primary key collapse to the greatest `version` at
 * merge/read time; the tombstone table is plain `MergeTree` with a TTL.
 */

use crate::config::DestinationConfig;

/// Emits `CREATE TABLE` for the realtime change table. Order key is
/// `(collection, doc_id)` for the shared table, `(doc_id)` per-collection.
pub fn realtime_table_ddl(config: &DestinationConfig, table_name: &str) -> String {
    let order_by = if config.per_collection_tables { "(doc_id)" } else { "(collection, doc_id)" };

    let partition_clause = if config.partition_by_month {
        "\nPARTITION BY (collection, toYYYYMM(fromUnixTimestamp64Milli(updated_at)))"
    } else {
        ""
    };

    let ttl_clause = match config.ttl_days {
        Some(days) => format!("\nTTL fromUnixTimestamp64Milli(updated_at) + INTERVAL {} DAY", days),
        None => String::new(),
    };

    format!(
        "CREATE TABLE IF NOT EXISTS {db}.{table} (\n\
         \u{20}   collection LowCardinality(String),\n\
         \u{20}   doc_id String,\n\
         \u{20}   data String,\n\
         \u{20}   updated_at Int64,\n\
         \u{20}   version UInt64,\n\
         \u{20}   is_deleted UInt8\n\
         ) ENGINE = ReplacingMergeTree(version)\
         {partition}\n\
         ORDER BY {order_by}\
         {ttl}",
        db = config.database,
        table = table_name,
        partition = partition_clause,
        order_by = order_by,
        ttl = ttl_clause,
    )
}

/// Tombstone table (§3.6, §6.6): plain `MergeTree` keyed
/// `(collection, database, doc_id)` with TTL on `deleted_at`.
pub fn tombstone_table_ddl(config: &DestinationConfig) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {db}.{table} (\n\
         \u{20}   collection LowCardinality(String),\n\
         \u{20}   database LowCardinality(String),\n\
         \u{20}   doc_id String,\n\
         \u{20}   deleted_at Int64\n\
         ) ENGINE = MergeTree()\n\
         ORDER BY (collection, database, doc_id)\n\
         TTL fromUnixTimestamp64Milli(deleted_at) + INTERVAL {ttl_days} DAY",
        db = config.database,
        table = config.tombstone_table,
        ttl_days = config.tombstone_ttl_days,
    )
}

/// Backs the ingester's at-most-once claim semantics (§4.7): a row here
/// means a file either succeeded, failed permanently, or is in flight.
pub fn processed_files_table_ddl(config: &DestinationConfig) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {db}.processed_files (\n\
         \u{20}   path String,\n\
         \u{20}   status LowCardinality(String),\n\
         \u{20}   error String,\n\
         \u{20}   processed_at Int64\n\
         ) ENGINE = ReplacingMergeTree(processed_at)\n\
         ORDER BY (path)",
        db = config.database,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DestinationConfig {
        DestinationConfig {
            url: "tcp://localhost:9000".to_string(),
            database: "fauxdb_cdc".to_string(),
            realtime_table: "realtime_changes".to_string(),
            tombstone_table: "tombstones".to_string(),
            per_collection_tables: false,
            partition_by_month: true,
            ttl_days: Some(90),
            tombstone_ttl_days: 30,
        }
    }

    #[test]
    fn shared_table_orders_by_collection_and_doc_id() {
        let ddl = realtime_table_ddl(&config(), "realtime_changes");
        assert!(ddl.contains("ORDER BY (collection, doc_id)"));
        assert!(ddl.contains("ReplacingMergeTree(version)"));
        assert!(ddl.contains("PARTITION BY"));
        assert!(ddl.contains("TTL"));
    }

    #[test]
    fn per_collection_table_orders_by_doc_id_only() {
        let mut cfg = config();
        cfg.per_collection_tables = true;
        let ddl = realtime_table_ddl(&cfg, "users_changes");
        assert!(ddl.contains("ORDER BY (doc_id)"));
    }

    #[test]
    fn tombstone_ddl_has_ttl_on_deleted_at() {
        let ddl = tombstone_table_ddl(&config());
        assert!(ddl.contains("ORDER BY (collection, database, doc_id)"));
        assert!(ddl.contains("TTL fromUnixTimestamp64Milli(deleted_at)"));
    }
}
