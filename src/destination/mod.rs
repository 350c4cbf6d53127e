/*!
 * @file destination/mod.rs
 * @brief Columnar destination store: DDL emission, read-builder, client (§4.8, §6.6)
 */

pub mod client;
pub mod ddl;
pub mod query;

pub use client::{ColumnarStore, KlickhouseStore, RealtimeRow};
pub use query::ReadQueryBuilder;
