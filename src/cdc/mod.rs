/*!
 * @file cdc/mod.rs
 * @brief Change-data-capture pipeline: staged object store -> columnar destination (§4.7)
 */

pub mod format;
pub mod glob;
pub mod ingester;
pub mod object_store;

pub use format::{decode, ChangeRecord};
pub use ingester::CdcIngester;
pub use object_store::{HttpObjectStore, ObjectMeta, ObjectStore};
