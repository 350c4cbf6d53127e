/*!
 * @file auth/mod.rs
 * @brief Authentication module: SCRAM-SHA-256 and credential storage
 */

pub mod credentials;
pub mod scram;

pub use credentials::{CredentialsProvider, InMemoryCredentialsProvider, StoredCredential};
pub use scram::{ScramConversation, ScramStep};
