/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file error.rs
 * @brief FauxDB error handling
 */

use bson::{doc, Document};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FauxDBError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("BSON error: {0}")]
    Bson(#[from] bson::de::Error),

    #[error("BSON serialization error: {0}")]
    BsonSerialization(#[from] bson::ser::Error),

    #[error("Wire protocol error: {0}")]
    WireProtocol(String),

    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("bad value: {0}")]
    BadValue(String),

    #[error("no such command: '{0}'")]
    CommandNotFound(String),

    #[error("ns not found: {0}")]
    NamespaceNotFound(String),

    #[error("cursor id {0} not found")]
    CursorNotFound(i64),

    #[error("command requires authentication")]
    Unauthorized,

    #[error("Authentication failed.")]
    AuthenticationFailed,

    #[error("{0}")]
    Internal(String),

    #[error("object store error: {0}")]
    ObjectStore(String),

    #[error("CDC decode error: {0}")]
    CdcDecode(String),

    #[error("columnar store error: {0}")]
    Destination(String),
}

pub type Result<T> = std::result::Result<T, FauxDBError>;

impl FauxDBError {
    /// MongoDB's published numeric error code, where clients rely on it.
    pub fn code(&self) -> i32 {
        match self {
            FauxDBError::BadValue(_) => 2,
            FauxDBError::CommandNotFound(_) => 59,
            FauxDBError::Unauthorized => 13,
            FauxDBError::AuthenticationFailed => 18,
            FauxDBError::NamespaceNotFound(_) => 26,
            FauxDBError::CursorNotFound(_) => 43,
            _ => 1, // InternalError
        }
    }

    pub fn code_name(&self) -> &'static str {
        match self {
            FauxDBError::BadValue(_) => "BadValue",
            FauxDBError::CommandNotFound(_) => "CommandNotFound",
            FauxDBError::Unauthorized => "Unauthorized",
            FauxDBError::AuthenticationFailed => "AuthenticationFailed",
            FauxDBError::NamespaceNotFound(_) => "NamespaceNotFound",
            FauxDBError::CursorNotFound(_) => "CursorNotFound",
            _ => "InternalError",
        }
    }

    /// The `{ ok: 0, errmsg, code, codeName }` envelope every handler error
    /// rides back to the client inside.
    pub fn to_error_document(&self) -> Document {
        doc! {
            "ok": 0.0,
            "errmsg": self.to_string(),
            "code": self.code(),
            "codeName": self.code_name(),
        }
    }
}
