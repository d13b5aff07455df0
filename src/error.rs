//! Error types for the menu store, sync layer, and image normalizer.

use thiserror::Error;

/// Main error type for menu operations.
#[derive(Debug, Error)]
pub enum MenuError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Store already exists at {0}")]
    AlreadyInitialized(String),

    #[error("Image could not be decoded: {0}")]
    ImageDecode(String),

    #[error("Image could not be encoded: {0}")]
    ImageEncode(String),

    #[error("Invalid data URL: {0}")]
    InvalidDataUrl(String),

    #[error("Not signed in: {0}")]
    Unauthenticated(String),

    #[error("Admin passphrase did not match")]
    PassphraseMismatch,
}

impl From<serde_json::Error> for MenuError {
    fn from(e: serde_json::Error) -> Self {
        MenuError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for MenuError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        MenuError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for MenuError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        MenuError::Deserialization(e.to_string())
    }
}

/// Result type for menu operations.
pub type Result<T> = std::result::Result<T, MenuError>;
