//! Error types for journalcrypt

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for journalcrypt
#[derive(Error, Debug)]
pub enum Error {
    // Crypto errors
    /// Wrong secret or export password, or a key blob that does not verify
    /// under the supplied parent. Deliberately carries no detail.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Payload tag mismatch: tampering or corruption
    #[error("Decryption failed: record is corrupted or has been tampered with")]
    DecryptionFailed,

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Rotation incomplete: {0}")]
    RotationIncomplete(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    // Hierarchy state errors
    #[error("Key hierarchy not initialized")]
    NotInitialized,

    #[error("Key hierarchy already initialized")]
    AlreadyInitialized,

    #[error("Key hierarchy is locked")]
    Locked,

    // Vault errors
    #[error("Vault error: {0}")]
    Vault(String),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Message safe to show to the end user.
    ///
    /// Credential failures collapse to a single generic message so that a
    /// wrong password cannot be told apart from a crafted ciphertext.
    pub fn user_message(&self) -> String {
        match self {
            Error::AuthenticationFailed => "incorrect credentials".to_string(),
            Error::DecryptionFailed => "this entry could not be opened".to_string(),
            Error::KeyNotFound(_) => "the key for this entry is no longer available".to_string(),
            Error::RotationIncomplete(_) => {
                "a key update was interrupted and must be resumed".to_string()
            }
            Error::Locked => "unlock the journal first".to_string(),
            _ => "an internal error occurred".to_string(),
        }
    }

    /// Whether this error indicates tampering or possible data loss.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Error::AuthenticationFailed | Error::DecryptionFailed | Error::KeyNotFound(_)
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
