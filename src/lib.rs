//! journalcrypt - Client-side end-to-end encryption core for a wellness journal
//!
//! This library derives a User Master Key from the user's secret, wraps
//! per-category data keys and per-recording media keys beneath it, and
//! encrypts journal entries, check-ins and voice recordings into
//! self-describing records. Keys can be rotated without losing access to
//! historical data, and entries can be exported into a standalone
//! password-protected package.

pub mod config;
pub mod context;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod export;
pub mod hierarchy;
pub mod record;
pub mod recovery;
pub mod rotation;
pub mod vault;

pub use config::Config;
pub use context::CryptoContext;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::context::CryptoContext;
    pub use crate::engine::EncryptionEngine;
    pub use crate::error::{Error, Result};
    pub use crate::export::{ExportItem, ExportPackage, ExportReader};
    pub use crate::record::{Category, EncryptedRecord, KeyRef, RecordMetadata};
    pub use crate::rotation::{CancelToken, RotationTrigger};
}
