//! Key hierarchy
//!
//! Implements the tree:
//! - User Master Key (UMK): derived from the user secret, never persisted
//! - Data Encryption Keys (DEKs): one lineage per category, wrapped under the UMK
//! - Media Encryption Keys (MEKs): one per recording, wrapped under a journal DEK

mod catalog;
mod derivation;
mod manager;
mod wrap;

pub use catalog::{
    dek_key_id, mek_key_id, CategoryKeys, KeyCatalog, KeyStatus, KeyVersionInfo, CATALOG_ID,
};
pub use derivation::{KeyDerivationService, MasterKeyRecord, SecretChange, MASTER_RECORD_ID};
pub use manager::KeyHierarchyManager;
pub use wrap::{unwrap_key, wrap_key, KeyPurpose, WrapContext, WrappedKeyBlob, WrappingKeyRef};
