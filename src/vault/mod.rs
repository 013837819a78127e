//! Secure Key Vault
//!
//! The vault is an opaque, device-local store for wrapped key blobs keyed by
//! identifier. The crypto core never looks at how a backend protects its
//! contents; platform keystores plug in by implementing [`SecureKeyVault`].
//!
//! Nothing stored here is plaintext key material: every value is either a
//! wrapped key or non-secret metadata.

mod memory;
mod sled_vault;

pub use memory::MemoryVault;
pub use sled_vault::SledVault;

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Storage contract for wrapped key blobs
pub trait SecureKeyVault: Send + Sync {
    /// Store `wrapped` under `key_id`, replacing any previous value
    fn put(&self, key_id: &str, wrapped: &[u8]) -> Result<()>;

    /// Fetch the value stored under `key_id`
    fn get(&self, key_id: &str) -> Result<Option<Vec<u8>>>;

    /// Remove `key_id`; removing a missing id is not an error
    fn delete(&self, key_id: &str) -> Result<()>;

    /// List ids starting with `prefix`, in ascending order
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Make all previous writes durable
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Serialize `value` with bincode and store it
pub(crate) fn put_value<T: Serialize>(
    vault: &dyn SecureKeyVault,
    key_id: &str,
    value: &T,
) -> Result<()> {
    let bytes = bincode::serialize(value)?;
    vault.put(key_id, &bytes)
}

/// Fetch and deserialize a bincode value
pub(crate) fn get_value<T: DeserializeOwned>(
    vault: &dyn SecureKeyVault,
    key_id: &str,
) -> Result<Option<T>> {
    match vault.get(key_id)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}
