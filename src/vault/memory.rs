//! In-memory vault backend

use crate::error::Result;
use crate::vault::SecureKeyVault;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Volatile vault, used in tests and for ephemeral sessions
#[derive(Default)]
pub struct MemoryVault {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl SecureKeyVault for MemoryVault {
    fn put(&self, key_id: &str, wrapped: &[u8]) -> Result<()> {
        self.entries
            .write()
            .insert(key_id.to_string(), wrapped.to_vec());
        Ok(())
    }

    fn get(&self, key_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key_id).cloned())
    }

    fn delete(&self, key_id: &str) -> Result<()> {
        self.entries.write().remove(key_id);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
