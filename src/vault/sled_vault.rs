//! Sled-backed vault
//!
//! Device-local persistent backend. Values are wrapped key blobs and
//! non-secret metadata; the database never sees plaintext keys.

use crate::error::{Error, Result};
use crate::vault::SecureKeyVault;
use sled::{Db, Tree};
use std::path::Path;
use tracing::{debug, info};

const KEYS_TREE: &str = "wrapped_keys";

/// Persistent vault using sled
pub struct SledVault {
    db: Db,
    keys: Tree,
}

impl SledVault {
    /// Open or create a vault database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        let keys = db.open_tree(KEYS_TREE)?;
        info!("Key vault opened at {:?} ({} entries)", path.as_ref(), keys.len());
        Ok(SledVault { db, keys })
    }

    /// Create a temporary vault (for testing)
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        let keys = db.open_tree(KEYS_TREE)?;
        Ok(SledVault { db, keys })
    }
}

impl SecureKeyVault for SledVault {
    fn put(&self, key_id: &str, wrapped: &[u8]) -> Result<()> {
        self.keys.insert(key_id.as_bytes(), wrapped)?;
        debug!("Stored vault entry {}", key_id);
        Ok(())
    }

    fn get(&self, key_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.keys.get(key_id.as_bytes())?.map(|v| v.to_vec()))
    }

    fn delete(&self, key_id: &str) -> Result<()> {
        self.keys.remove(key_id.as_bytes())?;
        debug!("Removed vault entry {}", key_id);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.keys
            .scan_prefix(prefix.as_bytes())
            .keys()
            .map(|k| {
                let k = k?;
                String::from_utf8(k.to_vec())
                    .map_err(|_| Error::Vault("Non UTF-8 key id in vault".to_string()))
            })
            .collect()
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
