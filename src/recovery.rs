//! Recovery Service
//!
//! After a reinstall or relogin the only way back into the hierarchy is the
//! user secret: the UMK is re-derived from it and the persisted salt. There is
//! no escrow and no second factor. If the secret is lost and no device still
//! holds the unlocked UMK, the data cannot be recovered.

use crate::crypto::MasterKey;
use crate::error::Result;
use crate::hierarchy::{KeyDerivationService, KeyHierarchyManager};
use std::sync::Arc;
use tracing::info;

pub struct RecoveryService {
    derivation: Arc<KeyDerivationService>,
    hierarchy: Arc<KeyHierarchyManager>,
}

impl RecoveryService {
    pub fn new(derivation: Arc<KeyDerivationService>, hierarchy: Arc<KeyHierarchyManager>) -> Self {
        RecoveryService {
            derivation,
            hierarchy,
        }
    }

    /// Whether this vault holds a master key record to recover from
    pub fn is_recoverable(&self) -> Result<bool> {
        self.derivation.is_initialized()
    }

    /// Re-derive the UMK from the secret
    pub fn recover(&self, secret: &[u8]) -> Result<MasterKey> {
        self.derivation.unlock(secret)
    }

    /// Re-derive the UMK and unlock the hierarchy with it
    pub fn recover_hierarchy(&self, secret: &[u8]) -> Result<()> {
        let master = self.recover(secret)?;
        let generation = master.generation();
        self.hierarchy.open(master)?;
        info!("Recovered key hierarchy (master generation {})", generation);
        Ok(())
    }
}
