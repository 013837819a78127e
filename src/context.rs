//! Wiring of the services around one vault
//!
//! Everything is constructed explicitly and shares the vault and randomness
//! source through `Arc`s; there are no process-wide key managers.

use crate::config::Config;
use crate::crypto::{RandomSource, SystemRandom};
use crate::engine::EncryptionEngine;
use crate::error::Result;
use crate::export::ExportService;
use crate::hierarchy::{KeyDerivationService, KeyHierarchyManager};
use crate::recovery::RecoveryService;
use crate::rotation::KeyRotationService;
use crate::vault::SecureKeyVault;
use std::sync::Arc;

pub struct CryptoContext {
    pub derivation: Arc<KeyDerivationService>,
    pub hierarchy: Arc<KeyHierarchyManager>,
    pub engine: Arc<EncryptionEngine>,
    pub rotation: KeyRotationService,
    pub export: ExportService,
    pub recovery: RecoveryService,
}

impl CryptoContext {
    pub fn new(
        vault: Arc<dyn SecureKeyVault>,
        rng: Arc<dyn RandomSource>,
        config: &Config,
    ) -> Self {
        let derivation = Arc::new(KeyDerivationService::new(
            vault.clone(),
            rng.clone(),
            config.kdf.params(),
            config.kdf.fallback(),
        ));
        let hierarchy = Arc::new(KeyHierarchyManager::new(vault, rng));
        let engine = Arc::new(EncryptionEngine::new(hierarchy.clone()));

        CryptoContext {
            rotation: KeyRotationService::new(
                hierarchy.clone(),
                derivation.clone(),
                config.rotation.policy(),
            ),
            export: ExportService::new(engine.clone(), derivation.clone()),
            recovery: RecoveryService::new(derivation.clone(), hierarchy.clone()),
            derivation,
            hierarchy,
            engine,
        }
    }

    /// Open the configured vault and use the system CSPRNG
    pub fn from_config(config: &Config) -> Result<Self> {
        let vault = config.open_vault()?;
        Ok(Self::new(vault, Arc::new(SystemRandom), config))
    }

    /// First run: derive the UMK from `secret` and bootstrap the hierarchy
    pub fn initialize(&self, secret: &[u8]) -> Result<()> {
        let master = self.derivation.initialize(secret)?;
        self.hierarchy.open(master)
    }

    /// Re-derive the UMK and unlock the hierarchy
    pub fn unlock(&self, secret: &[u8]) -> Result<()> {
        self.recovery.recover_hierarchy(secret)
    }

    pub fn lock(&self) {
        self.hierarchy.lock();
    }
}
