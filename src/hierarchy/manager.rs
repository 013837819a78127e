//! Key Hierarchy Manager
//!
//! Owns the tree UMK -> per-category DEKs -> per-recording MEKs.
//!
//! While unlocked, the manager holds the UMK and the unwrapped DEKs in
//! zeroizing buffers behind a read-write lock. Lookups take the shared lock;
//! anything that changes the catalog takes the exclusive lock. Wrapped blobs
//! are always written before the catalog that references them, so a reader
//! never sees an active version whose blob is missing.

use crate::crypto::{MasterKey, RandomSource, SecretKey};
use crate::error::{Error, Result};
use crate::hierarchy::catalog::{
    dek_key_id, mek_key_id, staging_id, KeyCatalog, KeyStatus, KeyVersionInfo, CATALOG_ID,
    MEK_PREFIX, STAGING_PREFIX,
};
use crate::hierarchy::wrap::{unwrap_key, wrap_key, WrapContext, WrappedKeyBlob, WrappingKeyRef};
use crate::record::Category;
use crate::rotation::{CancelToken, ROTATION_JOURNAL_ID};
use crate::vault::{get_value, put_value, SecureKeyVault};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unlocked state
struct Session {
    master: MasterKey,
    catalog: KeyCatalog,
    deks: HashMap<(Category, u32), SecretKey>,
}

impl Session {
    fn dek(&self, category: Category, version: u32) -> Result<&SecretKey> {
        if !self.catalog.is_decryptable(category, version) {
            return Err(Error::KeyNotFound(dek_key_id(category, version)));
        }
        self.deks
            .get(&(category, version))
            .ok_or_else(|| Error::KeyNotFound(dek_key_id(category, version)))
    }
}

pub struct KeyHierarchyManager {
    vault: Arc<dyn SecureKeyVault>,
    rng: Arc<dyn RandomSource>,
    session: RwLock<Option<Session>>,
    /// Set when a master key rotation was interrupted in this process
    rotation_pending: AtomicBool,
}

impl KeyHierarchyManager {
    pub fn new(vault: Arc<dyn SecureKeyVault>, rng: Arc<dyn RandomSource>) -> Self {
        KeyHierarchyManager {
            vault,
            rng,
            session: RwLock::new(None),
            rotation_pending: AtomicBool::new(false),
        }
    }

    pub fn vault(&self) -> &Arc<dyn SecureKeyVault> {
        &self.vault
    }

    pub fn rng(&self) -> &Arc<dyn RandomSource> {
        &self.rng
    }

    pub fn is_unlocked(&self) -> bool {
        self.session.read().is_some()
    }

    /// Unlock the hierarchy with a verified master key.
    ///
    /// On first use the three category DEKs are created at version 1.
    /// Otherwise every live DEK is unwrapped up front; the session is only
    /// installed if all of them verify.
    pub fn open(&self, master: MasterKey) -> Result<()> {
        if self.vault.get(ROTATION_JOURNAL_ID)?.is_some() {
            return Err(Error::RotationIncomplete(
                "a secret change is pending; resume it before unlocking".to_string(),
            ));
        }

        let mut guard = self.session.write();
        let (catalog, deks) = match get_value::<KeyCatalog>(self.vault.as_ref(), CATALOG_ID)? {
            Some(catalog) => {
                let deks = self.unwrap_all(&master, &catalog)?;
                (catalog, deks)
            }
            None => self.bootstrap(&master)?,
        };

        info!(
            "Key hierarchy unlocked: {} DEK versions, master generation {}",
            deks.len(),
            master.generation()
        );
        *guard = Some(Session {
            master,
            catalog,
            deks,
        });
        self.rotation_pending.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Drop the master key and all cached DEKs
    pub fn lock(&self) {
        if self.session.write().take().is_some() {
            info!("Key hierarchy locked");
        }
    }

    fn bootstrap(
        &self,
        master: &MasterKey,
    ) -> Result<(KeyCatalog, HashMap<(Category, u32), SecretKey>)> {
        let catalog = KeyCatalog::bootstrap(master.generation(), Utc::now());
        let mut deks = HashMap::new();

        for category in Category::ALL {
            let dek = SecretKey::generate(self.rng.as_ref())?;
            let blob = self.wrap_dek(master, &dek, category, 1)?;
            put_value(self.vault.as_ref(), &blob.key_id, &blob)?;
            deks.insert((category, 1), dek);
        }
        self.vault.flush()?;

        put_value(self.vault.as_ref(), CATALOG_ID, &catalog)?;
        self.vault.flush()?;
        info!("Key hierarchy bootstrapped with DEK v1 for all categories");
        Ok((catalog, deks))
    }

    fn unwrap_all(
        &self,
        master: &MasterKey,
        catalog: &KeyCatalog,
    ) -> Result<HashMap<(Category, u32), SecretKey>> {
        let mut deks = HashMap::new();
        for (category, version) in catalog.live_versions() {
            let dek = self.unwrap_dek(master.key(), category, version)?;
            deks.insert((category, version), dek);
        }
        Ok(deks)
    }

    fn wrap_dek(
        &self,
        master: &MasterKey,
        dek: &SecretKey,
        category: Category,
        version: u32,
    ) -> Result<WrappedKeyBlob> {
        let key_id = dek_key_id(category, version);
        wrap_key(
            master.key(),
            dek,
            &WrapContext::data_key(category, version, &key_id),
            WrappingKeyRef::Master {
                generation: master.generation(),
            },
            self.rng.as_ref(),
        )
    }

    fn load_blob(&self, key_id: &str) -> Result<WrappedKeyBlob> {
        get_value(self.vault.as_ref(), key_id)?.ok_or_else(|| Error::KeyNotFound(key_id.to_string()))
    }

    fn unwrap_dek(&self, master: &SecretKey, category: Category, version: u32) -> Result<SecretKey> {
        let key_id = dek_key_id(category, version);
        let blob = self.load_blob(&key_id)?;
        unwrap_key(master, &blob, &WrapContext::data_key(category, version, &key_id))
    }

    fn ensure_no_pending_rotation(&self) -> Result<()> {
        if self.rotation_pending.load(Ordering::SeqCst) {
            return Err(Error::RotationIncomplete(
                "new encryptions are blocked until the secret change completes".to_string(),
            ));
        }
        Ok(())
    }

    /// Refuse catalog changes while a secret change is in flight, whether it
    /// was interrupted here or left a journal from an earlier run
    fn ensure_no_secret_change(&self) -> Result<()> {
        self.ensure_no_pending_rotation()?;
        if self.vault.get(ROTATION_JOURNAL_ID)?.is_some() {
            return Err(Error::RotationIncomplete(
                "key changes are blocked until the secret change completes".to_string(),
            ));
        }
        Ok(())
    }

    /// Active DEK for new encryption in `category`
    pub fn active_dek(&self, category: Category) -> Result<(SecretKey, u32)> {
        self.ensure_no_pending_rotation()?;
        let guard = self.session.read();
        let session = guard.as_ref().ok_or(Error::Locked)?;
        let version = session.catalog.active_version(category)?;
        Ok((session.dek(category, version)?.clone(), version))
    }

    /// DEK of a specific version, for decryption
    pub fn dek(&self, category: Category, version: u32) -> Result<SecretKey> {
        let guard = self.session.read();
        let session = guard.as_ref().ok_or(Error::Locked)?;
        Ok(session.dek(category, version)?.clone())
    }

    /// Create a MEK wrapped under the active DEK of `category`.
    ///
    /// The wrapped blob is persisted in the vault and also returned so it can
    /// travel alongside the recording.
    pub fn create_mek(&self, category: Category) -> Result<(SecretKey, WrappedKeyBlob)> {
        self.ensure_no_pending_rotation()?;
        let guard = self.session.read();
        let session = guard.as_ref().ok_or(Error::Locked)?;
        let version = session.catalog.active_version(category)?;
        let dek = session.dek(category, version)?;

        let mek = SecretKey::generate(self.rng.as_ref())?;
        let key_id = mek_key_id(&Uuid::new_v4());
        let blob = wrap_key(
            dek,
            &mek,
            &WrapContext::media_key(category, version, &key_id),
            WrappingKeyRef::Data { category, version },
            self.rng.as_ref(),
        )?;
        put_value(self.vault.as_ref(), &key_id, &blob)?;

        debug!("Created MEK {} under {} DEK v{}", key_id, category, version);
        Ok((mek, blob))
    }

    /// Unwrap a MEK with the given DEK version.
    ///
    /// A blob that does not verify is reported as `DecryptionFailed`.
    pub fn unwrap_mek(
        &self,
        blob: &WrappedKeyBlob,
        category: Category,
        version: u32,
    ) -> Result<SecretKey> {
        let dek = self.dek(category, version)?;
        unwrap_key(
            &dek,
            blob,
            &WrapContext::media_key(category, version, &blob.key_id),
        )
        .map_err(|e| match e {
            Error::AuthenticationFailed => Error::DecryptionFailed,
            other => other,
        })
    }

    /// Unwrap a MEK using the wrapping reference recorded in the blob
    pub fn unwrap_mek_blob(&self, blob: &WrappedKeyBlob) -> Result<SecretKey> {
        match blob.wrapping_key_ref {
            WrappingKeyRef::Data { category, version } => self.unwrap_mek(blob, category, version),
            WrappingKeyRef::Master { .. } => Err(Error::DecryptionFailed),
        }
    }

    /// Stored blob of a MEK
    pub fn mek_blob(&self, key_id: &str) -> Result<WrappedKeyBlob> {
        self.load_blob(key_id)
    }

    /// Delete a MEK together with its recording
    pub fn delete_mek(&self, key_id: &str) -> Result<()> {
        if !key_id.starts_with(MEK_PREFIX) {
            return Err(Error::KeyNotFound(key_id.to_string()));
        }
        self.vault.delete(key_id)?;
        debug!("Deleted MEK {}", key_id);
        Ok(())
    }

    /// Ids of all stored MEKs
    pub fn list_meks(&self) -> Result<Vec<String>> {
        self.vault.list(MEK_PREFIX)
    }

    /// Snapshot of the DEK catalog
    pub fn catalog(&self) -> Result<KeyCatalog> {
        let guard = self.session.read();
        Ok(guard.as_ref().ok_or(Error::Locked)?.catalog.clone())
    }

    pub fn master_generation(&self) -> Result<u32> {
        let guard = self.session.read();
        Ok(guard.as_ref().ok_or(Error::Locked)?.master.generation())
    }

    /// Create and activate a new DEK version for `category`
    pub(crate) fn install_dek_version(&self, category: Category) -> Result<u32> {
        let mut guard = self.session.write();
        let session = guard.as_mut().ok_or(Error::Locked)?;
        self.ensure_no_secret_change()?;

        let version = session.catalog.next_version(category)?;
        let dek = SecretKey::generate(self.rng.as_ref())?;
        let blob = self.wrap_dek(&session.master, &dek, category, version)?;
        put_value(self.vault.as_ref(), &blob.key_id, &blob)?;
        self.vault.flush()?;

        let mut catalog = session.catalog.clone();
        catalog.activate(
            category,
            version,
            KeyVersionInfo {
                status: KeyStatus::Active,
                created_at: Utc::now(),
                master_generation: session.master.generation(),
            },
        );
        put_value(self.vault.as_ref(), CATALOG_ID, &catalog)?;
        self.vault.flush()?;

        session.catalog = catalog;
        session.deks.insert((category, version), dek);
        info!("Activated {} DEK v{}", category, version);
        Ok(version)
    }

    /// Rewrap one MEK of `category` under the active DEK.
    ///
    /// Returns `false` if it is already wrapped under the active version or
    /// belongs to another category.
    pub(crate) fn rewrap_mek(&self, key_id: &str, category: Category) -> Result<bool> {
        let guard = self.session.read();
        let session = guard.as_ref().ok_or(Error::Locked)?;
        let active = session.catalog.active_version(category)?;

        let blob = self.load_blob(key_id)?;
        let from_version = match blob.wrapping_key_ref {
            WrappingKeyRef::Data {
                category: c,
                version,
            } if c == category => version,
            _ => return Ok(false),
        };
        if from_version == active {
            return Ok(false);
        }

        let old_dek = session.dek(category, from_version)?;
        let mek = unwrap_key(
            old_dek,
            &blob,
            &WrapContext::media_key(category, from_version, key_id),
        )?;
        let rewrapped = wrap_key(
            session.dek(category, active)?,
            &mek,
            &WrapContext::media_key(category, active, key_id),
            WrappingKeyRef::Data {
                category,
                version: active,
            },
            self.rng.as_ref(),
        )?;
        put_value(self.vault.as_ref(), key_id, &rewrapped)?;
        debug!(
            "Rewrapped {} from {} v{} to v{}",
            key_id, category, from_version, active
        );
        Ok(true)
    }

    /// Count stored MEKs still wrapped under `category` DEK `version`
    pub fn meks_wrapped_under(&self, category: Category, version: u32) -> Result<usize> {
        let mut count = 0;
        for key_id in self.list_meks()? {
            let blob = self.load_blob(&key_id)?;
            if blob.wrapping_key_ref == (WrappingKeyRef::Data { category, version }) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Retire a superseded DEK version and purge its wrapped blob.
    ///
    /// Refused while any stored MEK is still wrapped under it. Records
    /// encrypted directly under the DEK are not tracked here; the caller must
    /// have re-encrypted them first.
    pub(crate) fn retire_dek_version(&self, category: Category, version: u32) -> Result<()> {
        let mut guard = self.session.write();
        let session = guard.as_mut().ok_or(Error::Locked)?;
        self.ensure_no_secret_change()?;

        let remaining = self.meks_wrapped_under(category, version)?;
        if remaining > 0 {
            return Err(Error::RotationIncomplete(format!(
                "{} MEKs still wrapped under {} v{}",
                remaining, category, version
            )));
        }

        let mut catalog = session.catalog.clone();
        catalog.retire(category, version)?;
        put_value(self.vault.as_ref(), CATALOG_ID, &catalog)?;
        self.vault.flush()?;
        self.vault.delete(&dek_key_id(category, version))?;

        session.catalog = catalog;
        session.deks.remove(&(category, version));
        info!("Retired {} DEK v{}", category, version);
        Ok(())
    }

    /// Rewrap every live DEK under `new_master`.
    ///
    /// Holds the exclusive lock for the whole operation, so new encryptions
    /// wait until it finishes. Phase one writes every rewrapped DEK to a
    /// staging id; `on_staged` is then called (the rotation service records
    /// the journal phase there) and phase two copies the staged blobs over
    /// the live ones. If staging is interrupted the live blobs are untouched.
    pub(crate) fn rotate_master<F>(
        &self,
        old_master: &MasterKey,
        new_master: MasterKey,
        cancel: &CancelToken,
        on_staged: F,
    ) -> Result<()>
    where
        F: FnOnce(&[String]) -> Result<()>,
    {
        let mut guard = self.session.write();
        let session = guard.as_mut().ok_or(Error::Locked)?;
        if session.master.key().as_bytes() != old_master.key().as_bytes() {
            return Err(Error::AuthenticationFailed);
        }

        let live = session.catalog.live_versions();
        let mut staged = Vec::with_capacity(live.len());
        for (i, &(category, version)) in live.iter().enumerate() {
            if cancel.is_cancelled() {
                self.rotation_pending.store(true, Ordering::SeqCst);
                return Err(Error::RotationIncomplete(format!(
                    "cancelled after staging {} of {} DEKs",
                    i,
                    live.len()
                )));
            }
            let dek = session.dek(category, version)?;
            let blob = self.wrap_dek(&new_master, dek, category, version)?;
            let stage_id = staging_id(&blob.key_id);
            if let Err(e) = put_value(self.vault.as_ref(), &stage_id, &blob) {
                self.rotation_pending.store(true, Ordering::SeqCst);
                return Err(Error::RotationIncomplete(format!(
                    "staging {} failed: {}",
                    blob.key_id, e
                )));
            }
            staged.push(blob.key_id);
        }
        self.vault.flush()?;

        if let Err(e) = on_staged(&staged) {
            self.rotation_pending.store(true, Ordering::SeqCst);
            return Err(Error::RotationIncomplete(format!(
                "recording staged rotation failed: {}",
                e
            )));
        }

        if let Err(e) = self.apply_staged(&new_master, &staged) {
            self.rotation_pending.store(true, Ordering::SeqCst);
            return Err(Error::RotationIncomplete(format!(
                "committing rewrapped DEKs failed: {}",
                e
            )));
        }

        session.catalog.set_master_generation(new_master.generation());
        session.master = new_master;
        self.rotation_pending.store(false, Ordering::SeqCst);
        info!(
            "Rewrapped {} DEKs under master generation {}",
            staged.len(),
            session.master.generation()
        );
        Ok(())
    }

    /// Copy staged DEK blobs over the live ones and update the catalog.
    ///
    /// Every staged blob is verified under `new_master` before anything is
    /// overwritten. Safe to repeat after a crash.
    pub(crate) fn apply_staged(&self, new_master: &MasterKey, staged: &[String]) -> Result<()> {
        let mut catalog: KeyCatalog =
            get_value(self.vault.as_ref(), CATALOG_ID)?.ok_or(Error::NotInitialized)?;

        let mut blobs = Vec::with_capacity(staged.len());
        for live_id in staged {
            let stage_id = staging_id(live_id);
            let blob = match get_value::<WrappedKeyBlob>(self.vault.as_ref(), &stage_id)? {
                Some(blob) => blob,
                None => {
                    // Already applied and cleaned up in an earlier attempt
                    let live = self.load_blob(live_id)?;
                    if live.wrapping_key_ref
                        != (WrappingKeyRef::Master {
                            generation: new_master.generation(),
                        })
                    {
                        return Err(Error::KeyNotFound(stage_id));
                    }
                    live
                }
            };
            let (category, version) = catalog
                .live_versions()
                .into_iter()
                .find(|&(c, v)| dek_key_id(c, v) == *live_id)
                .ok_or_else(|| Error::KeyNotFound(live_id.clone()))?;
            unwrap_key(
                new_master.key(),
                &blob,
                &WrapContext::data_key(category, version, live_id),
            )?;
            blobs.push(blob);
        }

        for blob in &blobs {
            put_value(self.vault.as_ref(), &blob.key_id, blob)?;
        }
        self.vault.flush()?;

        catalog.set_master_generation(new_master.generation());
        put_value(self.vault.as_ref(), CATALOG_ID, &catalog)?;
        self.vault.flush()?;
        Ok(())
    }

    /// Remove staged blobs left by a master key rotation
    pub(crate) fn clear_staging(&self, staged: &[String]) -> Result<()> {
        for live_id in staged {
            self.vault.delete(&staging_id(live_id))?;
        }
        self.vault.flush()?;
        Ok(())
    }

    /// Discard every staged blob, whatever journal referenced it
    pub(crate) fn discard_all_staging(&self) -> Result<usize> {
        let ids = self.vault.list(STAGING_PREFIX)?;
        for id in &ids {
            self.vault.delete(id)?;
        }
        if !ids.is_empty() {
            warn!("Discarded {} staged key blobs", ids.len());
        }
        self.vault.flush()?;
        Ok(ids.len())
    }
}
