//! Key Rotation Service
//!
//! DEK rotation (scheduled, manual or after a security event) adds a new
//! version and leaves every older version valid for decryption. A secret
//! change rotates the UMK, which must rewrap every DEK; that runs as a
//! two-phase operation recorded in a journal so an interrupted rotation can
//! be resumed instead of losing access.
//!
//! All rotation entry points are serialized through one mutex.

use crate::error::{Error, Result};
use crate::hierarchy::{KeyDerivationService, KeyHierarchyManager, MasterKeyRecord, SecretChange};
use crate::record::Category;
use crate::vault::{get_value, put_value};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Vault id of the in-flight secret change journal
pub const ROTATION_JOURNAL_ID: &str = "rotation/umk";

/// Cooperative cancellation flag for long-running rotation work
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a rotation was started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationTrigger {
    SecretChange,
    Scheduled,
    SecurityEvent(String),
    Manual,
}

/// Rotation policy
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    /// Age after which the active DEK of a category is rotated
    pub dek_max_age: Duration,
    /// Retire superseded DEK versions once a sweep leaves no MEK under them.
    /// Only safe if records encrypted directly under those DEKs were
    /// re-encrypted beforehand.
    pub retire_after_sweep: bool,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        RotationPolicy {
            dek_max_age: Duration::days(90),
            retire_after_sweep: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalPhase {
    /// Rewrapped DEKs are being written to staging; live blobs untouched
    Staged,
    /// Staging complete; live blobs are being replaced
    Committing,
}

/// Persisted progress of a secret change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationJournal {
    pub phase: JournalPhase,
    /// Master key record to commit when done
    pub record: MasterKeyRecord,
    /// Live ids of the DEKs that were staged
    pub staged: Vec<String>,
    pub started_at: DateTime<Utc>,
}

/// Outcome of a MEK rewrap sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub category: Category,
    pub examined: usize,
    pub rewrapped: usize,
    /// False if the sweep was cancelled; call again to continue
    pub completed: bool,
    pub retired: Vec<u32>,
}

pub struct KeyRotationService {
    hierarchy: Arc<KeyHierarchyManager>,
    derivation: Arc<KeyDerivationService>,
    policy: RotationPolicy,
    serial: Mutex<()>,
}

impl KeyRotationService {
    pub fn new(
        hierarchy: Arc<KeyHierarchyManager>,
        derivation: Arc<KeyDerivationService>,
        policy: RotationPolicy,
    ) -> Self {
        KeyRotationService {
            hierarchy,
            derivation,
            policy,
            serial: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Activate a new DEK version for `category`
    pub fn rotate_dek(&self, category: Category, trigger: RotationTrigger) -> Result<u32> {
        let _serial = self.serial.lock();
        self.ensure_no_pending_change()?;
        self.rotate_dek_locked(category, &trigger)
    }

    fn rotate_dek_locked(&self, category: Category, trigger: &RotationTrigger) -> Result<u32> {
        let version = self.hierarchy.install_dek_version(category)?;
        info!("Rotated {} DEK to v{} ({:?})", category, version, trigger);
        Ok(version)
    }

    /// Rotate every category whose active DEK is older than the policy allows
    pub fn rotate_due(&self, now: DateTime<Utc>) -> Result<Vec<(Category, u32)>> {
        let _serial = self.serial.lock();
        self.ensure_no_pending_change()?;
        let catalog = self.hierarchy.catalog()?;

        let mut rotated = Vec::new();
        for category in Category::ALL {
            let active = catalog.active_version(category)?;
            let due = match catalog.info(category, active) {
                Some(info) => now - info.created_at >= self.policy.dek_max_age,
                None => true,
            };
            if due {
                let version = self.rotate_dek_locked(category, &RotationTrigger::Scheduled)?;
                rotated.push((category, version));
            }
        }
        Ok(rotated)
    }

    /// Rotate every category in response to a security event
    pub fn on_security_event(&self, reason: &str) -> Result<Vec<(Category, u32)>> {
        let _serial = self.serial.lock();
        self.ensure_no_pending_change()?;
        warn!("Security event, rotating all DEKs: {}", reason);

        let trigger = RotationTrigger::SecurityEvent(reason.to_string());
        Category::ALL
            .iter()
            .map(|&category| {
                self.rotate_dek_locked(category, &trigger)
                    .map(|version| (category, version))
            })
            .collect()
    }

    /// Secret change journal, if one is in flight
    pub fn pending_secret_change(&self) -> Result<Option<RotationJournal>> {
        get_value(self.hierarchy.vault().as_ref(), ROTATION_JOURNAL_ID)
    }

    fn ensure_no_pending_change(&self) -> Result<()> {
        if self.pending_secret_change()?.is_some() {
            return Err(Error::RotationIncomplete(
                "resume the pending secret change first".to_string(),
            ));
        }
        Ok(())
    }

    /// Change the user secret, rewrapping every DEK under the new UMK.
    ///
    /// The hierarchy must be unlocked. New encryptions wait until this
    /// returns. On `RotationIncomplete` the old secret remains valid and the
    /// rotation can be finished with [`Self::resume_secret_change`].
    pub fn change_secret(
        &self,
        old_secret: &[u8],
        new_secret: &[u8],
        cancel: &CancelToken,
    ) -> Result<()> {
        let _serial = self.serial.lock();
        self.ensure_no_pending_change()?;
        self.change_secret_locked(old_secret, new_secret, cancel)
    }

    fn change_secret_locked(
        &self,
        old_secret: &[u8],
        new_secret: &[u8],
        cancel: &CancelToken,
    ) -> Result<()> {
        // Fails with Locked before anything is written
        self.hierarchy.master_generation()?;

        let SecretChange { old, new, record } =
            self.derivation.change_secret(old_secret, new_secret)?;

        self.write_journal(&RotationJournal {
            phase: JournalPhase::Staged,
            record: record.clone(),
            staged: Vec::new(),
            started_at: Utc::now(),
        })?;

        let mut staged_ids = Vec::new();
        let rotated = self.hierarchy.rotate_master(&old, new, cancel, |staged| {
            staged_ids = staged.to_vec();
            self.write_journal(&RotationJournal {
                phase: JournalPhase::Committing,
                record: record.clone(),
                staged: staged.to_vec(),
                started_at: Utc::now(),
            })
        });

        match rotated {
            Ok(()) => {}
            Err(Error::RotationIncomplete(reason)) => {
                warn!("Secret change interrupted: {}", reason);
                return Err(Error::RotationIncomplete(reason));
            }
            Err(e) => {
                // Nothing was staged; the journal can go
                self.hierarchy.discard_all_staging()?;
                self.hierarchy.vault().delete(ROTATION_JOURNAL_ID)?;
                return Err(e);
            }
        }

        self.finish(&record, &staged_ids)?;
        info!(
            "Secret changed: {} DEKs rewrapped, master generation {}",
            staged_ids.len(),
            record.generation
        );
        Ok(())
    }

    /// Finish an interrupted secret change.
    ///
    /// If staging never completed, the staged blobs are discarded and the
    /// change is run again from the start (needs the old secret). If the
    /// commit phase had begun, the staged blobs are applied (needs only the
    /// new secret, but both are accepted for a uniform call).
    pub fn resume_secret_change(
        &self,
        old_secret: &[u8],
        new_secret: &[u8],
        cancel: &CancelToken,
    ) -> Result<()> {
        let _serial = self.serial.lock();
        let journal = match self.pending_secret_change()? {
            Some(journal) => journal,
            None => {
                info!("No pending secret change to resume");
                return Ok(());
            }
        };

        match journal.phase {
            JournalPhase::Staged => {
                info!("Restarting secret change from staging");
                // Check the old secret before touching anything
                let master = self.derivation.unlock(old_secret)?;
                self.hierarchy.discard_all_staging()?;
                self.hierarchy.vault().delete(ROTATION_JOURNAL_ID)?;
                self.hierarchy.vault().flush()?;
                if !self.hierarchy.is_unlocked() {
                    self.hierarchy.open(master)?;
                }
                self.change_secret_locked(old_secret, new_secret, cancel)
            }
            JournalPhase::Committing => {
                info!("Completing secret change commit");
                let new_master = self
                    .derivation
                    .derive_from_record(new_secret, &journal.record)?;
                self.hierarchy.apply_staged(&new_master, &journal.staged)?;
                self.finish(&journal.record, &journal.staged)?;
                self.hierarchy.open(new_master)
            }
        }
    }

    fn finish(&self, record: &MasterKeyRecord, staged: &[String]) -> Result<()> {
        self.derivation.commit(record)?;
        self.hierarchy.clear_staging(staged)?;
        self.hierarchy.vault().delete(ROTATION_JOURNAL_ID)?;
        self.hierarchy.vault().flush()
    }

    fn write_journal(&self, journal: &RotationJournal) -> Result<()> {
        put_value(self.hierarchy.vault().as_ref(), ROTATION_JOURNAL_ID, journal)?;
        self.hierarchy.vault().flush()
    }

    /// Rewrap MEKs of `category` still wrapped under older DEK versions.
    ///
    /// Each MEK is rewrapped with a single vault write, so stopping at any
    /// point leaves every MEK readable. Calling again continues where a
    /// cancelled sweep stopped.
    pub fn sweep(&self, category: Category, cancel: &CancelToken) -> Result<SweepReport> {
        let _serial = self.serial.lock();
        self.ensure_no_pending_change()?;
        let mut report = SweepReport {
            category,
            examined: 0,
            rewrapped: 0,
            completed: false,
            retired: Vec::new(),
        };

        for key_id in self.hierarchy.list_meks()? {
            if cancel.is_cancelled() {
                info!(
                    "Sweep of {} cancelled after {} MEKs",
                    category, report.examined
                );
                return Ok(report);
            }
            report.examined += 1;
            match self.hierarchy.rewrap_mek(&key_id, category) {
                Ok(true) => report.rewrapped += 1,
                Ok(false) => {}
                // Deleted together with its recording mid-sweep
                Err(Error::KeyNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        report.completed = true;

        if self.policy.retire_after_sweep {
            let catalog = self.hierarchy.catalog()?;
            for version in catalog.decrypt_only_versions(category) {
                if self.hierarchy.meks_wrapped_under(category, version)? == 0 {
                    self.hierarchy.retire_dek_version(category, version)?;
                    report.retired.push(version);
                }
            }
        }

        info!(
            "Sweep of {}: {} examined, {} rewrapped",
            category, report.examined, report.rewrapped
        );
        Ok(report)
    }

    /// Retire a superseded DEK version once nothing needs it
    pub fn retire(&self, category: Category, version: u32) -> Result<()> {
        let _serial = self.serial.lock();
        self.ensure_no_pending_change()?;
        self.hierarchy.retire_dek_version(category, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KdfParams, SystemRandom};
    use crate::hierarchy::{WrappedKeyBlob, WrappingKeyRef};
    use crate::vault::{MemoryVault, SecureKeyVault};

    /// Vault that fails writes to ids with a given prefix while armed, after
    /// letting a number of them through
    #[derive(Default)]
    struct FlakyVault {
        inner: MemoryVault,
        fail_prefix: Mutex<Option<(String, usize)>>,
    }

    impl FlakyVault {
        fn fail_writes_to(&self, prefix: Option<&str>) {
            *self.fail_prefix.lock() = prefix.map(|p| (p.to_string(), 0));
        }

        fn fail_writes_after(&self, prefix: &str, allowed: usize) {
            *self.fail_prefix.lock() = Some((prefix.to_string(), allowed));
        }
    }

    impl SecureKeyVault for FlakyVault {
        fn put(&self, key_id: &str, wrapped: &[u8]) -> Result<()> {
            if let Some((prefix, allowed)) = self.fail_prefix.lock().as_mut() {
                if key_id.starts_with(prefix.as_str()) {
                    if *allowed == 0 {
                        return Err(Error::Vault("injected write failure".to_string()));
                    }
                    *allowed -= 1;
                }
            }
            self.inner.put(key_id, wrapped)
        }

        fn get(&self, key_id: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key_id)
        }

        fn delete(&self, key_id: &str) -> Result<()> {
            self.inner.delete(key_id)
        }

        fn list(&self, prefix: &str) -> Result<Vec<String>> {
            self.inner.list(prefix)
        }
    }

    struct Fixture {
        vault: Arc<FlakyVault>,
        derivation: Arc<KeyDerivationService>,
        hierarchy: Arc<KeyHierarchyManager>,
        rotation: KeyRotationService,
    }

    fn fixture(policy: RotationPolicy) -> Fixture {
        let vault = Arc::new(FlakyVault::default());
        let rng = Arc::new(SystemRandom);
        let derivation = Arc::new(KeyDerivationService::new(
            vault.clone(),
            rng.clone(),
            KdfParams::Argon2id {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
            KdfParams::pbkdf2_default(),
        ));
        let hierarchy = Arc::new(KeyHierarchyManager::new(vault.clone(), rng));
        let master = derivation.initialize(b"old-secret").unwrap();
        hierarchy.open(master).unwrap();
        let rotation = KeyRotationService::new(hierarchy.clone(), derivation.clone(), policy);
        Fixture {
            vault,
            derivation,
            hierarchy,
            rotation,
        }
    }

    fn reopen(f: &Fixture, secret: &[u8]) -> Result<KeyHierarchyManager> {
        let manager = KeyHierarchyManager::new(f.vault.clone(), Arc::new(SystemRandom));
        manager.open(f.derivation.unlock(secret)?)?;
        Ok(manager)
    }

    #[test]
    fn test_rotate_dek() {
        let f = fixture(RotationPolicy::default());
        let version = f
            .rotation
            .rotate_dek(Category::Emotional, RotationTrigger::Manual)
            .unwrap();
        assert_eq!(version, 2);
        assert_eq!(f.hierarchy.active_dek(Category::Emotional).unwrap().1, 2);
        assert_eq!(f.hierarchy.active_dek(Category::Journal).unwrap().1, 1);
    }

    #[test]
    fn test_rotate_due() {
        let f = fixture(RotationPolicy::default());
        let now = Utc::now();
        assert!(f.rotation.rotate_due(now).unwrap().is_empty());

        let later = now + Duration::days(91);
        let rotated = f.rotation.rotate_due(later).unwrap();
        assert_eq!(rotated.len(), 3);
        assert!(rotated.iter().all(|&(_, v)| v == 2));
    }

    #[test]
    fn test_security_event_rotates_everything() {
        let f = fixture(RotationPolicy::default());
        let rotated = f.rotation.on_security_event("unexpected device").unwrap();
        assert_eq!(rotated.len(), 3);
    }

    #[test]
    fn test_change_secret() {
        let f = fixture(RotationPolicy::default());
        let (dek, _) = f.hierarchy.active_dek(Category::Journal).unwrap();

        f.rotation
            .change_secret(b"old-secret", b"new-secret", &CancelToken::new())
            .unwrap();

        assert!(f.rotation.pending_secret_change().unwrap().is_none());
        assert!(f.vault.list("stage/").unwrap().is_empty());
        assert!(matches!(
            f.derivation.unlock(b"old-secret"),
            Err(Error::AuthenticationFailed)
        ));

        let reopened = reopen(&f, b"new-secret").unwrap();
        let (again, _) = reopened.active_dek(Category::Journal).unwrap();
        assert_eq!(again.as_bytes(), dek.as_bytes());
        assert_eq!(reopened.master_generation().unwrap(), 1);
    }

    #[test]
    fn test_change_secret_wrong_old_secret() {
        let f = fixture(RotationPolicy::default());
        let result = f
            .rotation
            .change_secret(b"guess", b"new-secret", &CancelToken::new());
        assert!(matches!(result, Err(Error::AuthenticationFailed)));
        assert!(f.rotation.pending_secret_change().unwrap().is_none());
    }

    #[test]
    fn test_cancelled_secret_change_resumes() {
        let f = fixture(RotationPolicy::default());
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = f.rotation.change_secret(b"old-secret", b"new-secret", &cancel);
        assert!(matches!(result, Err(Error::RotationIncomplete(_))));
        assert_eq!(
            f.rotation.pending_secret_change().unwrap().unwrap().phase,
            JournalPhase::Staged
        );
        // Old secret still derives the UMK, but the hierarchy will not open
        assert!(matches!(
            reopen(&f, b"old-secret"),
            Err(Error::RotationIncomplete(_))
        ));

        f.rotation
            .resume_secret_change(b"old-secret", b"new-secret", &CancelToken::new())
            .unwrap();
        assert!(f.rotation.pending_secret_change().unwrap().is_none());
        reopen(&f, b"new-secret").unwrap();
    }

    #[test]
    fn test_interrupted_commit_resumes_with_new_secret() {
        let f = fixture(RotationPolicy::default());
        let (dek, _) = f.hierarchy.active_dek(Category::Emotional).unwrap();

        f.vault.fail_writes_to(Some("dek/"));
        let result = f
            .rotation
            .change_secret(b"old-secret", b"new-secret", &CancelToken::new());
        assert!(matches!(result, Err(Error::RotationIncomplete(_))));
        assert_eq!(
            f.rotation.pending_secret_change().unwrap().unwrap().phase,
            JournalPhase::Committing
        );
        // New encryptions are refused until the rotation completes
        assert!(matches!(
            f.hierarchy.active_dek(Category::Journal),
            Err(Error::RotationIncomplete(_))
        ));

        f.vault.fail_writes_to(None);
        f.rotation
            .resume_secret_change(b"old-secret", b"new-secret", &CancelToken::new())
            .unwrap();

        let reopened = reopen(&f, b"new-secret").unwrap();
        let (again, _) = reopened.active_dek(Category::Emotional).unwrap();
        assert_eq!(again.as_bytes(), dek.as_bytes());
        assert!(f.hierarchy.active_dek(Category::Journal).is_ok());
    }

    #[test]
    fn test_key_changes_blocked_during_pending_commit() {
        let f = fixture(RotationPolicy {
            retire_after_sweep: true,
            ..RotationPolicy::default()
        });
        f.hierarchy.create_mek(Category::Journal).unwrap();
        f.rotation
            .rotate_dek(Category::Journal, RotationTrigger::Manual)
            .unwrap();
        let (dek, _) = f.hierarchy.active_dek(Category::Journal).unwrap();

        f.vault.fail_writes_to(Some("dek/"));
        let result = f
            .rotation
            .change_secret(b"old-secret", b"new-secret", &CancelToken::new());
        assert!(matches!(result, Err(Error::RotationIncomplete(_))));
        f.vault.fail_writes_to(None);

        let blocked = [
            f.rotation
                .rotate_dek(Category::Journal, RotationTrigger::Manual)
                .map(|_| ()),
            f.rotation.rotate_due(Utc::now() + Duration::days(365)).map(|_| ()),
            f.rotation.on_security_event("lost phone").map(|_| ()),
            f.rotation.sweep(Category::Journal, &CancelToken::new()).map(|_| ()),
            f.rotation.retire(Category::Journal, 1),
            f.hierarchy.install_dek_version(Category::Emotional).map(|_| ()),
            f.hierarchy.retire_dek_version(Category::Journal, 1),
        ];
        for result in blocked {
            assert!(matches!(result, Err(Error::RotationIncomplete(_))));
        }

        f.rotation
            .resume_secret_change(b"old-secret", b"new-secret", &CancelToken::new())
            .unwrap();
        let reopened = reopen(&f, b"new-secret").unwrap();
        let (again, version) = reopened.active_dek(Category::Journal).unwrap();
        assert_eq!(version, 2);
        assert_eq!(again.as_bytes(), dek.as_bytes());
        assert!(reopened.dek(Category::Journal, 1).is_ok());

        // Unblocked once the change is committed
        assert_eq!(
            f.rotation
                .rotate_dek(Category::Journal, RotationTrigger::Manual)
                .unwrap(),
            3
        );
    }

    #[test]
    fn test_apply_staged_repeats_after_partial_overwrite() {
        let f = fixture(RotationPolicy::default());
        let (dek, _) = f.hierarchy.active_dek(Category::Export).unwrap();

        // One live blob is replaced before the commit fails
        f.vault.fail_writes_after("dek/", 1);
        let result = f
            .rotation
            .change_secret(b"old-secret", b"new-secret", &CancelToken::new());
        assert!(matches!(result, Err(Error::RotationIncomplete(_))));
        f.vault.fail_writes_to(None);

        let rewrapped = f
            .vault
            .list("dek/")
            .unwrap()
            .into_iter()
            .filter(|id| {
                let blob: WrappedKeyBlob = get_value(f.vault.as_ref(), id).unwrap().unwrap();
                blob.wrapping_key_ref == WrappingKeyRef::Master { generation: 1 }
            })
            .count();
        assert_eq!(rewrapped, 1);

        let journal = f.rotation.pending_secret_change().unwrap().unwrap();
        assert_eq!(journal.phase, JournalPhase::Committing);
        let new_master = f
            .derivation
            .derive_from_record(b"new-secret", &journal.record)
            .unwrap();
        f.hierarchy.apply_staged(&new_master, &journal.staged).unwrap();
        f.hierarchy.apply_staged(&new_master, &journal.staged).unwrap();

        f.rotation
            .resume_secret_change(b"old-secret", b"new-secret", &CancelToken::new())
            .unwrap();
        assert!(f.vault.list("stage/").unwrap().is_empty());
        let reopened = reopen(&f, b"new-secret").unwrap();
        let (again, _) = reopened.active_dek(Category::Export).unwrap();
        assert_eq!(again.as_bytes(), dek.as_bytes());
    }

    #[test]
    fn test_sweep_rewraps_meks() {
        let f = fixture(RotationPolicy::default());
        let (mek_a, blob_a) = f.hierarchy.create_mek(Category::Journal).unwrap();
        let (_, _blob_b) = f.hierarchy.create_mek(Category::Journal).unwrap();
        f.rotation
            .rotate_dek(Category::Journal, RotationTrigger::Manual)
            .unwrap();

        let report = f.rotation.sweep(Category::Journal, &CancelToken::new()).unwrap();
        assert!(report.completed);
        assert_eq!(report.examined, 2);
        assert_eq!(report.rewrapped, 2);
        assert!(report.retired.is_empty());
        assert_eq!(f.hierarchy.meks_wrapped_under(Category::Journal, 1).unwrap(), 0);

        let stored = f.hierarchy.mek_blob(&blob_a.key_id).unwrap();
        let unwrapped = f.hierarchy.unwrap_mek(&stored, Category::Journal, 2).unwrap();
        assert_eq!(unwrapped.as_bytes(), mek_a.as_bytes());

        // Second pass has nothing left to do
        let again = f.rotation.sweep(Category::Journal, &CancelToken::new()).unwrap();
        assert_eq!(again.rewrapped, 0);
    }

    #[test]
    fn test_cancelled_sweep_is_resumable() {
        let f = fixture(RotationPolicy::default());
        f.hierarchy.create_mek(Category::Journal).unwrap();
        f.rotation
            .rotate_dek(Category::Journal, RotationTrigger::Manual)
            .unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let report = f.rotation.sweep(Category::Journal, &cancel).unwrap();
        assert!(!report.completed);
        assert_eq!(report.rewrapped, 0);

        let report = f.rotation.sweep(Category::Journal, &CancelToken::new()).unwrap();
        assert!(report.completed);
        assert_eq!(report.rewrapped, 1);
    }

    #[test]
    fn test_sweep_with_retirement() {
        let f = fixture(RotationPolicy {
            retire_after_sweep: true,
            ..RotationPolicy::default()
        });
        f.hierarchy.create_mek(Category::Journal).unwrap();
        f.rotation
            .rotate_dek(Category::Journal, RotationTrigger::Manual)
            .unwrap();

        let report = f.rotation.sweep(Category::Journal, &CancelToken::new()).unwrap();
        assert_eq!(report.retired, vec![1]);
        assert!(matches!(
            f.hierarchy.dek(Category::Journal, 1),
            Err(Error::KeyNotFound(_))
        ));
    }
}
