//! Export Encryption Service
//!
//! An export package is a standalone JSON document protected by a password
//! chosen at export time. Every item is decrypted through the live hierarchy
//! and re-encrypted under an Export Encryption Key (EEK) derived from that
//! password with a fresh salt, so the package and the live hierarchy never
//! share key material.

use crate::crypto::{derive_key, KdfParams, Salt, SecretKey, SALT_SIZE};
use crate::engine::{open_record, seal_record, EncryptionEngine};
use crate::error::{Error, Result};
use crate::hierarchy::{KeyDerivationService, WrappedKeyBlob};
use crate::record::{b64_array, Category, EncryptedRecord, KeyRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Current export package format version
pub const EXPORT_FORMAT_VERSION: u16 = 1;

/// Version recorded in the `KeyRef` of records sealed under an EEK
const EEK_KEY_VERSION: u32 = 0;

/// An item to export, as held by the live hierarchy
#[derive(Debug, Clone)]
pub struct ExportItem {
    pub id: String,
    pub record: EncryptedRecord,
    /// MEK blob downloaded alongside a recording; looked up in the vault if absent
    pub media_key: Option<WrappedKeyBlob>,
}

impl ExportItem {
    pub fn new(id: impl Into<String>, record: EncryptedRecord) -> Self {
        ExportItem {
            id: id.into(),
            record,
            media_key: None,
        }
    }

    pub fn with_media_key(mut self, blob: WrappedKeyBlob) -> Self {
        self.media_key = Some(blob);
        self
    }
}

/// One item of a package, sealed under the EEK
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedItem {
    pub id: String,
    pub record: EncryptedRecord,
}

/// Self-contained, password-protected export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportPackage {
    pub format_version: u16,
    pub package_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub kdf: KdfParams,
    #[serde(with = "b64_array")]
    pub salt: [u8; SALT_SIZE],
    pub items: Vec<ExportedItem>,
}

impl ExportPackage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let package: ExportPackage = serde_json::from_str(json)
            .map_err(|e| Error::Deserialization(e.to_string()))?;
        if package.format_version != EXPORT_FORMAT_VERSION {
            return Err(Error::InvalidRecord(format!(
                "Unsupported export format version: {}",
                package.format_version
            )));
        }
        Ok(package)
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn read_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Builds export packages from live records
pub struct ExportService {
    engine: Arc<EncryptionEngine>,
    derivation: Arc<KeyDerivationService>,
}

impl ExportService {
    pub fn new(engine: Arc<EncryptionEngine>, derivation: Arc<KeyDerivationService>) -> Self {
        ExportService { engine, derivation }
    }

    /// Build a package of `items` protected by `password`.
    ///
    /// Fails without producing a package if any item cannot be decrypted.
    pub fn build_package(&self, items: &[ExportItem], password: &[u8]) -> Result<ExportPackage> {
        if password.is_empty() {
            return Err(Error::KeyDerivationFailed(
                "export password must not be empty".to_string(),
            ));
        }

        let (eek, salt, kdf) = self.derivation.derive_ephemeral(password)?;
        let rng = self.engine.hierarchy().rng();

        let mut exported = Vec::with_capacity(items.len());
        for item in items {
            let plaintext = Zeroizing::new(match &item.media_key {
                Some(blob) => self.engine.decrypt_recording(&item.record, blob)?,
                None => self.engine.decrypt_payload(&item.record)?,
            });
            let record = seal_record(
                &eek,
                KeyRef::data(Category::Export, EEK_KEY_VERSION),
                &plaintext,
                item.record.aad.clone(),
                rng.as_ref(),
            )?;
            exported.push(ExportedItem {
                id: item.id.clone(),
                record,
            });
        }

        let package = ExportPackage {
            format_version: EXPORT_FORMAT_VERSION,
            package_id: Uuid::new_v4(),
            created_at: Utc::now(),
            kdf,
            salt: *salt.as_bytes(),
            items: exported,
        };
        info!(
            "Built export package {} with {} items",
            package.package_id,
            package.len()
        );
        Ok(package)
    }
}

/// Opens an export package with its password.
///
/// Needs nothing from the live hierarchy.
pub struct ExportReader {
    package: ExportPackage,
    eek: SecretKey,
}

impl ExportReader {
    /// Derive the EEK for `package`.
    ///
    /// A wrong password is not detected here; every item then fails with
    /// `AuthenticationFailed`.
    pub fn open(package: ExportPackage, password: &[u8]) -> Result<Self> {
        package.kdf.validate()?;
        let salt = Salt::from_bytes(package.salt);
        let eek = derive_key(password, &salt, &package.kdf)?;
        Ok(ExportReader { package, eek })
    }

    pub fn package(&self) -> &ExportPackage {
        &self.package
    }

    /// Ids of the items in the package, in order
    pub fn item_ids(&self) -> impl Iterator<Item = &str> {
        self.package.items.iter().map(|item| item.id.as_str())
    }

    pub fn open_item(&self, id: &str) -> Result<Vec<u8>> {
        let item = self
            .package
            .items
            .iter()
            .find(|item| item.id == id)
            .ok_or_else(|| Error::KeyNotFound(format!("export item {}", id)))?;
        self.open_exported(item)
    }

    /// Decrypt every item; fails on the first item that does not verify
    pub fn open_all(&self) -> Result<Vec<(String, Vec<u8>)>> {
        self.package
            .items
            .iter()
            .map(|item| Ok((item.id.clone(), self.open_exported(item)?)))
            .collect()
    }

    fn open_exported(&self, item: &ExportedItem) -> Result<Vec<u8>> {
        if item.record.key_ref.category != Category::Export {
            return Err(Error::InvalidRecord(format!(
                "export item {} is not sealed under an export key",
                item.id
            )));
        }
        open_record(&self.eek, &item.record).map_err(|e| {
            if matches!(e, Error::AuthenticationFailed) {
                warn!("Export item {} failed verification", item.id);
            }
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SystemRandom;
    use crate::hierarchy::KeyHierarchyManager;
    use crate::record::RecordMetadata;
    use crate::vault::MemoryVault;

    fn service() -> (ExportService, Arc<EncryptionEngine>) {
        let vault = Arc::new(MemoryVault::new());
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
        let hierarchy = Arc::new(KeyHierarchyManager::new(vault, rng));
        hierarchy
            .open(derivation.initialize(b"correcthorse").unwrap())
            .unwrap();
        let engine = Arc::new(EncryptionEngine::new(hierarchy));
        (ExportService::new(engine.clone(), derivation), engine)
    }

    #[test]
    fn test_export_and_open() {
        let (service, engine) = service();
        let record = engine
            .encrypt_payload(Category::Emotional, b"mood: 7", &RecordMetadata::new("text/plain"))
            .unwrap();
        let (recording, blob) = engine
            .encrypt_recording(b"audio bytes", &RecordMetadata::new("audio/aac"))
            .unwrap();

        let package = service
            .build_package(
                &[
                    ExportItem::new("checkin", record),
                    ExportItem::new("voice", recording).with_media_key(blob),
                ],
                b"Exp0rt!",
            )
            .unwrap();
        assert_eq!(package.len(), 2);
        assert!(package
            .items
            .iter()
            .all(|item| item.record.key_ref == KeyRef::data(Category::Export, 0)));

        let reader = ExportReader::open(package, b"Exp0rt!").unwrap();
        assert_eq!(reader.open_item("checkin").unwrap(), b"mood: 7");
        assert_eq!(reader.open_item("voice").unwrap(), b"audio bytes");
        assert!(matches!(reader.open_item("nope"), Err(Error::KeyNotFound(_))));
    }

    #[test]
    fn test_wrong_password() {
        let (service, engine) = service();
        let record = engine
            .encrypt_payload(Category::Journal, b"entry", &RecordMetadata::new("text/plain"))
            .unwrap();
        let package = service
            .build_package(&[ExportItem::new("a", record)], b"Exp0rt!")
            .unwrap();

        let reader = ExportReader::open(package, b"export").unwrap();
        assert!(matches!(reader.open_item("a"), Err(Error::AuthenticationFailed)));
        assert!(matches!(reader.open_all(), Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_json_roundtrip_and_file() {
        let (service, engine) = service();
        let record = engine
            .encrypt_payload(Category::Journal, b"entry", &RecordMetadata::new("text/plain"))
            .unwrap();
        let package = service
            .build_package(&[ExportItem::new("a", record)], b"pw")
            .unwrap();

        let json = package.to_json().unwrap();
        assert!(json.contains("\"salt\""));
        assert_eq!(ExportPackage::from_json(&json).unwrap(), package);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        package.write_to(&path).unwrap();
        let loaded = ExportPackage::read_from(&path).unwrap();
        let reader = ExportReader::open(loaded, b"pw").unwrap();
        assert_eq!(reader.open_all().unwrap(), vec![("a".to_string(), b"entry".to_vec())]);
    }

    #[test]
    fn test_export_independent_of_hierarchy() {
        let (service, engine) = service();
        let record = engine
            .encrypt_payload(Category::Journal, b"entry", &RecordMetadata::new("text/plain"))
            .unwrap();
        let package = service
            .build_package(&[ExportItem::new("a", record)], b"pw")
            .unwrap();

        engine.hierarchy().lock();
        let reader = ExportReader::open(package, b"pw").unwrap();
        assert_eq!(reader.open_item("a").unwrap(), b"entry");
    }

    #[test]
    fn test_tampered_item_fails() {
        let (service, engine) = service();
        let record = engine
            .encrypt_payload(Category::Journal, b"entry", &RecordMetadata::new("text/plain"))
            .unwrap();
        let mut package = service
            .build_package(&[ExportItem::new("a", record)], b"pw")
            .unwrap();
        package.items[0].record.ciphertext[0] ^= 0xFF;

        let reader = ExportReader::open(package, b"pw").unwrap();
        assert!(matches!(reader.open_item("a"), Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_rejects_crafted_kdf_costs() {
        let (service, _) = service();
        let mut package = service.build_package(&[], b"pw").unwrap();
        package.kdf = KdfParams::Argon2id {
            memory_kib: u32::MAX,
            iterations: 1,
            parallelism: 1,
        };
        assert!(matches!(
            ExportReader::open(package, b"pw"),
            Err(Error::KeyDerivationFailed(_))
        ));
    }

    #[test]
    fn test_rejects_empty_password_and_unknown_format() {
        let (service, _) = service();
        assert!(service.build_package(&[], b"").is_err());

        let mut package = service.build_package(&[], b"pw").unwrap();
        package.format_version = 9;
        let json = serde_json::to_string(&package).unwrap();
        assert!(matches!(
            ExportPackage::from_json(&json),
            Err(Error::InvalidRecord(_))
        ));
    }
}
