//! Encryption Engine
//!
//! Encrypts and decrypts payloads with keys from the hierarchy. Journal text
//! and check-ins are sealed directly under the active category DEK; each voice
//! recording gets its own MEK, wrapped under the journal DEK.
//!
//! The engine holds no state of its own besides a handle to the hierarchy, so
//! it can be shared freely between threads.

use crate::crypto::{aead_decrypt, aead_encrypt, random_iv, RandomSource, SecretKey};
use crate::error::{Error, Result};
use crate::hierarchy::{KeyHierarchyManager, WrappedKeyBlob, WrappingKeyRef};
use crate::record::{
    AlgorithmId, Category, EncryptedRecord, KeyRef, RecordMetadata, RECORD_FORMAT_VERSION,
};
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Seal `plaintext` under `key` into a record labelled with `key_ref`
pub fn seal_record(
    key: &SecretKey,
    key_ref: KeyRef,
    plaintext: &[u8],
    aad: Vec<u8>,
    rng: &dyn RandomSource,
) -> Result<EncryptedRecord> {
    if let Some(key_id) = &key_ref.media_key {
        if key_id.len() > u8::MAX as usize {
            return Err(Error::InvalidRecord(format!(
                "media key id is {} bytes, at most {} allowed",
                key_id.len(),
                u8::MAX
            )));
        }
    }
    let iv = random_iv(rng)?;
    let authenticated =
        EncryptedRecord::header_aad(RECORD_FORMAT_VERSION, AlgorithmId::Aes256Gcm, &key_ref, &aad);
    let (ciphertext, tag) = aead_encrypt(key, &iv, plaintext, &authenticated)?;

    Ok(EncryptedRecord {
        version: RECORD_FORMAT_VERSION,
        algorithm: AlgorithmId::Aes256Gcm,
        iv,
        ciphertext,
        tag,
        key_ref,
        aad,
    })
}

/// Open a record sealed by [`seal_record`].
///
/// Tag failure is `AuthenticationFailed`; callers decide how to surface it.
pub fn open_record(key: &SecretKey, record: &EncryptedRecord) -> Result<Vec<u8>> {
    if record.version != RECORD_FORMAT_VERSION {
        return Err(Error::InvalidRecord(format!(
            "Unsupported record version: {}",
            record.version
        )));
    }
    aead_decrypt(
        key,
        &record.iv,
        &record.ciphertext,
        &record.tag,
        &record.authenticated_data(),
    )
}

fn tag_failure_as_decryption(e: Error) -> Error {
    match e {
        Error::AuthenticationFailed => Error::DecryptionFailed,
        other => other,
    }
}

pub struct EncryptionEngine {
    hierarchy: Arc<KeyHierarchyManager>,
}

impl EncryptionEngine {
    pub fn new(hierarchy: Arc<KeyHierarchyManager>) -> Self {
        EncryptionEngine { hierarchy }
    }

    pub fn hierarchy(&self) -> &Arc<KeyHierarchyManager> {
        &self.hierarchy
    }

    /// Encrypt under the active DEK of `category`
    pub fn encrypt_payload(
        &self,
        category: Category,
        plaintext: &[u8],
        metadata: &RecordMetadata,
    ) -> Result<EncryptedRecord> {
        let (dek, version) = self.hierarchy.active_dek(category)?;
        let record = seal_record(
            &dek,
            KeyRef::data(category, version),
            plaintext,
            metadata.to_aad(),
            self.hierarchy.rng().as_ref(),
        )?;
        debug!(
            "Encrypted {} bytes under {} DEK v{}",
            plaintext.len(),
            category,
            version
        );
        Ok(record)
    }

    /// Encrypt a voice recording under a fresh MEK.
    ///
    /// Returns the record and the wrapped MEK; the blob is also kept in the
    /// vault.
    pub fn encrypt_recording(
        &self,
        plaintext: &[u8],
        metadata: &RecordMetadata,
    ) -> Result<(EncryptedRecord, WrappedKeyBlob)> {
        let (mek, blob) = self.hierarchy.create_mek(Category::Journal)?;
        let version = match blob.wrapping_key_ref {
            WrappingKeyRef::Data { version, .. } => version,
            WrappingKeyRef::Master { .. } => {
                return Err(Error::Internal("MEK wrapped under master key".to_string()))
            }
        };

        let record = seal_record(
            &mek,
            KeyRef::media(Category::Journal, version, blob.key_id.clone()),
            plaintext,
            metadata.to_aad(),
            self.hierarchy.rng().as_ref(),
        )?;
        debug!(
            "Encrypted recording ({} bytes) under {}",
            plaintext.len(),
            blob.key_id
        );
        Ok((record, blob))
    }

    /// Decrypt any record produced by this engine.
    ///
    /// Recording MEKs are looked up in the vault. Errors are
    /// `DecryptionFailed` on a tag mismatch and `KeyNotFound` when the key
    /// was retired or deleted. Nothing is modified on failure.
    pub fn decrypt_payload(&self, record: &EncryptedRecord) -> Result<Vec<u8>> {
        match &record.key_ref.media_key {
            Some(key_id) => {
                let blob = self.hierarchy.mek_blob(key_id)?;
                self.decrypt_recording(record, &blob)
            }
            None => {
                let dek = self
                    .hierarchy
                    .dek(record.key_ref.category, record.key_ref.version)?;
                open_record(&dek, record).map_err(|e| {
                    warn!("Payload failed verification");
                    tag_failure_as_decryption(e)
                })
            }
        }
    }

    /// Decrypt a recording with a MEK blob supplied by the caller
    pub fn decrypt_recording(
        &self,
        record: &EncryptedRecord,
        blob: &WrappedKeyBlob,
    ) -> Result<Vec<u8>> {
        if record.key_ref.media_key.as_deref() != Some(blob.key_id.as_str()) {
            return Err(Error::DecryptionFailed);
        }
        // A sweep may have rewrapped the blob since the record was written
        let mek = self.hierarchy.unwrap_mek_blob(blob)?;
        open_record(&mek, record).map_err(|e| {
            warn!("Recording {} failed verification", blob.key_id);
            tag_failure_as_decryption(e)
        })
    }

    /// Move a DEK-encrypted record onto the active DEK version.
    ///
    /// Recordings are returned unchanged; their MEK is rewrapped by the
    /// rotation sweep instead.
    pub fn reencrypt(&self, record: &EncryptedRecord) -> Result<EncryptedRecord> {
        if record.key_ref.media_key.is_some() {
            return Ok(record.clone());
        }
        let category = record.key_ref.category;
        let (_, active) = self.hierarchy.active_dek(category)?;
        if record.key_ref.version == active {
            return Ok(record.clone());
        }

        let plaintext = Zeroizing::new(self.decrypt_payload(record)?);
        let (dek, version) = self.hierarchy.active_dek(category)?;
        let rewritten = seal_record(
            &dek,
            KeyRef::data(category, version),
            &plaintext,
            record.aad.clone(),
            self.hierarchy.rng().as_ref(),
        )?;
        debug!(
            "Re-encrypted {} record from v{} to v{}",
            category, record.key_ref.version, version
        );
        Ok(rewritten)
    }

    /// Delete the MEK of a recording that is being deleted
    pub fn delete_recording(&self, record: &EncryptedRecord) -> Result<()> {
        match &record.key_ref.media_key {
            Some(key_id) => self.hierarchy.delete_mek(key_id),
            None => Err(Error::InvalidRecord("record is not a recording".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{MasterKey, Salt, SystemRandom, SALT_SIZE};
    use crate::vault::MemoryVault;

    fn engine() -> EncryptionEngine {
        let hierarchy = Arc::new(KeyHierarchyManager::new(
            Arc::new(MemoryVault::new()),
            Arc::new(SystemRandom),
        ));
        hierarchy
            .open(MasterKey::new(
                SecretKey::from_bytes([7u8; 32]),
                Salt::from_bytes([0u8; SALT_SIZE]),
                0,
            ))
            .unwrap();
        EncryptionEngine::new(hierarchy)
    }

    fn meta() -> RecordMetadata {
        RecordMetadata::new("text/plain").with_item_id("entry-1")
    }

    #[test]
    fn test_payload_roundtrip() {
        let engine = engine();
        let record = engine
            .encrypt_payload(Category::Emotional, b"feeling calm", &meta())
            .unwrap();
        assert_eq!(record.key_ref, KeyRef::data(Category::Emotional, 1));
        assert_ne!(record.ciphertext, b"feeling calm");
        assert_eq!(engine.decrypt_payload(&record).unwrap(), b"feeling calm");
    }

    #[test]
    fn test_empty_payload() {
        let engine = engine();
        let record = engine.encrypt_payload(Category::Journal, b"", &meta()).unwrap();
        assert!(record.ciphertext.is_empty());
        assert!(engine.decrypt_payload(&record).unwrap().is_empty());
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let engine = engine();
        let a = engine.encrypt_payload(Category::Journal, b"same", &meta()).unwrap();
        let b = engine.encrypt_payload(Category::Journal, b"same", &meta()).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tampering_detected() {
        let engine = engine();
        let record = engine
            .encrypt_payload(Category::Journal, b"dear diary", &meta())
            .unwrap();

        let mut bad_ct = record.clone();
        bad_ct.ciphertext[0] ^= 0x01;
        assert!(matches!(
            engine.decrypt_payload(&bad_ct),
            Err(Error::DecryptionFailed)
        ));

        let mut bad_tag = record.clone();
        bad_tag.tag[15] ^= 0x80;
        assert!(matches!(
            engine.decrypt_payload(&bad_tag),
            Err(Error::DecryptionFailed)
        ));

        let mut bad_aad = record.clone();
        bad_aad.aad = RecordMetadata::new("audio/aac").to_aad();
        assert!(matches!(
            engine.decrypt_payload(&bad_aad),
            Err(Error::DecryptionFailed)
        ));

        // Original still decrypts
        assert_eq!(engine.decrypt_payload(&record).unwrap(), b"dear diary");
    }

    #[test]
    fn test_seal_rejects_long_media_key_id() {
        let key = SecretKey::generate(&SystemRandom).unwrap();
        let key_ref = KeyRef::media(Category::Journal, 1, "m".repeat(256));
        let result = seal_record(&key, key_ref, b"audio", Vec::new(), &SystemRandom);
        assert!(matches!(result, Err(Error::InvalidRecord(_))));

        let key_ref = KeyRef::media(Category::Journal, 1, "m".repeat(255));
        let record = seal_record(&key, key_ref, b"audio", Vec::new(), &SystemRandom).unwrap();
        assert!(record.to_bytes().is_ok());
        assert_eq!(open_record(&key, &record).unwrap(), b"audio");
    }

    #[test]
    fn test_relabelled_category_fails() {
        let engine = engine();
        let mut record = engine
            .encrypt_payload(Category::Journal, b"private", &meta())
            .unwrap();
        record.key_ref.category = Category::Emotional;
        assert!(matches!(
            engine.decrypt_payload(&record),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn test_unknown_version_is_key_not_found() {
        let engine = engine();
        let mut record = engine
            .encrypt_payload(Category::Journal, b"private", &meta())
            .unwrap();
        record.key_ref.version = 42;
        assert!(matches!(
            engine.decrypt_payload(&record),
            Err(Error::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_recording_roundtrip() {
        let engine = engine();
        let audio = vec![0xAAu8; 4096];
        let (record, blob) = engine
            .encrypt_recording(&audio, &RecordMetadata::new("audio/aac"))
            .unwrap();
        assert_eq!(record.key_ref.media_key.as_deref(), Some(blob.key_id.as_str()));

        assert_eq!(engine.decrypt_payload(&record).unwrap(), audio);
        assert_eq!(engine.decrypt_recording(&record, &blob).unwrap(), audio);
    }

    #[test]
    fn test_recording_with_wrong_blob() {
        let engine = engine();
        let (record, _) = engine
            .encrypt_recording(b"one", &RecordMetadata::new("audio/aac"))
            .unwrap();
        let (_, other_blob) = engine
            .encrypt_recording(b"two", &RecordMetadata::new("audio/aac"))
            .unwrap();
        assert!(matches!(
            engine.decrypt_recording(&record, &other_blob),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn test_old_version_still_decrypts() {
        let engine = engine();
        let old = engine.encrypt_payload(Category::Journal, b"v1 entry", &meta()).unwrap();
        engine.hierarchy().install_dek_version(Category::Journal).unwrap();

        let new = engine.encrypt_payload(Category::Journal, b"v2 entry", &meta()).unwrap();
        assert_eq!(new.key_ref.version, 2);
        assert_eq!(engine.decrypt_payload(&old).unwrap(), b"v1 entry");
        assert_eq!(engine.decrypt_payload(&new).unwrap(), b"v2 entry");
    }

    #[test]
    fn test_reencrypt_moves_to_active_version() {
        let engine = engine();
        let old = engine.encrypt_payload(Category::Journal, b"migrate me", &meta()).unwrap();
        engine.hierarchy().install_dek_version(Category::Journal).unwrap();

        let moved = engine.reencrypt(&old).unwrap();
        assert_eq!(moved.key_ref.version, 2);
        assert_eq!(moved.aad, old.aad);
        assert_eq!(engine.decrypt_payload(&moved).unwrap(), b"migrate me");

        let unchanged = engine.reencrypt(&moved).unwrap();
        assert_eq!(unchanged, moved);
    }

    #[test]
    fn test_delete_recording() {
        let engine = engine();
        let (record, _) = engine
            .encrypt_recording(b"voice", &RecordMetadata::new("audio/aac"))
            .unwrap();
        engine.delete_recording(&record).unwrap();
        assert!(matches!(
            engine.decrypt_payload(&record),
            Err(Error::KeyNotFound(_))
        ));

        let text = engine.encrypt_payload(Category::Journal, b"text", &meta()).unwrap();
        assert!(engine.delete_recording(&text).is_err());
    }

    #[test]
    fn test_locked_engine() {
        let engine = engine();
        let record = engine.encrypt_payload(Category::Journal, b"x", &meta()).unwrap();
        engine.hierarchy().lock();
        assert!(matches!(
            engine.encrypt_payload(Category::Journal, b"x", &meta()),
            Err(Error::Locked)
        ));
        assert!(matches!(engine.decrypt_payload(&record), Err(Error::Locked)));
    }
}
