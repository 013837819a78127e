//! Key wrapping
//!
//! A child key is wrapped by AEAD-encrypting it under its parent. The AAD
//! binds purpose, category, version and key id, so a wrapped DEK can never
//! be unwrapped as a MEK (or vice versa) and a blob cannot be moved to
//! another slot without failing verification.
//!
//! Wrapped bytes layout: `iv (12) || ciphertext || tag (16)`.

use crate::crypto::{
    aead_decrypt, aead_encrypt, random_iv, RandomSource, SecretKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE,
};
use crate::error::{Error, Result};
use crate::record::{b64, Category};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

const WRAP_DOMAIN: &str = "journalcrypt-wrap-v1";

/// What a wrapped blob is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPurpose {
    /// Canary sealed under the UMK to check a derived key
    Verifier,
    /// DEK wrapped under the UMK
    DataKey,
    /// MEK wrapped under a DEK
    MediaKey,
}

impl KeyPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPurpose::Verifier => "verifier",
            KeyPurpose::DataKey => "data-key",
            KeyPurpose::MediaKey => "media-key",
        }
    }
}

/// Context bound into the AAD of a wrap operation
#[derive(Debug, Clone, Copy)]
pub struct WrapContext<'a> {
    pub purpose: KeyPurpose,
    pub category: Option<Category>,
    pub version: u32,
    pub key_id: &'a str,
}

impl<'a> WrapContext<'a> {
    pub fn verifier(generation: u32) -> Self {
        WrapContext {
            purpose: KeyPurpose::Verifier,
            category: None,
            version: generation,
            key_id: "umk",
        }
    }

    pub fn data_key(category: Category, version: u32, key_id: &'a str) -> Self {
        WrapContext {
            purpose: KeyPurpose::DataKey,
            category: Some(category),
            version,
            key_id,
        }
    }

    /// `version` is the version of the DEK doing the wrapping
    pub fn media_key(category: Category, version: u32, key_id: &'a str) -> Self {
        WrapContext {
            purpose: KeyPurpose::MediaKey,
            category: Some(category),
            version,
            key_id,
        }
    }

    fn aad(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}|{}",
            WRAP_DOMAIN,
            self.purpose.as_str(),
            self.category.map_or("-", |c| c.as_str()),
            self.version,
            self.key_id
        )
        .into_bytes()
    }
}

/// Key that wrapped a blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WrappingKeyRef {
    /// The User Master Key of the given generation
    Master { generation: u32 },
    /// A DEK version
    Data { category: Category, version: u32 },
}

/// Unit persisted in the Secure Key Vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKeyBlob {
    pub key_id: String,
    #[serde(with = "b64")]
    pub wrapped_bytes: Vec<u8>,
    pub wrapping_key_ref: WrappingKeyRef,
    pub created_at: DateTime<Utc>,
}

/// Seal arbitrary bytes under `parent`
pub(crate) fn seal_bytes(
    parent: &SecretKey,
    plaintext: &[u8],
    ctx: &WrapContext<'_>,
    rng: &dyn RandomSource,
) -> Result<Vec<u8>> {
    let iv = random_iv(rng)?;
    let (ciphertext, tag) = aead_encrypt(parent, &iv, plaintext, &ctx.aad())?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len() + TAG_SIZE);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out.extend_from_slice(&tag);
    Ok(out)
}

/// Open bytes sealed by [`seal_bytes`]
pub(crate) fn open_bytes(
    parent: &SecretKey,
    sealed: &[u8],
    ctx: &WrapContext<'_>,
) -> Result<Zeroizing<Vec<u8>>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::AuthenticationFailed);
    }
    let (iv, rest) = sealed.split_at(NONCE_SIZE);
    let (ciphertext, tag) = rest.split_at(rest.len() - TAG_SIZE);

    let mut iv_bytes = [0u8; NONCE_SIZE];
    iv_bytes.copy_from_slice(iv);
    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag);

    let plaintext = aead_decrypt(parent, &iv_bytes, ciphertext, &tag_bytes, &ctx.aad())?;
    Ok(Zeroizing::new(plaintext))
}

/// Wrap `child` under `parent`
pub fn wrap_key(
    parent: &SecretKey,
    child: &SecretKey,
    ctx: &WrapContext<'_>,
    wrapping_key_ref: WrappingKeyRef,
    rng: &dyn RandomSource,
) -> Result<WrappedKeyBlob> {
    let wrapped_bytes = seal_bytes(parent, child.as_bytes(), ctx, rng)?;
    Ok(WrappedKeyBlob {
        key_id: ctx.key_id.to_string(),
        wrapped_bytes,
        wrapping_key_ref,
        created_at: Utc::now(),
    })
}

/// Unwrap a blob produced by [`wrap_key`].
///
/// Either a fully verified key is returned or `AuthenticationFailed`;
/// partially decrypted material never escapes.
pub fn unwrap_key(
    parent: &SecretKey,
    blob: &WrappedKeyBlob,
    ctx: &WrapContext<'_>,
) -> Result<SecretKey> {
    if blob.key_id != ctx.key_id {
        return Err(Error::AuthenticationFailed);
    }
    let plaintext = open_bytes(parent, &blob.wrapped_bytes, ctx)?;
    if plaintext.len() != KEY_SIZE {
        return Err(Error::AuthenticationFailed);
    }
    SecretKey::from_slice(&plaintext)
}
