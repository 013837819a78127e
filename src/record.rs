//! Encrypted record format
//!
//! An [`EncryptedRecord`] is the only thing that leaves the core for storage
//! or upload. It is self-describing: the format version and algorithm id
//! allow future migration, and `key_ref` names the key needed to open it.
//!
//! Binary layout (big-endian):
//!
//! ```text
//! magic "JREC" | version u16 | algorithm u8 | category u8 | key version u32
//! | media key id len u8 | media key id | iv [12] | tag [16]
//! | aad len u32 | aad | ciphertext len u32 | ciphertext
//! ```

use crate::crypto::{NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current record format version
pub const RECORD_FORMAT_VERSION: u16 = 1;

const RECORD_MAGIC: &[u8; 4] = b"JREC";

/// Data category; each has its own DEK lineage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Journal entries and voice recordings
    Journal,
    /// Emotional check-ins
    Emotional,
    /// Locally staged exports
    Export,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Journal, Category::Emotional, Category::Export];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Journal => "journal",
            Category::Emotional => "emotional",
            Category::Export => "export",
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Category::Journal => 1,
            Category::Emotional => 2,
            Category::Export => 3,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(Category::Journal),
            2 => Ok(Category::Emotional),
            3 => Ok(Category::Export),
            other => Err(Error::InvalidRecord(format!("Unknown category: {}", other))),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "journal" => Ok(Category::Journal),
            "emotional" => Ok(Category::Emotional),
            "export" => Ok(Category::Export),
            other => Err(Error::InvalidConfig(format!("Unknown category: {}", other))),
        }
    }
}

/// AEAD algorithm used for a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgorithmId {
    #[serde(rename = "AES256GCM")]
    Aes256Gcm,
}

impl AlgorithmId {
    fn to_byte(self) -> u8 {
        match self {
            AlgorithmId::Aes256Gcm => 1,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(AlgorithmId::Aes256Gcm),
            other => Err(Error::InvalidRecord(format!("Unsupported algorithm: {}", other))),
        }
    }
}

/// Reference to the key that encrypted a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRef {
    pub category: Category,
    /// DEK version in effect when the record was written
    pub version: u32,
    /// Per-recording media key id, if the payload was encrypted under a MEK
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_key: Option<String>,
}

impl KeyRef {
    pub fn data(category: Category, version: u32) -> Self {
        KeyRef {
            category,
            version,
            media_key: None,
        }
    }

    pub fn media(category: Category, version: u32, key_id: String) -> Self {
        KeyRef {
            category,
            version,
            media_key: Some(key_id),
        }
    }
}

/// Non-sensitive context bound into a record's authentication tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// MIME type of the payload, e.g. `audio/aac`
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    /// Opaque identifier of the journal item
    pub item_id: Option<String>,
}

impl RecordMetadata {
    pub fn new(content_type: impl Into<String>) -> Self {
        RecordMetadata {
            content_type: content_type.into(),
            created_at: Utc::now(),
            item_id: None,
        }
    }

    pub fn with_item_id(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    /// Canonical AAD encoding
    pub fn to_aad(&self) -> Vec<u8> {
        let mut aad = format!(
            "content-type={};created-at={}",
            self.content_type,
            self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        if let Some(item_id) = &self.item_id {
            aad.push_str(";item=");
            aad.push_str(item_id);
        }
        aad.into_bytes()
    }
}

/// Self-describing encrypted payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub version: u16,
    pub algorithm: AlgorithmId,
    #[serde(with = "b64_array")]
    pub iv: [u8; NONCE_SIZE],
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64_array")]
    pub tag: [u8; TAG_SIZE],
    pub key_ref: KeyRef,
    #[serde(with = "b64")]
    pub aad: Vec<u8>,
}

impl EncryptedRecord {
    /// Bytes authenticated by the tag: the record header plus `aad`.
    ///
    /// Binding the header means a record cannot be relabelled to point at a
    /// different key or algorithm without failing verification.
    pub fn authenticated_data(&self) -> Vec<u8> {
        Self::header_aad(self.version, self.algorithm, &self.key_ref, &self.aad)
    }

    pub(crate) fn header_aad(
        version: u16,
        algorithm: AlgorithmId,
        key_ref: &KeyRef,
        aad: &[u8],
    ) -> Vec<u8> {
        let media = key_ref.media_key.as_deref().unwrap_or("");
        let mut out = Vec::with_capacity(16 + media.len() + aad.len());
        out.extend_from_slice(RECORD_MAGIC);
        out.extend_from_slice(&version.to_be_bytes());
        out.push(algorithm.to_byte());
        out.push(key_ref.category.to_byte());
        out.extend_from_slice(&key_ref.version.to_be_bytes());
        out.push(media.len() as u8);
        out.extend_from_slice(media.as_bytes());
        out.extend_from_slice(aad);
        out
    }

    /// Total serialized size in bytes
    pub fn size(&self) -> usize {
        let media = self.key_ref.media_key.as_ref().map_or(0, |m| m.len());
        4 + 2 + 1 + 1 + 4 + 1 + media + NONCE_SIZE + TAG_SIZE + 4 + self.aad.len() + 4
            + self.ciphertext.len()
    }

    /// Serialize to bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let media = self.key_ref.media_key.as_deref().unwrap_or("");
        if media.len() > u8::MAX as usize {
            return Err(Error::InvalidRecord("Media key id too long".to_string()));
        }
        let aad_len = u32::try_from(self.aad.len())
            .map_err(|_| Error::InvalidRecord("AAD too long".to_string()))?;
        let ct_len = u32::try_from(self.ciphertext.len())
            .map_err(|_| Error::InvalidRecord("Ciphertext too long".to_string()))?;

        let mut bytes = Vec::with_capacity(self.size());
        bytes.extend_from_slice(RECORD_MAGIC);
        bytes.extend_from_slice(&self.version.to_be_bytes());
        bytes.push(self.algorithm.to_byte());
        bytes.push(self.key_ref.category.to_byte());
        bytes.extend_from_slice(&self.key_ref.version.to_be_bytes());
        bytes.push(media.len() as u8);
        bytes.extend_from_slice(media.as_bytes());
        bytes.extend_from_slice(&self.iv);
        bytes.extend_from_slice(&self.tag);
        bytes.extend_from_slice(&aad_len.to_be_bytes());
        bytes.extend_from_slice(&self.aad);
        bytes.extend_from_slice(&ct_len.to_be_bytes());
        bytes.extend_from_slice(&self.ciphertext);
        Ok(bytes)
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);

        if reader.take(4)? != RECORD_MAGIC {
            return Err(Error::InvalidRecord("Bad magic".to_string()));
        }
        let version = reader.u16()?;
        if version != RECORD_FORMAT_VERSION {
            return Err(Error::InvalidRecord(format!("Unsupported record version: {}", version)));
        }
        let algorithm = AlgorithmId::from_byte(reader.u8()?)?;
        let category = Category::from_byte(reader.u8()?)?;
        let key_version = reader.u32()?;
        let media_len = reader.u8()? as usize;
        let media_key = if media_len == 0 {
            None
        } else {
            let raw = reader.take(media_len)?;
            Some(
                String::from_utf8(raw.to_vec())
                    .map_err(|_| Error::InvalidRecord("Media key id is not UTF-8".to_string()))?,
            )
        };

        let mut iv = [0u8; NONCE_SIZE];
        iv.copy_from_slice(reader.take(NONCE_SIZE)?);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(reader.take(TAG_SIZE)?);

        let aad_len = reader.u32()? as usize;
        let aad = reader.take(aad_len)?.to_vec();
        let ct_len = reader.u32()? as usize;
        let ciphertext = reader.take(ct_len)?.to_vec();

        if !reader.is_empty() {
            return Err(Error::InvalidRecord("Trailing bytes after record".to_string()));
        }

        Ok(EncryptedRecord {
            version,
            algorithm,
            iv,
            ciphertext,
            tag,
            key_ref: KeyRef {
                category,
                version: key_version,
                media_key,
            },
            aad,
        })
    }
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Error::InvalidRecord("Data too short".to_string()));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

pub(crate) mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod b64_array {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(s).map_err(serde::de::Error::custom)?;
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::invalid_length(len, &"fixed-size byte array"))
    }
}
