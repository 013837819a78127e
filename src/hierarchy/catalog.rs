//! DEK version catalog
//!
//! Tracks, per category, which DEK version is active for new encryption and
//! which older versions remain valid for decryption. The catalog is stored
//! as a single vault entry so every change to it is all-or-nothing.

use crate::error::{Error, Result};
use crate::record::Category;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Vault id of the serialized catalog
pub const CATALOG_ID: &str = "meta/catalog";

/// Vault id prefix for wrapped DEKs
pub const DEK_PREFIX: &str = "dek/";

/// Vault id prefix for wrapped MEKs
pub const MEK_PREFIX: &str = "mek/";

/// Vault id prefix for blobs staged during a master key rotation
pub const STAGING_PREFIX: &str = "stage/";

/// Vault id of a wrapped DEK
pub fn dek_key_id(category: Category, version: u32) -> String {
    format!("{}{}/{:010}", DEK_PREFIX, category, version)
}

/// Vault id of a wrapped MEK
pub fn mek_key_id(id: &uuid::Uuid) -> String {
    format!("{}{}", MEK_PREFIX, id)
}

/// Staging id for a live vault id
pub fn staging_id(live_id: &str) -> String {
    format!("{}{}", STAGING_PREFIX, live_id)
}

/// Lifecycle state of one DEK version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyStatus {
    /// Used for new encryption; exactly one per category
    Active,
    /// Superseded, still valid for decryption
    DecryptOnly,
    /// Wrapped blob purged
    Retired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersionInfo {
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    /// UMK generation the DEK is currently wrapped under
    pub master_generation: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryKeys {
    pub active: u32,
    pub versions: BTreeMap<u32, KeyVersionInfo>,
}

/// All DEK versions of the hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCatalog {
    pub categories: BTreeMap<Category, CategoryKeys>,
    pub updated_at: DateTime<Utc>,
}

impl KeyCatalog {
    /// Catalog with version 1 active in every category
    pub fn bootstrap(master_generation: u32, now: DateTime<Utc>) -> Self {
        let categories = Category::ALL
            .iter()
            .map(|&category| {
                let mut versions = BTreeMap::new();
                versions.insert(
                    1,
                    KeyVersionInfo {
                        status: KeyStatus::Active,
                        created_at: now,
                        master_generation,
                    },
                );
                (category, CategoryKeys { active: 1, versions })
            })
            .collect();

        KeyCatalog {
            categories,
            updated_at: now,
        }
    }

    fn category(&self, category: Category) -> Result<&CategoryKeys> {
        self.categories
            .get(&category)
            .ok_or_else(|| Error::KeyNotFound(format!("no keys for category {}", category)))
    }

    pub fn active_version(&self, category: Category) -> Result<u32> {
        Ok(self.category(category)?.active)
    }

    pub fn info(&self, category: Category, version: u32) -> Option<&KeyVersionInfo> {
        self.categories
            .get(&category)
            .and_then(|c| c.versions.get(&version))
    }

    /// Whether `version` may still be used to decrypt
    pub fn is_decryptable(&self, category: Category, version: u32) -> bool {
        matches!(
            self.info(category, version),
            Some(info) if info.status != KeyStatus::Retired
        )
    }

    pub fn next_version(&self, category: Category) -> Result<u32> {
        let keys = self.category(category)?;
        let latest = keys.versions.keys().next_back().copied().unwrap_or(0);
        latest
            .checked_add(1)
            .ok_or_else(|| Error::Internal(format!("{} key version overflow", category)))
    }

    /// Make `version` active; the previous active version becomes decrypt-only
    pub fn activate(&mut self, category: Category, version: u32, info: KeyVersionInfo) {
        let keys = self.categories.entry(category).or_insert_with(|| CategoryKeys {
            active: version,
            versions: BTreeMap::new(),
        });
        if let Some(previous) = keys.versions.get_mut(&keys.active) {
            previous.status = KeyStatus::DecryptOnly;
        }
        keys.versions.insert(
            version,
            KeyVersionInfo {
                status: KeyStatus::Active,
                ..info
            },
        );
        keys.active = version;
        self.updated_at = Utc::now();
    }

    /// Mark a decrypt-only version as retired
    pub fn retire(&mut self, category: Category, version: u32) -> Result<()> {
        let keys = self
            .categories
            .get_mut(&category)
            .ok_or_else(|| Error::KeyNotFound(format!("no keys for category {}", category)))?;
        if keys.active == version {
            return Err(Error::Internal(format!(
                "cannot retire active {} key version {}",
                category, version
            )));
        }
        let info = keys
            .versions
            .get_mut(&version)
            .ok_or_else(|| Error::KeyNotFound(dek_key_id(category, version)))?;
        info.status = KeyStatus::Retired;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Versions in `category` that are superseded but not retired
    pub fn decrypt_only_versions(&self, category: Category) -> Vec<u32> {
        self.categories
            .get(&category)
            .map(|keys| {
                keys.versions
                    .iter()
                    .filter(|(_, info)| info.status == KeyStatus::DecryptOnly)
                    .map(|(&v, _)| v)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every (category, version) whose wrapped blob is still stored
    pub fn live_versions(&self) -> Vec<(Category, u32)> {
        self.categories
            .iter()
            .flat_map(|(&category, keys)| {
                keys.versions
                    .iter()
                    .filter(|(_, info)| info.status != KeyStatus::Retired)
                    .map(move |(&version, _)| (category, version))
            })
            .collect()
    }

    /// Record that every live DEK is now wrapped under `generation`
    pub fn set_master_generation(&mut self, generation: u32) {
        for keys in self.categories.values_mut() {
            for info in keys.versions.values_mut() {
                if info.status != KeyStatus::Retired {
                    info.master_generation = generation;
                }
            }
        }
        self.updated_at = Utc::now();
    }
}
