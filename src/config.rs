//! Configuration management for journalcrypt

use crate::crypto::KdfParams;
use crate::error::{Error, Result};
use crate::rotation::RotationPolicy;
use crate::vault::{MemoryVault, SecureKeyVault, SledVault};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default Argon2id memory cost: 64 MiB
pub const DEFAULT_ARGON2_MEMORY_KIB: u32 = 64 * 1024;

/// Default PBKDF2 fallback iterations
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 600_000;

/// Default scheduled DEK rotation interval (days)
pub const DEFAULT_DEK_MAX_AGE_DAYS: u32 = 90;

/// Key derivation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfConfig {
    /// Argon2 memory cost in KiB
    pub argon2_memory_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_iterations: u32,

    /// Argon2 parallelism
    pub argon2_parallelism: u32,

    /// PBKDF2-HMAC-SHA256 iterations when Argon2id is unavailable
    pub pbkdf2_iterations: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        KdfConfig {
            argon2_memory_kib: DEFAULT_ARGON2_MEMORY_KIB,
            argon2_iterations: 3,
            argon2_parallelism: 4,
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
        }
    }
}

impl KdfConfig {
    /// Preferred KDF parameters
    pub fn params(&self) -> KdfParams {
        KdfParams::Argon2id {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }

    /// Fallback KDF parameters
    pub fn fallback(&self) -> KdfParams {
        KdfParams::Pbkdf2Sha256 {
            iterations: self.pbkdf2_iterations,
        }
    }
}

/// Key rotation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Rotate a category's DEK once it is this many days old
    pub dek_max_age_days: u32,

    /// Retire fully swept DEK versions
    #[serde(default)]
    pub retire_after_sweep: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        RotationConfig {
            dek_max_age_days: DEFAULT_DEK_MAX_AGE_DAYS,
            retire_after_sweep: false,
        }
    }
}

impl RotationConfig {
    pub fn policy(&self) -> RotationPolicy {
        RotationPolicy {
            dek_max_age: chrono::Duration::days(i64::from(self.dek_max_age_days)),
            retire_after_sweep: self.retire_after_sweep,
        }
    }
}

/// Where wrapped keys are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultBackend {
    /// In-process only; lost on exit
    Memory,
    /// Device-local sled database
    Sled,
}

impl std::str::FromStr for VaultBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(VaultBackend::Memory),
            "sled" => Ok(VaultBackend::Sled),
            other => Err(Error::InvalidConfig(format!(
                "Unknown vault backend: {}",
                other
            ))),
        }
    }
}

/// Secure Key Vault configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    pub backend: VaultBackend,

    /// Database path (defaults to `<data_dir>/vault`)
    pub path: Option<PathBuf>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        VaultConfig {
            backend: VaultBackend::Sled,
            path: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub kdf: KdfConfig,

    #[serde(default)]
    pub rotation: RotationConfig,

    #[serde(default)]
    pub vault: VaultConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Path to the data directory
    #[serde(default)]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("journalcrypt")
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

impl Default for Config {
    fn default() -> Self {
        Config {
            kdf: KdfConfig::default(),
            rotation: RotationConfig::default(),
            vault: VaultConfig::default(),
            logging: LoggingConfig::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl Config {
    /// Load configuration from a file (YAML or JSON), with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref).map_err(|e| {
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let mut config: Config = if is_yaml(path_ref) {
            serde_yaml::from_str(&content).map_err(|e| {
                Error::Config(format!("Failed to parse YAML config: {}", e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                Error::Config(format!("Failed to parse JSON config: {}", e))
            })?
        };

        if config.data_dir == PathBuf::new() {
            config.data_dir = default_data_dir();
        }

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a config file
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `JOURNALCRYPT_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let parse_u32 = |name: &str, value: String| {
            value
                .parse::<u32>()
                .map_err(|_| Error::InvalidConfig(format!("Invalid {}: {}", name, value)))
        };

        if let Some(dir) = get("JOURNALCRYPT_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Some(level) = get("JOURNALCRYPT_LOG_LEVEL") {
            self.logging.level = level;
        }

        // Vault settings
        if let Some(backend) = get("JOURNALCRYPT_VAULT_BACKEND") {
            self.vault.backend = backend.parse()?;
        }
        if let Some(path) = get("JOURNALCRYPT_VAULT_PATH") {
            self.vault.path = Some(PathBuf::from(path));
        }

        // KDF settings
        if let Some(v) = get("JOURNALCRYPT_ARGON2_MEMORY_KIB") {
            self.kdf.argon2_memory_kib = parse_u32("JOURNALCRYPT_ARGON2_MEMORY_KIB", v)?;
        }
        if let Some(v) = get("JOURNALCRYPT_ARGON2_ITERATIONS") {
            self.kdf.argon2_iterations = parse_u32("JOURNALCRYPT_ARGON2_ITERATIONS", v)?;
        }
        if let Some(v) = get("JOURNALCRYPT_ARGON2_PARALLELISM") {
            self.kdf.argon2_parallelism = parse_u32("JOURNALCRYPT_ARGON2_PARALLELISM", v)?;
        }

        if let Some(v) = get("JOURNALCRYPT_DEK_MAX_AGE_DAYS") {
            self.rotation.dek_max_age_days = parse_u32("JOURNALCRYPT_DEK_MAX_AGE_DAYS", v)?;
        }

        Ok(())
    }

    /// Save configuration to a file (format determined by extension)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        let content = if is_yaml(path_ref) {
            serde_yaml::to_string(self).map_err(|e| {
                Error::Config(format!("Failed to serialize config to YAML: {}", e))
            })?
        } else {
            serde_json::to_string_pretty(self).map_err(|e| {
                Error::Config(format!("Failed to serialize config to JSON: {}", e))
            })?
        };

        std::fs::write(path_ref, content).map_err(|e| {
            Error::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.kdf
            .params()
            .validate()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        self.kdf
            .fallback()
            .validate()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        if self.rotation.dek_max_age_days == 0 {
            return Err(Error::InvalidConfig(
                "dek_max_age_days must be greater than 0".to_string(),
            ));
        }

        match self.logging.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(Error::InvalidConfig(format!(
                    "Unknown log level: {}",
                    other
                )))
            }
        }

        Ok(())
    }

    /// Resolved sled database path
    pub fn vault_path(&self) -> PathBuf {
        self.vault
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("vault"))
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        if self.vault.backend == VaultBackend::Sled {
            if let Some(parent) = self.vault_path().parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Open the configured vault backend
    pub fn open_vault(&self) -> Result<Arc<dyn SecureKeyVault>> {
        Ok(match self.vault.backend {
            VaultBackend::Memory => Arc::new(MemoryVault::new()),
            VaultBackend::Sled => Arc::new(SledVault::open(self.vault_path())?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(
            config.kdf.params(),
            KdfParams::Argon2id {
                memory_kib: 65536,
                iterations: 3,
                parallelism: 4
            }
        );
        assert_eq!(config.rotation.policy().dek_max_age, chrono::Duration::days(90));
        assert!(config.vault_path().ends_with("vault"));
    }

    #[test]
    fn test_env_overrides() {
        let env = overrides(&[
            ("JOURNALCRYPT_VAULT_BACKEND", "memory"),
            ("JOURNALCRYPT_ARGON2_MEMORY_KIB", " 1024 "),
            ("JOURNALCRYPT_LOG_LEVEL", "debug"),
            ("JOURNALCRYPT_DEK_MAX_AGE_DAYS", ""),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).cloned()).unwrap();

        assert_eq!(config.vault.backend, VaultBackend::Memory);
        assert_eq!(config.kdf.argon2_memory_kib, 1024);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.rotation.dek_max_age_days, DEFAULT_DEK_MAX_AGE_DAYS);
    }

    #[test]
    fn test_bad_env_override() {
        let env = overrides(&[("JOURNALCRYPT_ARGON2_ITERATIONS", "many")]);
        let mut config = Config::default();
        assert!(matches!(
            config.apply_overrides(|k| env.get(k).cloned()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_weak_pbkdf2() {
        let mut config = Config::default();
        config.kdf.pbkdf2_iterations = 10_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().join("data");
        config.rotation.retire_after_sweep = true;

        for name in ["config.yaml", "config.json"] {
            let path = dir.path().join(name);
            config.save(&path).unwrap();
            let loaded = Config::load(&path).unwrap();
            assert_eq!(loaded.rotation, config.rotation);
            assert_eq!(loaded.kdf, config.kdf);
        }
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "vault:\n  backend: memory\n  path: null\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.vault.backend, VaultBackend::Memory);
        assert_eq!(config.kdf, KdfConfig::default());
        assert_ne!(config.data_dir, PathBuf::new());
    }

    #[test]
    fn test_open_memory_vault() {
        let mut config = Config::default();
        config.vault.backend = VaultBackend::Memory;
        let vault = config.open_vault().unwrap();
        vault.put("a", b"1").unwrap();
        assert_eq!(vault.get("a").unwrap(), Some(b"1".to_vec()));
    }
}
