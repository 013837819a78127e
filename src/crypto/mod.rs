//! Cryptographic primitives for journalcrypt
//!
//! Provides AES-256-GCM authenticated encryption and password-based key
//! derivation (Argon2id, with PBKDF2-HMAC-SHA256 as fallback). Nothing in
//! this module keeps state; key material lives in zeroizing buffers.

mod encryption;
mod kdf;
mod keys;
mod random;

pub use encryption::{aead_decrypt, aead_encrypt};
pub use kdf::{derive_key, derive_key_with_fallback, KdfParams};
pub use keys::{MasterKey, Salt, SecretKey};
pub use random::{random_iv, RandomSource, SeededRandom, SystemRandom};

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of GCM nonce (IV) in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Size of salt for key derivation
pub const SALT_SIZE: usize = 16;

/// Lowest PBKDF2 iteration count accepted for the fallback KDF
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

/// Ceilings for KDF costs read from untrusted input such as export packages
pub const MAX_ARGON2_MEMORY_KIB: u32 = 4 * 1024 * 1024; // 4 GiB
pub const MAX_ARGON2_ITERATIONS: u32 = 64;
pub const MAX_ARGON2_PARALLELISM: u32 = 64;
pub const MAX_PBKDF2_ITERATIONS: u32 = 10_000_000;
