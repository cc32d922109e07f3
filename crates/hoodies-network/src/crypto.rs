//! Symmetric keys and authenticated encryption for cache and cookie rows.
//!
//! Rows are sealed with AES-256-GCM (128-bit tag) under a 12-byte random IV.
//! The key comes from a [`KeyService`], which generates it lazily the first
//! time it is needed and reuses it afterwards.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

/// Length of an initialization vector in bytes.
pub const IV_LEN: usize = 12;

/// Length of a symmetric key in bytes.
pub const KEY_LEN: usize = 32;

/// Cryptographic failures.
#[derive(Debug, Clone, Error)]
pub enum CryptoError {
    /// The system random source failed.
    #[error("random number generation failed")]
    Random,
    /// The key material is unusable.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// The IV does not have the expected length.
    #[error("invalid IV length {0}, expected {IV_LEN}")]
    InvalidIv(usize),
    /// Encryption failed.
    #[error("encryption failed")]
    Seal,
    /// Decryption or authentication failed (wrong key or tampered data).
    #[error("decryption failed: ciphertext could not be authenticated")]
    Open,
    /// Reading or writing the key file failed.
    #[error("key storage error: {0}")]
    Storage(String),
}

/// A symmetric key.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random key.
    pub fn generate(rng: &impl SecureRandom) -> Result<Self, CryptoError> {
        let mut bytes = [0u8; KEY_LEN];
        rng.fill(&mut bytes).map_err(|_| CryptoError::Random)?;
        Ok(Self(bytes))
    }

    fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| CryptoError::InvalidKey(format!("{} bytes", b.len())))?;
        Ok(Self(bytes))
    }

    fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Supplies the symmetric key used for at-rest encryption.
pub trait KeyService: Send + Sync {
    /// Return the key, generating it on first use.
    fn get_key(&self) -> Result<SecretKey, CryptoError>;

    /// Generate and store a key. Does nothing if one already exists.
    fn generate_new_key(&self) -> Result<(), CryptoError>;
}

/// A key service that keeps its key in memory for the life of the process.
#[derive(Default)]
pub struct MemoryKeyService {
    key: Mutex<Option<SecretKey>>,
}

impl MemoryKeyService {
    /// Create a service with no key yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a service with a fixed key.
    pub fn with_key(key: SecretKey) -> Self {
        Self {
            key: Mutex::new(Some(key)),
        }
    }
}

impl KeyService for MemoryKeyService {
    fn get_key(&self) -> Result<SecretKey, CryptoError> {
        let mut slot = self.key.lock();
        if let Some(key) = slot.as_ref() {
            return Ok(key.clone());
        }
        let key = SecretKey::generate(&SystemRandom::new())?;
        *slot = Some(key.clone());
        Ok(key)
    }

    fn generate_new_key(&self) -> Result<(), CryptoError> {
        self.get_key().map(|_| ())
    }
}

/// A key service that persists its key as base64 in a file.
///
/// The key is read once and cached; the file is created with a fresh key
/// only when it does not exist.
pub struct FileKeyService {
    path: PathBuf,
    cached: Mutex<Option<SecretKey>>,
}

impl FileKeyService {
    /// Use the key file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    /// Use the key file in the default data directory.
    pub fn default_location() -> Option<Self> {
        crate::storage::default_data_dir().map(|dir| Self::new(dir.join("cache.key")))
    }

    /// Location of the key file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_key(&self) -> Result<SecretKey, CryptoError> {
        let encoded = std::fs::read_to_string(&self.path)
            .map_err(|e| CryptoError::Storage(format!("{}: {e}", self.path.display())))?;
        SecretKey::from_base64(&encoded)
    }
}

impl KeyService for FileKeyService {
    fn get_key(&self) -> Result<SecretKey, CryptoError> {
        let mut cached = self.cached.lock();
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }
        if !self.path.exists() {
            tracing::debug!(
                target: crate::targets::CACHE,
                path = %self.path.display(),
                "generating new encryption key"
            );
            self.generate_new_key()?;
        }
        let key = self.read_key()?;
        *cached = Some(key.clone());
        Ok(key)
    }

    fn generate_new_key(&self) -> Result<(), CryptoError> {
        if self.path.exists() {
            return Ok(());
        }
        let key = SecretKey::generate(&SystemRandom::new())?;
        crate::storage::write_atomically(&self.path, key.to_base64().as_bytes())
            .map_err(|e| CryptoError::Storage(e.to_string()))
    }
}

/// AES-GCM sealing and opening with keys from a [`KeyService`].
pub struct Cipher {
    keys: Arc<dyn KeyService>,
    rng: SystemRandom,
}

impl Cipher {
    /// Create a cipher backed by `keys`.
    pub fn new(keys: Arc<dyn KeyService>) -> Self {
        Self {
            keys,
            rng: SystemRandom::new(),
        }
    }

    /// A cipher with a process-local in-memory key.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeyService::new()))
    }

    /// Generate a random IV.
    pub fn generate_iv(&self) -> Result<[u8; IV_LEN], CryptoError> {
        let mut iv = [0u8; IV_LEN];
        self.rng.fill(&mut iv).map_err(|_| CryptoError::Random)?;
        Ok(iv)
    }

    /// Encrypt `plaintext`; the tag is appended to the returned ciphertext.
    pub fn encrypt(&self, plaintext: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = self.sealing_key()?;
        let nonce = nonce(iv)?;
        let mut in_out = plaintext.to_vec();
        key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Seal)?;
        Ok(in_out)
    }

    /// Decrypt and authenticate `ciphertext`.
    pub fn decrypt(&self, ciphertext: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = self.sealing_key()?;
        let nonce = nonce(iv)?;
        let mut in_out = ciphertext.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Open)?;
        Ok(plaintext.to_vec())
    }

    fn sealing_key(&self) -> Result<LessSafeKey, CryptoError> {
        let key = self.keys.get_key()?;
        let unbound = UnboundKey::new(&AES_256_GCM, &key.0)
            .map_err(|_| CryptoError::InvalidKey("rejected by AES-256-GCM".to_string()))?;
        Ok(LessSafeKey::new(unbound))
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

fn nonce(iv: &[u8]) -> Result<Nonce, CryptoError> {
    Nonce::try_assume_unique_for_key(iv).map_err(|_| CryptoError::InvalidIv(iv.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open() {
        let cipher = Cipher::in_memory();
        let iv = cipher.generate_iv().unwrap();
        let sealed = cipher.encrypt(b"payload", &iv).unwrap();
        assert_ne!(&sealed[..], b"payload");
        assert_eq!(sealed.len(), b"payload".len() + 16);
        assert_eq!(cipher.decrypt(&sealed, &iv).unwrap(), b"payload");
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let cipher = Cipher::in_memory();
        let iv = cipher.generate_iv().unwrap();
        let mut sealed = cipher.encrypt(b"payload", &iv).unwrap();
        sealed[0] ^= 0xFF;
        assert!(matches!(cipher.decrypt(&sealed, &iv), Err(CryptoError::Open)));
    }

    #[test]
    fn short_iv_is_rejected() {
        let cipher = Cipher::in_memory();
        assert!(matches!(
            cipher.encrypt(b"x", &[0u8; 8]),
            Err(CryptoError::InvalidIv(8))
        ));
    }

    #[test]
    fn memory_key_is_generated_once() {
        let keys = MemoryKeyService::new();
        let first = keys.get_key().unwrap();
        keys.generate_new_key().unwrap();
        assert_eq!(keys.get_key().unwrap(), first);
    }

    #[test]
    fn file_key_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("cache.key");

        let first = FileKeyService::new(&path).get_key().unwrap();
        assert!(path.exists());

        let reopened = FileKeyService::new(&path);
        reopened.generate_new_key().unwrap();
        assert_eq!(reopened.get_key().unwrap(), first);
    }
}
