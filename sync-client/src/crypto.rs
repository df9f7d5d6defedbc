//! Record encryption for contactsync.
//!
//! - [`AccountSecret`]: 32 bytes derived from the user's passphrase and a
//!   per-account random [`Salt`] with Argon2id. Parameters adapt to the
//!   device's RAM.
//! - [`RecordKey`]: the record-encryption subkey, derived from the secret
//!   with HKDF-SHA256. Seals payloads with XChaCha20-Poly1305; the 24-byte
//!   nonce is prepended to the ciphertext.
//!
//! Key material is wiped on drop and never appears in `Debug` output.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Key size for XChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Salt size for passphrase derivation.
pub const SALT_SIZE: usize = 16;

const HKDF_SALT: &[u8] = b"contactsync-record-key-v1";

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (authentication error or truncated input).
    #[error("decryption failed: authentication error")]
    DecryptionFailed,

    /// Invalid salt length.
    #[error("invalid salt length: expected {expected}, got {actual}")]
    InvalidSaltLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// The OS random source failed.
    #[error("random source unavailable: {0}")]
    Random(String),
}

fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::getrandom(buf).map_err(|e| CryptoError::Random(e.to_string()))
}

/// Argon2id parameters for device-adaptive key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    memory_mib: u32,
    iterations: u32,
    parallelism: u32,
}

impl Argon2Params {
    /// Choose parameters for a device with `ram_mb` megabytes of RAM.
    ///
    /// - < 2000 MB: 12 MiB, 3 iterations
    /// - < 4000 MB: 19 MiB, 2 iterations
    /// - < 8000 MB: 46 MiB, 1 iteration
    /// - otherwise: 64 MiB, 3 iterations, 4 lanes
    pub fn for_ram_mb(ram_mb: u64) -> Self {
        let (memory_mib, iterations, parallelism) = match ram_mb {
            0..=1999 => (12, 3, 1),
            2000..=3999 => (19, 2, 1),
            4000..=7999 => (46, 1, 1),
            _ => (64, 3, 4),
        };
        Self {
            memory_mib,
            iterations,
            parallelism,
        }
    }

    /// Memory cost in MiB.
    pub fn memory_mib(&self) -> u32 {
        self.memory_mib
    }

    /// Iteration count.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    fn to_argon2_params(self) -> Result<Params, CryptoError> {
        Params::new(
            self.memory_mib * 1024,
            self.iterations,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))
    }
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self::for_ram_mb(detect_total_ram_mb())
    }
}

/// Total RAM of this device in megabytes.
pub fn detect_total_ram_mb() -> u64 {
    use sysinfo::System;
    let mut sys = System::new();
    sys.refresh_memory();
    sys.total_memory() / (1024 * 1024)
}

/// Per-account random salt for passphrase derivation.
///
/// Not secret: it is stored on the server so other devices can derive the
/// same key.
#[derive(Clone, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Generate a fresh random salt.
    pub fn random() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; SALT_SIZE];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// Wrap salt bytes received from storage or the server.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SALT_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidSaltLength {
                    expected: SALT_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self(bytes))
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }

    /// Hex encoding, for storage.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the hex encoding produced by [`Salt::to_hex`].
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidSaltLength {
            expected: SALT_SIZE,
            actual: s.len() / 2,
        })?;
        Self::from_slice(&bytes)
    }
}

impl std::fmt::Debug for Salt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Salt({})", self.to_hex())
    }
}

/// Root secret of an account, derived from the passphrase.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccountSecret([u8; KEY_SIZE]);

impl AccountSecret {
    /// Derive the secret with device-adaptive Argon2id parameters.
    pub fn from_passphrase(passphrase: &str, salt: &Salt) -> Result<Self, CryptoError> {
        Self::from_passphrase_with_params(passphrase, salt, Argon2Params::default())
    }

    /// Derive the secret with explicit Argon2id parameters.
    pub fn from_passphrase_with_params(
        passphrase: &str,
        salt: &Salt,
        params: Argon2Params,
    ) -> Result<Self, CryptoError> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2_params()?);
        let mut output = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt.as_bytes(), &mut output)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(Self(output))
    }

    /// A random secret, for tests and throwaway accounts.
    pub fn random() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; KEY_SIZE];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Debug for AccountSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccountSecret([REDACTED])")
    }
}

/// Symmetric key sealing record payloads.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RecordKey {
    key: [u8; KEY_SIZE],
    fingerprint: [u8; 8],
}

impl RecordKey {
    /// Derive the record key from an account secret.
    pub fn derive(secret: &AccountSecret) -> Result<Self, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), &secret.0);
        let mut key = [0u8; KEY_SIZE];
        let mut fingerprint = [0u8; 8];
        hkdf.expand(b"record-encryption", &mut key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        hkdf.expand(b"fingerprint", &mut fingerprint)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(Self { key, fingerprint })
    }

    /// Short public identifier of the key, safe to display.
    pub fn fingerprint(&self) -> String {
        hex::encode(self.fingerprint)
    }

    fn cipher(&self) -> Result<XChaCha20Poly1305, CryptoError> {
        XChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }

    /// Encrypt `plaintext`. Output is `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        fill_random(&mut nonce_bytes)?;
        let ciphertext = self
            .cipher()?
            .encrypt(XNonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt the output of [`RecordKey::seal`].
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher()?
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecordKey {{ key: [REDACTED], fingerprint: {} }}", self.fingerprint())
    }
}
