//! Authenticated encryption for sensitive snapshot fields.
//!
//! Keys are derived per payload from the user's credential material and a
//! random salt with HKDF-SHA256, then used with AES-256-GCM.
//!
//! Sealed format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`

use crate::error::{CodecError, CodecResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Size of the per-payload HKDF salt in bytes.
pub const SALT_SIZE: usize = 16;

const HKDF_INFO: &[u8] = b"keepsake-snapshot-secrets-v1";

/// The user's credential material that snapshot keys are derived from.
///
/// The bytes are zeroized when dropped and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: Vec<u8>,
}

impl KeyMaterial {
    /// Wraps raw credential material.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Returns the raw bytes.
    ///
    /// # Security
    ///
    /// Don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns true if no material was provided.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Derives an AES-256-GCM box for the given salt.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::KeyDerivation`] if HKDF expansion fails.
    pub fn derive(&self, salt: &[u8]) -> CodecResult<SecretBox> {
        let hk = Hkdf::<Sha256>::new(Some(salt), &self.bytes);
        let mut key = [0u8; KEY_SIZE];
        hk.expand(HKDF_INFO, &mut key)
            .map_err(|_| CodecError::KeyDerivation)?;
        let secret_box = SecretBox::new(&key);
        key.zeroize();
        Ok(secret_box)
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generates a fresh random salt.
pub(crate) fn random_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// AES-256-GCM with associated data.
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl SecretBox {
    /// Creates a box from a raw 32-byte key.
    #[must_use]
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
        Self { cipher }
    }

    /// Encrypts `plaintext`, binding it to `aad`.
    ///
    /// A random nonce is generated and prepended.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if the cipher rejects the input.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> CodecResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CodecError::encoding_failed("secret encryption failed"))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    /// Decrypts data produced by [`seal`](Self::seal) with the same `aad`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Truncated`] if the input is too short and
    /// [`CodecError::DecryptionFailed`] on a wrong key, wrong `aad` or
    /// tampered data.
    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> CodecResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CodecError::Truncated);
        }

        let nonce = Nonce::from_slice(&sealed[..NONCE_SIZE]);
        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &sealed[NONCE_SIZE..],
                    aad,
                },
            )
            .map_err(|_| CodecError::DecryptionFailed)
    }
}

impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBox")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}
