//! Cryptographic utilities for sealing.
//!
//! Provides X25519 key agreement and ChaCha20-Poly1305 authenticated encryption.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use teamchain_core::types::fixed_bytes;
use teamchain_core::BoxPublicKey;

use crate::error::{Result, SealError};

const NONCE_LEN: usize = 12;

/// An X25519 static secret: the member's sealing key.
pub struct BoxSecret(StaticSecret);

impl BoxSecret {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        let secret = Self::from_seed(seed);
        seed.zeroize();
        secret
    }

    /// Create from seed bytes.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self(StaticSecret::from(seed))
    }

    /// Derive the public key.
    pub fn public_key(&self) -> BoxPublicKey {
        BoxPublicKey::from_bytes(*PublicKey::from(&self.0).as_bytes())
    }

    /// Perform key agreement with a peer's public key.
    pub fn diffie_hellman(&self, peer_public: &BoxPublicKey) -> SharedKey {
        let shared = self
            .0
            .diffie_hellman(&PublicKey::from(*peer_public.as_bytes()));
        SharedKey(*shared.as_bytes())
    }
}

impl std::fmt::Debug for BoxSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BoxSecret({:?})", self.public_key())
    }
}

/// A shared secret derived from X25519 key agreement.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive a symmetric key from this shared secret, bound to `context`.
    pub fn derive_encryption_key(&self, context: &[u8]) -> EncryptionKey {
        let mut hasher = blake3::Hasher::new_derive_key("teamchain-seal-v1 box key");
        hasher.update(&self.0);
        hasher.update(context);
        EncryptionKey(*hasher.finalize().as_bytes())
    }
}

/// A 256-bit symmetric key for ChaCha20-Poly1305.
///
/// This is the audit-log key as well as the indirect-invite key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct EncryptionKey(#[serde(with = "fixed_bytes")] [u8; 32]);

impl EncryptionKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse from a slice, failing on anything but 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| SealError::InvalidKeyLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encrypt data under an explicit nonce.
    pub fn encrypt(&self, plaintext: &[u8], nonce: &EncryptionNonce) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| SealError::EncryptionError(e.to_string()))?;

        cipher
            .encrypt(Nonce::from_slice(&nonce.0), plaintext)
            .map_err(|e| SealError::EncryptionError(e.to_string()))
    }

    /// Decrypt data under an explicit nonce.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &EncryptionNonce) -> Result<Vec<u8>> {
        let cipher =
            ChaCha20Poly1305::new_from_slice(&self.0).map_err(|_| SealError::OpeningError)?;

        cipher
            .decrypt(Nonce::from_slice(&nonce.0), ciphertext)
            .map_err(|_| SealError::OpeningError)
    }

    /// Encrypt under a fresh random nonce. Output is `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = EncryptionNonce::generate();
        let ciphertext = self.encrypt(plaintext, &nonce)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce.0);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Reverse [`seal`](Self::seal).
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(SealError::OpeningError);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let mut arr = [0u8; NONCE_LEN];
        arr.copy_from_slice(nonce);
        self.decrypt(ciphertext, &EncryptionNonce(arr))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// A 96-bit nonce for ChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionNonce(pub [u8; NONCE_LEN]);

impl EncryptionNonce {
    /// Generate a new random nonce.
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x25519_key_agreement() {
        let alice = BoxSecret::generate();
        let bob = BoxSecret::generate();

        let alice_shared = alice.diffie_hellman(&bob.public_key());
        let bob_shared = bob.diffie_hellman(&alice.public_key());

        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
    }

    #[test]
    fn test_box_secret_deterministic_from_seed() {
        let a = BoxSecret::from_seed([7; 32]);
        let b = BoxSecret::from_seed([7; 32]);
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_seal_open() {
        let key = EncryptionKey::generate();
        let sealed = key.seal(b"ssh git@github.com").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + 18 + 16);

        let opened = key.open(&sealed).unwrap();
        assert_eq!(opened, b"ssh git@github.com");
    }

    #[test]
    fn test_seal_uses_fresh_nonce() {
        let key = EncryptionKey::generate();
        assert_ne!(key.seal(b"same").unwrap(), key.seal(b"same").unwrap());
    }

    #[test]
    fn test_open_wrong_key_fails() {
        let sealed = EncryptionKey::generate().seal(b"secret").unwrap();
        let result = EncryptionKey::generate().open(&sealed);
        assert!(matches!(result, Err(SealError::OpeningError)));
    }

    #[test]
    fn test_open_truncated_fails() {
        let key = EncryptionKey::generate();
        assert!(matches!(key.open(&[0u8; 5]), Err(SealError::OpeningError)));
    }

    #[test]
    fn test_key_derivation_different_contexts() {
        let shared = SharedKey([0x42; 32]);

        let key1 = shared.derive_encryption_key(b"context-a");
        let key2 = shared.derive_encryption_key(b"context-b");

        assert_eq!(key1, shared.derive_encryption_key(b"context-a"));
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_from_slice_rejects_short_key() {
        let result = EncryptionKey::from_slice(&[1, 2, 3]);
        assert!(matches!(
            result,
            Err(SealError::InvalidKeyLength {
                expected: 32,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = EncryptionKey::from_bytes([0xaa; 32]);
        assert_eq!(format!("{:?}", key), "EncryptionKey(..)");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_open_reverses_seal(plaintext in prop::collection::vec(any::<u8>(), 0..512)) {
                let key = EncryptionKey::generate();
                let sealed = key.seal(&plaintext).unwrap();
                prop_assert_eq!(key.open(&sealed).unwrap(), plaintext);
            }
        }
    }
}
