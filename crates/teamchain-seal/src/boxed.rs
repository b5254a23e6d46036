//! Public-key boxes for moving the audit-log key between members.
//!
//! A box is sealed with the sender's static X25519 secret and the
//! recipient's public key. Both public keys are bound into the key
//! derivation, so a box cannot be replayed under a different sender.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use teamchain_core::{from_canonical_bytes, to_canonical_bytes, BoxPublicKey, WrappedKey};

use crate::crypto::{BoxSecret, EncryptionKey};
use crate::error::{Result, SealError};

/// What may travel inside a box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaintextBody {
    LogEncryptionKey(EncryptionKey),
}

/// A sealed [`PlaintextBody`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxedMessage {
    pub recipient_public_key: BoxPublicKey,
    pub sender_public_key: BoxPublicKey,
    pub ciphertext: Bytes,
}

impl BoxedMessage {
    /// Seal `body` from `sender` to `recipient`.
    pub fn seal(body: &PlaintextBody, sender: &BoxSecret, recipient: &BoxPublicKey) -> Result<Self> {
        let plaintext =
            to_canonical_bytes(body).map_err(|e| SealError::SerializationError(e.to_string()))?;

        let sender_public_key = sender.public_key();
        let key = sender
            .diffie_hellman(recipient)
            .derive_encryption_key(&context(&sender_public_key, recipient));

        Ok(Self {
            recipient_public_key: *recipient,
            sender_public_key,
            ciphertext: Bytes::from(key.seal(&plaintext)?),
        })
    }

    /// Open with the recipient's secret.
    pub fn open(&self, recipient: &BoxSecret) -> Result<PlaintextBody> {
        if recipient.public_key() != self.recipient_public_key {
            return Err(SealError::OpeningError);
        }

        let key = recipient
            .diffie_hellman(&self.sender_public_key)
            .derive_encryption_key(&context(&self.sender_public_key, &self.recipient_public_key));

        let plaintext = key.open(&self.ciphertext)?;
        from_canonical_bytes(&plaintext).map_err(|e| SealError::SerializationError(e.to_string()))
    }

    /// Drop the sender, which log chains leave implicit.
    pub fn into_wrapped_key(self) -> WrappedKey {
        WrappedKey {
            recipient_public_key: self.recipient_public_key,
            ciphertext: self.ciphertext,
        }
    }

    /// Rebuild a box from a wrapped key and the chain author's box key.
    pub fn from_wrapped_key(wrapped: &WrappedKey, sender_public_key: BoxPublicKey) -> Self {
        Self {
            recipient_public_key: wrapped.recipient_public_key,
            sender_public_key,
            ciphertext: wrapped.ciphertext.clone(),
        }
    }
}

fn context(sender: &BoxPublicKey, recipient: &BoxPublicKey) -> [u8; 64] {
    let mut out = [0u8; 64];
    out[..32].copy_from_slice(sender.as_bytes());
    out[32..].copy_from_slice(recipient.as_bytes());
    out
}

/// Wrap `key` to each recipient from `sender`.
pub fn wrap_log_key<'a, I>(key: &EncryptionKey, sender: &BoxSecret, recipients: I) -> Result<Vec<WrappedKey>>
where
    I: IntoIterator<Item = &'a BoxPublicKey>,
{
    let body = PlaintextBody::LogEncryptionKey(key.clone());
    recipients
        .into_iter()
        .map(|recipient| Ok(BoxedMessage::seal(&body, sender, recipient)?.into_wrapped_key()))
        .collect()
}
