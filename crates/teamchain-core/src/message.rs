//! Signed messages: the unit of transport for every chain block.
//!
//! A [`SignedMessage`] carries the canonical bytes of a [`Message`] plus the
//! key and signature that authenticate it. The bytes are kept exactly as
//! received so the chain hash and the signature are always computed over
//! what the signer actually signed.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::canonical::{from_canonical_bytes, to_canonical_bytes};
use crate::crypto::{Keypair, SignPublicKey, Signature};
use crate::error::Result;
use crate::log_chain::LogChain;
use crate::main_chain::{MainChain, TeamPointer};
use crate::types::BlockHash;

/// The protocol version this engine speaks.
pub const PROTOCOL_VERSION: Version = Version {
    major: 1,
    minor: 0,
    patch: 0,
};

/// A semantic protocol version carried in every message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// True when `self` introduces a major version newer than `known`.
    pub fn is_major_upgrade_from(&self, known: &Version) -> bool {
        self.major > known.major
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Message header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Signer-claimed creation time, Unix seconds.
    pub utc_time: u64,
    pub protocol_version: Version,
}

/// A message: header plus a tagged body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub header: Header,
    pub body: Body,
}

impl Message {
    /// Create a message stamped with the current time and protocol version.
    pub fn new(body: Body) -> Self {
        Self::at(body, now_secs())
    }

    /// Create a message with an explicit timestamp.
    pub fn at(body: Body, utc_time: u64) -> Self {
        Self {
            header: Header {
                utc_time,
                protocol_version: PROTOCOL_VERSION,
            },
            body,
        }
    }

    /// Canonical CBOR bytes, the input to signing and hashing.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        to_canonical_bytes(self)
    }

    /// Decode from canonical bytes, rejecting any non-canonical encoding.
    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self> {
        from_canonical_bytes(bytes)
    }
}

/// The message body. Only `Main` and `Log` participate in the ledgers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Body {
    Main(MainChain),
    Log(LogChain),
    ReadToken(ReadToken),
    EmailChallenge(EmailChallenge),
    PushSubscription(PushSubscription),
    ReadBillingInfo(ReadBillingInfo),
}

/// A time-bound token granting a reader access to the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadToken {
    Time(TimeToken),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeToken {
    pub reader_public_key: SignPublicKey,
    /// Unix seconds.
    pub expiration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailChallenge {
    pub nonce: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub team_pointer: TeamPointer,
    pub action: PushSubscriptionAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushSubscriptionAction {
    Subscribe(PushDevice),
    Unsubscribe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushDevice {
    Ios(String),
    Android(String),
    Queue(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadBillingInfo {
    pub team_public_key: SignPublicKey,
    pub token: Option<Box<SignedMessage>>,
}

/// A serialized message plus the key and signature that authenticate it.
///
/// A `SignedMessage` is only trusted after [`verify_with`](Self::verify_with)
/// succeeds under the key expected for its context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage {
    pub public_key: SignPublicKey,
    pub message: Bytes,
    pub signature: Signature,
}

impl SignedMessage {
    /// Serialize and sign a message.
    pub fn sign(message: &Message, keypair: &Keypair) -> Result<Self> {
        let bytes = message.to_canonical_bytes()?;
        let signature = keypair.sign(&bytes);
        Ok(Self {
            public_key: keypair.public_key(),
            message: Bytes::from(bytes),
            signature,
        })
    }

    /// The chain-link hash: `SHA-256(SHA-256(public_key) || SHA-256(message))`.
    pub fn hash(&self) -> BlockHash {
        let mut hasher = Sha256::new();
        hasher.update(Sha256::digest(self.public_key.as_bytes()));
        hasher.update(Sha256::digest(&self.message));

        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        BlockHash(out)
    }

    /// Decode the carried message. Does not check the signature.
    pub fn decode(&self) -> Result<Message> {
        Message::from_canonical_bytes(&self.message)
    }

    /// Verify the signature over the message bytes under `key`.
    ///
    /// `key` is the authorizing key for this block's context, which is not
    /// necessarily the key carried on the envelope.
    pub fn verify_with(&self, key: &SignPublicKey) -> Result<()> {
        key.verify(&self.message, &self.signature)
    }
}

/// Current Unix time in seconds.
pub fn now_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
