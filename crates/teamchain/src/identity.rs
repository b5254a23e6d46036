//! The team identity: custody of the signing and sealing keys.
//!
//! A [`TeamIdentity`] is the only component that produces signatures or
//! opens sealed keys. Raw secrets never leave it except through
//! [`TeamIdentity::save`], which writes them to the identity file.

use std::fs;
use std::path::Path;

use bytes::Bytes;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use teamchain_core::{
    Body, BlockHash, BoxPublicKey, GenesisBlock, Identity, Keypair, MainChain, Message,
    SignPublicKey, SignedMessage, TeamInfo, WrappedKey,
};
use teamchain_seal::{wrap_log_key, BoxSecret, BoxedMessage, EncryptionKey, PlaintextBody};

use crate::error::{ChainError, Result};

/// The public details a member publishes alongside their keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberProfile {
    pub email: String,
    pub ssh_public_key: Bytes,
    pub pgp_public_key: Bytes,
}

impl MemberProfile {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ssh_public_key: Bytes::new(),
            pgp_public_key: Bytes::new(),
        }
    }
}

/// A member's keys plus the team they belong to.
pub struct TeamIdentity {
    keypair: Keypair,
    box_seed: Zeroizing<[u8; 32]>,
    box_secret: BoxSecret,
    profile: MemberProfile,
    initial_team_public_key: SignPublicKey,
    checkpoint: BlockHash,
}

impl TeamIdentity {
    /// Create the identity of a new team's first admin, with the signed
    /// genesis block that founds the team.
    pub fn new_admin(profile: MemberProfile, team_info: TeamInfo) -> Result<(Self, SignedMessage)> {
        let keypair = Keypair::generate();
        let initial_team_public_key = keypair.public_key();
        let mut identity = Self::from_parts(
            keypair,
            random_seed(),
            profile,
            initial_team_public_key,
            BlockHash::from_bytes([0; 32]),
        );

        let genesis = identity.sign_body(Body::Main(MainChain::Create(GenesisBlock {
            creator: identity.identity(),
            team_info,
        })))?;
        identity.checkpoint = genesis.hash();

        info!(
            team_public_key = %initial_team_public_key,
            genesis = %identity.checkpoint,
            "created team admin identity"
        );
        Ok((identity, genesis))
    }

    /// Create a joining member's identity for the team founded by
    /// `initial_team_public_key`, trusting the chain up to `checkpoint`.
    pub fn new_member(
        profile: MemberProfile,
        checkpoint: BlockHash,
        initial_team_public_key: SignPublicKey,
    ) -> Self {
        Self::from_parts(
            Keypair::generate(),
            random_seed(),
            profile,
            initial_team_public_key,
            checkpoint,
        )
    }

    fn from_parts(
        keypair: Keypair,
        box_seed: [u8; 32],
        profile: MemberProfile,
        initial_team_public_key: SignPublicKey,
        checkpoint: BlockHash,
    ) -> Self {
        let box_seed = Zeroizing::new(box_seed);
        let box_secret = BoxSecret::from_seed(*box_seed);
        Self {
            keypair,
            box_seed,
            box_secret,
            profile,
            initial_team_public_key,
            checkpoint,
        }
    }

    /// Hex of the signing public key; names this identity's files.
    pub fn id(&self) -> String {
        self.public_key().to_hex()
    }

    pub fn public_key(&self) -> SignPublicKey {
        self.keypair.public_key()
    }

    pub fn box_public_key(&self) -> BoxPublicKey {
        self.box_secret.public_key()
    }

    pub fn email(&self) -> &str {
        &self.profile.email
    }

    /// The key expected to sign the team's genesis block.
    pub fn initial_team_public_key(&self) -> SignPublicKey {
        self.initial_team_public_key
    }

    /// The last main-chain block hash this identity has verified.
    pub fn checkpoint(&self) -> BlockHash {
        self.checkpoint
    }

    pub fn set_checkpoint(&mut self, checkpoint: BlockHash) {
        self.checkpoint = checkpoint;
    }

    /// The public identity published on the main chain.
    pub fn identity(&self) -> Identity {
        Identity {
            public_key: self.public_key(),
            encryption_public_key: self.box_public_key(),
            email: self.profile.email.clone(),
            ssh_public_key: self.profile.ssh_public_key.clone(),
            pgp_public_key: self.profile.pgp_public_key.clone(),
        }
    }

    pub fn sign(&self, message: &Message) -> Result<SignedMessage> {
        Ok(SignedMessage::sign(message, &self.keypair)?)
    }

    /// Sign `body` under a header stamped now.
    pub fn sign_body(&self, body: Body) -> Result<SignedMessage> {
        self.sign(&Message::new(body))
    }

    pub fn seal(&self, body: &PlaintextBody, recipient: &BoxPublicKey) -> Result<BoxedMessage> {
        Ok(BoxedMessage::seal(body, &self.box_secret, recipient)?)
    }

    pub fn open(&self, boxed: &BoxedMessage) -> Result<PlaintextBody> {
        Ok(boxed.open(&self.box_secret)?)
    }

    /// Wrap the audit-log key to each recipient.
    pub fn wrap_log_key<'a, I>(&self, key: &EncryptionKey, recipients: I) -> Result<Vec<WrappedKey>>
    where
        I: IntoIterator<Item = &'a BoxPublicKey>,
    {
        Ok(wrap_log_key(key, &self.box_secret, recipients)?)
    }

    /// Open a key wrapped to this identity on its own log chain.
    pub fn open_wrapped_log_key(&self, wrapped: &WrappedKey) -> Result<EncryptionKey> {
        self.open_wrapped_log_key_from(wrapped, self.box_public_key())
    }

    /// Open a key another member wrapped to this identity on their log
    /// chain. Admins use this to read members' audit logs.
    pub fn open_wrapped_log_key_from(
        &self,
        wrapped: &WrappedKey,
        author: BoxPublicKey,
    ) -> Result<EncryptionKey> {
        let boxed = BoxedMessage::from_wrapped_key(wrapped, author);
        match self.open(&boxed) {
            Ok(PlaintextBody::LogEncryptionKey(key)) => Ok(key),
            Err(_) => Err(ChainError::BadLogChainWrappedKey),
        }
    }

    /// Write the identity, secrets included, as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_identity_file(path.as_ref(), &self.to_json()?)
    }

    /// The JSON written by [`TeamIdentity::save`].
    pub fn to_json(&self) -> Result<Zeroizing<String>> {
        let file = IdentityFile {
            sign_seed: hex::encode(self.keypair.seed()),
            box_seed: hex::encode(*self.box_seed),
            email: self.profile.email.clone(),
            ssh_public_key: hex::encode(&self.profile.ssh_public_key),
            pgp_public_key: hex::encode(&self.profile.pgp_public_key),
            initial_team_public_key: self.initial_team_public_key,
            checkpoint: self.checkpoint,
        };
        Ok(Zeroizing::new(serde_json::to_string_pretty(&file)?))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = Zeroizing::new(fs::read_to_string(path)?);
        let file: IdentityFile = serde_json::from_str(&json)?;

        let sign_seed = Zeroizing::new(decode_seed(&file.sign_seed)?);
        let box_seed = Zeroizing::new(decode_seed(&file.box_seed)?);
        let profile = MemberProfile {
            email: file.email.clone(),
            ssh_public_key: decode_hex(&file.ssh_public_key)?.into(),
            pgp_public_key: decode_hex(&file.pgp_public_key)?.into(),
        };

        Ok(Self::from_parts(
            Keypair::from_seed(&sign_seed),
            *box_seed,
            profile,
            file.initial_team_public_key,
            file.checkpoint,
        ))
    }
}

pub(crate) fn write_identity_file(path: &Path, json: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, json.as_bytes())?;
    Ok(())
}

impl std::fmt::Debug for TeamIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamIdentity")
            .field("public_key", &self.public_key())
            .field("email", &self.profile.email)
            .field("checkpoint", &self.checkpoint)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct IdentityFile {
    sign_seed: String,
    box_seed: String,
    email: String,
    ssh_public_key: String,
    pgp_public_key: String,
    #[zeroize(skip)]
    initial_team_public_key: SignPublicKey,
    #[zeroize(skip)]
    checkpoint: BlockHash,
}

fn random_seed() -> [u8; 32] {
    let mut seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    seed
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|e| ChainError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

fn decode_seed(s: &str) -> Result<[u8; 32]> {
    let bytes = Zeroizing::new(decode_hex(s)?);
    bytes.as_slice().try_into().map_err(|_| {
        ChainError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "seed must be 32 bytes",
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use teamchain_core::Operation;

    fn admin() -> (TeamIdentity, SignedMessage) {
        TeamIdentity::new_admin(
            MemberProfile::new("a@x.co"),
            TeamInfo {
                name: "acme".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_new_admin_signs_genesis() {
        let (identity, genesis) = admin();

        assert_eq!(genesis.public_key, identity.public_key());
        assert_eq!(identity.initial_team_public_key(), identity.public_key());
        assert_eq!(identity.checkpoint(), genesis.hash());
        genesis.verify_with(&identity.public_key()).unwrap();

        match genesis.decode().unwrap().body {
            Body::Main(MainChain::Create(block)) => {
                assert_eq!(block.creator, identity.identity());
                assert_eq!(block.team_info.name, "acme");
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn test_new_member_keeps_team_key() {
        let (admin, genesis) = admin();
        let member = TeamIdentity::new_member(
            MemberProfile::new("b@x.co"),
            genesis.hash(),
            admin.public_key(),
        );
        assert_ne!(member.public_key(), admin.public_key());
        assert_eq!(member.initial_team_public_key(), admin.public_key());
        assert_eq!(member.identity().email, "b@x.co");
    }

    #[test]
    fn test_seal_open_between_members() {
        let (admin, genesis) = admin();
        let member =
            TeamIdentity::new_member(MemberProfile::new("b@x.co"), genesis.hash(), admin.public_key());
        let key = EncryptionKey::generate();

        let boxed = admin
            .seal(&PlaintextBody::LogEncryptionKey(key.clone()), &member.box_public_key())
            .unwrap();
        assert_eq!(
            member.open(&boxed).unwrap(),
            PlaintextBody::LogEncryptionKey(key)
        );
        assert!(admin.open(&boxed).is_err());
    }

    #[test]
    fn test_open_own_wrapped_log_key() {
        let (admin, _) = admin();
        let key = EncryptionKey::generate();
        let wrapped = admin
            .wrap_log_key(&key, [admin.box_public_key()].iter())
            .unwrap();

        assert_eq!(admin.open_wrapped_log_key(&wrapped[0]).unwrap(), key);

        let mut tampered = wrapped[0].clone();
        tampered.ciphertext = Bytes::from_static(b"garbage");
        assert!(matches!(
            admin.open_wrapped_log_key(&tampered),
            Err(ChainError::BadLogChainWrappedKey)
        ));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities").join("a.json");

        let (mut identity, _) = admin();
        identity.set_checkpoint(BlockHash::from_bytes([9; 32]));
        identity.save(&path).unwrap();

        let loaded = TeamIdentity::load(&path).unwrap();
        assert_eq!(loaded.public_key(), identity.public_key());
        assert_eq!(loaded.box_public_key(), identity.box_public_key());
        assert_eq!(loaded.identity(), identity.identity());
        assert_eq!(loaded.checkpoint(), BlockHash::from_bytes([9; 32]));

        let body = Body::Main(MainChain::Append(teamchain_core::Block {
            last_block_hash: loaded.checkpoint(),
            operation: Operation::Leave,
        }));
        let signed = loaded.sign_body(body).unwrap();
        signed.verify_with(&identity.public_key()).unwrap();
    }

    #[test]
    fn test_load_rejects_short_seed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        let (identity, _) = admin();
        identity.save(&path).unwrap();

        let json = fs::read_to_string(&path).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["sign_seed"] = serde_json::Value::String("abcd".into());
        fs::write(&path, value.to_string()).unwrap();

        assert!(TeamIdentity::load(&path).is_err());
    }
}
