//! Log-chain payloads: the per-member encrypted audit log.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::crypto::SignPublicKey;
use crate::main_chain::TeamPointer;
use crate::types::{BlockHash, BoxPublicKey};

/// The `log` message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogChain {
    Create(GenesisLogBlock),
    Append(LogBlock),
    Read(ReadLogBlocksRequest),
}

/// The first block of a member's log chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisLogBlock {
    /// The main-chain state this log chain belongs to.
    pub team_pointer: TeamPointer,
    pub wrapped_keys: Vec<WrappedKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogBlock {
    pub last_block_hash: BlockHash,
    pub operation: LogOperation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOperation {
    /// Hand the current key to recipients that lack it.
    AddWrappedKeys(Vec<WrappedKey>),
    /// Replace the key; the listed recipients are the complete new set.
    RotateKey(Vec<WrappedKey>),
    EncryptLog(EncryptedLog),
}

impl LogOperation {
    pub fn name(&self) -> &'static str {
        match self {
            LogOperation::AddWrappedKeys(_) => "add_wrapped_keys",
            LogOperation::RotateKey(_) => "rotate_key",
            LogOperation::EncryptLog(_) => "encrypt_log",
        }
    }
}

/// The audit-log symmetric key sealed to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    pub recipient_public_key: BoxPublicKey,
    pub ciphertext: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedLog {
    pub ciphertext: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadLogBlocksRequest {
    pub nonce: Bytes,
    pub filter: LogsFilter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogsFilter {
    Member(LogChainPointer),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogChainPointer {
    GenesisBlock(LogChainGenesisPointer),
    LastBlockHash(BlockHash),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChainGenesisPointer {
    pub team_public_key: SignPublicKey,
    pub member_public_key: SignPublicKey,
}
