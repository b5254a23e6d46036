//! Transport abstraction for reaching the team coordinator.
//!
//! The coordinator relays blocks between members. It is untrusted: every
//! block it returns goes through the verifier before it touches a store.
//! Implementations may use HTTPS, a queue, or anything else.

use async_trait::async_trait;
use thiserror::Error;

use teamchain_core::SignedMessage;

/// Errors reported by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The coordinator refused the request.
    #[error("rejected by coordinator: {0}")]
    Rejected(String),

    /// The request named a team or chain the coordinator does not know.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request itself was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The coordinator could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Main-chain blocks answering a signed `read` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadBlocksResponse {
    pub blocks: Vec<SignedMessage>,
    pub has_more: bool,
}

/// Log-chain blocks answering a signed log `read` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadLogBlocksResponse {
    pub log_blocks: Vec<SignedMessage>,
    pub more: bool,
}

/// The coordinator interface.
///
/// Requests are `SignedMessage`s so the coordinator can authenticate the
/// reader.
#[async_trait]
pub trait TeamTransport: Send + Sync {
    /// Fetch main-chain blocks after the request's team pointer.
    async fn read_blocks(&self, request: SignedMessage) -> Result<ReadBlocksResponse>;

    /// Fetch log-chain blocks matching the request's filter.
    async fn read_log_blocks(&self, request: SignedMessage) -> Result<ReadLogBlocksResponse>;

    /// Publish a new main- or log-chain block.
    async fn post_block(&self, block: SignedMessage) -> Result<()>;
}

#[async_trait]
impl<T: TeamTransport + ?Sized> TeamTransport for std::sync::Arc<T> {
    async fn read_blocks(&self, request: SignedMessage) -> Result<ReadBlocksResponse> {
        (**self).read_blocks(request).await
    }

    async fn read_log_blocks(&self, request: SignedMessage) -> Result<ReadLogBlocksResponse> {
        (**self).read_log_blocks(request).await
    }

    async fn post_block(&self, block: SignedMessage) -> Result<()> {
        (**self).post_block(block).await
    }
}

/// An in-process coordinator for testing.
///
/// Keeps every team's main chain and every member's log chain in memory and
/// enforces hash linkage on posted blocks, so two members racing to append
/// on the same head see the loser rejected.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    use teamchain_core::{
        Body, BlockHash, LogChain, LogChainPointer, LogsFilter, MainChain, SignPublicKey,
        TeamPointer,
    };

    #[derive(Debug, Default)]
    struct Chains {
        /// Main chains keyed by the genesis signer.
        teams: HashMap<SignPublicKey, Vec<SignedMessage>>,
        /// Log chains keyed by author.
        logs: HashMap<SignPublicKey, Vec<SignedMessage>>,
    }

    /// Shared in-memory coordinator.
    #[derive(Debug)]
    pub struct MemoryCoordinator {
        chains: RwLock<Chains>,
        page_limit: usize,
    }

    impl MemoryCoordinator {
        /// Create a coordinator that answers reads `page_limit` blocks at a time.
        pub fn new(page_limit: usize) -> Self {
            Self {
                chains: RwLock::new(Chains::default()),
                page_limit: page_limit.max(1),
            }
        }

        /// Number of main-chain blocks held for the team founded by `team_public_key`.
        pub async fn team_len(&self, team_public_key: &SignPublicKey) -> usize {
            self.chains
                .read()
                .await
                .teams
                .get(team_public_key)
                .map_or(0, Vec::len)
        }

        /// Number of log blocks held for `author`.
        pub async fn log_len(&self, author: &SignPublicKey) -> usize {
            self.chains
                .read()
                .await
                .logs
                .get(author)
                .map_or(0, Vec::len)
        }
    }

    impl Default for MemoryCoordinator {
        fn default() -> Self {
            Self::new(100)
        }
    }

    fn decode_body(message: &SignedMessage) -> Result<Body> {
        message
            .verify_with(&message.public_key)
            .map_err(|_| TransportError::BadRequest("bad request signature".into()))?;
        message
            .decode()
            .map(|m| m.body)
            .map_err(|e| TransportError::BadRequest(e.to_string()))
    }

    /// Index of the block following `hash`, or `None` if `hash` is not in `chain`.
    fn after(chain: &[SignedMessage], hash: &BlockHash) -> Option<usize> {
        chain
            .iter()
            .position(|block| &block.hash() == hash)
            .map(|index| index + 1)
    }

    fn page(chain: &[SignedMessage], start: usize, limit: usize) -> (Vec<SignedMessage>, bool) {
        let end = chain.len().min(start.saturating_add(limit));
        let blocks = chain.get(start..end).unwrap_or_default().to_vec();
        (blocks, end < chain.len())
    }

    #[async_trait]
    impl TeamTransport for MemoryCoordinator {
        async fn read_blocks(&self, request: SignedMessage) -> Result<ReadBlocksResponse> {
            let Body::Main(MainChain::Read(read)) = decode_body(&request)? else {
                return Err(TransportError::BadRequest("expected a main read".into()));
            };

            let chains = self.chains.read().await;
            let (chain, start) = match read.team_pointer {
                TeamPointer::PublicKey(public_key) => {
                    let chain = chains
                        .teams
                        .get(&public_key)
                        .ok_or_else(|| TransportError::NotFound("team".into()))?;
                    (chain, 0)
                }
                TeamPointer::LastBlockHash(hash) => chains
                    .teams
                    .values()
                    .find_map(|chain| after(chain, &hash).map(|start| (chain, start)))
                    .ok_or_else(|| TransportError::NotFound("block".into()))?,
            };

            let (blocks, has_more) = page(chain, start, self.page_limit);
            Ok(ReadBlocksResponse { blocks, has_more })
        }

        async fn read_log_blocks(&self, request: SignedMessage) -> Result<ReadLogBlocksResponse> {
            let Body::Log(LogChain::Read(read)) = decode_body(&request)? else {
                return Err(TransportError::BadRequest("expected a log read".into()));
            };

            let chains = self.chains.read().await;
            let LogsFilter::Member(pointer) = read.filter;
            let (log_blocks, more) = match pointer {
                LogChainPointer::GenesisBlock(genesis) => {
                    match chains.logs.get(&genesis.member_public_key) {
                        Some(chain) => page(chain, 0, self.page_limit),
                        None => (Vec::new(), false),
                    }
                }
                LogChainPointer::LastBlockHash(hash) => {
                    let (chain, start) = chains
                        .logs
                        .values()
                        .find_map(|chain| after(chain, &hash).map(|start| (chain, start)))
                        .ok_or_else(|| TransportError::NotFound("log block".into()))?;
                    page(chain, start, self.page_limit)
                }
            };
            Ok(ReadLogBlocksResponse { log_blocks, more })
        }

        async fn post_block(&self, block: SignedMessage) -> Result<()> {
            let body = decode_body(&block)?;
            let mut chains = self.chains.write().await;
            let author = block.public_key;

            match body {
                Body::Main(MainChain::Create(_)) => {
                    if chains.teams.contains_key(&author) {
                        return Err(TransportError::Rejected("team exists".into()));
                    }
                    chains.teams.insert(author, vec![block]);
                }
                Body::Main(MainChain::Append(append)) => {
                    let chain = chains
                        .teams
                        .values_mut()
                        .find(|chain| chain.iter().any(|b| b.hash() == append.last_block_hash))
                        .ok_or_else(|| TransportError::NotFound("team".into()))?;
                    if chain.last().map(SignedMessage::hash) != Some(append.last_block_hash) {
                        return Err(TransportError::Rejected("stale last block hash".into()));
                    }
                    chain.push(block);
                }
                Body::Log(LogChain::Create(_)) => {
                    if chains.logs.contains_key(&author) {
                        return Err(TransportError::Rejected("log chain exists".into()));
                    }
                    chains.logs.insert(author, vec![block]);
                }
                Body::Log(LogChain::Append(append)) => {
                    let chain = chains
                        .logs
                        .get_mut(&author)
                        .ok_or_else(|| TransportError::NotFound("log chain".into()))?;
                    if chain.last().map(SignedMessage::hash) != Some(append.last_block_hash) {
                        return Err(TransportError::Rejected("stale last log block hash".into()));
                    }
                    chain.push(block);
                }
                _ => return Err(TransportError::BadRequest("not a postable block".into())),
            }
            Ok(())
        }
    }
}
