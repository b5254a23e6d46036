//! The `Team` projection: derived by folding main-chain blocks, never signed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::main_chain::{LoggingEndpoint, Policy, TeamInfo};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub info: TeamInfo,
    pub policy: Policy,
    pub logging_endpoints: BTreeSet<LoggingEndpoint>,
}

impl Team {
    /// The state right after genesis.
    pub fn new(info: TeamInfo) -> Self {
        Self {
            info,
            policy: Policy::default(),
            logging_endpoints: BTreeSet::new(),
        }
    }

    pub fn command_encrypted_logging_enabled(&self) -> bool {
        self.logging_endpoints
            .contains(&LoggingEndpoint::CommandEncrypted)
    }
}
