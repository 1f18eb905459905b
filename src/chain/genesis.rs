use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::ledger::{BlockHeight, Identity, TokenConfig};

use super::ChainError;

fn default_bind_manager() -> bool {
    true
}

/// Deployment parameters for a ledger plus its staking bank.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Genesis {
    pub token: TokenConfig,
    pub deployer: Identity,
    pub bank: Identity,
    pub managers: Vec<Identity>,
    /// Bind the bank as the ledger's mint manager during genesis.
    #[serde(default = "default_bind_manager")]
    pub bind_manager: bool,
    #[serde(default)]
    pub height: BlockHeight,
}

impl Genesis {
    pub fn load(path: &Path) -> Result<Self, ChainError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// The deployment used by the reference scenarios: 100 tokens at 18
    /// decimals and three managers.
    pub fn sample() -> Self {
        Self {
            token: TokenConfig {
                name: "MyToken".into(),
                symbol: "MT".into(),
                decimals: 18,
                initial_mint: 100,
            },
            deployer: "deployer".into(),
            bank: "tinybank".into(),
            managers: vec!["manager-0".into(), "manager-1".into(), "manager-2".into()],
            bind_manager: true,
            height: 0,
        }
    }
}
