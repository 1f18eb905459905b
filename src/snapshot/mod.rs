//! Point-in-time views of ledger and bank state with a SHA-256 state root.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::bank::StakingBank;
use crate::ledger::{Amount, BlockHeight, Identity, Ledger};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenInfo {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    #[serde(with = "crate::serde_amount")]
    pub total_supply: Amount,
    pub owner: Identity,
    pub manager: Option<Identity>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceEntry {
    pub account: Identity,
    #[serde(with = "crate::serde_amount")]
    pub amount: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllowanceEntry {
    pub owner: Identity,
    pub spender: Identity,
    #[serde(with = "crate::serde_amount")]
    pub amount: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StakeEntry {
    pub staker: Identity,
    #[serde(with = "crate::serde_amount")]
    pub amount: Amount,
    pub last_action_block: BlockHeight,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BankInfo {
    pub identity: Identity,
    #[serde(with = "crate::serde_amount")]
    pub reward_per_block: Amount,
    #[serde(with = "crate::serde_amount")]
    pub total_staked: Amount,
    pub managers: Vec<Identity>,
    pub confirmed: Vec<Identity>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateSnapshot {
    pub height: BlockHeight,
    pub token: TokenInfo,
    pub balances: Vec<BalanceEntry>,
    pub allowances: Vec<AllowanceEntry>,
    pub bank: BankInfo,
    pub stakes: Vec<StakeEntry>,
    /// Hex-encoded Merkle root over everything above except `height`.
    pub state_root: String,
}

impl StateSnapshot {
    pub fn capture(height: BlockHeight, ledger: &Ledger, bank: &StakingBank) -> Self {
        let token = TokenInfo {
            name: ledger.name().to_string(),
            symbol: ledger.symbol().to_string(),
            decimals: ledger.decimals(),
            total_supply: ledger.total_supply(),
            owner: ledger.owner().clone(),
            manager: ledger.manager().cloned(),
        };
        let balances = ledger
            .balances()
            .map(|(account, amount)| BalanceEntry {
                account: account.clone(),
                amount,
            })
            .collect();
        let allowances = ledger
            .allowances()
            .map(|(owner, spender, amount)| AllowanceEntry {
                owner: owner.clone(),
                spender: spender.clone(),
                amount,
            })
            .collect();
        let gate = bank.gate();
        let bank_info = BankInfo {
            identity: bank.identity().clone(),
            reward_per_block: bank.reward_per_block(),
            total_staked: bank.total_staked(),
            managers: gate.managers().to_vec(),
            confirmed: gate
                .managers()
                .iter()
                .filter(|manager| gate.has_confirmed(manager))
                .cloned()
                .collect(),
        };
        let stakes = bank
            .stakes()
            .map(|(staker, amount, last_action_block)| StakeEntry {
                staker: staker.clone(),
                amount,
                last_action_block,
            })
            .collect();

        let mut snapshot = Self {
            height,
            token,
            balances,
            allowances,
            bank: bank_info,
            stakes,
            state_root: String::new(),
        };
        snapshot.state_root = hex::encode(snapshot.compute_root());
        snapshot
    }

    /// Recomputes the root from the snapshot's contents.
    pub fn compute_root(&self) -> [u8; 32] {
        let mut leaves: Vec<[u8; 32]> = Vec::new();

        let mut hasher = Sha256::new();
        hasher.update(b"token");
        hasher.update(self.token.name.as_bytes());
        hasher.update(self.token.symbol.as_bytes());
        hasher.update([self.token.decimals]);
        hasher.update(self.token.total_supply.to_le_bytes());
        hasher.update(self.token.owner.as_bytes());
        if let Some(manager) = &self.token.manager {
            hasher.update(b"manager");
            hasher.update(manager.as_bytes());
        }
        leaves.push(hasher.finalize().into());

        for entry in &self.balances {
            let mut hasher = Sha256::new();
            hasher.update(b"bal");
            hasher.update(entry.account.as_bytes());
            hasher.update(entry.amount.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
        for entry in &self.allowances {
            let mut hasher = Sha256::new();
            hasher.update(b"allow");
            hasher.update(entry.owner.as_bytes());
            hasher.update([0u8]);
            hasher.update(entry.spender.as_bytes());
            hasher.update(entry.amount.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }

        let mut hasher = Sha256::new();
        hasher.update(b"bank");
        hasher.update(self.bank.identity.as_bytes());
        hasher.update(self.bank.reward_per_block.to_le_bytes());
        hasher.update(self.bank.total_staked.to_le_bytes());
        for manager in &self.bank.managers {
            hasher.update(b"m");
            hasher.update(manager.as_bytes());
            hasher.update([u8::from(self.bank.confirmed.contains(manager))]);
        }
        leaves.push(hasher.finalize().into());

        for entry in &self.stakes {
            let mut hasher = Sha256::new();
            hasher.update(b"stake");
            hasher.update(entry.staker.as_bytes());
            hasher.update(entry.amount.to_le_bytes());
            hasher.update(entry.last_action_block.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }

        build_merkle(leaves)
    }
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"tinybank-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TokenConfig;

    fn state() -> (Ledger, StakingBank) {
        let mut ledger = Ledger::new(
            TokenConfig {
                name: "MyToken".into(),
                symbol: "MT".into(),
                decimals: 2,
                initial_mint: 10,
            },
            "alice",
        )
        .unwrap();
        let bank = StakingBank::new("bank", vec!["m0".into(), "m1".into()], &ledger).unwrap();
        ledger.set_manager(&"alice".into(), "bank").unwrap();
        (ledger, bank)
    }

    #[test]
    fn root_is_deterministic() {
        let (ledger, bank) = state();
        let first = StateSnapshot::capture(1, &ledger, &bank);
        let second = StateSnapshot::capture(1, &ledger, &bank);
        assert_eq!(first.state_root, second.state_root);
        assert_eq!(first.state_root, hex::encode(first.compute_root()));
    }

    #[test]
    fn root_tracks_balances_and_confirmations() {
        let (mut ledger, mut bank) = state();
        let before = StateSnapshot::capture(1, &ledger, &bank).state_root;

        ledger.transfer(&"alice".into(), &"bob".into(), 1).unwrap();
        let after_transfer = StateSnapshot::capture(1, &ledger, &bank).state_root;
        assert_ne!(before, after_transfer);

        bank.confirm(&"m0".into()).unwrap();
        let snapshot = StateSnapshot::capture(1, &ledger, &bank);
        assert_ne!(after_transfer, snapshot.state_root);
        assert_eq!(snapshot.bank.confirmed, vec!["m0".to_string()]);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let (ledger, bank) = state();
        let snapshot = StateSnapshot::capture(3, &ledger, &bank);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"total_supply\":\"1000\""));
        let decoded: StateSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(hex::encode(decoded.compute_root()), snapshot.state_root);
    }
}
