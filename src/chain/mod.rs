//! Serialized execution of caller-attributed calls against one ledger and
//! one staking bank.
//!
//! Each committed call is mined in its own block: the clock advances by one
//! before the call runs, and only if the call succeeds. A failed call leaves
//! the clock, the state and the event journals untouched.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::bank::{BankError, BankEvent, StakingBank};
use crate::ledger::{
    parse_units, Amount, BlockHeight, Identity, Ledger, LedgerError, LedgerEvent, UnitsError,
};
use crate::snapshot::StateSnapshot;

mod genesis;

pub use genesis::Genesis;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Bank(#[from] BankError),
    #[error("invalid amount: {0}")]
    Units(#[from] UnitsError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} is the bank's escrow account and cannot originate calls")]
    ReservedCaller(Identity),
    #[error("script line {line}: {source}")]
    Script {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// One operation as it appears in a call script. Amounts are decimal strings
/// in whole-token units, scaled by the ledger's decimals on execution.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Transfer { to: Identity, amount: String },
    Approve { spender: Identity, amount: String },
    TransferFrom {
        from: Identity,
        to: Identity,
        amount: String,
    },
    Mint { to: Identity, amount: String },
    SetManager { manager: Identity },
    Stake { amount: String },
    Withdraw { amount: String },
    Confirm,
    SetRewardPerBlock { amount: String },
    /// Mines empty blocks; the caller is ignored.
    AdvanceBlocks { blocks: u64 },
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Transfer { .. } => "transfer",
            Op::Approve { .. } => "approve",
            Op::TransferFrom { .. } => "transfer_from",
            Op::Mint { .. } => "mint",
            Op::SetManager { .. } => "set_manager",
            Op::Stake { .. } => "stake",
            Op::Withdraw { .. } => "withdraw",
            Op::Confirm => "confirm",
            Op::SetRewardPerBlock { .. } => "set_reward_per_block",
            Op::AdvanceBlocks { .. } => "advance_blocks",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Call {
    pub caller: Identity,
    #[serde(flatten)]
    pub op: Op,
}

impl Call {
    pub fn new(caller: impl Into<Identity>, op: Op) -> Self {
        Self {
            caller: caller.into(),
            op,
        }
    }
}

/// Outcome of a committed call: the block it was mined in and the events it
/// emitted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub block: BlockHeight,
    pub ledger_events: Vec<LedgerEvent>,
    pub bank_events: Vec<BankEvent>,
}

pub struct Chain {
    height: BlockHeight,
    ledger: Ledger,
    bank: StakingBank,
}

impl Chain {
    pub fn from_genesis(genesis: &Genesis) -> Result<Self, ChainError> {
        let mut ledger = Ledger::new(genesis.token.clone(), genesis.deployer.clone())?;
        let bank = StakingBank::new(genesis.bank.clone(), genesis.managers.clone(), &ledger)?;
        if genesis.bind_manager {
            ledger.set_manager(&genesis.deployer, genesis.bank.clone())?;
        }
        ledger.take_events();
        tracing::info!(
            token = %genesis.token.symbol,
            bank = %genesis.bank,
            managers = genesis.managers.len(),
            height = genesis.height,
            "genesis applied"
        );
        Ok(Self::new(genesis.height, ledger, bank))
    }

    pub fn new(height: BlockHeight, ledger: Ledger, bank: StakingBank) -> Self {
        Self {
            height,
            ledger,
            bank,
        }
    }

    pub fn height(&self) -> BlockHeight {
        self.height
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn bank(&self) -> &StakingBank {
        &self.bank
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::capture(self.height, &self.ledger, &self.bank)
    }

    pub fn advance_blocks(&mut self, blocks: u64) -> BlockHeight {
        self.height = self.height.saturating_add(blocks);
        self.height
    }

    pub fn submit(&mut self, call: &Call) -> Result<Receipt, ChainError> {
        let block = match call.op {
            Op::AdvanceBlocks { blocks } => self.height.saturating_add(blocks),
            _ => {
                if &call.caller == self.bank.identity() {
                    return Err(ChainError::ReservedCaller(call.caller.clone()));
                }
                let block = self.height.saturating_add(1);
                self.execute(call, block)?;
                block
            }
        };
        self.height = block;
        tracing::debug!(block, caller = %call.caller, op = call.op.name(), "call committed");
        Ok(Receipt {
            block,
            ledger_events: self.ledger.take_events(),
            bank_events: self.bank.take_events(),
        })
    }

    fn execute(&mut self, call: &Call, block: BlockHeight) -> Result<(), ChainError> {
        let caller = &call.caller;
        match &call.op {
            Op::Transfer { to, amount } => {
                let amount = self.amount(amount)?;
                self.ledger.transfer(caller, to, amount)?;
            }
            Op::Approve { spender, amount } => {
                let amount = self.amount(amount)?;
                self.ledger.approve(caller, spender, amount);
            }
            Op::TransferFrom { from, to, amount } => {
                let amount = self.amount(amount)?;
                self.ledger.transfer_from(caller, from, to, amount)?;
            }
            Op::Mint { to, amount } => {
                let amount = self.amount(amount)?;
                self.ledger.mint(caller, to, amount)?;
            }
            Op::SetManager { manager } => {
                self.ledger.set_manager(caller, manager.clone())?;
            }
            Op::Stake { amount } => {
                let amount = self.amount(amount)?;
                self.bank.stake(&mut self.ledger, caller, amount, block)?;
            }
            Op::Withdraw { amount } => {
                let amount = self.amount(amount)?;
                self.bank.withdraw(&mut self.ledger, caller, amount, block)?;
            }
            Op::Confirm => self.bank.confirm(caller)?,
            Op::SetRewardPerBlock { amount } => {
                let amount = self.amount(amount)?;
                self.bank.set_reward_per_block(caller, amount)?;
            }
            Op::AdvanceBlocks { .. } => {}
        }
        Ok(())
    }

    fn amount(&self, text: &str) -> Result<Amount, UnitsError> {
        parse_units(text, self.ledger.decimals())
    }
}

/// Reads a JSON-lines call script. Blank lines are skipped.
pub fn load_script(path: &Path) -> Result<Vec<Call>, ChainError> {
    let file = File::open(path)?;
    parse_script(BufReader::new(file))
}

pub fn parse_script<R: BufRead>(reader: R) -> Result<Vec<Call>, ChainError> {
    let mut calls = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let call = serde_json::from_str(&line).map_err(|source| ChainError::Script {
            line: idx + 1,
            source,
        })?;
        calls.push(call);
    }
    Ok(calls)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(text: &str) -> Amount {
        parse_units(text, 18).unwrap()
    }

    fn call(caller: &str, op: Op) -> Call {
        Call::new(caller, op)
    }

    #[test]
    fn each_committed_call_mines_one_block() {
        let mut chain = Chain::from_genesis(&Genesis::sample()).unwrap();
        assert_eq!(chain.height(), 0);
        let receipt = chain
            .submit(&call(
                "deployer",
                Op::Transfer {
                    to: "bob".into(),
                    amount: "1".into(),
                },
            ))
            .unwrap();
        assert_eq!(receipt.block, 1);
        assert_eq!(receipt.ledger_events.len(), 1);
        assert_eq!(chain.advance_blocks(4), 5);
        let receipt = chain
            .submit(&call("anyone", Op::AdvanceBlocks { blocks: 10 }))
            .unwrap();
        assert_eq!(receipt.block, 15);
        assert!(receipt.ledger_events.is_empty());
    }

    #[test]
    fn failed_call_changes_nothing() {
        let mut chain = Chain::from_genesis(&Genesis::sample()).unwrap();
        let before = chain.snapshot();
        let err = chain
            .submit(&call(
                "bob",
                Op::Transfer {
                    to: "deployer".into(),
                    amount: "1".into(),
                },
            ))
            .unwrap_err();
        assert!(matches!(
            err,
            ChainError::Ledger(LedgerError::InsufficientBalance { .. })
        ));
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.snapshot(), before);
    }

    #[test]
    fn bank_account_cannot_originate_calls() {
        let mut chain = Chain::from_genesis(&Genesis::sample()).unwrap();
        let bank = chain.bank().identity().clone();
        chain
            .submit(&call(
                "deployer",
                Op::Approve {
                    spender: bank.clone(),
                    amount: "50".into(),
                },
            ))
            .unwrap();
        chain
            .submit(&call("deployer", Op::Stake { amount: "50".into() }))
            .unwrap();
        let before = chain.snapshot();

        let drain = call(
            &bank,
            Op::Transfer {
                to: "mallory".into(),
                amount: "50".into(),
            },
        );
        let err = chain.submit(&drain).unwrap_err();
        assert!(matches!(err, ChainError::ReservedCaller(ref caller) if caller == &bank));

        let self_approve = call(
            &bank,
            Op::Approve {
                spender: bank.clone(),
                amount: "50".into(),
            },
        );
        assert!(matches!(
            chain.submit(&self_approve),
            Err(ChainError::ReservedCaller(_))
        ));
        assert!(matches!(
            chain.submit(&call(&bank, Op::Stake { amount: "50".into() })),
            Err(ChainError::ReservedCaller(_))
        ));
        assert_eq!(chain.snapshot(), before);
        assert_eq!(
            chain.ledger().balance_of(&bank),
            chain.bank().total_staked()
        );

        chain
            .submit(&call("deployer", Op::Withdraw { amount: "50".into() }))
            .unwrap();
        assert_eq!(chain.ledger().balance_of(&bank), 0);
        assert_eq!(chain.bank().total_staked(), 0);
    }

    #[test]
    fn malformed_amount_is_rejected_before_execution() {
        let mut chain = Chain::from_genesis(&Genesis::sample()).unwrap();
        let err = chain
            .submit(&call(
                "deployer",
                Op::Stake {
                    amount: "fifty".into(),
                },
            ))
            .unwrap_err();
        assert!(matches!(err, ChainError::Units(UnitsError::InvalidDigits(_))));
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn auto_mined_reward_counts_the_withdrawal_block() {
        let mut chain = Chain::from_genesis(&Genesis::sample()).unwrap();
        let bank = chain.bank().identity().clone();
        chain
            .submit(&call(
                "deployer",
                Op::Approve {
                    spender: bank,
                    amount: "50".into(),
                },
            ))
            .unwrap();
        chain
            .submit(&call("deployer", Op::Stake { amount: "50".into() }))
            .unwrap();
        for _ in 0..5 {
            chain
                .submit(&call(
                    "deployer",
                    Op::Transfer {
                        to: "deployer".into(),
                        amount: "1".into(),
                    },
                ))
                .unwrap();
        }
        let receipt = chain
            .submit(&call("deployer", Op::Withdraw { amount: "50".into() }))
            .unwrap();
        assert_eq!(
            receipt.bank_events,
            vec![BankEvent::Withdrawn {
                staker: "deployer".into(),
                principal: units("50"),
                reward: units("6"),
                block: 8,
            }]
        );
        assert_eq!(chain.ledger().balance_of(&"deployer".into()), units("106"));
    }

    #[test]
    fn unbound_genesis_leaves_manager_unset() {
        let mut genesis = Genesis::sample();
        genesis.bind_manager = false;
        let mut chain = Chain::from_genesis(&genesis).unwrap();
        assert_eq!(chain.ledger().manager(), None);
        chain
            .submit(&call(
                "deployer",
                Op::SetManager {
                    manager: "tinybank".into(),
                },
            ))
            .unwrap();
        assert_eq!(chain.ledger().manager(), Some(&"tinybank".to_string()));
    }

    #[test]
    fn parses_json_lines_scripts() {
        let script = r#"
{"caller":"deployer","op":"approve","spender":"tinybank","amount":"50"}

{"caller":"manager-0","op":"confirm"}
{"caller":"x","op":"advance_blocks","blocks":3}
"#;
        let calls = parse_script(script.as_bytes()).unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1], call("manager-0", Op::Confirm));
        assert_eq!(calls[2].op, Op::AdvanceBlocks { blocks: 3 });

        let err = parse_script(r#"{"caller":"a","op":"teleport"}"#.as_bytes()).unwrap_err();
        assert!(matches!(err, ChainError::Script { line: 1, .. }));
    }

    #[test]
    fn calls_serialize_flat() {
        let json = serde_json::to_string(&call("m0", Op::Confirm)).unwrap();
        assert_eq!(json, r#"{"caller":"m0","op":"confirm"}"#);
    }
}
