use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::gate::{ConfirmationGate, GateError};
use crate::ledger::{Amount, BlockHeight, Identity, Ledger, LedgerError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BankError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error("insufficient stake for {staker}: staked {staked}, requested {requested}")]
    InsufficientStake {
        staker: Identity,
        staked: Amount,
        requested: Amount,
    },
    #[error("{caller} is not authorized to manage this bank")]
    Unauthorized { caller: Identity },
    #[error("the bank account {caller} cannot stake or withdraw")]
    EscrowCaller { caller: Identity },
    #[error("stake amount must be greater than zero")]
    ZeroAmount,
    #[error("block {block} precedes the last recorded action at block {baseline}")]
    ClockRegression {
        block: BlockHeight,
        baseline: BlockHeight,
    },
    #[error("arithmetic overflow")]
    Overflow,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BankEvent {
    Staked {
        staker: Identity,
        #[serde(with = "crate::serde_amount")]
        amount: Amount,
        block: BlockHeight,
    },
    Withdrawn {
        staker: Identity,
        #[serde(with = "crate::serde_amount")]
        principal: Amount,
        #[serde(with = "crate::serde_amount")]
        reward: Amount,
        block: BlockHeight,
    },
    Confirmed {
        manager: Identity,
    },
    RewardRateChanged {
        by: Identity,
        #[serde(with = "crate::serde_amount")]
        previous: Amount,
        #[serde(with = "crate::serde_amount")]
        current: Amount,
    },
}

/// Escrows ledger balances for stakers and pays a flat per-block reward on
/// withdrawal.
///
/// The reward does not scale with the staked amount: any staker earns
/// `reward_per_block` for every block elapsed since their last stake or
/// withdrawal. Rewards are minted through the ledger, so the bank's ledger
/// balance always equals [`StakingBank::total_staked`].
#[derive(Clone, Debug)]
pub struct StakingBank {
    identity: Identity,
    gate: ConfirmationGate,
    reward_per_block: Amount,
    total_staked: Amount,
    staked: BTreeMap<Identity, Amount>,
    last_action_block: BTreeMap<Identity, BlockHeight>,
    events: Vec<BankEvent>,
}

impl StakingBank {
    /// Creates a bank paying one whole token of `ledger` per block.
    pub fn new(
        identity: impl Into<Identity>,
        managers: Vec<Identity>,
        ledger: &Ledger,
    ) -> Result<Self, BankError> {
        let gate = ConfirmationGate::new(managers)?;
        Ok(Self {
            identity: identity.into(),
            gate,
            reward_per_block: ledger.unit(),
            total_staked: 0,
            staked: BTreeMap::new(),
            last_action_block: BTreeMap::new(),
            events: Vec::new(),
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn gate(&self) -> &ConfirmationGate {
        &self.gate
    }

    pub fn reward_per_block(&self) -> Amount {
        self.reward_per_block
    }

    pub fn total_staked(&self) -> Amount {
        self.total_staked
    }

    pub fn staked_of(&self, staker: &Identity) -> Amount {
        self.staked.get(staker).copied().unwrap_or(0)
    }

    pub fn last_action_block(&self, staker: &Identity) -> Option<BlockHeight> {
        self.last_action_block.get(staker).copied()
    }

    /// Every current staker with their stake and reward baseline.
    pub fn stakes(&self) -> impl Iterator<Item = (&Identity, Amount, BlockHeight)> {
        self.last_action_block
            .iter()
            .map(move |(staker, block)| (staker, self.staked_of(staker), *block))
    }

    pub fn events(&self) -> &[BankEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<BankEvent> {
        std::mem::take(&mut self.events)
    }

    /// Reward a withdrawal by `staker` at `block` would pay.
    pub fn pending_reward(&self, staker: &Identity, block: BlockHeight) -> Result<Amount, BankError> {
        let Some(baseline) = self.last_action_block(staker) else {
            return Ok(0);
        };
        if block < baseline {
            return Err(BankError::ClockRegression { block, baseline });
        }
        if self.staked_of(staker) == 0 {
            return Ok(0);
        }
        let elapsed = Amount::from(block - baseline);
        self.reward_per_block
            .checked_mul(elapsed)
            .ok_or(BankError::Overflow)
    }

    /// Moves `amount` from the caller into escrow. The caller must have
    /// approved the bank for at least `amount` beforehand.
    ///
    /// Restaking restarts accrual at `block`; reward accrued since the
    /// previous baseline is not paid out.
    pub fn stake(
        &mut self,
        ledger: &mut Ledger,
        caller: &Identity,
        amount: Amount,
        block: BlockHeight,
    ) -> Result<(), BankError> {
        self.check_caller(caller)?;
        if amount == 0 {
            return Err(BankError::ZeroAmount);
        }
        self.check_clock(caller, block)?;
        let staked = self
            .staked_of(caller)
            .checked_add(amount)
            .ok_or(BankError::Overflow)?;
        let total = self
            .total_staked
            .checked_add(amount)
            .ok_or(BankError::Overflow)?;

        ledger.transfer_from(&self.identity, caller, &self.identity, amount)?;

        self.staked.insert(caller.clone(), staked);
        self.total_staked = total;
        self.last_action_block.insert(caller.clone(), block);
        tracing::debug!(staker = %caller, amount, block, total_staked = total, "stake");
        self.events.push(BankEvent::Staked {
            staker: caller.clone(),
            amount,
            block,
        });
        Ok(())
    }

    /// Returns `amount` of principal to the caller and mints the reward
    /// accrued since the caller's baseline. Returns the reward paid.
    ///
    /// Withdrawing nothing while holding no stake is a no-op.
    pub fn withdraw(
        &mut self,
        ledger: &mut Ledger,
        caller: &Identity,
        amount: Amount,
        block: BlockHeight,
    ) -> Result<Amount, BankError> {
        self.check_caller(caller)?;
        let staked = self.staked_of(caller);
        if staked == 0 && amount == 0 {
            return Ok(0);
        }
        if staked < amount {
            return Err(BankError::InsufficientStake {
                staker: caller.clone(),
                staked,
                requested: amount,
            });
        }
        self.check_clock(caller, block)?;
        let reward = self.pending_reward(caller, block)?;
        if reward > 0 {
            ledger.ensure_can_mint(&self.identity, reward)?;
        }

        // escrow always holds total_staked, so the principal transfer cannot
        // fail once the stake check passed
        ledger.transfer(&self.identity, caller, amount)?;
        if reward > 0 {
            ledger.mint(&self.identity, caller, reward)?;
        }

        let remaining = staked - amount;
        if remaining == 0 {
            self.staked.remove(caller);
            self.last_action_block.remove(caller);
        } else {
            self.staked.insert(caller.clone(), remaining);
            self.last_action_block.insert(caller.clone(), block);
        }
        self.total_staked -= amount;
        tracing::debug!(staker = %caller, amount, reward, block, "withdraw");
        self.events.push(BankEvent::Withdrawn {
            staker: caller.clone(),
            principal: amount,
            reward,
            block,
        });
        Ok(reward)
    }

    pub fn confirm(&mut self, caller: &Identity) -> Result<(), BankError> {
        self.gate.confirm(caller)?;
        tracing::debug!(
            manager = %caller,
            confirmed = self.gate.confirmation_count(),
            required = self.gate.managers().len(),
            "confirm"
        );
        self.events.push(BankEvent::Confirmed {
            manager: caller.clone(),
        });
        Ok(())
    }

    /// Changes the reward rate. Any manager may call this once every manager
    /// has confirmed; success starts a new confirmation round.
    pub fn set_reward_per_block(
        &mut self,
        caller: &Identity,
        new_rate: Amount,
    ) -> Result<(), BankError> {
        if !self.gate.is_manager(caller) {
            tracing::warn!(caller = %caller, "reward rate change by non-manager");
            return Err(BankError::Unauthorized {
                caller: caller.clone(),
            });
        }
        self.gate.consume_if_complete()?;

        let previous = std::mem::replace(&mut self.reward_per_block, new_rate);
        tracing::info!(by = %caller, previous, current = new_rate, "reward rate changed");
        self.events.push(BankEvent::RewardRateChanged {
            by: caller.clone(),
            previous,
            current: new_rate,
        });
        Ok(())
    }

    fn check_caller(&self, caller: &Identity) -> Result<(), BankError> {
        if caller == &self.identity {
            return Err(BankError::EscrowCaller {
                caller: caller.clone(),
            });
        }
        Ok(())
    }

    fn check_clock(&self, staker: &Identity, block: BlockHeight) -> Result<(), BankError> {
        match self.last_action_block(staker) {
            Some(baseline) if block < baseline => {
                Err(BankError::ClockRegression { block, baseline })
            }
            _ => Ok(()),
        }
    }
}
