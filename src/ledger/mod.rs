use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

mod units;

pub use units::{format_units, parse_units, UnitsError};

pub type Identity = String;
pub type Amount = u128;
pub type BlockHeight = u64;

/// Largest `decimals` whose scale `10^decimals` still fits an [`Amount`].
pub const MAX_DECIMALS: u8 = 38;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient balance in account {account}: have {have}, need {need}")]
    InsufficientBalance {
        account: Identity,
        have: Amount,
        need: Amount,
    },
    #[error("insufficient allowance for {spender} on account {owner}: have {have}, need {need}")]
    InsufficientAllowance {
        owner: Identity,
        spender: Identity,
        have: Amount,
        need: Amount,
    },
    #[error("{caller} is not authorized to {action}")]
    Unauthorized {
        caller: Identity,
        action: &'static str,
    },
    #[error("manager already bound to {manager}")]
    ManagerAlreadySet { manager: Identity },
    #[error("unsupported decimals {0}, at most {MAX_DECIMALS}")]
    UnsupportedDecimals(u8),
    #[error("arithmetic overflow")]
    Overflow,
}

/// Construction parameters of a token ledger.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenConfig {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Whole tokens minted to the deployer, scaled by `10^decimals`.
    pub initial_mint: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Transfer {
        from: Identity,
        to: Identity,
        #[serde(with = "crate::serde_amount")]
        amount: Amount,
    },
    Approval {
        owner: Identity,
        spender: Identity,
        #[serde(with = "crate::serde_amount")]
        amount: Amount,
    },
    Mint {
        to: Identity,
        #[serde(with = "crate::serde_amount")]
        amount: Amount,
    },
    ManagerSet {
        manager: Identity,
    },
}

/// Single-asset balance ledger with allowances and a write-once mint manager.
///
/// Every operation validates all of its preconditions before touching state,
/// so a failed call leaves balances, allowances and the event journal as they
/// were.
#[derive(Clone, Debug)]
pub struct Ledger {
    name: String,
    symbol: String,
    decimals: u8,
    scale: Amount,
    owner: Identity,
    manager: Option<Identity>,
    total_supply: Amount,
    balances: BTreeMap<Identity, Amount>,
    allowances: BTreeMap<(Identity, Identity), Amount>,
    events: Vec<LedgerEvent>,
}

impl Ledger {
    pub fn new(config: TokenConfig, deployer: impl Into<Identity>) -> Result<Self, LedgerError> {
        let scale = scale_of(config.decimals)?;
        let minted = Amount::from(config.initial_mint)
            .checked_mul(scale)
            .ok_or(LedgerError::Overflow)?;
        let owner = deployer.into();

        let mut ledger = Self {
            name: config.name,
            symbol: config.symbol,
            decimals: config.decimals,
            scale,
            owner: owner.clone(),
            manager: None,
            total_supply: 0,
            balances: BTreeMap::new(),
            allowances: BTreeMap::new(),
            events: Vec::new(),
        };
        if minted > 0 {
            ledger.total_supply = minted;
            ledger.balances.insert(owner.clone(), minted);
            ledger.events.push(LedgerEvent::Mint {
                to: owner,
                amount: minted,
            });
        }
        Ok(ledger)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// One whole token in base units.
    pub fn unit(&self) -> Amount {
        self.scale
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub fn manager(&self) -> Option<&Identity> {
        self.manager.as_ref()
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn balance_of(&self, account: &Identity) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn allowance(&self, owner: &Identity, spender: &Identity) -> Amount {
        self.allowances
            .get(&(owner.clone(), spender.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub fn balances(&self) -> impl Iterator<Item = (&Identity, Amount)> {
        self.balances.iter().map(|(account, amount)| (account, *amount))
    }

    pub fn allowances(&self) -> impl Iterator<Item = (&Identity, &Identity, Amount)> {
        self.allowances
            .iter()
            .map(|((owner, spender), amount)| (owner, spender, *amount))
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Binds the mint manager. Only the owner may do this, and only once.
    pub fn set_manager(
        &mut self,
        caller: &Identity,
        manager: impl Into<Identity>,
    ) -> Result<(), LedgerError> {
        if caller != &self.owner {
            return Err(LedgerError::Unauthorized {
                caller: caller.clone(),
                action: "bind the manager",
            });
        }
        if let Some(existing) = &self.manager {
            return Err(LedgerError::ManagerAlreadySet {
                manager: existing.clone(),
            });
        }
        let manager = manager.into();
        tracing::info!(manager = %manager, "ledger manager bound");
        self.manager = Some(manager.clone());
        self.events.push(LedgerEvent::ManagerSet { manager });
        Ok(())
    }

    pub fn transfer(
        &mut self,
        caller: &Identity,
        to: &Identity,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.check_debit(caller, amount)?;
        self.move_balance(caller, to, amount)?;
        tracing::debug!(from = %caller, to = %to, amount, "transfer");
        self.events.push(LedgerEvent::Transfer {
            from: caller.clone(),
            to: to.clone(),
            amount,
        });
        Ok(())
    }

    /// Sets the allowance to exactly `amount`, replacing any previous value.
    pub fn approve(&mut self, caller: &Identity, spender: &Identity, amount: Amount) {
        let key = (caller.clone(), spender.clone());
        if amount == 0 {
            self.allowances.remove(&key);
        } else {
            self.allowances.insert(key, amount);
        }
        tracing::debug!(owner = %caller, spender = %spender, amount, "approve");
        self.events.push(LedgerEvent::Approval {
            owner: caller.clone(),
            spender: spender.clone(),
            amount,
        });
    }

    pub fn transfer_from(
        &mut self,
        caller: &Identity,
        from: &Identity,
        to: &Identity,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let allowed = self.allowance(from, caller);
        if allowed < amount {
            return Err(LedgerError::InsufficientAllowance {
                owner: from.clone(),
                spender: caller.clone(),
                have: allowed,
                need: amount,
            });
        }
        self.check_debit(from, amount)?;
        self.move_balance(from, to, amount)?;

        let key = (from.clone(), caller.clone());
        let remaining = allowed - amount;
        if remaining == 0 {
            self.allowances.remove(&key);
        } else {
            self.allowances.insert(key, remaining);
        }
        tracing::debug!(spender = %caller, from = %from, to = %to, amount, "transfer_from");
        self.events.push(LedgerEvent::Transfer {
            from: from.clone(),
            to: to.clone(),
            amount,
        });
        Ok(())
    }

    /// Checks that `caller` may mint `amount` right now without mutating anything.
    pub fn ensure_can_mint(&self, caller: &Identity, amount: Amount) -> Result<(), LedgerError> {
        match &self.manager {
            Some(manager) if manager == caller => {}
            _ => {
                return Err(LedgerError::Unauthorized {
                    caller: caller.clone(),
                    action: "mint",
                })
            }
        }
        self.total_supply
            .checked_add(amount)
            .map(|_| ())
            .ok_or(LedgerError::Overflow)
    }

    pub fn mint(
        &mut self,
        caller: &Identity,
        to: &Identity,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.ensure_can_mint(caller, amount)?;
        // every balance is bounded by the supply, so neither add can overflow
        self.total_supply += amount;
        self.credit(to, amount);
        tracing::debug!(to = %to, amount, "mint");
        self.events.push(LedgerEvent::Mint {
            to: to.clone(),
            amount,
        });
        Ok(())
    }

    fn check_debit(&self, account: &Identity, amount: Amount) -> Result<(), LedgerError> {
        let have = self.balance_of(account);
        if have < amount {
            return Err(LedgerError::InsufficientBalance {
                account: account.clone(),
                have,
                need: amount,
            });
        }
        Ok(())
    }

    fn move_balance(
        &mut self,
        from: &Identity,
        to: &Identity,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if from == to {
            return Ok(());
        }
        self.balance_of(to)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        self.debit(from, amount);
        self.credit(to, amount);
        Ok(())
    }

    fn debit(&mut self, account: &Identity, amount: Amount) {
        let remaining = self.balance_of(account) - amount;
        if remaining == 0 {
            self.balances.remove(account);
        } else {
            self.balances.insert(account.clone(), remaining);
        }
    }

    fn credit(&mut self, account: &Identity, amount: Amount) {
        if amount == 0 {
            return;
        }
        *self.balances.entry(account.clone()).or_default() += amount;
    }
}

fn scale_of(decimals: u8) -> Result<Amount, LedgerError> {
    if decimals > MAX_DECIMALS {
        return Err(LedgerError::UnsupportedDecimals(decimals));
    }
    Ok(10u128.pow(u32::from(decimals)))
}
