//! A token ledger and a staking bank driven as one deterministic state
//! machine.
//!
//! * [`ledger`] — balances, allowances and manager-gated minting for a single
//!   fungible asset.
//! * [`gate`] — N-of-N confirmation rounds over a fixed manager set.
//! * [`bank`] — escrowed stakes with a flat per-block reward, paid on
//!   withdrawal; reward-rate changes pass through the gate.
//! * [`chain`] — serialized call execution with a block clock, genesis
//!   configuration and JSON-lines call scripts.
//! * [`snapshot`] — serializable state views with a SHA-256 state root.
//!
//! Every operation takes the caller's identity explicitly and either commits
//! fully or fails without side effects.

pub mod bank;
pub mod chain;
pub mod gate;
pub mod ledger;
pub mod snapshot;

pub use bank::{BankError, BankEvent, StakingBank};
pub use chain::{Call, Chain, ChainError, Genesis, Op, Receipt};
pub use gate::{ConfirmationGate, GateError};
pub use ledger::{
    format_units, parse_units, Amount, BlockHeight, Identity, Ledger, LedgerError, LedgerEvent,
    TokenConfig,
};
pub use snapshot::StateSnapshot;

/// Amounts go over JSON as decimal strings; `u128` does not survive every
/// JSON consumer as a number.
pub(crate) mod serde_amount {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::ledger::Amount;

    pub fn serialize<S>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}
