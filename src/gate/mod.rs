//! N-of-N confirmation rounds over a fixed manager set.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ledger::Identity;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("{0} is not a manager")]
    NotAManager(Identity),
    #[error("not all managers confirmed yet: {confirmed} of {required}")]
    NotAllConfirmed { confirmed: usize, required: usize },
    #[error("manager set must not be empty")]
    NoManagers,
    #[error("duplicate manager {0}")]
    DuplicateManager(Identity),
}

/// Fixed manager list plus one confirmation flag per manager position.
///
/// A round is complete once every manager has confirmed. Completing a gated
/// action through [`ConfirmationGate::consume_if_complete`] clears every
/// flag, so each privileged change needs a fresh round.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmationGate {
    managers: Vec<Identity>,
    confirmed: Vec<bool>,
}

impl ConfirmationGate {
    pub fn new(managers: Vec<Identity>) -> Result<Self, GateError> {
        if managers.is_empty() {
            return Err(GateError::NoManagers);
        }
        let mut seen = BTreeSet::new();
        for manager in &managers {
            if !seen.insert(manager) {
                return Err(GateError::DuplicateManager(manager.clone()));
            }
        }
        let confirmed = vec![false; managers.len()];
        Ok(Self {
            managers,
            confirmed,
        })
    }

    pub fn managers(&self) -> &[Identity] {
        &self.managers
    }

    pub fn is_manager(&self, identity: &Identity) -> bool {
        self.position(identity).is_some()
    }

    pub fn has_confirmed(&self, identity: &Identity) -> bool {
        self.position(identity)
            .map(|idx| self.confirmed[idx])
            .unwrap_or(false)
    }

    pub fn confirmation_count(&self) -> usize {
        self.confirmed.iter().filter(|flag| **flag).count()
    }

    /// Managers that have not confirmed in the current round.
    pub fn pending(&self) -> impl Iterator<Item = &Identity> {
        self.managers
            .iter()
            .zip(&self.confirmed)
            .filter(|(_, flag)| !**flag)
            .map(|(manager, _)| manager)
    }

    /// Records a confirmation. Confirming twice in one round is a no-op.
    pub fn confirm(&mut self, caller: &Identity) -> Result<(), GateError> {
        let idx = self
            .position(caller)
            .ok_or_else(|| GateError::NotAManager(caller.clone()))?;
        self.confirmed[idx] = true;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.confirmed.iter().all(|flag| *flag)
    }

    /// Atomic check-and-reset: fails untouched unless the round is complete,
    /// otherwise clears every confirmation.
    pub fn consume_if_complete(&mut self) -> Result<(), GateError> {
        if !self.is_complete() {
            return Err(GateError::NotAllConfirmed {
                confirmed: self.confirmation_count(),
                required: self.managers.len(),
            });
        }
        self.confirmed.iter_mut().for_each(|flag| *flag = false);
        Ok(())
    }

    fn position(&self, identity: &Identity) -> Option<usize> {
        self.managers.iter().position(|manager| manager == identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> ConfirmationGate {
        ConfirmationGate::new(vec!["m0".into(), "m1".into(), "m2".into()]).unwrap()
    }

    #[test]
    fn rejects_empty_or_duplicate_manager_sets() {
        assert_eq!(ConfirmationGate::new(vec![]), Err(GateError::NoManagers));
        assert_eq!(
            ConfirmationGate::new(vec!["m0".into(), "m1".into(), "m0".into()]),
            Err(GateError::DuplicateManager("m0".into()))
        );
    }

    #[test]
    fn outsider_cannot_confirm() {
        let mut gate = gate();
        let err = gate.confirm(&"outsider".into()).unwrap_err();
        assert_eq!(err, GateError::NotAManager("outsider".into()));
        assert_eq!(gate.confirmation_count(), 0);
    }

    #[test]
    fn partial_round_does_not_consume() {
        let mut gate = gate();
        gate.confirm(&"m0".into()).unwrap();
        gate.confirm(&"m1".into()).unwrap();
        let err = gate.consume_if_complete().unwrap_err();
        assert_eq!(
            err,
            GateError::NotAllConfirmed {
                confirmed: 2,
                required: 3
            }
        );
        assert!(gate.has_confirmed(&"m0".into()));
        assert!(gate.has_confirmed(&"m1".into()));
        assert_eq!(gate.pending().collect::<Vec<_>>(), vec!["m2"]);
    }

    #[test]
    fn repeated_confirm_is_idempotent() {
        let mut gate = gate();
        gate.confirm(&"m0".into()).unwrap();
        gate.confirm(&"m0".into()).unwrap();
        gate.confirm(&"m0".into()).unwrap();
        assert_eq!(gate.confirmation_count(), 1);
        assert!(!gate.is_complete());
    }

    #[test]
    fn complete_round_resets_after_consume() {
        let mut gate = gate();
        for manager in ["m0", "m1", "m2"] {
            gate.confirm(&manager.to_string()).unwrap();
        }
        assert!(gate.is_complete());
        gate.consume_if_complete().unwrap();
        assert_eq!(gate.confirmation_count(), 0);
        assert!(!gate.is_complete());
        assert!(matches!(
            gate.consume_if_complete(),
            Err(GateError::NotAllConfirmed { confirmed: 0, .. })
        ));
    }

    #[test]
    fn single_manager_gate() {
        let mut gate = ConfirmationGate::new(vec!["solo".into()]).unwrap();
        assert!(!gate.is_complete());
        gate.confirm(&"solo".into()).unwrap();
        gate.consume_if_complete().unwrap();
    }
}
