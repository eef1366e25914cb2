use serde::{Deserialize, Serialize};

use crate::locator::{LocatorExpression, LocatorSet};

/// Lifecycle states of one healing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HealState {
    Drafting { attempt: u32, keys: Vec<String> },
    Validating { attempt: u32 },
    Retrying {
        attempt: u32,
        invalid: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        unvalidated: Vec<String>,
    },
    Converged { attempts: u32 },
    Exhausted {
        attempts: u32,
        invalid: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        unvalidated: Vec<String>,
    },
}

impl HealState {
    pub fn name(&self) -> &'static str {
        match self {
            HealState::Drafting { .. } => "drafting",
            HealState::Validating { .. } => "validating",
            HealState::Retrying { .. } => "retrying",
            HealState::Converged { .. } => "converged",
            HealState::Exhausted { .. } => "exhausted",
        }
    }
}

/// Retry accumulator threaded through the loop by value.
#[derive(Debug, Clone, PartialEq)]
pub struct HealingAttempt {
    /// Zero-based round index.
    pub index: u32,
    /// Every key of the file, with the latest expression for each.
    pub working: LocatorSet,
    /// Keys the oracle is asked to repair this round.
    pub pending: Vec<String>,
    /// Pending keys whose current expression has never been validated.
    pub unvalidated: Vec<String>,
}

impl HealingAttempt {
    pub fn first(working: LocatorSet) -> Self {
        let pending = working.keys();
        Self {
            index: 0,
            working,
            unvalidated: pending.clone(),
            pending,
        }
    }

    /// The key → expression subset sent to the oracle.
    pub fn request(&self) -> LocatorSet {
        self.working.subset(&self.pending)
    }

    /// Take the oracle's expressions for the pending keys; all other keys are left as they were.
    pub fn apply(mut self, repairs: &LocatorSet) -> Self {
        for key in &self.pending {
            if let Some(expr) = repairs.get(key) {
                self.working.set(key, expr.clone());
            }
        }
        self
    }

    /// Split keys by validation verdict, aligned with `working` order.
    pub fn partition(&self, verdicts: &[bool]) -> (Vec<String>, Vec<String>) {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        for (idx, def) in self.working.iter().enumerate() {
            if verdicts.get(idx).copied().unwrap_or(false) {
                valid.push(def.key.clone());
            } else {
                invalid.push(def.key.clone());
            }
        }
        (valid, invalid)
    }

    pub fn expressions(&self) -> Vec<LocatorExpression> {
        self.working.iter().map(|d| d.expression.clone()).collect()
    }

    /// Pending keys split into (failed validation, never validated).
    pub fn pending_status(&self) -> (Vec<String>, Vec<String>) {
        self.pending
            .iter()
            .cloned()
            .partition(|key| !self.unvalidated.contains(key))
    }

    /// Next round, asking again for `invalid` and `unvalidated` in file order.
    pub fn retry(self, invalid: Vec<String>, unvalidated: Vec<String>) -> Self {
        let pending = self
            .working
            .keys()
            .into_iter()
            .filter(|k| invalid.contains(k) || unvalidated.contains(k))
            .collect();
        Self {
            index: self.index + 1,
            working: self.working,
            pending,
            unvalidated,
        }
    }
}
