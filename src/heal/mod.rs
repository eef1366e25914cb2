//! Locator healing loop: draft repairs with the oracle, validate against the
//! DOM snapshot, narrow to the keys that still fail, write once on convergence.

pub mod healer;
pub mod state;

pub use healer::{parse_repair_reply, HealReport, LocatorHealer};
pub use state::{HealState, HealingAttempt};
