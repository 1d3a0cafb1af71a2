//! Error taxonomy of the solver.
//!
//! Three families, with different handling:
//!
//! - [`SolverError`]: structural/build-time problems. Abort the whole
//!   solve, never retried.
//! - [`InjectionError`]: a placement constraint that cannot be enforced
//!   against the initial domains. The solve logs it and reports
//!   infeasible without entering search.
//! - [`crate::var::Contradiction`]: expected internal control flow during
//!   propagation, converted into backtracking by the search loop and
//!   never surfaced to callers.

use replan_model::{Vm, VmState};
use thiserror::Error;

use crate::duration::ActionKind;

/// Fatal, structural errors detected before or after the search.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SolverError {
    /// No duration estimate is registered for a required transition.
    #[error("no duration estimate for {kind:?} on {element}")]
    MissingDuration { kind: ActionKind, element: String },

    /// No transition exists between the two states.
    #[error("unsupported transition for {vm}: {from:?} -> {to:?}")]
    UnsupportedTransition {
        vm: Vm,
        from: VmState,
        to: VmState,
    },

    /// A VM appears in more than one destination state set.
    #[error("{vm} has conflicting destination states: {first:?} and {second:?}")]
    ConflictingStates {
        vm: Vm,
        first: VmState,
        second: VmState,
    },

    /// A transition requires a model attribute that is absent.
    #[error("{vm} misses the required attribute '{key}'")]
    MissingAttribute { vm: Vm, key: String },

    /// A VM or node referenced by a constraint is not part of the model.
    #[error("unknown element: {0}")]
    UnknownElement(String),

    /// The produced plan disagrees with the solved variables. A modeling
    /// bug, not a recoverable condition.
    #[error("plan duration ({computed}) and solved end ({solved}) mismatch")]
    InconsistentPlan { computed: i64, solved: i64 },
}

/// A placement constraint that could not be enforced against the initial
/// domains. Recoverable by the caller: the solve reports infeasible.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot enforce {constraint}: {reason}")]
pub struct InjectionError {
    pub constraint: String,
    pub reason: String,
}

impl InjectionError {
    pub fn new(constraint: &str, reason: impl Into<String>) -> Self {
        Self {
            constraint: constraint.to_string(),
            reason: reason.into(),
        }
    }
}
