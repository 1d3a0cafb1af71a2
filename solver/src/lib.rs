//! # replan-solver
//!
//! A constraint-based scheduler computing a time-ordered reconfiguration
//! plan that moves a virtualized cluster from its current placement to a
//! target placement, minimizing the total time to repair (the sum of the
//! completion times of every action).
//!
//! The pieces, bottom up:
//!
//! - [`var`]: integer decision variables over trailed cells, plus the
//!   propagation fixpoint engine
//! - [`scheduler`]: the cumulative task scheduler enforcing per-node,
//!   per-dimension capacity over time
//! - [`transition`]: per-VM and per-node state transitions with their
//!   timing variables and resource slices
//! - [`constraint`]: placement constraints injected into the problem
//! - [`objective`]: the min-time-to-repair objective and its branching
//!   heuristics
//! - [`search`]: depth-first branch-and-bound over backtrackable worlds
//! - [`problem`]: the orchestrator wiring a [`replan_model::Model`] and
//!   target states into one solvable problem
//!
//! The solve itself is synchronous and single-threaded; the only blocking
//! point is [`problem::ReconfigurationProblem::solve`], bounded by an
//! optional wall-clock limit.

pub mod constraint;
pub mod duration;
pub mod error;
pub mod objective;
pub mod plan;
pub mod problem;
pub mod propagate;
pub mod scheduler;
pub mod search;
pub mod slice;
pub mod transition;
pub mod var;

pub use constraint::{Ban, Fence, MaxIdleNodes, Offline, Online, Overbook, SatConstraint};
pub use duration::{ActionKind, DurationEvaluators};
pub use error::{InjectionError, SolverError};
pub use plan::{Action, ActionItem, ReconfigurationPlan};
pub use problem::{Parameters, ReconfigurationProblem, SolveOutcome, TargetStates};
