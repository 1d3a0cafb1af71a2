//! Placement constraints.
//!
//! A constraint restricts the problem before the search starts, by
//! pruning decision variable domains, scaling capacities or posting
//! extra propagators. Injection is all-or-nothing: one unenforceable
//! constraint makes the whole problem infeasible.

use crate::error::InjectionError;
use crate::problem::ReconfigurationProblem;

mod capacity;
mod placement;

pub use capacity::{MaxIdleNodes, Overbook};
pub use placement::{Ban, Fence, Offline, Online};

pub trait SatConstraint {
    fn inject(&self, rp: &mut ReconfigurationProblem) -> Result<(), InjectionError>;
}
