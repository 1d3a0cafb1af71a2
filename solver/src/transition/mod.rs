//! State transitions for VMs and nodes.
//!
//! Each element of the model gets exactly one transition, picked from its
//! current and target state. A transition owns the timing variables of
//! its action and the resource slices tying it into the cumulative
//! scheduler.

use replan_model::{Model, VmState};

use crate::duration::DurationEvaluators;
use crate::propagate::Propagators;
use crate::var::{IntVar, Store};

pub mod node;
pub mod vm;

pub use node::{NodeLink, NodeTransition, NodeTransitionKind};
pub use vm::{VmTransition, VmTransitionKind};

/// Everything a transition builder needs from the enclosing problem.
pub struct TransitionCtx<'a> {
    pub store: &'a mut Store,
    pub props: &'a mut Propagators,
    pub model: &'a Model,
    pub durations: &'a DurationEvaluators,
    pub nb_nodes: usize,
    pub max_end: i64,
    /// The problem end variable. Every action finishes before it.
    pub horizon_end: IntVar,
}

/// The transition implementing a (current, target) VM state pair, or
/// `None` when no such transition exists.
pub fn dispatch(from: VmState, to: VmState) -> Option<VmTransitionKind> {
    use VmState::*;
    Some(match (from, to) {
        (Init, Ready) => VmTransitionKind::Forge,
        (Ready, Running) => VmTransitionKind::Boot,
        (Running, Running) => VmTransitionKind::Relocatable,
        (Running, Ready) => VmTransitionKind::Shutdown,
        (Running, Sleeping) => VmTransitionKind::Suspend,
        (Sleeping, Running) => VmTransitionKind::Resume,
        (Killed, Killed) => VmTransitionKind::Stay,
        (_, Killed) => VmTransitionKind::Kill,
        (a, b) if a == b => VmTransitionKind::Stay,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use VmState::*;

    #[rstest]
    #[case(Init, Ready, Some(VmTransitionKind::Forge))]
    #[case(Init, Init, Some(VmTransitionKind::Stay))]
    #[case(Init, Running, None)]
    #[case(Init, Sleeping, None)]
    #[case(Ready, Running, Some(VmTransitionKind::Boot))]
    #[case(Ready, Ready, Some(VmTransitionKind::Stay))]
    #[case(Ready, Sleeping, None)]
    #[case(Running, Running, Some(VmTransitionKind::Relocatable))]
    #[case(Running, Ready, Some(VmTransitionKind::Shutdown))]
    #[case(Running, Sleeping, Some(VmTransitionKind::Suspend))]
    #[case(Sleeping, Running, Some(VmTransitionKind::Resume))]
    #[case(Sleeping, Sleeping, Some(VmTransitionKind::Stay))]
    #[case(Sleeping, Ready, None)]
    #[case(Running, Killed, Some(VmTransitionKind::Kill))]
    #[case(Ready, Killed, Some(VmTransitionKind::Kill))]
    #[case(Killed, Killed, Some(VmTransitionKind::Stay))]
    #[case(Killed, Running, None)]
    fn test_dispatch_table(
        #[case] from: VmState,
        #[case] to: VmState,
        #[case] expected: Option<VmTransitionKind>,
    ) {
        assert_eq!(dispatch(from, to), expected);
    }
}
