//! Node transitions.
//!
//! Node states stay open during the search: an online node may be shut
//! down and an offline node may be booted whenever that shortens the
//! plan. The hosting window `[hosting_start, hosting_end)` is the period
//! during which the node may carry slices; the cumulative scheduler
//! clamps every slice on the node inside it.

use replan_model::Node;

use crate::duration::ActionKind;
use crate::error::SolverError;
use crate::propagate::{Leq, Propagator, TaskMonitor};
use crate::transition::TransitionCtx;
use crate::var::{Entailment, IntVar, PropResult, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTransitionKind {
    /// Initially online; may be shut down.
    Shutdownable,
    /// Initially offline; may be booted.
    Bootable,
}

/// One node's transition and its decision variables.
pub struct NodeTransition {
    pub node: Node,
    pub kind: NodeTransitionKind,
    /// 0/1: whether the node is online at the end of the plan.
    pub state: IntVar,
    pub start: IntVar,
    pub end: IntVar,
    pub duration: IntVar,
    pub hosting_start: IntVar,
    pub hosting_end: IntVar,
}

impl NodeTransition {
    /// `count` is the node's VM cardinality variable: a node hosting a VM
    /// at the end of the plan cannot be offline.
    pub fn build(
        ctx: &mut TransitionCtx<'_>,
        node: Node,
        kind: NodeTransitionKind,
        count: IntVar,
    ) -> Result<Self, SolverError> {
        let action = match kind {
            NodeTransitionKind::Shutdownable => ActionKind::ShutdownNode,
            NodeTransitionKind::Bootable => ActionKind::BootNode,
        };
        let d = ctx.durations.evaluate_node(ctx.model, action, node)?;

        let state = ctx.store.bool01();
        let start = ctx.store.bounded(0, ctx.max_end);
        let end = ctx.store.bounded(0, ctx.max_end);
        let duration = ctx.store.bounded(0, d);
        let (hosting_start, hosting_end) = match kind {
            NodeTransitionKind::Shutdownable => {
                (ctx.store.constant(0), ctx.store.bounded(0, ctx.max_end))
            }
            // A booted node hosts from the end of its boot action
            NodeTransitionKind::Bootable => (end, ctx.store.bounded(0, ctx.max_end)),
        };
        ctx.props.post(Box::new(TaskMonitor {
            start,
            duration,
            end,
        }));
        ctx.props.post(Box::new(Leq {
            x: end,
            y: ctx.horizon_end,
        }));
        ctx.props.post(Box::new(NodeLink {
            kind,
            state,
            start,
            duration,
            hosting_end,
            count,
            action_duration: d,
            max_end: ctx.max_end,
        }));

        Ok(Self {
            node,
            kind,
            state,
            start,
            end,
            duration,
            hosting_start,
            hosting_end,
        })
    }
}

/// Ties a node's final state to its action timing, hosting window and VM
/// cardinality.
///
/// Shutdownable, staying online: no action, hosting runs to the horizon.
/// Shutdownable, going offline: the action runs for its full estimate,
/// hosting ends when the shutdown starts, and no VM may remain. Bootable
/// is symmetric.
pub struct NodeLink {
    pub kind: NodeTransitionKind,
    pub state: IntVar,
    pub start: IntVar,
    pub duration: IntVar,
    pub hosting_end: IntVar,
    pub count: IntVar,
    pub action_duration: i64,
    pub max_end: i64,
}

impl NodeLink {
    fn eq_vars(s: &mut Store, a: IntVar, b: IntVar) -> PropResult {
        s.set_min(a, s.min(b))?;
        s.set_max(a, s.max(b))?;
        s.set_min(b, s.min(a))?;
        s.set_max(b, s.max(a))?;
        Ok(())
    }
}

impl Propagator for NodeLink {
    fn propagate(&mut self, s: &mut Store) -> PropResult {
        if s.min(self.count) >= 1 {
            s.instantiate_to(self.state, 1)?;
        }
        if !s.is_instantiated(self.state) {
            return Ok(());
        }
        let online = s.value(self.state) == 1;
        match (self.kind, online) {
            (NodeTransitionKind::Shutdownable, true) => {
                // No action takes place
                s.instantiate_to(self.duration, 0)?;
                s.set_max(self.start, 0)?;
                s.instantiate_to(self.hosting_end, self.max_end)?;
            }
            (NodeTransitionKind::Shutdownable, false) => {
                s.instantiate_to(self.duration, self.action_duration)?;
                s.instantiate_to(self.count, 0)?;
                Self::eq_vars(s, self.hosting_end, self.start)?;
            }
            (NodeTransitionKind::Bootable, true) => {
                s.instantiate_to(self.duration, self.action_duration)?;
                s.instantiate_to(self.hosting_end, self.max_end)?;
            }
            (NodeTransitionKind::Bootable, false) => {
                // Never boots: empty hosting window, no action
                s.instantiate_to(self.duration, 0)?;
                s.set_max(self.start, 0)?;
                s.instantiate_to(self.count, 0)?;
                s.instantiate_to(self.hosting_end, 0)?;
            }
        }
        Ok(())
    }

    fn is_entailed(&self, s: &Store) -> Entailment {
        if !(s.is_instantiated(self.state)
            && s.is_instantiated(self.duration)
            && s.is_instantiated(self.count))
        {
            return Entailment::Undefined;
        }
        let online = s.value(self.state) == 1;
        let acted = match self.kind {
            NodeTransitionKind::Shutdownable => !online,
            NodeTransitionKind::Bootable => online,
        };
        let want = if acted { self.action_duration } else { 0 };
        if s.value(self.duration) != want {
            return Entailment::False;
        }
        if !online && s.value(self.count) != 0 {
            return Entailment::False;
        }
        Entailment::True
    }
}
