//! The reconfiguration problem: wires a model and target states into
//! variables, transitions and propagators, runs the search, and turns
//! the best assignment into a plan.

use std::collections::BTreeMap;
use std::time::Duration;

use replan_model::{Model, Node, Vm, VmState};
use tracing::{debug, info, warn};

use crate::constraint::SatConstraint;
use crate::duration::DurationEvaluators;
use crate::error::{InjectionError, SolverError};
use crate::objective::{MinMttr, NodeDecision, Placement};
use crate::plan::{Action, ReconfigurationPlan};
use crate::propagate::{Occurrences, Propagator, Propagators, Sum, UsedNode};
use crate::scheduler::{CTask, CumulativeScheduler, DTask};
use crate::search::{Search, SearchStatus};
use crate::transition::{
    dispatch, NodeTransition, NodeTransitionKind, TransitionCtx, VmTransition, VmTransitionKind,
};
use crate::var::{IntVar, Store};

/// Tuning knobs of one solving session.
pub struct Parameters {
    /// Wall-clock budget; `None` runs to exhaustion.
    pub time_limit: Option<Duration>,
    /// Seed for the placement tie-breaking randomness.
    pub seed: u64,
    /// The scheduling horizon: no action may end past this instant.
    pub max_end: i64,
    pub durations: DurationEvaluators,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            time_limit: None,
            seed: 0,
            max_end: 10_000,
            durations: DurationEvaluators::defaults(),
        }
    }
}

/// The desired state of every VM the caller cares about. Unmentioned
/// VMs keep their current state.
#[derive(Debug, Clone, Default)]
pub struct TargetStates {
    pub running: Vec<Vm>,
    pub ready: Vec<Vm>,
    pub sleeping: Vec<Vm>,
    pub killed: Vec<Vm>,
}

impl TargetStates {
    /// One state per VM, rejecting VMs listed under two states.
    fn resolve(&self) -> Result<BTreeMap<Vm, VmState>, SolverError> {
        let mut out: BTreeMap<Vm, VmState> = BTreeMap::new();
        let sets = [
            (VmState::Running, &self.running),
            (VmState::Ready, &self.ready),
            (VmState::Sleeping, &self.sleeping),
            (VmState::Killed, &self.killed),
        ];
        for (state, vms) in sets {
            for &vm in vms {
                if let Some(&first) = out.get(&vm) {
                    return Err(SolverError::ConflictingStates {
                        vm,
                        first,
                        second: state,
                    });
                }
                out.insert(vm, state);
            }
        }
        Ok(out)
    }
}

/// How a solve terminated.
#[derive(Debug)]
pub enum SolveOutcome {
    Sat(ReconfigurationPlan),
    /// No plan exists within the horizon and the constraints.
    Unsat,
    /// The time budget ran out before any conclusion.
    Unknown,
}

pub struct ReconfigurationProblem {
    model: Model,
    params: Parameters,
    store: Store,
    props: Propagators,
    /// Node indexing: online nodes first, then offline, ascending ids.
    nodes: Vec<Node>,
    node_index: BTreeMap<Node, usize>,
    nb_online: usize,
    vm_transitions: Vec<VmTransition>,
    node_transitions: Vec<NodeTransition>,
    /// Per node: how many VMs land there, and whether any does.
    counts: Vec<IntVar>,
    used: Vec<IntVar>,
    horizon_end: IntVar,
    cost: IntVar,
    /// Per node, per resource. Mutable until the scheduler is posted.
    capacities: Vec<Vec<i64>>,
    resource_ids: Vec<String>,
    /// Set when a VM must be hosted but no node exists to host it.
    infeasible: bool,
}

impl ReconfigurationProblem {
    pub fn new(
        model: Model,
        targets: &TargetStates,
        params: Parameters,
    ) -> Result<Self, SolverError> {
        let targets = targets.resolve()?;
        for vm in targets.keys() {
            if model.mapping.vm_state(*vm).is_none() {
                return Err(SolverError::UnknownElement(vm.to_string()));
            }
        }

        let nodes: Vec<Node> = model.mapping.nodes().collect();
        let nb_online = model.mapping.online_nodes().count();
        let node_index: BTreeMap<Node, usize> =
            nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();

        let mut store = Store::new();
        let mut props = Propagators::new();
        let horizon_end = store.bounded(0, params.max_end);

        let mut infeasible = false;
        let mut vm_transitions = Vec::new();
        {
            let mut ctx = TransitionCtx {
                store: &mut store,
                props: &mut props,
                model: &model,
                durations: &params.durations,
                nb_nodes: nodes.len(),
                max_end: params.max_end,
                horizon_end,
            };
            for vm in ctx.model.mapping.vms() {
                let from = ctx.model.mapping.vm_state(vm).expect("vm is mapped");
                let to = targets.get(&vm).copied().unwrap_or(from);
                let kind = dispatch(from, to).ok_or(SolverError::UnsupportedTransition {
                    vm,
                    from,
                    to,
                })?;
                if nodes.is_empty() && matches!(kind, VmTransitionKind::Boot) {
                    // A node-less cluster cannot host the VM anywhere:
                    // infeasible, not a modeling error
                    debug!(%vm, "no node can host the VM");
                    infeasible = true;
                    continue;
                }
                let current = ctx
                    .model
                    .mapping
                    .vm_location(vm)
                    .map(|n| node_index[&n] as i64);
                vm_transitions.push(VmTransition::build(&mut ctx, vm, kind, to, current)?);
            }
        }

        // Final cardinality of each node, channeled from the demanding
        // slices
        let hosts: Vec<IntVar> = vm_transitions
            .iter()
            .filter_map(|t| t.d_slice.map(|s| s.hoster))
            .collect();
        let counts: Vec<IntVar> = nodes
            .iter()
            .map(|_| store.bounded(0, hosts.len() as i64))
            .collect();
        props.post(Box::new(Occurrences {
            hosts,
            counts: counts.clone(),
        }));
        let used: Vec<IntVar> = counts
            .iter()
            .map(|&count| {
                let u = store.bool01();
                props.post(Box::new(UsedNode { count, used: u }));
                u
            })
            .collect();

        let mut node_transitions = Vec::new();
        {
            let mut ctx = TransitionCtx {
                store: &mut store,
                props: &mut props,
                model: &model,
                durations: &params.durations,
                nb_nodes: nodes.len(),
                max_end: params.max_end,
                horizon_end,
            };
            for (i, &node) in nodes.iter().enumerate() {
                let kind = if i < nb_online {
                    NodeTransitionKind::Shutdownable
                } else {
                    NodeTransitionKind::Bootable
                };
                node_transitions.push(NodeTransition::build(&mut ctx, node, kind, counts[i])?);
            }
        }

        // Total completion time of every real action
        let ends: Vec<IntVar> = vm_transitions
            .iter()
            .filter(|t| !t.is_noop())
            .map(|t| t.end)
            .chain(node_transitions.iter().map(|t| t.end))
            .collect();
        let cost = store.bounded(0, (ends.len() as i64 + 1) * params.max_end);
        props.post(Box::new(Sum {
            terms: ends,
            total: cost,
        }));

        let capacities: Vec<Vec<i64>> = nodes
            .iter()
            .map(|&n| model.resources.iter().map(|r| r.capacity(n)).collect())
            .collect();
        let resource_ids = model.resources.iter().map(|r| r.id.clone()).collect();

        debug!(
            nodes = nodes.len(),
            vms = vm_transitions.len(),
            vars = store.nb_vars(),
            "problem built"
        );

        Ok(Self {
            model,
            params,
            store,
            props,
            nodes,
            node_index,
            nb_online,
            vm_transitions,
            node_transitions,
            counts,
            used,
            horizon_end,
            cost,
            capacities,
            resource_ids,
            infeasible,
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn nb_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// The number of initially online nodes.
    pub fn nb_online(&self) -> usize {
        self.nb_online
    }

    pub fn node_index(&self, node: Node) -> Option<usize> {
        self.node_index.get(&node).copied()
    }

    pub fn vm_transition(&self, vm: Vm) -> Option<&VmTransition> {
        self.vm_transitions.iter().find(|t| t.vm == vm)
    }

    pub fn node_transition(&self, node: Node) -> Option<&NodeTransition> {
        self.node_transitions.iter().find(|t| t.node == node)
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// Per node index, 0/1: whether any VM lands on the node.
    pub fn used_vars(&self) -> &[IntVar] {
        &self.used
    }

    pub fn post(&mut self, p: Box<dyn Propagator>) {
        self.props.post(p);
    }

    /// Multiply a node's capacity on one resource. Fails when the node's
    /// current load does not fit the scaled capacity.
    pub fn scale_capacity(
        &mut self,
        node: Node,
        resource: &str,
        ratio: f64,
    ) -> Result<(), InjectionError> {
        let i = self
            .node_index(node)
            .ok_or_else(|| InjectionError::new("overbook", format!("unknown node {node}")))?;
        let dim = self
            .resource_ids
            .iter()
            .position(|id| id == resource)
            .ok_or_else(|| {
                InjectionError::new("overbook", format!("unknown resource '{resource}'"))
            })?;
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(InjectionError::new(
                "overbook",
                format!("invalid ratio {ratio}"),
            ));
        }
        let scaled = (self.capacities[i][dim] as f64 * ratio).floor() as i64;
        let load = self.model.resources[dim].used_capacity(&self.model.mapping, node);
        if load > scaled {
            return Err(InjectionError::new(
                "overbook",
                format!("{node} already uses {load} of a scaled capacity of {scaled}"),
            ));
        }
        self.capacities[i][dim] = scaled;
        Ok(())
    }

    /// Solve under the given placement constraints.
    ///
    /// Constraint injection happens first; a constraint that cannot be
    /// enforced makes the whole problem infeasible without entering the
    /// search.
    pub fn solve(
        mut self,
        constraints: &[Box<dyn SatConstraint>],
    ) -> Result<SolveOutcome, SolverError> {
        if self.infeasible {
            warn!("a VM must be hosted but the model declares no node");
            return Ok(SolveOutcome::Unsat);
        }
        for c in constraints {
            if let Err(e) = c.inject(&mut self) {
                warn!(error = %e, "constraint cannot be enforced");
                return Ok(SolveOutcome::Unsat);
            }
        }
        self.post_scheduler();

        let mut heuristic = self.build_heuristic();
        let outcome = Search::new(
            &mut self.store,
            &mut self.props,
            &mut heuristic,
            Some(self.cost),
            self.params.time_limit,
        )
        .run();
        info!(
            status = ?outcome.status,
            nodes = outcome.stats.nodes,
            backtracks = outcome.stats.backtracks,
            solutions = outcome.stats.solutions,
            elapsed_ms = outcome.stats.elapsed.as_millis() as u64,
            "search finished"
        );

        match outcome.status {
            SearchStatus::Unsat => Ok(SolveOutcome::Unsat),
            SearchStatus::Unknown => Ok(SolveOutcome::Unknown),
            SearchStatus::Sat => {
                let snapshot = outcome.best.expect("sat search yields a solution");
                let plan = self.extract_plan(&snapshot)?;
                Ok(SolveOutcome::Sat(plan))
            }
        }
    }

    fn post_scheduler(&mut self) {
        let mut c_tasks = Vec::new();
        let mut d_tasks = Vec::new();
        for t in &self.vm_transitions {
            let usage: Vec<i64> = self
                .model
                .resources
                .iter()
                .map(|r| r.consumption(t.vm))
                .collect();
            let c_index = t.c_slice.map(|c| {
                let host = t.source.expect("a consuming slice sits on a known node") as usize;
                c_tasks.push(CTask {
                    host,
                    end: c.end,
                    usage: usage.clone(),
                });
                c_tasks.len() - 1
            });
            if let Some(d) = t.d_slice {
                d_tasks.push(DTask {
                    host: d.hoster,
                    start: d.start,
                    usage,
                    assoc: c_index,
                });
            }
        }
        let scheduler = CumulativeScheduler::new(
            &mut self.store,
            self.capacities.clone(),
            self.node_transitions.iter().map(|t| t.hosting_start).collect(),
            self.node_transitions.iter().map(|t| t.hosting_end).collect(),
            c_tasks,
            d_tasks,
            self.params.max_end,
        );
        self.props.post(Box::new(scheduler));
    }

    fn build_heuristic(&self) -> MinMttr {
        let placements: Vec<Placement> = self
            .vm_transitions
            .iter()
            .filter_map(|t| {
                t.d_slice.map(|d| Placement {
                    d_host: d.hoster,
                    current: t.source,
                    start: d.start,
                })
            })
            .collect();
        let methods: Vec<IntVar> = self
            .vm_transitions
            .iter()
            .filter_map(|t| t.relocation_method)
            .collect();
        let nodes: Vec<NodeDecision> = self
            .node_transitions
            .iter()
            .map(|t| NodeDecision {
                state: t.state,
                preferred: match t.kind {
                    NodeTransitionKind::Shutdownable => 1,
                    NodeTransitionKind::Bootable => 0,
                },
                start: t.start,
            })
            .collect();
        let ends: Vec<IntVar> = self
            .vm_transitions
            .iter()
            .filter(|t| !t.is_noop())
            .map(|t| t.end)
            .chain(self.node_transitions.iter().map(|t| t.end))
            .chain([self.horizon_end, self.cost])
            .collect();
        MinMttr::new(self.params.seed, placements, methods, nodes, ends)
    }

    fn extract_plan(&self, snapshot: &[i64]) -> Result<ReconfigurationPlan, SolverError> {
        let val = |v: IntVar| snapshot[v.index()];
        let node_at = |i: i64| self.nodes[i as usize];
        let mut plan = ReconfigurationPlan::new();

        for t in &self.vm_transitions {
            let window = (val(t.start), val(t.end));
            match t.kind {
                VmTransitionKind::Stay => {}
                VmTransitionKind::Forge => {
                    plan.push(window.0, window.1, Action::Forge { vm: t.vm });
                }
                VmTransitionKind::Boot => {
                    let d = t.d_slice.expect("boot has a demanding slice");
                    plan.push(
                        window.0,
                        window.1,
                        Action::BootVm {
                            vm: t.vm,
                            destination: node_at(val(d.hoster)),
                        },
                    );
                }
                VmTransitionKind::Relocatable => {
                    let d = t.d_slice.expect("relocatable has a demanding slice");
                    let src = t.source.expect("relocatable has a source");
                    let dst = val(d.hoster);
                    if dst != src {
                        plan.push(
                            window.0,
                            window.1,
                            Action::Migrate {
                                vm: t.vm,
                                from: node_at(src),
                                to: node_at(dst),
                            },
                        );
                    }
                }
                VmTransitionKind::Suspend => {
                    let src = t.source.expect("suspend has a source");
                    plan.push(
                        window.0,
                        window.1,
                        Action::Suspend {
                            vm: t.vm,
                            on: node_at(src),
                        },
                    );
                }
                VmTransitionKind::Shutdown => {
                    let src = t.source.expect("shutdown has a source");
                    plan.push(
                        window.0,
                        window.1,
                        Action::ShutdownVm {
                            vm: t.vm,
                            on: node_at(src),
                        },
                    );
                }
                VmTransitionKind::Resume => {
                    let src = t.source.expect("resume has a source");
                    plan.push(
                        window.0,
                        window.1,
                        Action::Resume {
                            vm: t.vm,
                            on: node_at(src),
                        },
                    );
                }
                VmTransitionKind::Kill => {
                    plan.push(
                        window.0,
                        window.1,
                        Action::Kill {
                            vm: t.vm,
                            on: t.source.map(node_at),
                        },
                    );
                }
            }
        }
        for t in &self.node_transitions {
            let online = val(t.state) == 1;
            match t.kind {
                NodeTransitionKind::Shutdownable if !online => {
                    plan.push(
                        val(t.start),
                        val(t.end),
                        Action::ShutdownNode { node: t.node },
                    );
                }
                NodeTransitionKind::Bootable if online => {
                    plan.push(val(t.start), val(t.end), Action::BootNode { node: t.node });
                }
                _ => {}
            }
        }
        plan.sort();

        // The plan must tell the same story as the solved timing
        let computed = plan.duration();
        let solved = val(self.horizon_end);
        if computed != solved {
            return Err(SolverError::InconsistentPlan { computed, solved });
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replan_model::Mapping;

    fn two_node_model() -> Model {
        let mut m = Mapping::default();
        m.add_online_node(Node(0));
        m.add_online_node(Node(1));
        m.add_running_vm(Vm(0), Node(0)).unwrap();
        Model {
            mapping: m,
            resources: vec![],
            attributes: Default::default(),
        }
    }

    #[test]
    fn test_conflicting_targets_are_rejected() {
        let model = two_node_model();
        let targets = TargetStates {
            running: vec![Vm(0)],
            killed: vec![Vm(0)],
            ..Default::default()
        };
        let err = ReconfigurationProblem::new(model, &targets, Parameters::default())
            .err()
            .unwrap();
        assert!(matches!(err, SolverError::ConflictingStates { vm: Vm(0), .. }));
    }

    #[test]
    fn test_unknown_vm_is_rejected() {
        let model = two_node_model();
        let targets = TargetStates {
            running: vec![Vm(99)],
            ..Default::default()
        };
        let err = ReconfigurationProblem::new(model, &targets, Parameters::default())
            .err()
            .unwrap();
        assert!(matches!(err, SolverError::UnknownElement(_)));
    }

    #[test]
    fn test_init_to_running_has_no_transition() {
        let mut model = two_node_model();
        model.mapping.add_init_vm(Vm(7));
        let targets = TargetStates {
            running: vec![Vm(7)],
            ..Default::default()
        };
        let err = ReconfigurationProblem::new(model, &targets, Parameters::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SolverError::UnsupportedTransition {
                vm: Vm(7),
                from: VmState::Init,
                to: VmState::Running,
            }
        ));
    }

    #[test]
    fn test_forge_requires_a_template() {
        let mut model = two_node_model();
        model.mapping.add_init_vm(Vm(7));
        let targets = TargetStates {
            ready: vec![Vm(7)],
            ..Default::default()
        };
        let err = ReconfigurationProblem::new(model, &targets, Parameters::default())
            .err()
            .unwrap();
        assert!(matches!(err, SolverError::MissingAttribute { vm: Vm(7), .. }));
    }

    #[test]
    fn test_running_target_without_any_node_is_unsat() {
        let mut mapping = Mapping::default();
        mapping.add_ready_vm(Vm(0));
        let model = Model {
            mapping,
            resources: vec![],
            attributes: Default::default(),
        };
        let targets = TargetStates {
            running: vec![Vm(0)],
            ..Default::default()
        };
        let rp = ReconfigurationProblem::new(model, &targets, Parameters::default()).unwrap();
        assert!(matches!(rp.solve(&[]).unwrap(), SolveOutcome::Unsat));
    }

    #[test]
    fn test_stable_cluster_yields_empty_plan() {
        let model = two_node_model();
        let rp =
            ReconfigurationProblem::new(model, &TargetStates::default(), Parameters::default())
                .unwrap();
        match rp.solve(&[]).unwrap() {
            SolveOutcome::Sat(plan) => {
                assert!(plan.is_empty(), "unexpected actions: {plan}");
            }
            other => panic!("expected a plan, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_budget_reports_unknown() {
        let model = two_node_model();
        let params = Parameters {
            time_limit: Some(Duration::ZERO),
            ..Default::default()
        };
        let rp = ReconfigurationProblem::new(model, &TargetStates::default(), params).unwrap();
        assert!(matches!(rp.solve(&[]).unwrap(), SolveOutcome::Unknown));
    }
}
