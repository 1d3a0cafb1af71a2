//! Constraints on where VMs and nodes may end up.

use replan_model::{Node, Vm};

use crate::constraint::SatConstraint;
use crate::error::InjectionError;
use crate::problem::ReconfigurationProblem;

/// Forces a node offline at the end of the plan.
pub struct Offline(pub Node);

impl SatConstraint for Offline {
    fn inject(&self, rp: &mut ReconfigurationProblem) -> Result<(), InjectionError> {
        let state = rp
            .node_transition(self.0)
            .ok_or_else(|| InjectionError::new("offline", format!("unknown node {}", self.0)))?
            .state;
        rp.store_mut()
            .instantiate_to(state, 0)
            .map_err(|_| InjectionError::new("offline", format!("{} must stay online", self.0)))
    }
}

/// Forces a node online at the end of the plan.
pub struct Online(pub Node);

impl SatConstraint for Online {
    fn inject(&self, rp: &mut ReconfigurationProblem) -> Result<(), InjectionError> {
        let state = rp
            .node_transition(self.0)
            .ok_or_else(|| InjectionError::new("online", format!("unknown node {}", self.0)))?
            .state;
        rp.store_mut()
            .instantiate_to(state, 1)
            .map_err(|_| InjectionError::new("online", format!("{} must stay offline", self.0)))
    }
}

/// Restricts a VM's destination to a set of nodes. A VM that does not
/// run at the end of the plan is unaffected.
pub struct Fence {
    pub vm: Vm,
    pub nodes: Vec<Node>,
}

impl SatConstraint for Fence {
    fn inject(&self, rp: &mut ReconfigurationProblem) -> Result<(), InjectionError> {
        let allowed = indices(rp, "fence", &self.nodes)?;
        restrict(rp, "fence", self.vm, |host| allowed.contains(&host))
    }
}

/// Keeps a VM away from a set of nodes.
pub struct Ban {
    pub vm: Vm,
    pub nodes: Vec<Node>,
}

impl SatConstraint for Ban {
    fn inject(&self, rp: &mut ReconfigurationProblem) -> Result<(), InjectionError> {
        let banned = indices(rp, "ban", &self.nodes)?;
        restrict(rp, "ban", self.vm, |host| !banned.contains(&host))
    }
}

fn indices(
    rp: &ReconfigurationProblem,
    label: &str,
    nodes: &[Node],
) -> Result<Vec<i64>, InjectionError> {
    nodes
        .iter()
        .map(|&n| {
            rp.node_index(n)
                .map(|i| i as i64)
                .ok_or_else(|| InjectionError::new(label, format!("unknown node {n}")))
        })
        .collect()
}

/// Prune a VM's destination variable down to the hosts `keep` accepts.
fn restrict(
    rp: &mut ReconfigurationProblem,
    label: &str,
    vm: Vm,
    keep: impl Fn(i64) -> bool,
) -> Result<(), InjectionError> {
    let t = rp
        .vm_transition(vm)
        .ok_or_else(|| InjectionError::new(label, format!("unknown vm {vm}")))?;
    let Some(d) = t.d_slice else {
        return Ok(());
    };
    let hoster = d.hoster;
    let store = rp.store_mut();
    let no_host = || InjectionError::new(label, format!("{vm} has no acceptable host left"));
    if store.is_instantiated(hoster) {
        // Pinned placements (a resuming VM) cannot move to comply
        if keep(store.value(hoster)) {
            return Ok(());
        }
        return Err(no_host());
    }
    for value in store.domain_values(hoster) {
        if !keep(value) {
            store.remove_value(hoster, value).map_err(|_| no_host())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{Parameters, TargetStates};
    use replan_model::{Mapping, Model};

    fn problem() -> ReconfigurationProblem {
        let mut m = Mapping::default();
        m.add_online_node(Node(0));
        m.add_online_node(Node(1));
        m.add_online_node(Node(2));
        m.add_running_vm(Vm(0), Node(0)).unwrap();
        let model = Model {
            mapping: m,
            resources: vec![],
            attributes: Default::default(),
        };
        ReconfigurationProblem::new(model, &TargetStates::default(), Parameters::default()).unwrap()
    }

    #[test]
    fn test_offline_fixes_the_state() {
        let mut rp = problem();
        Offline(Node(2)).inject(&mut rp).unwrap();
        let state = rp.node_transition(Node(2)).unwrap().state;
        assert_eq!(rp.store_mut().value(state), 0);
    }

    #[test]
    fn test_offline_unknown_node_is_rejected() {
        let mut rp = problem();
        let err = Offline(Node(9)).inject(&mut rp).unwrap_err();
        assert!(err.to_string().contains("unknown node"));
    }

    #[test]
    fn test_conflicting_node_targets_are_unenforceable() {
        let mut rp = problem();
        Online(Node(1)).inject(&mut rp).unwrap();
        assert!(Offline(Node(1)).inject(&mut rp).is_err());
    }

    #[test]
    fn test_fence_narrows_the_destination() {
        let mut rp = problem();
        Fence {
            vm: Vm(0),
            nodes: vec![Node(1)],
        }
        .inject(&mut rp)
        .unwrap();
        let hoster = rp.vm_transition(Vm(0)).unwrap().d_slice.unwrap().hoster;
        assert_eq!(rp.store_mut().domain_values(hoster), vec![1]);
    }

    #[test]
    fn test_ban_removes_hosts() {
        let mut rp = problem();
        Ban {
            vm: Vm(0),
            nodes: vec![Node(0), Node(2)],
        }
        .inject(&mut rp)
        .unwrap();
        let hoster = rp.vm_transition(Vm(0)).unwrap().d_slice.unwrap().hoster;
        assert_eq!(rp.store_mut().domain_values(hoster), vec![1]);
    }

    #[test]
    fn test_fence_then_ban_can_empty_the_domain() {
        let mut rp = problem();
        Fence {
            vm: Vm(0),
            nodes: vec![Node(1)],
        }
        .inject(&mut rp)
        .unwrap();
        let err = Ban {
            vm: Vm(0),
            nodes: vec![Node(1)],
        }
        .inject(&mut rp)
        .unwrap_err();
        assert!(err.to_string().contains("no acceptable host"));
    }
}
