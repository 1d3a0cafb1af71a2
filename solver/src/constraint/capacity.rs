//! Constraints on node capacity and cluster-wide usage.

use replan_model::Node;

use crate::constraint::SatConstraint;
use crate::error::InjectionError;
use crate::problem::ReconfigurationProblem;
use crate::propagate::SumGeq;

/// Multiplies a node's physical capacity on one resource, letting more
/// VMs share it.
pub struct Overbook {
    pub node: Node,
    pub resource: String,
    pub ratio: f64,
}

impl SatConstraint for Overbook {
    fn inject(&self, rp: &mut ReconfigurationProblem) -> Result<(), InjectionError> {
        rp.scale_capacity(self.node, &self.resource, self.ratio)
    }
}

/// At most `limit` of the initially online nodes may end the plan
/// without any VM. Counts every initially online node, including those
/// that get shut down.
pub struct MaxIdleNodes(pub usize);

impl SatConstraint for MaxIdleNodes {
    fn inject(&self, rp: &mut ReconfigurationProblem) -> Result<(), InjectionError> {
        let online = rp.nb_online();
        if self.0 >= online {
            return Ok(());
        }
        let terms = rp.used_vars()[..online].to_vec();
        rp.post(Box::new(SumGeq {
            terms,
            rhs: (online - self.0) as i64,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{Parameters, TargetStates};
    use replan_model::{Mapping, Model, ShareableResource, Vm};

    fn loaded_problem() -> ReconfigurationProblem {
        let mut m = Mapping::default();
        m.add_online_node(Node(0));
        m.add_online_node(Node(1));
        m.add_running_vm(Vm(0), Node(0)).unwrap();
        m.add_running_vm(Vm(1), Node(0)).unwrap();
        let mut cpu = ShareableResource::new("cpu", 4, 2);
        cpu.set_consumption(Vm(1), 3);
        let model = Model {
            mapping: m,
            resources: vec![cpu],
            attributes: Default::default(),
        };
        ReconfigurationProblem::new(model, &TargetStates::default(), Parameters::default()).unwrap()
    }

    #[test]
    fn test_overbook_accepts_a_fitting_load() {
        // Load is 5 out of 4: only fits once scaled
        let mut rp = loaded_problem();
        Overbook {
            node: Node(0),
            resource: "cpu".to_string(),
            ratio: 2.0,
        }
        .inject(&mut rp)
        .unwrap();
    }

    #[test]
    fn test_overbook_rejects_an_overcommitted_node() {
        let mut rp = loaded_problem();
        let err = Overbook {
            node: Node(0),
            resource: "cpu".to_string(),
            ratio: 1.0,
        }
        .inject(&mut rp)
        .unwrap_err();
        assert!(err.to_string().contains("already uses"));
    }

    #[test]
    fn test_overbook_unknown_resource_is_rejected() {
        let mut rp = loaded_problem();
        let err = Overbook {
            node: Node(0),
            resource: "gpu".to_string(),
            ratio: 2.0,
        }
        .inject(&mut rp)
        .unwrap_err();
        assert!(err.to_string().contains("unknown resource"));
    }

    #[test]
    fn test_max_idle_above_fleet_size_is_a_noop() {
        let mut rp = loaded_problem();
        MaxIdleNodes(5).inject(&mut rp).unwrap();
    }

    #[test]
    fn test_max_idle_posts_a_lower_bound() {
        let mut rp = loaded_problem();
        MaxIdleNodes(0).inject(&mut rp).unwrap();
    }
}
