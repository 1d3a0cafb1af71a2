//! On-disk problem instances.
//!
//! An instance bundles the model (mapping, resources, attributes), the
//! target VM states and the placement constraints, as one JSON document.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use replan_model::{Model, Node, Vm};
use replan_solver::{Ban, Fence, MaxIdleNodes, Offline, Online, Overbook, SatConstraint, TargetStates};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Instance {
    pub model: Model,
    #[serde(default)]
    pub targets: Targets,
    #[serde(default)]
    pub constraints: Vec<ConstraintSpec>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Targets {
    #[serde(default)]
    pub running: Vec<Vm>,
    #[serde(default)]
    pub ready: Vec<Vm>,
    #[serde(default)]
    pub sleeping: Vec<Vm>,
    #[serde(default)]
    pub killed: Vec<Vm>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintSpec {
    Offline { node: Node },
    Online { node: Node },
    Fence { vm: Vm, nodes: Vec<Node> },
    Ban { vm: Vm, nodes: Vec<Node> },
    Overbook { node: Node, resource: String, ratio: f64 },
    MaxIdleNodes { limit: usize },
}

impl Instance {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("cannot parse {}", path.display()))
    }

    pub fn target_states(&self) -> TargetStates {
        TargetStates {
            running: self.targets.running.clone(),
            ready: self.targets.ready.clone(),
            sleeping: self.targets.sleeping.clone(),
            killed: self.targets.killed.clone(),
        }
    }

    pub fn constraints(&self) -> Vec<Box<dyn SatConstraint>> {
        self.constraints
            .iter()
            .map(|c| -> Box<dyn SatConstraint> {
                match c {
                    ConstraintSpec::Offline { node } => Box::new(Offline(*node)),
                    ConstraintSpec::Online { node } => Box::new(Online(*node)),
                    ConstraintSpec::Fence { vm, nodes } => Box::new(Fence {
                        vm: *vm,
                        nodes: nodes.clone(),
                    }),
                    ConstraintSpec::Ban { vm, nodes } => Box::new(Ban {
                        vm: *vm,
                        nodes: nodes.clone(),
                    }),
                    ConstraintSpec::Overbook {
                        node,
                        resource,
                        ratio,
                    } => Box::new(Overbook {
                        node: *node,
                        resource: resource.clone(),
                        ratio: *ratio,
                    }),
                    ConstraintSpec::MaxIdleNodes { limit } => Box::new(MaxIdleNodes(*limit)),
                }
            })
            .collect()
    }
}
