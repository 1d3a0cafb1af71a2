//! The mapping: node states and VM placements.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Node, NodeState, Vm, VmState};

/// Errors raised when a mapping mutation would break its invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("{0} is not declared in the mapping")]
    UnknownNode(Node),

    #[error("{0} is offline and cannot host VMs")]
    OfflineHost(Node),

    #[error("{0} still hosts VMs and cannot go offline")]
    NonEmptyNode(Node),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct VmEntry {
    state: VmState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    host: Option<Node>,
}

/// Node states plus per-VM state and placement.
///
/// Invariant: a VM in the running or sleeping state is hosted by exactly
/// one online node; a VM in any other state is hosted nowhere.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mapping {
    nodes: BTreeMap<Node, NodeState>,
    vms: BTreeMap<Vm, VmEntry>,
}

impl Mapping {
    /// Declare an online node. Re-declaring an empty node flips its state.
    pub fn add_online_node(&mut self, n: Node) {
        self.nodes.insert(n, NodeState::Online);
    }

    /// Declare an offline node.
    ///
    /// Fails when the node currently hosts VMs.
    pub fn add_offline_node(&mut self, n: Node) -> Result<(), ModelError> {
        if self.vms.values().any(|e| e.host == Some(n)) {
            return Err(ModelError::NonEmptyNode(n));
        }
        self.nodes.insert(n, NodeState::Offline);
        Ok(())
    }

    /// Place `vm` running on `host`.
    pub fn add_running_vm(&mut self, vm: Vm, host: Node) -> Result<(), ModelError> {
        self.place(vm, VmState::Running, host)
    }

    /// Place `vm` sleeping on `host`.
    pub fn add_sleeping_vm(&mut self, vm: Vm, host: Node) -> Result<(), ModelError> {
        self.place(vm, VmState::Sleeping, host)
    }

    /// Declare `vm` ready (instantiated, hosted nowhere).
    pub fn add_ready_vm(&mut self, vm: Vm) {
        self.vms.insert(
            vm,
            VmEntry {
                state: VmState::Ready,
                host: None,
            },
        );
    }

    /// Declare `vm` known but not yet instantiated.
    pub fn add_init_vm(&mut self, vm: Vm) {
        self.vms.insert(
            vm,
            VmEntry {
                state: VmState::Init,
                host: None,
            },
        );
    }

    fn place(&mut self, vm: Vm, state: VmState, host: Node) -> Result<(), ModelError> {
        match self.nodes.get(&host) {
            None => return Err(ModelError::UnknownNode(host)),
            Some(NodeState::Offline) => return Err(ModelError::OfflineHost(host)),
            Some(NodeState::Online) => {}
        }
        self.vms.insert(
            vm,
            VmEntry {
                state,
                host: Some(host),
            },
        );
        Ok(())
    }

    /// State of a node, if declared.
    pub fn node_state(&self, n: Node) -> Option<NodeState> {
        self.nodes.get(&n).copied()
    }

    /// State of a VM, if declared.
    pub fn vm_state(&self, vm: Vm) -> Option<VmState> {
        self.vms.get(&vm).map(|e| e.state)
    }

    /// The node hosting `vm`, when it is running or sleeping.
    pub fn vm_location(&self, vm: Vm) -> Option<Node> {
        self.vms.get(&vm).and_then(|e| e.host)
    }

    pub fn is_running(&self, vm: Vm) -> bool {
        self.vm_state(vm) == Some(VmState::Running)
    }

    pub fn is_sleeping(&self, vm: Vm) -> bool {
        self.vm_state(vm) == Some(VmState::Sleeping)
    }

    pub fn is_online(&self, n: Node) -> bool {
        self.node_state(n) == Some(NodeState::Online)
    }

    /// Every declared node, online first, in stable identifier order.
    pub fn nodes(&self) -> impl Iterator<Item = Node> + '_ {
        self.online_nodes().chain(self.offline_nodes())
    }

    pub fn online_nodes(&self) -> impl Iterator<Item = Node> + '_ {
        self.nodes
            .iter()
            .filter(|(_, s)| **s == NodeState::Online)
            .map(|(n, _)| *n)
    }

    pub fn offline_nodes(&self) -> impl Iterator<Item = Node> + '_ {
        self.nodes
            .iter()
            .filter(|(_, s)| **s == NodeState::Offline)
            .map(|(n, _)| *n)
    }

    /// Every declared VM in stable identifier order.
    pub fn vms(&self) -> impl Iterator<Item = Vm> + '_ {
        self.vms.keys().copied()
    }

    /// Running VMs hosted on `n`.
    pub fn running_vms_on(&self, n: Node) -> impl Iterator<Item = Vm> + '_ {
        self.vms
            .iter()
            .filter(move |(_, e)| e.state == VmState::Running && e.host == Some(n))
            .map(|(vm, _)| *vm)
    }

    pub fn nb_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn nb_vms(&self) -> usize {
        self.vms.len()
    }
}
