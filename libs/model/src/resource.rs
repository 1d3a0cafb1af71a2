//! A shareable resource dimension: per-node capacity, per-VM consumption.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Mapping, Node, Vm};

/// One resource dimension (cpu, memory, bandwidth, ...).
///
/// Capacities and consumptions fall back to the declared defaults when an
/// element has no explicit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareableResource {
    pub id: String,
    pub default_capacity: i64,
    pub default_consumption: i64,
    #[serde(default)]
    capacities: BTreeMap<Node, i64>,
    #[serde(default)]
    consumptions: BTreeMap<Vm, i64>,
}

impl ShareableResource {
    /// A new dimension with the given defaults.
    pub fn new(id: &str, default_capacity: i64, default_consumption: i64) -> Self {
        Self {
            id: id.to_string(),
            default_capacity,
            default_consumption,
            capacities: BTreeMap::new(),
            consumptions: BTreeMap::new(),
        }
    }

    /// The capacity of `n` in this dimension.
    pub fn capacity(&self, n: Node) -> i64 {
        self.capacities.get(&n).copied().unwrap_or(self.default_capacity)
    }

    /// The consumption of `vm` in this dimension.
    pub fn consumption(&self, vm: Vm) -> i64 {
        self.consumptions
            .get(&vm)
            .copied()
            .unwrap_or(self.default_consumption)
    }

    pub fn set_capacity(&mut self, n: Node, capa: i64) {
        self.capacities.insert(n, capa);
    }

    pub fn set_consumption(&mut self, vm: Vm, cons: i64) {
        self.consumptions.insert(vm, cons);
    }

    /// Total consumption of the VMs currently running on `n`.
    pub fn used_capacity(&self, mapping: &Mapping, n: Node) -> i64 {
        mapping.running_vms_on(n).map(|vm| self.consumption(vm)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_overrides() {
        let mut r = ShareableResource::new("cpu", 8, 1);
        assert_eq!(r.capacity(Node(3)), 8);
        assert_eq!(r.consumption(Vm(3)), 1);
        r.set_capacity(Node(3), 16);
        r.set_consumption(Vm(3), 4);
        assert_eq!(r.capacity(Node(3)), 16);
        assert_eq!(r.consumption(Vm(3)), 4);
    }

    #[test]
    fn test_used_capacity_counts_running_only() {
        let mut m = Mapping::default();
        m.add_online_node(Node(0));
        m.add_running_vm(Vm(0), Node(0)).unwrap();
        m.add_sleeping_vm(Vm(1), Node(0)).unwrap();

        let mut r = ShareableResource::new("mem", 10, 0);
        r.set_consumption(Vm(0), 3);
        r.set_consumption(Vm(1), 5);
        assert_eq!(r.used_capacity(&m, Node(0)), 3);
    }
}
