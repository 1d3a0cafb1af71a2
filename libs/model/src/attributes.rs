//! Free-form typed attributes attached to VMs and nodes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Node, Vm};

/// An attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    String(String),
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

/// Attribute store for every VM and node of a model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(default)]
    vms: BTreeMap<Vm, BTreeMap<String, AttrValue>>,
    #[serde(default)]
    nodes: BTreeMap<Node, BTreeMap<String, AttrValue>>,
}

impl Attributes {
    pub fn set_vm(&mut self, vm: Vm, key: &str, value: impl Into<AttrValue>) {
        self.vms
            .entry(vm)
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn set_node(&mut self, n: Node, key: &str, value: impl Into<AttrValue>) {
        self.nodes
            .entry(n)
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn get_vm(&self, vm: Vm, key: &str) -> Option<&AttrValue> {
        self.vms.get(&vm).and_then(|m| m.get(key))
    }

    pub fn get_node(&self, n: Node, key: &str) -> Option<&AttrValue> {
        self.nodes.get(&n).and_then(|m| m.get(key))
    }

    /// String attribute of a VM, when present and a string.
    pub fn get_vm_str(&self, vm: Vm, key: &str) -> Option<&str> {
        match self.get_vm(vm, key) {
            Some(AttrValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Integer attribute of a VM, when present and an integer.
    pub fn get_vm_int(&self, vm: Vm, key: &str) -> Option<i64> {
        match self.get_vm(vm, key) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Boolean attribute of a VM, when present and a boolean.
    pub fn get_vm_bool(&self, vm: Vm, key: &str) -> Option<bool> {
        match self.get_vm(vm, key) {
            Some(AttrValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Integer attribute of a node, when present and an integer.
    pub fn get_node_int(&self, n: Node, key: &str) -> Option<i64> {
        match self.get_node(n, key) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }
}
