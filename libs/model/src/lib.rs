//! # replan-model
//!
//! Cluster snapshot containers consumed by the reconfiguration solver.
//!
//! A [`Model`] bundles three things:
//!
//! - a [`Mapping`]: which nodes are online, where each VM sits and in
//!   which state
//! - zero or more [`ShareableResource`] views: one capacity/consumption
//!   dimension per physical resource (cpu, mem, ...)
//! - [`Attributes`]: free-form typed key/values attached to VMs and nodes
//!   (template identifiers, per-action duration overrides, ...)
//!
//! VMs and nodes are opaque integer identifiers. The solver assigns its
//! own dense indices; the identifiers here are the stable ones external
//! converters round-trip.

mod attributes;
mod mapping;
mod resource;

pub use attributes::{AttrValue, Attributes};
pub use mapping::{Mapping, ModelError};
pub use resource::ShareableResource;

use serde::{Deserialize, Serialize};

/// A virtual machine identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Vm(pub u32);

/// A physical node identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Node(pub u32);

impl std::fmt::Display for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vm#{}", self.0)
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// The state of a VM in a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    /// Known to the system but not yet instantiated anywhere.
    Init,
    /// Instantiated, not running on any node.
    Ready,
    /// Running on a node.
    Running,
    /// Suspended on a node.
    Sleeping,
    /// Removed from the system.
    Killed,
}

/// The state of a node in a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Online,
    Offline,
}

/// A complete cluster snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Model {
    pub mapping: Mapping,
    #[serde(default)]
    pub resources: Vec<ShareableResource>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Model {
    /// Look up a resource dimension by identifier.
    pub fn resource(&self, id: &str) -> Option<&ShareableResource> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Mutable resource lookup.
    pub fn resource_mut(&mut self, id: &str) -> Option<&mut ShareableResource> {
        self.resources.iter_mut().find(|r| r.id == id)
    }
}
