//! The solver's output: a time-ordered set of scheduled actions.

use std::fmt;

use replan_model::{Node, Vm};
use serde::{Deserialize, Serialize};

/// One reconfiguration action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    BootNode { node: Node },
    ShutdownNode { node: Node },
    BootVm { vm: Vm, destination: Node },
    ShutdownVm { vm: Vm, on: Node },
    Migrate { vm: Vm, from: Node, to: Node },
    Suspend { vm: Vm, on: Node },
    Resume { vm: Vm, on: Node },
    Forge { vm: Vm },
    Kill { vm: Vm, on: Option<Node> },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::BootNode { node } => write!(f, "boot {node}"),
            Action::ShutdownNode { node } => write!(f, "shutdown {node}"),
            Action::BootVm { vm, destination } => write!(f, "boot {vm} on {destination}"),
            Action::ShutdownVm { vm, on } => write!(f, "shutdown {vm} on {on}"),
            Action::Migrate { vm, from, to } => write!(f, "migrate {vm} from {from} to {to}"),
            Action::Suspend { vm, on } => write!(f, "suspend {vm} on {on}"),
            Action::Resume { vm, on } => write!(f, "resume {vm} on {on}"),
            Action::Forge { vm } => write!(f, "forge {vm}"),
            Action::Kill { vm, on: Some(n) } => write!(f, "kill {vm} on {n}"),
            Action::Kill { vm, on: None } => write!(f, "kill {vm}"),
        }
    }
}

/// An action with its scheduled execution window `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionItem {
    pub start: i64,
    pub end: i64,
    pub action: Action,
}

/// A complete reconfiguration plan. Applying every action within its
/// window moves the cluster from the source placement to the target
/// placement. An empty plan is valid: it means nothing has to change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconfigurationPlan {
    pub actions: Vec<ActionItem>,
}

impl ReconfigurationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, start: i64, end: i64, action: Action) {
        debug_assert!(start <= end, "action window ends before it starts");
        self.actions.push(ActionItem { start, end, action });
    }

    /// Order by start instant, then end, for deterministic output.
    pub fn sort(&mut self) {
        self.actions
            .sort_by_key(|a| (a.start, a.end, format!("{}", a.action)));
    }

    /// The completion instant of the last action, 0 for an empty plan.
    pub fn duration(&self) -> i64 {
        self.actions.iter().map(|a| a.end).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionItem> {
        self.actions.iter()
    }
}

impl fmt::Display for ReconfigurationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.actions.is_empty() {
            return writeln!(f, "no action");
        }
        for a in &self.actions {
            writeln!(f, "{}..{}: {}", a.start, a.end, a.action)?;
        }
        Ok(())
    }
}
