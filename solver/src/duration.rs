//! Duration estimation for reconfiguration actions.
//!
//! Each action kind maps to an evaluator deciding how long the action
//! takes on a given element. The stock evaluators read a per-element
//! model attribute and fall back to a constant, so operators can tune a
//! single VM ("this one migrates slowly") without touching code.

use std::collections::BTreeMap;
use std::fmt;

use replan_model::{Model, Node, Vm};

use crate::error::SolverError;

/// The kinds of actions a plan can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
    BootVm,
    ShutdownVm,
    Migrate,
    Suspend,
    Resume,
    Forge,
    Kill,
    BootNode,
    ShutdownNode,
}

/// The element an action applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    Vm(Vm),
    Node(Node),
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Vm(vm) => vm.fmt(f),
            Element::Node(n) => n.fmt(f),
        }
    }
}

/// Estimates the duration of one action kind on one element.
/// `None` means the evaluator cannot produce an estimate.
pub trait DurationEvaluator {
    fn evaluate(&self, model: &Model, element: Element) -> Option<i64>;
}

/// A fixed duration, whatever the element.
pub struct ConstantDuration(pub i64);

impl DurationEvaluator for ConstantDuration {
    fn evaluate(&self, _model: &Model, _element: Element) -> Option<i64> {
        Some(self.0)
    }
}

/// Reads an integer attribute on the element, falling back to a constant
/// when the attribute is absent.
pub struct AttributeDuration {
    pub key: String,
    pub fallback: i64,
}

impl AttributeDuration {
    pub fn new(key: &str, fallback: i64) -> Self {
        Self {
            key: key.to_string(),
            fallback,
        }
    }
}

impl DurationEvaluator for AttributeDuration {
    fn evaluate(&self, model: &Model, element: Element) -> Option<i64> {
        let attr = match element {
            Element::Vm(vm) => model.attributes.get_vm_int(vm, &self.key),
            Element::Node(n) => model.attributes.get_node_int(n, &self.key),
        };
        Some(attr.unwrap_or(self.fallback))
    }
}

/// The evaluator registry, one entry per action kind.
pub struct DurationEvaluators {
    evaluators: BTreeMap<ActionKind, Box<dyn DurationEvaluator>>,
}

impl DurationEvaluators {
    /// Attribute-driven evaluators with stock fallbacks for every kind.
    pub fn defaults() -> Self {
        let mut d = Self {
            evaluators: BTreeMap::new(),
        };
        d.register(ActionKind::BootVm, AttributeDuration::new("boot", 5));
        d.register(ActionKind::ShutdownVm, AttributeDuration::new("shutdown", 2));
        d.register(ActionKind::Migrate, AttributeDuration::new("migrate", 5));
        d.register(ActionKind::Suspend, AttributeDuration::new("suspend", 4));
        d.register(ActionKind::Resume, AttributeDuration::new("resume", 5));
        d.register(ActionKind::Forge, AttributeDuration::new("forge", 7));
        d.register(ActionKind::Kill, AttributeDuration::new("kill", 2));
        d.register(ActionKind::BootNode, AttributeDuration::new("boot", 10));
        d.register(ActionKind::ShutdownNode, AttributeDuration::new("shutdown", 5));
        d
    }

    /// Replace the evaluator for one action kind.
    pub fn register<E: DurationEvaluator + 'static>(&mut self, kind: ActionKind, eval: E) {
        self.evaluators.insert(kind, Box::new(eval));
    }

    /// The duration of `kind` on `element`. Any non-negative estimate is
    /// accepted; a negative one counts as missing.
    pub fn evaluate(
        &self,
        model: &Model,
        kind: ActionKind,
        element: Element,
    ) -> Result<i64, SolverError> {
        let missing = || SolverError::MissingDuration {
            kind,
            element: element.to_string(),
        };
        let d = self
            .evaluators
            .get(&kind)
            .and_then(|e| e.evaluate(model, element))
            .ok_or_else(missing)?;
        if d < 0 {
            return Err(missing());
        }
        Ok(d)
    }

    pub fn evaluate_vm(&self, model: &Model, kind: ActionKind, vm: Vm) -> Result<i64, SolverError> {
        self.evaluate(model, kind, Element::Vm(vm))
    }

    pub fn evaluate_node(
        &self,
        model: &Model,
        kind: ActionKind,
        node: Node,
    ) -> Result<i64, SolverError> {
        self.evaluate(model, kind, Element::Node(node))
    }
}

impl Default for DurationEvaluators {
    fn default() -> Self {
        Self::defaults()
    }
}
