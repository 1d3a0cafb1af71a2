//! The propagator trait, the fixpoint engine, and the elementary
//! arithmetic propagators the model is built from.
//!
//! Propagation is round-based: every propagator runs until a full pass
//! leaves the store's revision counter untouched. The final fixpoint does
//! not depend on the order propagators run in, only the sequence of
//! intermediate prunings does.

use crate::var::{Contradiction, Entailment, IntVar, PropResult, Store};

/// Prunes variable domains to maintain one constraint's consistency.
pub trait Propagator {
    fn propagate(&mut self, store: &mut Store) -> PropResult;

    /// Satisfaction check on the current (possibly partial) assignment.
    /// `Undefined` whenever a referenced variable is still free.
    fn is_entailed(&self, _store: &Store) -> Entailment {
        Entailment::Undefined
    }
}

/// The set of propagators of one problem.
#[derive(Default)]
pub struct Propagators {
    items: Vec<Box<dyn Propagator>>,
}

impl Propagators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&mut self, p: Box<dyn Propagator>) {
        self.items.push(p);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Run every propagator until a stable fixpoint is reached.
    pub fn fixpoint(&mut self, store: &mut Store) -> PropResult {
        loop {
            let before = store.revision();
            for p in &mut self.items {
                p.propagate(store)?;
            }
            if store.revision() == before {
                return Ok(());
            }
        }
    }
}

/// `start + duration == end`, bounds-consistent.
pub struct TaskMonitor {
    pub start: IntVar,
    pub duration: IntVar,
    pub end: IntVar,
}

impl Propagator for TaskMonitor {
    fn propagate(&mut self, s: &mut Store) -> PropResult {
        let (st, du, en) = (self.start, self.duration, self.end);
        s.set_min(en, s.min(st) + s.min(du))?;
        s.set_max(en, s.max(st) + s.max(du))?;
        s.set_min(st, s.min(en) - s.max(du))?;
        s.set_max(st, s.max(en) - s.min(du))?;
        s.set_min(du, s.min(en) - s.max(st))?;
        s.set_max(du, s.max(en) - s.min(st))?;
        Ok(())
    }

    fn is_entailed(&self, s: &Store) -> Entailment {
        if !(s.is_instantiated(self.start)
            && s.is_instantiated(self.duration)
            && s.is_instantiated(self.end))
        {
            return Entailment::Undefined;
        }
        if s.value(self.start) + s.value(self.duration) == s.value(self.end) {
            Entailment::True
        } else {
            Entailment::False
        }
    }
}

/// `x <= y`.
pub struct Leq {
    pub x: IntVar,
    pub y: IntVar,
}

impl Propagator for Leq {
    fn propagate(&mut self, s: &mut Store) -> PropResult {
        s.set_min(self.y, s.min(self.x))?;
        s.set_max(self.x, s.max(self.y))?;
        Ok(())
    }

    fn is_entailed(&self, s: &Store) -> Entailment {
        if s.max(self.x) <= s.min(self.y) {
            Entailment::True
        } else if s.min(self.x) > s.max(self.y) {
            Entailment::False
        } else {
            Entailment::Undefined
        }
    }
}

/// `total == sum(terms)`, bounds-consistent both ways.
pub struct Sum {
    pub terms: Vec<IntVar>,
    pub total: IntVar,
}

impl Propagator for Sum {
    fn propagate(&mut self, s: &mut Store) -> PropResult {
        let min_sum: i64 = self.terms.iter().map(|&t| s.min(t)).sum();
        let max_sum: i64 = self.terms.iter().map(|&t| s.max(t)).sum();
        s.set_min(self.total, min_sum)?;
        s.set_max(self.total, max_sum)?;
        for &t in &self.terms {
            // Bounds of the sum of the other terms
            let others_min = min_sum - s.min(t);
            let others_max = max_sum - s.max(t);
            s.set_max(t, s.max(self.total) - others_min)?;
            s.set_min(t, s.min(self.total) - others_max)?;
        }
        Ok(())
    }

    fn is_entailed(&self, s: &Store) -> Entailment {
        if self.terms.iter().any(|&t| !s.is_instantiated(t))
            || !s.is_instantiated(self.total)
        {
            return Entailment::Undefined;
        }
        let sum: i64 = self.terms.iter().map(|&t| s.value(t)).sum();
        if sum == s.value(self.total) {
            Entailment::True
        } else {
            Entailment::False
        }
    }
}

/// `sum(terms) >= rhs`, with a constant right-hand side.
pub struct SumGeq {
    pub terms: Vec<IntVar>,
    pub rhs: i64,
}

impl Propagator for SumGeq {
    fn propagate(&mut self, s: &mut Store) -> PropResult {
        let max_sum: i64 = self.terms.iter().map(|&t| s.max(t)).sum();
        if max_sum < self.rhs {
            return Err(Contradiction);
        }
        for &t in &self.terms {
            let others_max = max_sum - s.max(t);
            s.set_min(t, self.rhs - others_max)?;
        }
        Ok(())
    }

    fn is_entailed(&self, s: &Store) -> Entailment {
        let min_sum: i64 = self.terms.iter().map(|&t| s.min(t)).sum();
        let max_sum: i64 = self.terms.iter().map(|&t| s.max(t)).sum();
        if min_sum >= self.rhs {
            Entailment::True
        } else if max_sum < self.rhs {
            Entailment::False
        } else {
            Entailment::Undefined
        }
    }
}

/// Channels host variables with one cardinality variable per host:
/// `counts[h] == |{ i : hosts[i] == h }|`. Host values are `0..counts.len()`.
pub struct Occurrences {
    pub hosts: Vec<IntVar>,
    pub counts: Vec<IntVar>,
}

impl Propagator for Occurrences {
    fn propagate(&mut self, s: &mut Store) -> PropResult {
        for h in 0..self.counts.len() {
            let hv = h as i64;
            let fixed = self
                .hosts
                .iter()
                .filter(|&&x| s.is_instantiated(x) && s.value(x) == hv)
                .count() as i64;
            let candidates = self
                .hosts
                .iter()
                .filter(|&&x| s.contains(x, hv))
                .count() as i64;
            let count = self.counts[h];
            s.set_min(count, fixed)?;
            s.set_max(count, candidates)?;
            if s.max(count) == fixed {
                // The host is full: nobody else may pick it
                for &x in &self.hosts.clone() {
                    if !s.is_instantiated(x) && s.contains(x, hv) {
                        s.remove_value(x, hv)?;
                    }
                }
            } else if s.min(count) == candidates {
                // Every candidate is needed
                for &x in &self.hosts.clone() {
                    if !s.is_instantiated(x) && s.contains(x, hv) {
                        s.instantiate_to(x, hv)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn is_entailed(&self, s: &Store) -> Entailment {
        if self.hosts.iter().any(|&x| !s.is_instantiated(x))
            || self.counts.iter().any(|&c| !s.is_instantiated(c))
        {
            return Entailment::Undefined;
        }
        for h in 0..self.counts.len() {
            let hv = h as i64;
            let n = self.hosts.iter().filter(|&&x| s.value(x) == hv).count() as i64;
            if n != s.value(self.counts[h]) {
                return Entailment::False;
            }
        }
        Entailment::True
    }
}

/// Reifies node usage: `used == 1 <=> count >= 1`, with `used` a 0/1
/// variable.
pub struct UsedNode {
    pub count: IntVar,
    pub used: IntVar,
}

impl Propagator for UsedNode {
    fn propagate(&mut self, s: &mut Store) -> PropResult {
        if s.min(self.count) >= 1 {
            s.instantiate_to(self.used, 1)?;
        }
        if s.max(self.count) == 0 {
            s.instantiate_to(self.used, 0)?;
        }
        if s.is_instantiated(self.used) {
            if s.value(self.used) == 0 {
                s.set_max(self.count, 0)?;
            } else {
                s.set_min(self.count, 1)?;
            }
        }
        Ok(())
    }
}
