//! Integer decision variables over trailed cells, and the propagation
//! fixpoint engine.
//!
//! Domains come in two shapes: plain bounds `[min, max]` for time
//! variables, and bounds plus an enumerated bitmask for small domains
//! (host variables), which supports removing interior values. Every
//! domain mutation goes through the [`replan_trail::Environment`] so the
//! search loop can revert it.

use replan_trail::{BoolCell, Environment, IntCell};

/// Raised when a domain would become empty. Internal control flow only:
/// the search loop converts it into a backtrack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contradiction;

/// Outcome of a domain-tightening operation.
pub type PropResult = Result<(), Contradiction>;

/// Tri-state satisfaction check, `Undefined` while variables are still
/// free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entailment {
    True,
    False,
    Undefined,
}

/// Handle on an integer decision variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntVar(u32);

impl IntVar {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
struct Mask {
    offset: i64,
    bits: Vec<BoolCell>,
}

#[derive(Debug)]
struct VarData {
    min: IntCell,
    max: IntCell,
    mask: Option<Mask>,
}

/// The variable store: every decision variable of one solving session,
/// backed by one backtracking environment.
#[derive(Debug)]
pub struct Store {
    env: Environment,
    vars: Vec<VarData>,
    /// Bumped on every effective domain change; the fixpoint loop and the
    /// cumulative propagator use it to detect quiescence. Monotone, never
    /// reverted.
    revision: u64,
}

impl Store {
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
            vars: Vec::new(),
            revision: 0,
        }
    }

    /// A variable with a plain bounds domain.
    pub fn bounded(&mut self, min: i64, max: i64) -> IntVar {
        assert!(min <= max, "empty initial domain [{min}, {max}]");
        let min = self.env.new_int(min);
        let max = self.env.new_int(max);
        self.vars.push(VarData {
            min,
            max,
            mask: None,
        });
        IntVar(self.vars.len() as u32 - 1)
    }

    /// A variable fixed to `value`.
    pub fn constant(&mut self, value: i64) -> IntVar {
        self.bounded(value, value)
    }

    /// A 0/1 variable.
    pub fn bool01(&mut self) -> IntVar {
        self.bounded(0, 1)
    }

    /// A variable with an enumerated domain `lo..=hi`, supporting interior
    /// value removal. Meant for small domains (host indices).
    pub fn enumerated(&mut self, lo: i64, hi: i64) -> IntVar {
        assert!(lo <= hi, "empty initial domain [{lo}, {hi}]");
        let min = self.env.new_int(lo);
        let max = self.env.new_int(hi);
        let bits = (lo..=hi).map(|_| self.env.new_bool(true)).collect();
        self.vars.push(VarData {
            min,
            max,
            mask: Some(Mask { offset: lo, bits }),
        });
        IntVar(self.vars.len() as u32 - 1)
    }

    pub fn min(&self, v: IntVar) -> i64 {
        self.env.get_int(self.vars[v.index()].min)
    }

    pub fn max(&self, v: IntVar) -> i64 {
        self.env.get_int(self.vars[v.index()].max)
    }

    pub fn is_instantiated(&self, v: IntVar) -> bool {
        self.min(v) == self.max(v)
    }

    /// The value of an instantiated variable.
    ///
    /// # Panics
    ///
    /// Panics when the variable is not instantiated.
    pub fn value(&self, v: IntVar) -> i64 {
        assert!(self.is_instantiated(v), "reading a free variable");
        self.min(v)
    }

    /// Whether `value` is still in the domain of `v`.
    pub fn contains(&self, v: IntVar, value: i64) -> bool {
        let data = &self.vars[v.index()];
        if value < self.env.get_int(data.min) || value > self.env.get_int(data.max) {
            return false;
        }
        match &data.mask {
            None => true,
            Some(m) => self.env.get_bool(m.bits[(value - m.offset) as usize]),
        }
    }

    /// The remaining values of the domain, ascending.
    pub fn domain_values(&self, v: IntVar) -> Vec<i64> {
        (self.min(v)..=self.max(v))
            .filter(|&val| self.contains(v, val))
            .collect()
    }

    /// Raise the lower bound to at least `value`.
    pub fn set_min(&mut self, v: IntVar, value: i64) -> PropResult {
        if value <= self.min(v) {
            return Ok(());
        }
        if value > self.max(v) {
            return Err(Contradiction);
        }
        // With a mask, slide up to the next present value
        let value = match &self.vars[v.index()].mask {
            None => value,
            Some(_) => {
                let max = self.max(v);
                match (value..=max).find(|&val| self.mask_contains(v, val)) {
                    Some(val) => val,
                    None => return Err(Contradiction),
                }
            }
        };
        let cell = self.vars[v.index()].min;
        self.env.set_int(cell, value);
        self.revision += 1;
        Ok(())
    }

    /// Lower the upper bound to at most `value`.
    pub fn set_max(&mut self, v: IntVar, value: i64) -> PropResult {
        if value >= self.max(v) {
            return Ok(());
        }
        if value < self.min(v) {
            return Err(Contradiction);
        }
        let value = match &self.vars[v.index()].mask {
            None => value,
            Some(_) => {
                let min = self.min(v);
                match (min..=value).rev().find(|&val| self.mask_contains(v, val)) {
                    Some(val) => val,
                    None => return Err(Contradiction),
                }
            }
        };
        let cell = self.vars[v.index()].max;
        self.env.set_int(cell, value);
        self.revision += 1;
        Ok(())
    }

    /// Reduce the domain to the single value `value`.
    pub fn instantiate_to(&mut self, v: IntVar, value: i64) -> PropResult {
        if !self.contains(v, value) {
            return Err(Contradiction);
        }
        self.set_min(v, value)?;
        self.set_max(v, value)
    }

    /// Remove one value. Interior removal requires an enumerated domain.
    pub fn remove_value(&mut self, v: IntVar, value: i64) -> PropResult {
        if !self.contains(v, value) {
            return Ok(());
        }
        if self.min(v) == self.max(v) {
            // Removing the last value
            return Err(Contradiction);
        }
        match &self.vars[v.index()].mask {
            Some(m) => {
                let bit = m.bits[(value - m.offset) as usize];
                self.env.set_bool(bit, false);
                self.revision += 1;
                if value == self.min(v) {
                    let cur = self.min(v);
                    self.slide_min(v, cur)?;
                } else if value == self.max(v) {
                    let cur = self.max(v);
                    self.slide_max(v, cur)?;
                }
                Ok(())
            }
            None => {
                if value == self.min(v) {
                    self.set_min(v, value + 1)
                } else if value == self.max(v) {
                    self.set_max(v, value - 1)
                } else {
                    panic!("interior removal on a bounds-only domain");
                }
            }
        }
    }

    fn mask_contains(&self, v: IntVar, value: i64) -> bool {
        match &self.vars[v.index()].mask {
            None => true,
            Some(m) => self.env.get_bool(m.bits[(value - m.offset) as usize]),
        }
    }

    fn slide_min(&mut self, v: IntVar, from: i64) -> PropResult {
        let max = self.max(v);
        match (from..=max).find(|&val| self.mask_contains(v, val)) {
            Some(val) => {
                let cell = self.vars[v.index()].min;
                self.env.set_int(cell, val);
                Ok(())
            }
            None => Err(Contradiction),
        }
    }

    fn slide_max(&mut self, v: IntVar, from: i64) -> PropResult {
        let min = self.min(v);
        match (min..=from).rev().find(|&val| self.mask_contains(v, val)) {
            Some(val) => {
                let cell = self.vars[v.index()].max;
                self.env.set_int(cell, val);
                Ok(())
            }
            None => Err(Contradiction),
        }
    }

    /// Monotone change counter.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn world_index(&self) -> u32 {
        self.env.world_index()
    }

    pub fn push_world(&mut self) {
        self.env.push_world();
    }

    pub fn pop_world(&mut self) {
        self.env.pop_world();
    }

    /// Direct access for components that keep their own trailed state
    /// (the cumulative scheduler's membership vectors).
    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// The number of variables allocated so far.
    pub fn nb_vars(&self) -> usize {
        self.vars.len()
    }

    /// Iterate over every allocated variable handle.
    pub fn all_vars(&self) -> impl Iterator<Item = IntVar> {
        (0..self.vars.len() as u32).map(IntVar)
    }

    /// The value of every variable, once all are instantiated.
    ///
    /// # Panics
    ///
    /// Panics when some variable is still free: solutions are only
    /// snapshotted once the search instantiated everything.
    pub fn snapshot(&self) -> Vec<i64> {
        self.all_vars().map(|v| self.value(v)).collect()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_tightening() {
        let mut s = Store::new();
        let v = s.bounded(0, 10);
        s.set_min(v, 3).unwrap();
        s.set_max(v, 7).unwrap();
        assert_eq!((s.min(v), s.max(v)), (3, 7));
        assert!(s.set_min(v, 8).is_err());
        assert!(s.set_max(v, 2).is_err());
        s.instantiate_to(v, 5).unwrap();
        assert_eq!(s.value(v), 5);
    }

    #[test]
    fn test_enumerated_removal_slides_bounds() {
        let mut s = Store::new();
        let v = s.enumerated(0, 3);
        s.remove_value(v, 0).unwrap();
        assert_eq!(s.min(v), 1);
        s.remove_value(v, 2).unwrap();
        assert!(!s.contains(v, 2));
        assert_eq!(s.domain_values(v), vec![1, 3]);
        s.remove_value(v, 3).unwrap();
        assert_eq!(s.value(v), 1);
        assert!(s.remove_value(v, 1).is_err());
    }

    #[test]
    fn test_set_min_skips_removed_values() {
        let mut s = Store::new();
        let v = s.enumerated(0, 4);
        s.remove_value(v, 2).unwrap();
        // Raising min to a removed value slides to the next present one
        s.set_min(v, 2).unwrap();
        assert_eq!(s.min(v), 3);
    }

    #[test]
    fn test_domain_restored_on_backtrack() {
        let mut s = Store::new();
        let v = s.enumerated(0, 3);
        s.push_world();
        s.remove_value(v, 1).unwrap();
        s.instantiate_to(v, 3).unwrap();
        s.pop_world();
        assert_eq!(s.domain_values(v), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_revision_counts_effective_changes() {
        let mut s = Store::new();
        let v = s.bounded(0, 10);
        let r0 = s.revision();
        s.set_min(v, 0).unwrap(); // no-op
        assert_eq!(s.revision(), r0);
        s.set_min(v, 1).unwrap();
        assert!(s.revision() > r0);
    }
}
