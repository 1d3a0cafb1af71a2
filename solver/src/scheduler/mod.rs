//! The cumulative task scheduler.
//!
//! One propagator enforces, for every node and every resource dimension,
//! that the slices hosted there never exceed capacity at any instant.
//! Consuming tasks (c-tasks) sit on a known node from instant 0 until
//! their end variable; demanding tasks (d-tasks) hold their resources
//! from their start variable up to the horizon. A d-task is only placed
//! into a node's profile once its host variable is instantiated; the
//! membership lists and the registration bits are trailed so backtracking
//! undoes placement for free.
//!
//! Reasoning is over mandatory parts: a c-task surely runs over
//! `[0, end.min)` and a d-task surely runs over `[start.max, horizon)`.
//! Once every variable is instantiated the mandatory profile is the exact
//! profile, so a full assignment passes propagation iff it is feasible.

use std::collections::BTreeMap;

use replan_trail::{BoolCell, VecCell};

use crate::propagate::Propagator;
use crate::var::{Contradiction, Entailment, IntVar, PropResult, Store};

/// A slice on a fixed node, occupying `[0, end)`.
pub struct CTask {
    pub host: usize,
    pub end: IntVar,
    pub usage: Vec<i64>,
}

/// A slice on a decided node, occupying `[start, horizon)`.
pub struct DTask {
    pub host: IntVar,
    pub start: IntVar,
    pub usage: Vec<i64>,
    /// c-task of the same VM, when it has one. When both land on the
    /// same node the d-task must wait for the c-task to release.
    pub assoc: Option<usize>,
}

pub struct CumulativeScheduler {
    /// Per node, per dimension.
    capacities: Vec<Vec<i64>>,
    /// Per node: the window during which it may carry slices.
    hosting_starts: Vec<IntVar>,
    hosting_ends: Vec<IntVar>,
    c_tasks: Vec<CTask>,
    d_tasks: Vec<DTask>,
    horizon: i64,
    /// Trailed: whether d-task i joined a membership list.
    registered: Vec<BoolCell>,
    /// Trailed: per node, the registered d-task indices.
    members: Vec<VecCell>,
}

impl CumulativeScheduler {
    pub fn new(
        store: &mut Store,
        capacities: Vec<Vec<i64>>,
        hosting_starts: Vec<IntVar>,
        hosting_ends: Vec<IntVar>,
        c_tasks: Vec<CTask>,
        d_tasks: Vec<DTask>,
        horizon: i64,
    ) -> Self {
        assert_eq!(capacities.len(), hosting_starts.len());
        assert_eq!(capacities.len(), hosting_ends.len());
        let env = store.env_mut();
        let registered = d_tasks.iter().map(|_| env.new_bool(false)).collect();
        let members = capacities.iter().map(|_| env.new_vec()).collect();
        Self {
            capacities,
            hosting_starts,
            hosting_ends,
            c_tasks,
            d_tasks,
            horizon,
            registered,
            members,
        }
    }

    fn register_new_tasks(&mut self, s: &mut Store) {
        for (i, d) in self.d_tasks.iter().enumerate() {
            if s.env().get_bool(self.registered[i]) || !s.is_instantiated(d.host) {
                continue;
            }
            let h = s.value(d.host) as usize;
            let env = s.env_mut();
            env.vec_push(self.members[h], i as i64);
            env.set_bool(self.registered[i], true);
        }
    }

    /// Slices must sit inside their node's hosting window, and an
    /// associated d-task landing next to its c-task waits for the
    /// release.
    fn window_and_association(&self, s: &mut Store) -> PropResult {
        for c in &self.c_tasks {
            let he = self.hosting_ends[c.host];
            s.set_max(c.end, s.max(he))?;
            s.set_min(he, s.min(c.end))?;
        }
        for h in 0..self.capacities.len() {
            for i in self.members_of(s, h) {
                let d = &self.d_tasks[i];
                let hs = self.hosting_starts[h];
                s.set_min(d.start, s.min(hs))?;
                s.set_max(hs, s.max(d.start))?;
                if let Some(j) = d.assoc {
                    if self.c_tasks[j].host == h {
                        s.set_min(d.start, s.min(self.c_tasks[j].end))?;
                        s.set_max(self.c_tasks[j].end, s.max(d.start))?;
                    }
                }
            }
        }
        Ok(())
    }

    fn members_of(&self, s: &Store, h: usize) -> Vec<usize> {
        s.env()
            .vec_iter(self.members[h])
            .map(|v| v as usize)
            .collect()
    }

    fn c_tasks_of(&self, h: usize) -> impl Iterator<Item = usize> + '_ {
        self.c_tasks
            .iter()
            .enumerate()
            .filter(move |(_, c)| c.host == h)
            .map(|(j, _)| j)
    }

    /// The mandatory-usage delta profile of one node, optionally leaving
    /// one task out.
    fn profile(&self, s: &Store, h: usize, skip: Skip) -> BTreeMap<i64, Vec<i64>> {
        let ndims = self.capacities[h].len();
        let mut events: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        let mut add = |events: &mut BTreeMap<i64, Vec<i64>>, t: i64, usage: &[i64], sign: i64| {
            let slot = events.entry(t).or_insert_with(|| vec![0; ndims]);
            for (acc, u) in slot.iter_mut().zip(usage) {
                *acc += sign * u;
            }
        };
        for j in self.c_tasks_of(h) {
            if skip == Skip::CTask(j) {
                continue;
            }
            let release = s.min(self.c_tasks[j].end);
            if release > 0 {
                add(&mut events, 0, &self.c_tasks[j].usage, 1);
                add(&mut events, release, &self.c_tasks[j].usage, -1);
            }
        }
        for i in self.members_of(s, h) {
            if skip == Skip::DTask(i) {
                continue;
            }
            let arrival = s.max(self.d_tasks[i].start);
            if arrival < self.horizon {
                add(&mut events, arrival, &self.d_tasks[i].usage, 1);
            }
        }
        events
    }

    /// Walk a delta profile; `Some(t)` is the start of the first segment
    /// where adding `extra` would exceed capacity.
    fn first_overload(
        &self,
        h: usize,
        events: &BTreeMap<i64, Vec<i64>>,
        extra: &[i64],
    ) -> Option<i64> {
        let cap = &self.capacities[h];
        let mut running = vec![0i64; cap.len()];
        for (&t, deltas) in events {
            for (r, d) in running.iter_mut().zip(deltas) {
                *r += d;
            }
            if running
                .iter()
                .zip(extra)
                .zip(cap)
                .any(|((r, e), c)| r + e > *c)
            {
                return Some(t);
            }
        }
        None
    }

    /// The start of the first feasible segment after the last one where
    /// `extra` does not fit, or `None` when it fits everywhere. A result
    /// past the horizon means it never fits.
    fn earliest_fit(&self, h: usize, events: &BTreeMap<i64, Vec<i64>>, extra: &[i64]) -> i64 {
        let cap = &self.capacities[h];
        let mut running = vec![0i64; cap.len()];
        let mut lb = 0;
        let times: Vec<i64> = events.keys().copied().collect();
        for (k, deltas) in events.values().enumerate() {
            for (r, d) in running.iter_mut().zip(deltas) {
                *r += d;
            }
            let overloaded = running
                .iter()
                .zip(extra)
                .zip(cap)
                .any(|((r, e), c)| r + e > *c);
            if overloaded {
                // Must wait for the next event; past the last one the
                // overload never clears
                lb = times.get(k + 1).copied().unwrap_or(self.horizon + 1);
            }
        }
        lb
    }

    fn propagate_host(&self, s: &mut Store, h: usize) -> PropResult {
        let full = self.profile(s, h, Skip::None);
        let zero = vec![0i64; self.capacities[h].len()];
        if self.first_overload(h, &full, &zero).is_some() {
            return Err(Contradiction);
        }
        for i in self.members_of(s, h) {
            let d = &self.d_tasks[i];
            let others = self.profile(s, h, Skip::DTask(i));
            let lb = self.earliest_fit(h, &others, &d.usage);
            if lb > 0 {
                s.set_min(d.start, lb)?;
            }
        }
        for j in self.c_tasks_of(h) {
            let c = &self.c_tasks[j];
            let others = self.profile(s, h, Skip::CTask(j));
            if let Some(t) = self.first_overload(h, &others, &c.usage) {
                s.set_max(c.end, t)?;
            }
        }
        Ok(())
    }
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum Skip {
    None,
    CTask(usize),
    DTask(usize),
}

impl Propagator for CumulativeScheduler {
    fn propagate(&mut self, s: &mut Store) -> PropResult {
        self.register_new_tasks(s);
        self.window_and_association(s)?;
        for h in 0..self.capacities.len() {
            self.propagate_host(s, h)?;
        }
        Ok(())
    }

    fn is_entailed(&self, s: &Store) -> Entailment {
        let all_fixed = self
            .d_tasks
            .iter()
            .all(|d| s.is_instantiated(d.host) && s.is_instantiated(d.start))
            && self.c_tasks.iter().all(|c| s.is_instantiated(c.end))
            && self
                .hosting_ends
                .iter()
                .chain(self.hosting_starts.iter())
                .all(|&v| s.is_instantiated(v));
        if !all_fixed {
            return Entailment::Undefined;
        }
        for (h, cap) in self.capacities.iter().enumerate() {
            let events = self.profile(s, h, Skip::None);
            let zero = vec![0i64; cap.len()];
            if self.first_overload(h, &events, &zero).is_some() {
                return Entailment::False;
            }
        }
        for c in &self.c_tasks {
            if s.value(c.end) > s.value(self.hosting_ends[c.host]) {
                return Entailment::False;
            }
        }
        for d in &self.d_tasks {
            let h = s.value(d.host) as usize;
            if s.value(d.start) < s.value(self.hosting_starts[h]) {
                return Entailment::False;
            }
        }
        Entailment::True
    }
}
