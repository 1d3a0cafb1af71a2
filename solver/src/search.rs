//! Depth-first branch-and-bound over backtrackable worlds.
//!
//! Branching is binary: a decision `x = v` on the left, its refutation
//! `x != v` on the right. The trail stack mirrors the search stack, one
//! world per open branch. In optimizing mode every accepted solution
//! tightens the cost upper bound and the search resumes until the tree
//! is exhausted or the deadline hits.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::propagate::Propagators;
use crate::var::{IntVar, Store};

/// One branching decision, `var = value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub var: IntVar,
    pub value: i64,
}

/// Picks the next decision, `None` once every variable it watches is
/// instantiated.
pub trait Heuristic {
    fn next_decision(&mut self, store: &Store) -> Option<Decision>;
}

/// How the search terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    /// At least one solution was found.
    Sat,
    /// The whole tree was explored without a solution.
    Unsat,
    /// The deadline hit before any conclusion.
    Unknown,
}

#[derive(Debug, Clone, Default)]
pub struct SearchStats {
    pub nodes: u64,
    pub backtracks: u64,
    pub solutions: u64,
    pub elapsed: Duration,
}

pub struct SearchOutcome {
    pub status: SearchStatus,
    /// The best solution found: one value per variable, by index.
    pub best: Option<Vec<i64>>,
    pub stats: SearchStats,
}

enum Frame {
    /// A world holding `var = value`; refuting it is still pending.
    Try { var: IntVar, value: i64 },
    /// A world holding a refutation; nothing left to try here.
    Refuted,
}

pub struct Search<'a> {
    store: &'a mut Store,
    props: &'a mut Propagators,
    heuristic: &'a mut dyn Heuristic,
    /// When set, the search minimizes this variable instead of stopping
    /// at the first solution.
    cost: Option<IntVar>,
    time_limit: Option<Duration>,
}

impl<'a> Search<'a> {
    pub fn new(
        store: &'a mut Store,
        props: &'a mut Propagators,
        heuristic: &'a mut dyn Heuristic,
        cost: Option<IntVar>,
        time_limit: Option<Duration>,
    ) -> Self {
        Self {
            store,
            props,
            heuristic,
            cost,
            time_limit,
        }
    }

    pub fn run(mut self) -> SearchOutcome {
        let started = Instant::now();
        let mut stats = SearchStats::default();
        let mut frames: Vec<Frame> = Vec::new();
        let mut best: Option<Vec<i64>> = None;
        let mut best_cost: Option<i64> = None;

        let mut failed = self.props.fixpoint(self.store).is_err();
        loop {
            if self
                .time_limit
                .is_some_and(|limit| started.elapsed() >= limit)
            {
                self.unwind(&mut frames);
                stats.elapsed = started.elapsed();
                let status = if best.is_some() {
                    SearchStatus::Sat
                } else {
                    SearchStatus::Unknown
                };
                debug!(?status, nodes = stats.nodes, "search deadline hit");
                return SearchOutcome {
                    status,
                    best,
                    stats,
                };
            }

            if failed {
                match self.backtrack(&mut frames, best_cost, &mut stats) {
                    Backtracked::Reopened => failed = false,
                    Backtracked::StillFailed => {}
                    Backtracked::Exhausted => {
                        stats.elapsed = started.elapsed();
                        let status = if best.is_some() {
                            SearchStatus::Sat
                        } else {
                            SearchStatus::Unsat
                        };
                        debug!(
                            ?status,
                            nodes = stats.nodes,
                            backtracks = stats.backtracks,
                            "search exhausted"
                        );
                        return SearchOutcome {
                            status,
                            best,
                            stats,
                        };
                    }
                }
                continue;
            }

            match self.heuristic.next_decision(self.store) {
                None => {
                    stats.solutions += 1;
                    best = Some(self.store.snapshot());
                    match self.cost {
                        None => {
                            self.unwind(&mut frames);
                            stats.elapsed = started.elapsed();
                            return SearchOutcome {
                                status: SearchStatus::Sat,
                                best,
                                stats,
                            };
                        }
                        Some(c) => {
                            let value = self.store.value(c);
                            debug!(cost = value, solutions = stats.solutions, "solution");
                            best_cost = Some(value);
                            // Resume looking for a strictly better one
                            failed = true;
                        }
                    }
                }
                Some(Decision { var, value }) => {
                    stats.nodes += 1;
                    trace!(?var, value, depth = frames.len(), "branch");
                    self.store.push_world();
                    frames.push(Frame::Try { var, value });
                    failed = self.store.instantiate_to(var, value).is_err()
                        || self.apply_bound(best_cost).is_err()
                        || self.props.fixpoint(self.store).is_err();
                }
            }
        }
    }

    /// Pop worlds until a pending refutation reopens the search, or the
    /// tree is exhausted.
    fn backtrack(
        &mut self,
        frames: &mut Vec<Frame>,
        best_cost: Option<i64>,
        stats: &mut SearchStats,
    ) -> Backtracked {
        loop {
            match frames.pop() {
                None => return Backtracked::Exhausted,
                Some(Frame::Refuted) => self.store.pop_world(),
                Some(Frame::Try { var, value }) => {
                    self.store.pop_world();
                    self.store.push_world();
                    frames.push(Frame::Refuted);
                    stats.backtracks += 1;
                    let ok = self.store.remove_value(var, value).is_ok()
                        && self.apply_bound(best_cost).is_ok()
                        && self.props.fixpoint(self.store).is_ok();
                    return if ok {
                        Backtracked::Reopened
                    } else {
                        Backtracked::StillFailed
                    };
                }
            }
        }
    }

    /// In optimizing mode, only strictly better solutions are acceptable.
    fn apply_bound(&mut self, best_cost: Option<i64>) -> crate::var::PropResult {
        match (self.cost, best_cost) {
            (Some(c), Some(b)) => self.store.set_max(c, b - 1),
            _ => Ok(()),
        }
    }

    fn unwind(&mut self, frames: &mut Vec<Frame>) {
        while frames.pop().is_some() {
            self.store.pop_world();
        }
    }
}

enum Backtracked {
    Reopened,
    StillFailed,
    Exhausted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagate::{Leq, Sum};

    /// First free variable, smallest value first.
    struct MinFirst {
        vars: Vec<IntVar>,
    }

    impl Heuristic for MinFirst {
        fn next_decision(&mut self, store: &Store) -> Option<Decision> {
            self.vars
                .iter()
                .find(|&&v| !store.is_instantiated(v))
                .map(|&var| Decision {
                    var,
                    value: store.min(var),
                })
        }
    }

    #[test]
    fn test_first_solution_mode() {
        let mut s = Store::new();
        let a = s.bounded(0, 3);
        let b = s.bounded(0, 3);
        let mut ps = Propagators::new();
        ps.post(Box::new(Leq { x: a, y: b }));
        let mut h = MinFirst { vars: vec![a, b] };
        let out = Search::new(&mut s, &mut ps, &mut h, None, None).run();
        assert_eq!(out.status, SearchStatus::Sat);
        let sol = out.best.unwrap();
        assert!(sol[0] <= sol[1]);
    }

    #[test]
    fn test_optimization_finds_minimum() {
        let mut s = Store::new();
        let a = s.bounded(1, 5);
        let b = s.bounded(2, 5);
        let cost = s.bounded(0, 20);
        let mut ps = Propagators::new();
        ps.post(Box::new(Sum {
            terms: vec![a, b],
            total: cost,
        }));
        // Branch on cost-irrelevant order, maximum first, to make sure
        // the bound does the work
        struct MaxFirst {
            vars: Vec<IntVar>,
        }
        impl Heuristic for MaxFirst {
            fn next_decision(&mut self, store: &Store) -> Option<Decision> {
                self.vars
                    .iter()
                    .find(|&&v| !store.is_instantiated(v))
                    .map(|&var| Decision {
                        var,
                        value: store.max(var),
                    })
            }
        }
        let mut h = MaxFirst {
            vars: vec![a, b, cost],
        };
        let out = Search::new(&mut s, &mut ps, &mut h, Some(cost), None).run();
        assert_eq!(out.status, SearchStatus::Sat);
        let sol = out.best.unwrap();
        assert_eq!(sol[cost.index()], 3);
    }

    #[test]
    fn test_unsat_is_reported() {
        let mut s = Store::new();
        let a = s.bounded(3, 5);
        let b = s.bounded(0, 2);
        let mut ps = Propagators::new();
        ps.post(Box::new(Leq { x: a, y: b }));
        let mut h = MinFirst { vars: vec![a, b] };
        let out = Search::new(&mut s, &mut ps, &mut h, None, None).run();
        assert_eq!(out.status, SearchStatus::Unsat);
        assert!(out.best.is_none());
    }

    #[test]
    fn test_zero_deadline_is_unknown() {
        let mut s = Store::new();
        let a = s.bounded(0, 1);
        let mut ps = Propagators::new();
        let mut h = MinFirst { vars: vec![a] };
        let out = Search::new(
            &mut s,
            &mut ps,
            &mut h,
            None,
            Some(Duration::ZERO),
        )
        .run();
        assert_eq!(out.status, SearchStatus::Unknown);
    }

    #[test]
    fn test_worlds_are_unwound_after_search() {
        let mut s = Store::new();
        let a = s.bounded(0, 3);
        let b = s.bounded(0, 3);
        let mut ps = Propagators::new();
        ps.post(Box::new(Leq { x: a, y: b }));
        let root = s.world_index();
        let mut h = MinFirst { vars: vec![a, b] };
        Search::new(&mut s, &mut ps, &mut h, None, None).run();
        assert_eq!(s.world_index(), root);
    }
}
