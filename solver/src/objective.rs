//! The min-time-to-repair branching strategy.
//!
//! The cost being the sum of every action's completion instant, the
//! strategy fixes placements before time: first the hosts of misplaced
//! VMs, then the hosts of well-placed VMs (biased toward staying put),
//! then relocation methods, node states and node action starts, then the
//! start instants of the moves in an order that frees destinations
//! before filling them, and finally every remaining instant at its
//! minimum. A last catch-all pass guarantees the search always reaches a
//! full assignment.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::search::{Decision, Heuristic};
use crate::var::{IntVar, Store};

/// The placement decisions of one VM that runs at the end of the plan.
#[derive(Debug, Clone, Copy)]
pub struct Placement {
    pub d_host: IntVar,
    /// Index of the current host, for VMs currently placed.
    pub current: Option<i64>,
    pub start: IntVar,
}

/// A node's decisions: final state (with its preferred value) and action
/// start.
#[derive(Debug, Clone, Copy)]
pub struct NodeDecision {
    pub state: IntVar,
    /// The state matching "nothing happens to this node".
    pub preferred: i64,
    pub start: IntVar,
}

pub struct MinMttr {
    rng: StdRng,
    placements: Vec<Placement>,
    methods: Vec<IntVar>,
    nodes: Vec<NodeDecision>,
    /// Every action end, then the problem end, then the cost.
    ends: Vec<IntVar>,
    catch_all: bool,
}

impl MinMttr {
    pub fn new(
        seed: u64,
        placements: Vec<Placement>,
        methods: Vec<IntVar>,
        nodes: Vec<NodeDecision>,
        ends: Vec<IntVar>,
    ) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            placements,
            methods,
            nodes,
            ends,
            catch_all: true,
        }
    }

    /// Disable the final any-variable pass. Test hook: lets a test drive
    /// only the named phases.
    #[cfg(test)]
    pub(crate) fn without_catch_all(mut self) -> Self {
        self.catch_all = false;
        self
    }

    fn misplaced(&self, s: &Store, p: &Placement) -> bool {
        match p.current {
            None => true,
            Some(cur) => !s.contains(p.d_host, cur),
        }
    }

    fn place_misplaced(&mut self, s: &Store) -> Option<Decision> {
        for p in &self.placements {
            if s.is_instantiated(p.d_host) || !self.misplaced(s, p) {
                continue;
            }
            let domain = s.domain_values(p.d_host);
            let value = domain[self.rng.random_range(0..domain.len())];
            return Some(Decision {
                var: p.d_host,
                value,
            });
        }
        None
    }

    fn place_stable(&self, s: &Store) -> Option<Decision> {
        for p in &self.placements {
            if s.is_instantiated(p.d_host) {
                continue;
            }
            // Well placed: staying put costs nothing
            let value = match p.current {
                Some(cur) if s.contains(p.d_host, cur) => cur,
                _ => s.min(p.d_host),
            };
            return Some(Decision {
                var: p.d_host,
                value,
            });
        }
        None
    }

    fn pick_methods(&self, s: &Store) -> Option<Decision> {
        self.methods
            .iter()
            .find(|&&m| !s.is_instantiated(m))
            .map(|&var| Decision {
                var,
                value: s.max(var),
            })
    }

    fn settle_nodes(&self, s: &Store) -> Option<Decision> {
        for n in &self.nodes {
            if !s.is_instantiated(n.state) {
                let value = if s.contains(n.state, n.preferred) {
                    n.preferred
                } else {
                    1 - n.preferred
                };
                return Some(Decision {
                    var: n.state,
                    value,
                });
            }
        }
        for n in &self.nodes {
            if !s.is_instantiated(n.start) {
                return Some(Decision {
                    var: n.start,
                    value: s.min(n.start),
                });
            }
        }
        None
    }

    /// Schedule moves toward stable destinations first: a move whose
    /// destination still has departures pending would start needlessly
    /// late. Falls back to declaration order when every move waits on
    /// another (a cycle).
    fn schedule_moves(&self, s: &Store) -> Option<Decision> {
        let moving: Vec<&Placement> = self
            .placements
            .iter()
            .filter(|p| s.is_instantiated(p.d_host) && Some(s.value(p.d_host)) != p.current)
            .collect();
        let pending: Vec<&&Placement> = moving
            .iter()
            .filter(|p| !s.is_instantiated(p.start))
            .collect();
        if pending.is_empty() {
            return None;
        }
        let departs_from = |node: i64| {
            moving
                .iter()
                .any(|q| q.current == Some(node) && !s.is_instantiated(q.start))
        };
        let pick = pending
            .iter()
            .find(|p| !departs_from(s.value(p.d_host)))
            .or(pending.first());
        pick.map(|p| Decision {
            var: p.start,
            value: s.min(p.start),
        })
    }

    fn settle_ends(&self, s: &Store) -> Option<Decision> {
        self.ends
            .iter()
            .find(|&&e| !s.is_instantiated(e))
            .map(|&var| Decision {
                var,
                value: s.min(var),
            })
    }

    fn settle_rest(&self, s: &Store) -> Option<Decision> {
        s.all_vars()
            .find(|&v| !s.is_instantiated(v))
            .map(|var| Decision {
                var,
                value: s.min(var),
            })
    }
}

impl Heuristic for MinMttr {
    fn next_decision(&mut self, s: &Store) -> Option<Decision> {
        if let Some(d) = self.place_misplaced(s) {
            return Some(d);
        }
        self.place_stable(s)
            .or_else(|| self.pick_methods(s))
            .or_else(|| self.settle_nodes(s))
            .or_else(|| self.schedule_moves(s))
            .or_else(|| self.settle_ends(s))
            .or_else(|| if self.catch_all { self.settle_rest(s) } else { None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare(placements: Vec<Placement>, nodes: Vec<NodeDecision>, ends: Vec<IntVar>) -> MinMttr {
        MinMttr::new(42, placements, vec![], nodes, ends).without_catch_all()
    }

    #[test]
    fn test_misplaced_before_stable() {
        let mut s = Store::new();
        let misplaced_host = s.enumerated(0, 2);
        let stable_host = s.enumerated(0, 2);
        let start_a = s.bounded(0, 10);
        let start_b = s.bounded(0, 10);
        s.remove_value(misplaced_host, 1).unwrap();
        let mut h = bare(
            vec![
                Placement {
                    d_host: stable_host,
                    current: Some(0),
                    start: start_b,
                },
                Placement {
                    d_host: misplaced_host,
                    current: Some(1),
                    start: start_a,
                },
            ],
            vec![],
            vec![],
        );
        // The misplaced VM is served first even though it is listed last
        let d = h.next_decision(&s).unwrap();
        assert_eq!(d.var, misplaced_host);
        assert!([0, 2].contains(&d.value));
    }

    #[test]
    fn test_stable_vm_prefers_current_host() {
        let mut s = Store::new();
        let host = s.enumerated(0, 3);
        let start = s.bounded(0, 10);
        let mut h = bare(
            vec![Placement {
                d_host: host,
                current: Some(2),
                start,
            }],
            vec![],
            vec![],
        );
        let d = h.next_decision(&s).unwrap();
        assert_eq!((d.var, d.value), (host, 2));
    }

    #[test]
    fn test_node_state_prefers_no_action() {
        let mut s = Store::new();
        let state = s.bool01();
        let start = s.bounded(0, 10);
        let mut h = bare(
            vec![],
            vec![NodeDecision {
                state,
                preferred: 1,
                start,
            }],
            vec![],
        );
        let d = h.next_decision(&s).unwrap();
        assert_eq!((d.var, d.value), (state, 1));
    }

    #[test]
    fn test_moves_toward_stable_destinations_first() {
        let mut s = Store::new();
        // a: 0 -> 1, b: 1 -> 2. Node 2 has no departure, so b goes first.
        let host_a = s.enumerated(0, 2);
        let host_b = s.enumerated(0, 2);
        let start_a = s.bounded(0, 10);
        let start_b = s.bounded(0, 10);
        s.instantiate_to(host_a, 1).unwrap();
        s.instantiate_to(host_b, 2).unwrap();
        let mut h = bare(
            vec![
                Placement {
                    d_host: host_a,
                    current: Some(0),
                    start: start_a,
                },
                Placement {
                    d_host: host_b,
                    current: Some(1),
                    start: start_b,
                },
            ],
            vec![],
            vec![],
        );
        let d = h.next_decision(&s).unwrap();
        assert_eq!(d.var, start_b);
        assert_eq!(d.value, 0);
    }

    #[test]
    fn test_cycle_falls_back_to_declaration_order() {
        let mut s = Store::new();
        // a: 0 -> 1, b: 1 -> 0: each waits on the other
        let host_a = s.enumerated(0, 1);
        let host_b = s.enumerated(0, 1);
        let start_a = s.bounded(0, 10);
        let start_b = s.bounded(0, 10);
        s.instantiate_to(host_a, 1).unwrap();
        s.instantiate_to(host_b, 0).unwrap();
        let mut h = bare(
            vec![
                Placement {
                    d_host: host_a,
                    current: Some(0),
                    start: start_a,
                },
                Placement {
                    d_host: host_b,
                    current: Some(1),
                    start: start_b,
                },
            ],
            vec![],
            vec![],
        );
        let d = h.next_decision(&s).unwrap();
        assert_eq!(d.var, start_a);
    }

    #[test]
    fn test_ends_settle_at_minimum() {
        let mut s = Store::new();
        let end = s.bounded(3, 9);
        let mut h = bare(vec![], vec![], vec![end]);
        let d = h.next_decision(&s).unwrap();
        assert_eq!((d.var, d.value), (end, 3));
        s.instantiate_to(end, 3).unwrap();
        assert!(h.next_decision(&s).is_none());
    }
}
