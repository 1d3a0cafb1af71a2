//! Resource occupation slices.
//!
//! A slice is the period during which a VM occupies resources on one
//! node. Consuming slices (c-slices) sit on the VM's current node and end
//! when the VM leaves it; demanding slices (d-slices) sit on the VM's
//! future node and start when the VM arrives. The hoster is a decision
//! variable for d-slices of relocatable VMs and a constant everywhere
//! else.

use crate::propagate::{Propagators, TaskMonitor};
use crate::var::{IntVar, Store};

/// One resource occupation period on one node.
#[derive(Debug, Clone, Copy)]
pub struct Slice {
    pub start: IntVar,
    pub end: IntVar,
    pub duration: IntVar,
    pub hoster: IntVar,
}

/// Builds a [`Slice`], defaulting every unspecified variable to its
/// widest domain and wiring `start + duration == end`.
pub struct SliceBuilder<'a> {
    store: &'a mut Store,
    props: &'a mut Propagators,
    nb_nodes: usize,
    max_end: i64,
    start: Option<IntVar>,
    end: Option<IntVar>,
    duration: Option<IntVar>,
    hoster: Option<IntVar>,
}

impl<'a> SliceBuilder<'a> {
    pub fn new(
        store: &'a mut Store,
        props: &'a mut Propagators,
        nb_nodes: usize,
        max_end: i64,
    ) -> Self {
        Self {
            store,
            props,
            nb_nodes,
            max_end,
            start: None,
            end: None,
            duration: None,
            hoster: None,
        }
    }

    pub fn start(mut self, v: IntVar) -> Self {
        self.start = Some(v);
        self
    }

    pub fn end(mut self, v: IntVar) -> Self {
        self.end = Some(v);
        self
    }

    pub fn duration(mut self, v: IntVar) -> Self {
        self.duration = Some(v);
        self
    }

    pub fn hoster(mut self, v: IntVar) -> Self {
        self.hoster = Some(v);
        self
    }

    /// Pin the slice to one known node.
    pub fn on_host(mut self, host: i64) -> Self {
        self.hoster = Some(self.store.constant(host));
        self
    }

    pub fn build(self) -> Slice {
        let start = self
            .start
            .unwrap_or_else(|| self.store.bounded(0, self.max_end));
        let end = self
            .end
            .unwrap_or_else(|| self.store.bounded(0, self.max_end));
        let duration = self
            .duration
            .unwrap_or_else(|| self.store.bounded(0, self.max_end));
        let hoster = self
            .hoster
            .unwrap_or_else(|| self.store.enumerated(0, self.nb_nodes as i64 - 1));
        self.props.post(Box::new(TaskMonitor {
            start,
            duration,
            end,
        }));
        Slice {
            start,
            end,
            duration,
            hoster,
        }
    }
}
