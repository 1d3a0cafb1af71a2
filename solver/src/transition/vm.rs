//! VM transitions.
//!
//! A transition exposes an action window `[start, end)` plus the slices
//! the VM occupies around it. The variable sharing matters: the c-slice
//! ends exactly when the action ends (the source node is held until the
//! action completes) and the d-slice starts exactly when the action
//! starts (the destination is reserved from the first instant).

use replan_model::{Vm, VmState};

use crate::duration::ActionKind;
use crate::error::SolverError;
use crate::propagate::{Leq, Propagator, TaskMonitor};
use crate::slice::{Slice, SliceBuilder};
use crate::transition::TransitionCtx;
use crate::var::{Entailment, IntVar, PropResult, Store};

/// Method values for a relocatable VM.
pub const RELOCATE_MIGRATE: i64 = 0;
pub const RELOCATE_REINSTANTIATE: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmTransitionKind {
    Boot,
    Relocatable,
    Suspend,
    Resume,
    Shutdown,
    Kill,
    Forge,
    /// No action: the VM keeps its state.
    Stay,
}

/// One VM's transition and its decision variables.
pub struct VmTransition {
    pub vm: Vm,
    pub kind: VmTransitionKind,
    pub future_state: VmState,
    /// Index of the current host, for placed VMs.
    pub source: Option<i64>,
    pub start: IntVar,
    pub end: IntVar,
    pub duration: IntVar,
    pub c_slice: Option<Slice>,
    pub d_slice: Option<Slice>,
    /// 0/1, for relocatable VMs: 1 when the VM stays on its host.
    pub stay: Option<IntVar>,
    /// Relocation method for clonable VMs: 0 migrate, 1 re-instantiate.
    pub relocation_method: Option<IntVar>,
}

impl VmTransition {
    /// Whether the transition produces an action in the final plan.
    pub fn is_noop(&self) -> bool {
        matches!(self.kind, VmTransitionKind::Stay)
    }

    pub fn build(
        ctx: &mut TransitionCtx<'_>,
        vm: Vm,
        kind: VmTransitionKind,
        future_state: VmState,
        current_host: Option<i64>,
    ) -> Result<Self, SolverError> {
        match kind {
            VmTransitionKind::Stay => Ok(Self::noop(ctx, vm, future_state, current_host)),
            VmTransitionKind::Forge => Self::forge(ctx, vm),
            VmTransitionKind::Boot => Self::boot(ctx, vm),
            VmTransitionKind::Relocatable => Self::relocatable(ctx, vm, current_host),
            VmTransitionKind::Suspend => {
                Self::leaving(ctx, vm, ActionKind::Suspend, VmState::Sleeping, current_host)
            }
            VmTransitionKind::Shutdown => {
                Self::leaving(ctx, vm, ActionKind::ShutdownVm, VmState::Ready, current_host)
            }
            VmTransitionKind::Resume => Self::resume(ctx, vm, current_host),
            VmTransitionKind::Kill => Self::kill(ctx, vm, current_host),
        }
    }

    fn noop(
        ctx: &mut TransitionCtx<'_>,
        vm: Vm,
        future_state: VmState,
        current_host: Option<i64>,
    ) -> Self {
        let zero = ctx.store.constant(0);
        Self {
            vm,
            kind: VmTransitionKind::Stay,
            future_state,
            source: current_host,
            start: zero,
            end: zero,
            duration: zero,
            c_slice: None,
            d_slice: None,
            stay: None,
            relocation_method: None,
        }
    }

    /// init -> ready: instantiate the VM from its template.
    fn forge(ctx: &mut TransitionCtx<'_>, vm: Vm) -> Result<Self, SolverError> {
        let template = ctx.model.attributes.get_vm_str(vm, "template");
        if template.map_or(true, str::is_empty) {
            return Err(SolverError::MissingAttribute {
                vm,
                key: "template".to_string(),
            });
        }
        let d = ctx.durations.evaluate_vm(ctx.model, ActionKind::Forge, vm)?;
        let (start, end, duration) = Self::window(ctx, d);
        Ok(Self {
            vm,
            kind: VmTransitionKind::Forge,
            future_state: VmState::Ready,
            source: None,
            start,
            end,
            duration,
            c_slice: None,
            d_slice: None,
            stay: None,
            relocation_method: None,
        })
    }

    /// ready -> running: a d-slice on a free destination choice.
    fn boot(ctx: &mut TransitionCtx<'_>, vm: Vm) -> Result<Self, SolverError> {
        let d = ctx.durations.evaluate_vm(ctx.model, ActionKind::BootVm, vm)?;
        let (start, end, duration) = Self::window(ctx, d);
        let horizon = ctx.horizon_end;
        let d_slice = SliceBuilder::new(ctx.store, ctx.props, ctx.nb_nodes, ctx.max_end)
            .start(start)
            .end(horizon)
            .build();
        Ok(Self {
            vm,
            kind: VmTransitionKind::Boot,
            future_state: VmState::Running,
            source: None,
            start,
            end,
            duration,
            c_slice: None,
            d_slice: Some(d_slice),
            stay: None,
            relocation_method: None,
        })
    }

    /// running -> running: keep the VM running, possibly elsewhere.
    fn relocatable(
        ctx: &mut TransitionCtx<'_>,
        vm: Vm,
        current_host: Option<i64>,
    ) -> Result<Self, SolverError> {
        let cur = current_host.expect("a running VM has a host");
        let d_mig = ctx
            .durations
            .evaluate_vm(ctx.model, ActionKind::Migrate, vm)?;

        // Re-instantiation rebuilds the VM from its template on the
        // destination instead of transferring its memory.
        let clonable = ctx.model.attributes.get_vm_bool(vm, "clone") == Some(true)
            && ctx
                .model
                .attributes
                .get_vm_str(vm, "template")
                .is_some_and(|t| !t.is_empty());
        let d_re = if clonable {
            let forge = ctx.durations.evaluate_vm(ctx.model, ActionKind::Forge, vm)?;
            let boot = ctx
                .durations
                .evaluate_vm(ctx.model, ActionKind::BootVm, vm)?;
            let shutdown = ctx
                .durations
                .evaluate_vm(ctx.model, ActionKind::ShutdownVm, vm)?;
            Some(forge + boot + shutdown)
        } else {
            None
        };
        let d_max = d_mig.max(d_re.unwrap_or(0));

        let start = ctx.store.bounded(0, ctx.max_end);
        let end = ctx.store.bounded(0, ctx.max_end);
        let duration = ctx.store.bounded(0, d_max);
        ctx.props.post(Box::new(TaskMonitor {
            start,
            duration,
            end,
        }));
        ctx.props.post(Box::new(Leq {
            x: end,
            y: ctx.horizon_end,
        }));

        let zero = ctx.store.constant(0);
        let c_slice = SliceBuilder::new(ctx.store, ctx.props, ctx.nb_nodes, ctx.max_end)
            .start(zero)
            .end(end)
            .on_host(cur)
            .build();
        let horizon = ctx.horizon_end;
        let d_slice = SliceBuilder::new(ctx.store, ctx.props, ctx.nb_nodes, ctx.max_end)
            .start(start)
            .end(horizon)
            .build();

        let stay = ctx.store.bool01();
        ctx.props.post(Box::new(StayLink {
            d_host: d_slice.hoster,
            current: cur,
            stay,
        }));
        let relocation_method = if d_re.is_some() {
            Some(ctx.store.enumerated(RELOCATE_MIGRATE, RELOCATE_REINSTANTIATE))
        } else {
            None
        };
        ctx.props.post(Box::new(DurationPick {
            stay,
            method: relocation_method,
            duration,
            d_mig,
            d_re,
        }));

        Ok(Self {
            vm,
            kind: VmTransitionKind::Relocatable,
            future_state: VmState::Running,
            source: Some(cur),
            start,
            end,
            duration,
            c_slice: Some(c_slice),
            d_slice: Some(d_slice),
            stay: Some(stay),
            relocation_method,
        })
    }

    /// running -> sleeping or running -> ready: a c-slice on the current
    /// host, released when the action completes.
    fn leaving(
        ctx: &mut TransitionCtx<'_>,
        vm: Vm,
        action: ActionKind,
        future_state: VmState,
        current_host: Option<i64>,
    ) -> Result<Self, SolverError> {
        let cur = current_host.expect("a running VM has a host");
        let d = ctx.durations.evaluate_vm(ctx.model, action, vm)?;
        let (start, end, duration) = Self::window(ctx, d);
        let zero = ctx.store.constant(0);
        let c_slice = SliceBuilder::new(ctx.store, ctx.props, ctx.nb_nodes, ctx.max_end)
            .start(zero)
            .end(end)
            .on_host(cur)
            .build();
        let kind = match action {
            ActionKind::Suspend => VmTransitionKind::Suspend,
            _ => VmTransitionKind::Shutdown,
        };
        Ok(Self {
            vm,
            kind,
            future_state,
            source: Some(cur),
            start,
            end,
            duration,
            c_slice: Some(c_slice),
            d_slice: None,
            stay: None,
            relocation_method: None,
        })
    }

    /// sleeping -> running: wakes up in place, a d-slice pinned to the
    /// current host.
    fn resume(
        ctx: &mut TransitionCtx<'_>,
        vm: Vm,
        current_host: Option<i64>,
    ) -> Result<Self, SolverError> {
        let cur = current_host.expect("a sleeping VM has a host");
        let d = ctx.durations.evaluate_vm(ctx.model, ActionKind::Resume, vm)?;
        let (start, end, duration) = Self::window(ctx, d);
        let horizon = ctx.horizon_end;
        let d_slice = SliceBuilder::new(ctx.store, ctx.props, ctx.nb_nodes, ctx.max_end)
            .start(start)
            .end(horizon)
            .on_host(cur)
            .build();
        Ok(Self {
            vm,
            kind: VmTransitionKind::Resume,
            future_state: VmState::Running,
            source: Some(cur),
            start,
            end,
            duration,
            c_slice: None,
            d_slice: Some(d_slice),
            stay: None,
            relocation_method: None,
        })
    }

    /// any state -> killed. Only a running VM still holds resources, so
    /// only a running VM gets a c-slice.
    fn kill(
        ctx: &mut TransitionCtx<'_>,
        vm: Vm,
        current_host: Option<i64>,
    ) -> Result<Self, SolverError> {
        let d = ctx.durations.evaluate_vm(ctx.model, ActionKind::Kill, vm)?;
        let (start, end, duration) = Self::window(ctx, d);
        let running = ctx.model.mapping.is_running(vm);
        let c_slice = match current_host {
            Some(cur) if running => {
                let zero = ctx.store.constant(0);
                Some(
                    SliceBuilder::new(ctx.store, ctx.props, ctx.nb_nodes, ctx.max_end)
                        .start(zero)
                        .end(end)
                        .on_host(cur)
                        .build(),
                )
            }
            _ => None,
        };
        Ok(Self {
            vm,
            kind: VmTransitionKind::Kill,
            future_state: VmState::Killed,
            source: current_host,
            start,
            end,
            duration,
            c_slice,
            d_slice: None,
            stay: None,
            relocation_method: None,
        })
    }

    /// A fixed-duration action window, capped by the problem end.
    fn window(ctx: &mut TransitionCtx<'_>, d: i64) -> (IntVar, IntVar, IntVar) {
        let start = ctx.store.bounded(0, ctx.max_end);
        let end = ctx.store.bounded(0, ctx.max_end);
        let duration = ctx.store.constant(d);
        ctx.props.post(Box::new(TaskMonitor {
            start,
            duration,
            end,
        }));
        ctx.props.post(Box::new(Leq {
            x: end,
            y: ctx.horizon_end,
        }));
        (start, end, duration)
    }
}

/// Channels a relocatable VM's stay bit with its destination choice:
/// `stay == 1 <=> d_host == current`.
pub struct StayLink {
    pub d_host: IntVar,
    pub current: i64,
    pub stay: IntVar,
}

impl Propagator for StayLink {
    fn propagate(&mut self, s: &mut Store) -> PropResult {
        if s.is_instantiated(self.d_host) {
            let v = i64::from(s.value(self.d_host) == self.current);
            s.instantiate_to(self.stay, v)?;
        } else if !s.contains(self.d_host, self.current) {
            s.instantiate_to(self.stay, 0)?;
        }
        if s.is_instantiated(self.stay) {
            if s.value(self.stay) == 1 {
                s.instantiate_to(self.d_host, self.current)?;
            } else {
                s.remove_value(self.d_host, self.current)?;
            }
        }
        Ok(())
    }

    fn is_entailed(&self, s: &Store) -> Entailment {
        if !(s.is_instantiated(self.d_host) && s.is_instantiated(self.stay)) {
            return Entailment::Undefined;
        }
        let stays = s.value(self.d_host) == self.current;
        if stays == (s.value(self.stay) == 1) {
            Entailment::True
        } else {
            Entailment::False
        }
    }
}

/// Derives a relocatable VM's action duration from its stay bit and,
/// when re-instantiation is available, its relocation method.
pub struct DurationPick {
    pub stay: IntVar,
    pub method: Option<IntVar>,
    pub duration: IntVar,
    pub d_mig: i64,
    pub d_re: Option<i64>,
}

impl Propagator for DurationPick {
    fn propagate(&mut self, s: &mut Store) -> PropResult {
        if s.is_instantiated(self.stay) {
            if s.value(self.stay) == 1 {
                s.instantiate_to(self.duration, 0)?;
            } else {
                match (self.method, self.d_re) {
                    (Some(m), Some(d_re)) if s.is_instantiated(m) => {
                        let d = if s.value(m) == RELOCATE_MIGRATE {
                            self.d_mig
                        } else {
                            d_re
                        };
                        s.instantiate_to(self.duration, d)?;
                    }
                    (Some(_), Some(d_re)) => {
                        s.set_min(self.duration, self.d_mig.min(d_re))?;
                        s.set_max(self.duration, self.d_mig.max(d_re))?;
                    }
                    _ => {
                        s.instantiate_to(self.duration, self.d_mig)?;
                    }
                }
            }
        }
        if s.min(self.duration) > 0 {
            s.instantiate_to(self.stay, 0)?;
        }
        Ok(())
    }
}
