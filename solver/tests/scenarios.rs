//! End-to-end solves over small clusters.

use std::time::Duration;

use replan_model::{Mapping, Model, Node, ShareableResource, Vm};
use replan_solver::{
    Action, ActionItem, Ban, Fence, MaxIdleNodes, Offline, Parameters, ReconfigurationPlan,
    ReconfigurationProblem, SatConstraint, SolveOutcome, TargetStates,
};

fn model(mapping: Mapping, resources: Vec<ShareableResource>) -> Model {
    Model {
        mapping,
        resources,
        attributes: Default::default(),
    }
}

fn solve(
    model: Model,
    targets: &TargetStates,
    constraints: &[Box<dyn SatConstraint>],
) -> SolveOutcome {
    let rp = ReconfigurationProblem::new(model, targets, Parameters::default()).unwrap();
    rp.solve(constraints).unwrap()
}

fn plan_of(outcome: SolveOutcome) -> ReconfigurationPlan {
    match outcome {
        SolveOutcome::Sat(plan) => plan,
        other => panic!("expected a plan, got {other:?}"),
    }
}

fn find<'a>(plan: &'a ReconfigurationPlan, pred: impl Fn(&Action) -> bool) -> &'a ActionItem {
    plan.iter()
        .find(|item| pred(&item.action))
        .unwrap_or_else(|| panic!("no matching action in:\n{plan}"))
}

/// Replays `plan` against the initial placement and checks that no node
/// exceeds any capacity at any instant. A VM occupies its source until
/// the action removing it from there ends, and its destination from the
/// moment the action placing it there starts.
fn assert_capacity_never_exceeded(model: &Model, plan: &ReconfigurationPlan) {
    let horizon = plan.duration();
    // (node, vm, from, until) occupancy spans, `until` exclusive
    let mut spans: Vec<(Node, Vm, i64, i64)> = Vec::new();
    for vm in model.mapping.vms().collect::<Vec<_>>() {
        if !model.mapping.is_running(vm) {
            continue;
        }
        let host = model.mapping.vm_location(vm).unwrap();
        let release = plan
            .iter()
            .find_map(|item| match item.action {
                Action::Migrate { vm: v, from, .. } if v == vm && from == host => Some(item.end),
                Action::ShutdownVm { vm: v, .. }
                | Action::Suspend { vm: v, .. }
                | Action::Kill { vm: v, .. }
                    if v == vm =>
                {
                    Some(item.end)
                }
                _ => None,
            })
            .unwrap_or(horizon + 1);
        spans.push((host, vm, 0, release));
    }
    for item in plan.iter() {
        match item.action {
            Action::Migrate { vm, to, .. } => spans.push((to, vm, item.start, horizon + 1)),
            Action::BootVm { vm, destination } => {
                spans.push((destination, vm, item.start, horizon + 1))
            }
            Action::Resume { vm, on } => spans.push((on, vm, item.start, horizon + 1)),
            _ => {}
        }
    }
    for r in &model.resources {
        for node in model.mapping.nodes() {
            for t in 0..=horizon {
                let usage: i64 = spans
                    .iter()
                    .filter(|(n, _, from, until)| *n == node && *from <= t && t < *until)
                    .map(|(_, vm, _, _)| r.consumption(*vm))
                    .sum();
                assert!(
                    usage <= r.capacity(node),
                    "{node} holds {usage} of '{}' at t={t}, capacity is {} in:\n{plan}",
                    r.id,
                    r.capacity(node),
                );
            }
        }
    }
}

#[test]
fn test_stable_cluster_needs_no_action() {
    let mut m = Mapping::default();
    m.add_online_node(Node(0));
    m.add_online_node(Node(1));
    m.add_running_vm(Vm(0), Node(0)).unwrap();
    m.add_running_vm(Vm(1), Node(1)).unwrap();
    m.add_sleeping_vm(Vm(2), Node(0)).unwrap();
    m.add_ready_vm(Vm(3));
    let cpu = ShareableResource::new("cpu", 8, 2);
    let plan = plan_of(solve(model(m, vec![cpu]), &TargetStates::default(), &[]));
    assert!(plan.is_empty(), "unexpected actions:\n{plan}");
    assert_eq!(plan.duration(), 0);
}

#[test]
fn test_suspend_completes_before_its_node_shuts_down() {
    let mut m = Mapping::default();
    m.add_online_node(Node(0));
    m.add_online_node(Node(1));
    m.add_running_vm(Vm(0), Node(1)).unwrap();
    let targets = TargetStates {
        sleeping: vec![Vm(0)],
        ..Default::default()
    };
    let constraints: Vec<Box<dyn SatConstraint>> = vec![Box::new(Offline(Node(1)))];
    let plan = plan_of(solve(model(m, vec![]), &targets, &constraints));

    let suspend = find(&plan, |a| matches!(a, Action::Suspend { vm: Vm(0), .. }));
    let shutdown = find(&plan, |a| {
        matches!(a, Action::ShutdownNode { node: Node(1) })
    });
    assert!(suspend.end <= shutdown.start);
}

#[test]
fn test_evacuating_an_offline_node_migrates_first() {
    let mut m = Mapping::default();
    m.add_online_node(Node(0));
    m.add_online_node(Node(1));
    m.add_running_vm(Vm(0), Node(0)).unwrap();
    let constraints: Vec<Box<dyn SatConstraint>> = vec![Box::new(Offline(Node(0)))];
    let plan = plan_of(solve(model(m, vec![]), &TargetStates::default(), &constraints));

    let migrate = find(&plan, |a| {
        matches!(
            a,
            Action::Migrate {
                vm: Vm(0),
                from: Node(0),
                to: Node(1),
            }
        )
    });
    let shutdown = find(&plan, |a| {
        matches!(a, Action::ShutdownNode { node: Node(0) })
    });
    assert!(migrate.end <= shutdown.start);
}

#[test]
fn test_capacity_forces_a_boot_on_an_offline_node() {
    let mut m = Mapping::default();
    m.add_online_node(Node(0));
    m.add_offline_node(Node(1)).unwrap();
    m.add_running_vm(Vm(0), Node(0)).unwrap();
    m.add_ready_vm(Vm(1));
    let mut cpu = ShareableResource::new("cpu", 4, 3);
    cpu.set_consumption(Vm(0), 3);
    cpu.set_consumption(Vm(1), 3);
    let targets = TargetStates {
        running: vec![Vm(1)],
        ..Default::default()
    };
    let md = model(m, vec![cpu]);
    let plan = plan_of(solve(md.clone(), &targets, &[]));

    let boot_node = find(&plan, |a| matches!(a, Action::BootNode { node: Node(1) }));
    let boot_vm = find(&plan, |a| {
        matches!(
            a,
            Action::BootVm {
                vm: Vm(1),
                destination: Node(1),
            }
        )
    });
    // The VM only lands once the node finished booting
    assert!(boot_vm.start >= boot_node.end);
    assert_capacity_never_exceeded(&md, &plan);
}

#[test]
fn test_plan_stays_under_capacity_at_every_instant() {
    // Booting Vm(2) only fits once Vm(0)'s shutdown released its share
    let mut m = Mapping::default();
    m.add_online_node(Node(0));
    m.add_running_vm(Vm(0), Node(0)).unwrap();
    m.add_running_vm(Vm(1), Node(0)).unwrap();
    m.add_ready_vm(Vm(2));
    let mut cpu = ShareableResource::new("cpu", 4, 1);
    cpu.set_consumption(Vm(0), 2);
    cpu.set_consumption(Vm(2), 3);
    let targets = TargetStates {
        ready: vec![Vm(0)],
        running: vec![Vm(2)],
        ..Default::default()
    };
    let md = model(m, vec![cpu]);
    let plan = plan_of(solve(md.clone(), &targets, &[]));

    let shutdown = find(&plan, |a| {
        matches!(a, Action::ShutdownVm { vm: Vm(0), .. })
    });
    let boot = find(&plan, |a| matches!(a, Action::BootVm { vm: Vm(2), .. }));
    assert!(boot.start >= shutdown.end);
    assert_capacity_never_exceeded(&md, &plan);
}

#[test]
fn test_sleeping_vm_does_not_hold_its_node() {
    let mut m = Mapping::default();
    m.add_online_node(Node(0));
    m.add_online_node(Node(1));
    m.add_sleeping_vm(Vm(0), Node(1)).unwrap();
    let constraints: Vec<Box<dyn SatConstraint>> = vec![Box::new(Offline(Node(1)))];
    let plan = plan_of(solve(model(m, vec![]), &TargetStates::default(), &constraints));

    find(&plan, |a| {
        matches!(a, Action::ShutdownNode { node: Node(1) })
    });
    assert_eq!(plan.len(), 1);
}

#[test]
fn test_insufficient_capacity_is_unsat() {
    let mut m = Mapping::default();
    m.add_online_node(Node(0));
    m.add_running_vm(Vm(0), Node(0)).unwrap();
    m.add_ready_vm(Vm(1));
    let mut cpu = ShareableResource::new("cpu", 4, 2);
    cpu.set_consumption(Vm(1), 3);
    let targets = TargetStates {
        running: vec![Vm(1)],
        ..Default::default()
    };
    assert!(matches!(
        solve(model(m, vec![cpu]), &targets, &[]),
        SolveOutcome::Unsat
    ));
}

#[test]
fn test_max_idle_nodes_spreads_the_load() {
    let mut m = Mapping::default();
    m.add_online_node(Node(0));
    m.add_online_node(Node(1));
    m.add_running_vm(Vm(0), Node(0)).unwrap();
    m.add_running_vm(Vm(1), Node(0)).unwrap();
    let constraints: Vec<Box<dyn SatConstraint>> = vec![Box::new(MaxIdleNodes(0))];
    let plan = plan_of(solve(model(m, vec![]), &TargetStates::default(), &constraints));

    find(&plan, |a| {
        matches!(
            a,
            Action::Migrate {
                from: Node(0),
                to: Node(1),
                ..
            }
        )
    });
    assert_eq!(plan.len(), 1);
}

#[test]
fn test_max_idle_nodes_can_be_unsatisfiable() {
    // One VM cannot keep two nodes busy
    let mut m = Mapping::default();
    m.add_online_node(Node(0));
    m.add_online_node(Node(1));
    m.add_running_vm(Vm(0), Node(0)).unwrap();
    let constraints: Vec<Box<dyn SatConstraint>> = vec![Box::new(MaxIdleNodes(0))];
    assert!(matches!(
        solve(model(m, vec![]), &TargetStates::default(), &constraints),
        SolveOutcome::Unsat
    ));
}

#[test]
fn test_fence_relocates_onto_the_allowed_node() {
    let mut m = Mapping::default();
    m.add_online_node(Node(0));
    m.add_online_node(Node(1));
    m.add_online_node(Node(2));
    m.add_running_vm(Vm(0), Node(0)).unwrap();
    let constraints: Vec<Box<dyn SatConstraint>> = vec![Box::new(Fence {
        vm: Vm(0),
        nodes: vec![Node(2)],
    })];
    let plan = plan_of(solve(model(m, vec![]), &TargetStates::default(), &constraints));
    find(&plan, |a| {
        matches!(
            a,
            Action::Migrate {
                vm: Vm(0),
                from: Node(0),
                to: Node(2),
            }
        )
    });
}

#[test]
fn test_ban_keeps_the_vm_in_place_when_possible() {
    let mut m = Mapping::default();
    m.add_online_node(Node(0));
    m.add_online_node(Node(1));
    m.add_running_vm(Vm(0), Node(0)).unwrap();
    let constraints: Vec<Box<dyn SatConstraint>> = vec![Box::new(Ban {
        vm: Vm(0),
        nodes: vec![Node(1)],
    })];
    let plan = plan_of(solve(model(m, vec![]), &TargetStates::default(), &constraints));
    assert!(plan.is_empty(), "unexpected actions:\n{plan}");
}

#[test]
fn test_forge_then_boot_lifecycle() {
    let mut m = Mapping::default();
    m.add_online_node(Node(0));
    m.add_init_vm(Vm(0));
    let mut md = model(m, vec![]);
    md.attributes.set_vm(Vm(0), "template", "tiny");
    let targets = TargetStates {
        ready: vec![Vm(0)],
        ..Default::default()
    };
    let plan = plan_of(solve(md, &targets, &[]));
    let forge = find(&plan, |a| matches!(a, Action::Forge { vm: Vm(0) }));
    assert_eq!(forge.end - forge.start, 7);
    assert_eq!(plan.len(), 1);
}

#[test]
fn test_kill_and_resume() {
    let mut m = Mapping::default();
    m.add_online_node(Node(0));
    m.add_running_vm(Vm(0), Node(0)).unwrap();
    m.add_sleeping_vm(Vm(1), Node(0)).unwrap();
    let targets = TargetStates {
        killed: vec![Vm(0)],
        running: vec![Vm(1)],
        ..Default::default()
    };
    let plan = plan_of(solve(model(m, vec![]), &targets, &[]));
    find(&plan, |a| {
        matches!(
            a,
            Action::Kill {
                vm: Vm(0),
                on: Some(Node(0)),
            }
        )
    });
    find(&plan, |a| {
        matches!(
            a,
            Action::Resume {
                vm: Vm(1),
                on: Node(0),
            }
        )
    });
}

#[test]
fn test_plans_only_improve_while_searching() {
    // A repeated solve is deterministic under a fixed seed
    let build = || {
        let mut m = Mapping::default();
        m.add_online_node(Node(0));
        m.add_online_node(Node(1));
        m.add_running_vm(Vm(0), Node(0)).unwrap();
        m.add_running_vm(Vm(1), Node(0)).unwrap();
        model(m, vec![])
    };
    let constraints: Vec<Box<dyn SatConstraint>> = vec![Box::new(MaxIdleNodes(0))];
    let a = plan_of(solve(build(), &TargetStates::default(), &constraints));
    let b = plan_of(solve(build(), &TargetStates::default(), &constraints));
    assert_eq!(a, b);
}

#[test]
fn test_exhausted_budget_reports_unknown() {
    let mut m = Mapping::default();
    m.add_online_node(Node(0));
    m.add_running_vm(Vm(0), Node(0)).unwrap();
    let params = Parameters {
        time_limit: Some(Duration::ZERO),
        ..Default::default()
    };
    let rp = ReconfigurationProblem::new(model(m, vec![]), &TargetStates::default(), params).unwrap();
    assert!(matches!(rp.solve(&[]).unwrap(), SolveOutcome::Unknown));
}
