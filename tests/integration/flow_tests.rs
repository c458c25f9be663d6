//! Flow supervision: no-flow retries, fault latch, leak detection.

use crate::mock_hw::{MockPlatform, system, tick_after};
use irrigator::app::events::{AlarmKind, StopReason, WateringEvent};
use irrigator::app::service::WateringSystem;
use irrigator::flow_monitor::{FlowMonitor, FlowVerdict};
use irrigator::fsm::{SystemState, SystemStatus};
use irrigator::model::{Task, Trigger};

fn monitor(sys: &WateringSystem<MockPlatform>) -> FlowMonitor {
    FlowMonitor::new(sys.config())
}

/// Let the active task run dry past the start grace and check flow.
fn dry_check(sys: &mut WateringSystem<MockPlatform>, m: &mut FlowMonitor) -> Option<FlowVerdict> {
    sys.platform_mut().advance(6_000);
    sys.check_flow(m)
}

#[test]
fn dry_start_is_retried_at_the_head_of_the_queue() {
    let mut sys = system();
    let mut m = monitor(&sys);
    sys.enqueue(Task::duration(0, 10, Trigger::Manual)).unwrap();
    sys.enqueue(Task::duration(1, 10, Trigger::Manual)).unwrap();
    sys.tick();

    let verdict = dry_check(&mut sys, &mut m);
    assert!(matches!(
        verdict,
        Some(FlowVerdict::NoFlow {
            attempt: 1,
            retry: true,
            ..
        })
    ));
    assert!(sys.active_task().is_none());
    assert_eq!(sys.status(), SystemStatus::NoFlow);
    assert_eq!(sys.queued_tasks().next().unwrap().channel, 0);
    assert_eq!(sys.queue_depth(), 2);
    assert_eq!(
        sys.platform().completions().last().unwrap().reason,
        StopReason::NoFlow
    );

    sys.tick();
    assert_eq!(sys.active_task().unwrap().task.channel, 0);
}

#[test]
fn retries_exhausted_latch_a_fault() {
    let mut sys = system();
    let mut m = monitor(&sys);
    sys.enqueue(Task::duration(0, 10, Trigger::Manual)).unwrap();

    for attempt in 1..=3u8 {
        sys.tick();
        assert!(sys.active_task().is_some(), "attempt {attempt} did not start");
        match dry_check(&mut sys, &mut m) {
            Some(FlowVerdict::NoFlow { attempt: a, retry, .. }) => {
                assert_eq!(a, attempt);
                assert_eq!(retry, attempt < 3);
            }
            other => panic!("expected no-flow, got {other:?}"),
        }
    }

    assert_eq!(sys.status(), SystemStatus::Fault);
    assert_eq!(sys.state(), SystemState::ErrorRecovery);
    assert_eq!(sys.queue_depth(), 0);
    assert_eq!(
        sys.platform()
            .count_events(|e| matches!(e, WateringEvent::Alarm { kind: AlarmKind::NoFlow, .. })),
        3
    );

    // Nothing starts while faulted.
    sys.enqueue(Task::duration(2, 5, Trigger::Manual)).unwrap();
    tick_after(&mut sys, 1_000);
    assert!(sys.active_task().is_none());
    assert_eq!(sys.platform().open_zones(), 0);

    assert!(sys.clear_errors());
    m.reset();
    assert_eq!(sys.status(), SystemStatus::Ok);
    assert_eq!(sys.state(), SystemState::Idle);
    sys.tick();
    assert_eq!(sys.active_task().unwrap().task.channel, 2);
}

#[test]
fn clear_errors_without_a_fault_is_a_no_op() {
    let mut sys = system();
    assert!(!sys.clear_errors());
}

#[test]
fn pulses_after_a_retry_restore_the_status() {
    let mut sys = system();
    let mut m = monitor(&sys);
    sys.enqueue(Task::duration(0, 10, Trigger::Manual)).unwrap();
    sys.tick();
    assert!(matches!(
        dry_check(&mut sys, &mut m),
        Some(FlowVerdict::NoFlow { .. })
    ));

    sys.tick();
    sys.platform_mut().add_pulses(50);
    sys.platform_mut().advance(6_000);
    assert_eq!(sys.check_flow(&mut m), Some(FlowVerdict::FlowRestored));
    assert_eq!(sys.status(), SystemStatus::Ok);
    assert_eq!(m.attempts(), 0);
    assert!(sys.active_task().is_some());
}

#[test]
fn paused_task_never_trips_no_flow() {
    let mut sys = system();
    let mut m = monitor(&sys);
    sys.enqueue(Task::duration(0, 10, Trigger::Manual)).unwrap();
    sys.tick();
    sys.pause_current();
    for _ in 0..5 {
        assert_eq!(dry_check(&mut sys, &mut m), None);
    }
    assert!(sys.active_task().is_some());
}

#[test]
fn stale_no_flow_verdict_is_ignored() {
    let mut sys = system();
    sys.enqueue(Task::duration(0, 10, Trigger::Manual)).unwrap();
    sys.tick();
    let seq = sys.active_task().unwrap().seq;
    sys.apply_flow_verdict(FlowVerdict::NoFlow {
        seq: seq.wrapping_add(1),
        task: Task::duration(0, 10, Trigger::Manual),
        attempt: 1,
        retry: true,
    });
    assert!(sys.active_task().is_some());
    assert_eq!(sys.status(), SystemStatus::Ok);
}

#[test]
fn leak_with_valves_closed_shuts_down_until_it_stops() {
    let mut sys = system();
    let mut m = monitor(&sys);
    sys.platform_mut().add_pulses(20);
    assert_eq!(
        sys.check_flow(&mut m),
        Some(FlowVerdict::UnexpectedFlow { pulses: 20 })
    );
    assert_eq!(sys.status(), SystemStatus::UnexpectedFlow);
    assert!(!sys.platform().master_open());
    assert_eq!(sys.platform().pulses, 0);

    sys.enqueue(Task::duration(3, 5, Trigger::Manual)).unwrap();
    tick_after(&mut sys, 1_000);
    assert!(sys.active_task().is_none());

    sys.platform_mut().add_pulses(8);
    sys.platform_mut().advance(5_000);
    assert_eq!(
        sys.check_flow(&mut m),
        Some(FlowVerdict::UnexpectedFlowPersists { pulses: 8 })
    );
    assert_eq!(sys.platform().pulses, 0);

    sys.platform_mut().advance(5_000);
    assert_eq!(
        sys.check_flow(&mut m),
        Some(FlowVerdict::UnexpectedFlowCleared)
    );
    assert_eq!(sys.status(), SystemStatus::Ok);
    sys.tick();
    assert_eq!(sys.active_task().unwrap().task.channel, 3);
}

#[test]
fn leak_is_caught_while_faulted_and_the_fault_survives_it() {
    let mut sys = system();
    let mut m = monitor(&sys);
    sys.enqueue(Task::duration(0, 10, Trigger::Manual)).unwrap();
    for _ in 0..3 {
        sys.tick();
        dry_check(&mut sys, &mut m);
    }
    assert_eq!(sys.status(), SystemStatus::Fault);
    sys.platform_mut().clear_history();

    sys.platform_mut().add_pulses(500);
    sys.platform_mut().advance(5_000);
    assert_eq!(
        sys.check_flow(&mut m),
        Some(FlowVerdict::UnexpectedFlow { pulses: 500 })
    );
    assert_eq!(sys.status(), SystemStatus::UnexpectedFlow);
    assert_eq!(
        sys.platform().count_events(|e| matches!(
            e,
            WateringEvent::Alarm {
                kind: AlarmKind::UnexpectedFlow,
                ..
            }
        )),
        1
    );
    assert!(!sys.platform().writes.is_empty());
    assert!(!sys.platform().master_open());
    assert_eq!(sys.platform().open_zones(), 0);

    sys.platform_mut().advance(5_000);
    assert_eq!(
        sys.check_flow(&mut m),
        Some(FlowVerdict::UnexpectedFlowCleared)
    );
    assert_eq!(sys.status(), SystemStatus::Fault);
    assert_eq!(sys.state(), SystemState::ErrorRecovery);

    assert!(sys.clear_errors());
    assert_eq!(sys.status(), SystemStatus::Ok);
}
