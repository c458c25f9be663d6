//! Master/zone sequencing as seen on the valve outputs.

use crate::mock_hw::{ValveWrite, system, system_with, tick_after};
use irrigator::app::commands::{Command, CommandOutcome};
use irrigator::app::events::StopReason;
use irrigator::app::ports::ValveId;
use irrigator::config::{MasterValveConfig, SystemConfig};
use irrigator::error::WateringError;
use irrigator::model::{Task, Trigger};

#[test]
fn master_opens_three_seconds_before_zone() {
    let mut sys = system();
    sys.enqueue(Task::duration(2, 5, Trigger::Manual)).unwrap();
    sys.tick();

    let w = &sys.platform().writes;
    assert_eq!(
        w[0],
        ValveWrite {
            at_ms: 0,
            valve: ValveId::Master,
            level: false
        }
    );
    assert_eq!(
        w[1],
        ValveWrite {
            at_ms: 3_000,
            valve: ValveId::Zone(2),
            level: true
        }
    );
    assert_eq!(sys.active_task().unwrap().started_at_ms, 3_000);
}

#[test]
fn master_closes_after_post_stop_delay() {
    let mut sys = system();
    sys.enqueue(Task::duration(2, 5, Trigger::Manual)).unwrap();
    sys.tick();

    tick_after(&mut sys, 5 * 60_000);
    assert!(sys.active_task().is_none());
    assert!(!sys.platform().zone_open(2));
    assert!(sys.platform().master_open());
    assert_eq!(sys.valves().deferred_close_at(), Some(305_000));

    tick_after(&mut sys, 1_000);
    assert!(sys.platform().master_open());

    tick_after(&mut sys, 1_000);
    assert!(!sys.platform().master_open());
    assert!(!sys.valves().is_master_open());
}

#[test]
fn back_to_back_tasks_keep_master_open() {
    let mut sys = system();
    sys.enqueue(Task::duration(0, 1, Trigger::Manual)).unwrap();
    sys.enqueue(Task::duration(1, 1, Trigger::Manual)).unwrap();
    sys.tick();
    sys.platform_mut().clear_history();

    tick_after(&mut sys, 60_000);

    assert_eq!(sys.active_task().unwrap().task.channel, 1);
    assert!(sys.platform().master_writes().is_empty());
    let zones: Vec<_> = sys
        .platform()
        .writes
        .iter()
        .map(|w| (w.valve, w.level))
        .collect();
    assert_eq!(
        zones,
        vec![(ValveId::Zone(0), false), (ValveId::Zone(1), true)]
    );
    assert_eq!(sys.valves().deferred_close_at(), None);
}

#[test]
fn announced_start_holds_master_through_overlap_grace() {
    let mut sys = system();
    sys.enqueue(Task::duration(0, 1, Trigger::Manual)).unwrap();
    sys.tick();
    tick_after(&mut sys, 59_000);
    assert_eq!(
        sys.handle_command(Command::ExpectTaskStart { in_ms: 3_000 }),
        Ok(CommandOutcome::Done)
    );

    tick_after(&mut sys, 1_000);
    assert!(sys.active_task().is_none());
    assert!(sys.platform().master_open());
    // Expected at 65 s, plus the 5 s grace.
    assert_eq!(sys.valves().deferred_close_at(), Some(70_000));
    sys.platform_mut().clear_history();

    tick_after(&mut sys, 6_999);
    assert!(sys.platform().master_writes().is_empty());
    tick_after(&mut sys, 1);
    assert_eq!(
        sys.platform().master_writes(),
        vec![ValveWrite {
            at_ms: 70_000,
            valve: ValveId::Master,
            level: true
        }]
    );
    assert!(!sys.valves().is_master_open());
}

#[test]
fn start_inside_overlap_grace_reuses_open_master() {
    let mut sys = system();
    sys.enqueue(Task::duration(0, 1, Trigger::Manual)).unwrap();
    sys.tick();
    tick_after(&mut sys, 59_000);
    sys.notify_expected_start(65_000);
    tick_after(&mut sys, 1_000);
    assert_eq!(sys.valves().deferred_close_at(), Some(70_000));
    sys.platform_mut().clear_history();

    sys.enqueue(Task::duration(1, 1, Trigger::Remote)).unwrap();
    tick_after(&mut sys, 2_000);
    assert_eq!(sys.active_task().unwrap().task.channel, 1);
    assert!(sys.platform().zone_open(1));
    assert!(sys.platform().master_writes().is_empty());
    assert_eq!(sys.valves().deferred_close_at(), None);

    tick_after(&mut sys, 10_000);
    assert!(sys.valves().is_master_open());
    assert!(sys.platform().master_writes().is_empty());
}

#[test]
fn zero_delays_close_master_with_zone() {
    let cfg = SystemConfig {
        master: MasterValveConfig {
            pre_start_delay_s: 0,
            post_stop_delay_s: 0,
            ..MasterValveConfig::default()
        },
        ..SystemConfig::default()
    };
    let mut sys = system_with(cfg);
    sys.enqueue(Task::duration(3, 1, Trigger::Manual)).unwrap();
    sys.tick();
    let w = &sys.platform().writes;
    assert_eq!((w[0].valve, w[0].at_ms), (ValveId::Zone(3), 0));
    assert_eq!((w[1].valve, w[1].at_ms), (ValveId::Master, 0));

    tick_after(&mut sys, 60_000);
    assert!(!sys.platform().master_open());
    assert_eq!(sys.valves().deferred_close_at(), None);
}

#[test]
fn disabled_master_is_never_driven() {
    let cfg = SystemConfig {
        master: MasterValveConfig {
            enabled: false,
            ..MasterValveConfig::default()
        },
        ..SystemConfig::default()
    };
    let mut sys = system_with(cfg);
    sys.enqueue(Task::duration(0, 1, Trigger::Manual)).unwrap();
    sys.tick();
    tick_after(&mut sys, 60_000);
    assert!(sys.platform().master_writes().is_empty());
}

#[test]
fn manual_master_control_requires_unmanaged_master() {
    let mut sys = system();
    assert_eq!(sys.open_master_manual(), Err(WateringError::Config));

    let cfg = SystemConfig {
        master: MasterValveConfig {
            auto_management: false,
            ..MasterValveConfig::default()
        },
        ..SystemConfig::default()
    };
    let mut sys = system_with(cfg);
    sys.open_master_manual().unwrap();
    assert!(sys.platform().master_open());
    sys.close_master_manual().unwrap();
    assert!(!sys.platform().master_open());
}

#[test]
fn close_all_shuts_everything() {
    let mut sys = system();
    sys.enqueue(Task::duration(4, 10, Trigger::Manual)).unwrap();
    sys.tick();
    assert!(sys.platform().zone_open(4));

    sys.close_all().unwrap();
    assert!(sys.active_task().is_none());
    assert_eq!(sys.platform().open_zones(), 0);
    assert!(!sys.platform().master_open());
    assert_eq!(
        sys.platform().completions().last().unwrap().reason,
        StopReason::Safety
    );
}

#[test]
fn dead_zone_output_fails_the_start() {
    let mut sys = system();
    sys.platform_mut().broken = Some(ValveId::Zone(5));
    sys.enqueue(Task::duration(5, 1, Trigger::Manual)).unwrap();
    sys.tick();
    assert!(sys.active_task().is_none());
    assert!(!sys.platform().master_open());
}
