//! Anti-freeze lockout, hydraulic locks and the manual override.

use crate::mock_hw::{MockPlatform, system, tick_after};
use irrigator::app::events::{AlarmKind, WateringEvent};
use irrigator::app::service::WateringSystem;
use irrigator::error::WateringError;
use irrigator::fsm::SystemStatus;
use irrigator::model::{SkipReason, Task, Trigger};
use irrigator::safety::{LockLevel, LockReason, LockScope};

fn freeze_alarms(sys: &WateringSystem<MockPlatform>) -> usize {
    sys.platform().count_events(|e| {
        matches!(
            e,
            WateringEvent::Alarm {
                kind: AlarmKind::Freeze,
                ..
            }
        )
    })
}

#[test]
fn freeze_lock_uses_hysteresis() {
    let mut sys = system();

    sys.platform_mut().set_temperature(Some(3.0));
    sys.enqueue(Task::duration(0, 1, Trigger::Manual)).unwrap();

    sys.platform_mut().set_temperature(Some(2.0));
    assert_eq!(
        sys.enqueue(Task::duration(1, 1, Trigger::Manual)),
        Err(WateringError::Busy)
    );
    assert_eq!(sys.channel(1).unwrap().last_skip, Some(SkipReason::Freeze));
    assert!(sys.safety().is_freeze_locked());
    assert_eq!(freeze_alarms(&sys), 1);

    // The task queued while warm is dropped at start.
    sys.tick();
    assert!(sys.active_task().is_none());
    assert_eq!(sys.queue_depth(), 0);
    assert_eq!(sys.status(), SystemStatus::FreezeLockout);

    sys.platform_mut().set_temperature(Some(3.0));
    tick_after(&mut sys, 1_000);
    assert_eq!(sys.status(), SystemStatus::FreezeLockout);

    sys.platform_mut().set_temperature(Some(4.0));
    tick_after(&mut sys, 1_000);
    assert_eq!(sys.status(), SystemStatus::Ok);
    sys.enqueue(Task::duration(1, 1, Trigger::Manual)).unwrap();
}

#[test]
fn freeze_alarm_is_rate_limited() {
    let mut sys = system();
    sys.platform_mut().set_temperature(Some(-1.0));
    sys.tick();
    tick_after(&mut sys, 30_000);
    assert_eq!(freeze_alarms(&sys), 1);
    tick_after(&mut sys, 30_000);
    assert_eq!(freeze_alarms(&sys), 2);
}

#[test]
fn missing_temperature_locks_out() {
    let mut sys = system();
    sys.platform_mut().set_temperature(None);
    assert_eq!(
        sys.enqueue(Task::duration(0, 1, Trigger::Manual)),
        Err(WateringError::Busy)
    );
    sys.tick();
    assert_eq!(sys.status(), SystemStatus::FreezeLockout);
    assert!(sys.get_status().temperature_c.is_none());
}

#[test]
fn stale_reading_is_refreshed_before_use() {
    let mut sys = system();
    sys.platform_mut().set_temperature(Some(1.0));
    sys.platform_mut().ambient_c = Some(10.0);
    sys.platform_mut().advance(11 * 60_000);
    sys.enqueue(Task::duration(0, 1, Trigger::Manual)).unwrap();
    assert_eq!(sys.get_status().temperature_c, Some(10.0));
}

#[test]
fn hard_channel_lock_blocks_everything_on_that_channel() {
    let mut sys = system();
    sys.set_hydraulic_lock(LockScope::Channel(3), LockLevel::Hard, LockReason::Admin)
        .unwrap();
    sys.set_manual_override(3, 60_000).unwrap();

    assert_eq!(
        sys.enqueue(Task::duration(3, 1, Trigger::Manual)),
        Err(WateringError::Busy)
    );
    assert_eq!(
        sys.channel(3).unwrap().last_skip,
        Some(SkipReason::HydraulicLock)
    );
    sys.enqueue(Task::duration(4, 1, Trigger::Manual)).unwrap();

    // Hard locks never expire on their own.
    tick_after(&mut sys, 24 * 60 * 60_000);
    assert!(sys.safety().lock(LockScope::Channel(3)).unwrap().is_locked());

    sys.clear_hydraulic_lock(LockScope::Channel(3)).unwrap();
    sys.set_manual_override(3, 60_000).unwrap();
    sys.enqueue(Task::duration(3, 1, Trigger::Manual)).unwrap();
}

#[test]
fn global_lock_sets_locked_status() {
    let mut sys = system();
    sys.set_hydraulic_lock(LockScope::Global, LockLevel::Hard, LockReason::Admin)
        .unwrap();
    assert_eq!(sys.status(), SystemStatus::Locked);
    assert_eq!(
        sys.enqueue(Task::duration(6, 1, Trigger::Remote)),
        Err(WateringError::Busy)
    );
    sys.clear_hydraulic_lock(LockScope::Global).unwrap();
    assert_eq!(sys.status(), SystemStatus::Ok);
}

#[test]
fn channel_lock_does_not_change_status() {
    let mut sys = system();
    sys.set_hydraulic_lock(LockScope::Channel(0), LockLevel::Soft, LockReason::Admin)
        .unwrap();
    assert_eq!(sys.status(), SystemStatus::Ok);
}

#[test]
fn soft_lock_expires_after_retry_window() {
    let mut sys = system();
    sys.set_hydraulic_lock(LockScope::Channel(2), LockLevel::Soft, LockReason::HighFlow)
        .unwrap();
    let retry = u64::from(sys.config().soft_lock_retry_ms);

    tick_after(&mut sys, retry - 1);
    assert!(sys.safety().lock(LockScope::Channel(2)).unwrap().is_locked());

    tick_after(&mut sys, 1);
    assert!(!sys.safety().lock(LockScope::Channel(2)).unwrap().is_locked());
    assert!(sys.platform().events.iter().any(|e| matches!(
        e,
        WateringEvent::LockChanged {
            channel: Some(2),
            level: LockLevel::None,
            ..
        }
    )));
}

#[test]
fn override_passes_soft_locks_for_direct_commands_only() {
    let mut sys = system();
    sys.set_hydraulic_lock(LockScope::Channel(5), LockLevel::Soft, LockReason::Admin)
        .unwrap();
    sys.set_manual_override(5, 10 * 60_000).unwrap();

    assert_eq!(
        sys.enqueue(Task::duration(5, 1, Trigger::Scheduled)),
        Err(WateringError::Busy)
    );
    sys.enqueue(Task::duration(5, 1, Trigger::Manual)).unwrap();

    sys.clear_manual_override();
    assert_eq!(
        sys.enqueue(Task::duration(5, 1, Trigger::Remote)),
        Err(WateringError::Busy)
    );
}

#[test]
fn override_expires() {
    let mut sys = system();
    sys.set_hydraulic_lock(LockScope::Channel(5), LockLevel::Soft, LockReason::Admin)
        .unwrap();
    sys.set_manual_override(5, 60_000).unwrap();
    sys.platform_mut().advance(60_000);
    assert_eq!(
        sys.enqueue(Task::duration(5, 1, Trigger::Manual)),
        Err(WateringError::Busy)
    );
    assert_eq!(
        sys.set_manual_override(8, 60_000),
        Err(WateringError::InvalidParam)
    );
}

/// Run one wet minute on `channel` delivering `pulses`.
fn run_minute(sys: &mut WateringSystem<MockPlatform>, channel: u8, pulses: u32) {
    sys.enqueue(Task::duration(channel, 1, Trigger::Manual)).unwrap();
    sys.tick();
    assert!(sys.active_task().is_some());
    sys.platform_mut().add_pulses(pulses);
    tick_after(sys, 60_000);
    assert!(sys.active_task().is_none());
}

#[test]
fn learned_profile_flags_high_flow_with_a_soft_lock() {
    let mut sys = system();
    // 750 pulses per litre: 750 pulses in one minute is 1 L/min.
    for _ in 0..3 {
        run_minute(&mut sys, 4, 750);
    }
    let profile = sys.channel(4).unwrap().profile;
    assert!(profile.calibrated);
    assert!((profile.nominal_ml_min - 1_000.0).abs() < 0.5);

    run_minute(&mut sys, 4, 900);
    assert!(!sys.safety().lock(LockScope::Channel(4)).unwrap().is_locked());

    run_minute(&mut sys, 4, 1_500);
    let lock = *sys.safety().lock(LockScope::Channel(4)).unwrap();
    assert_eq!(lock.level, LockLevel::Soft);
    assert_eq!(lock.reason, LockReason::HighFlow);
    assert_eq!(
        sys.enqueue(Task::duration(4, 1, Trigger::Scheduled)),
        Err(WateringError::Busy)
    );
}
