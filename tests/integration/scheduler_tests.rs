//! Scheduler passes driven through the watering system.

use crate::mock_hw::{MockPlatform, system, tick_after};
use irrigator::app::ports::DemandDecision;
use irrigator::app::service::WateringSystem;
use irrigator::fsm::SystemStatus;
use irrigator::model::{
    LocalTime, Schedule, ScheduleKind, StartTime, Target, Trigger, WEEKDAYS,
};
use irrigator::power::PowerMode;

/// 2025-04-07 (a Monday) at the given time.
fn monday(hour: u8, minute: u8) -> LocalTime {
    LocalTime {
        year: 2025,
        julian_day: 97,
        hour,
        minute,
        day_of_week: 1,
        utc_offset_minutes: 120,
    }
}

fn weekday_mornings() -> Schedule {
    Schedule {
        kind: ScheduleKind::Daily {
            days_of_week: WEEKDAYS,
        },
        start: StartTime { hour: 7, minute: 0 },
        target: Target::Duration { minutes: 5 },
        enabled: true,
        solar: None,
    }
}

fn at(sys: &mut WateringSystem<MockPlatform>, t: LocalTime) -> usize {
    sys.platform_mut().rtc = Some(t);
    sys.run_scheduler()
}

#[test]
fn weekday_schedule_fires_once_and_runs_the_full_sequence() {
    let mut sys = system();
    sys.update_schedule(2, weekday_mornings()).unwrap();

    assert_eq!(at(&mut sys, monday(6, 59)), 0);
    assert_eq!(at(&mut sys, monday(7, 0)), 1);
    assert_eq!(at(&mut sys, monday(7, 0)), 0);
    let queued = *sys.queued_tasks().next().unwrap();
    assert_eq!(queued.channel, 2);
    assert_eq!(queued.trigger, Trigger::Scheduled);

    sys.tick();
    assert!(sys.platform().master_open());
    assert!(sys.platform().zone_open(2));

    tick_after(&mut sys, 5 * 60_000);
    assert!(!sys.platform().zone_open(2));
    assert!(sys.platform().master_open());
    tick_after(&mut sys, 2_000);
    assert!(!sys.platform().master_open());
    assert_eq!(sys.channel(2).unwrap().completed_tasks, 1);
}

#[test]
fn weekend_is_skipped() {
    let mut sys = system();
    sys.update_schedule(2, weekday_mornings()).unwrap();
    let saturday = LocalTime {
        julian_day: 102,
        day_of_week: 6,
        ..monday(7, 0)
    };
    assert_eq!(at(&mut sys, saturday), 0);
}

#[test]
fn next_day_fires_again() {
    let mut sys = system();
    sys.update_schedule(2, weekday_mornings()).unwrap();
    assert_eq!(at(&mut sys, monday(7, 0)), 1);
    let tuesday = LocalTime {
        julian_day: 98,
        day_of_week: 2,
        ..monday(7, 0)
    };
    assert_eq!(at(&mut sys, tuesday), 1);
}

#[test]
fn disabled_schedule_never_fires() {
    let mut sys = system();
    let mut s = weekday_mornings();
    s.enabled = false;
    sys.update_schedule(2, s).unwrap();
    assert_eq!(at(&mut sys, monday(7, 0)), 0);
}

#[test]
fn invalid_schedule_is_rejected() {
    let mut sys = system();
    let mut s = weekday_mornings();
    s.start = StartTime { hour: 24, minute: 0 };
    assert!(sys.update_schedule(2, s).is_err());
    assert!(sys.update_schedule(8, weekday_mornings()).is_err());
    assert!(!sys.channel(2).unwrap().schedule.enabled);
}

#[test]
fn backpressure_defers_scheduling() {
    let mut sys = system();
    for ch in 0..3u8 {
        sys.update_schedule(ch, weekday_mornings()).unwrap();
    }
    assert_eq!(at(&mut sys, monday(7, 0)), 2);
    assert_eq!(sys.queue_depth(), 2);
}

#[test]
fn freeze_suppresses_the_pass() {
    let mut sys = system();
    sys.update_schedule(2, weekday_mornings()).unwrap();
    sys.platform_mut().set_temperature(Some(0.5));
    assert_eq!(at(&mut sys, monday(7, 0)), 0);
    assert_eq!(sys.status(), SystemStatus::FreezeLockout);
}

#[test]
fn slower_cadence_widens_the_window() {
    let mut sys = system();
    sys.set_power_mode(PowerMode::UltraLowPower);
    assert_eq!(sys.status(), SystemStatus::LowPower);
    sys.update_schedule(2, weekday_mornings()).unwrap();
    assert_eq!(at(&mut sys, monday(7, 4)), 1);
}

#[test]
fn auto_schedule_asks_for_demand_and_caps_volume() {
    let mut sys = system();
    sys.update_schedule(
        1,
        Schedule {
            kind: ScheduleKind::Auto,
            start: StartTime { hour: 6, minute: 0 },
            enabled: true,
            ..Schedule::default()
        },
    )
    .unwrap();

    // No engine answer: nothing queued, retried tomorrow.
    assert_eq!(at(&mut sys, monday(7, 0)), 0);

    sys.platform_mut().demand = Some(DemandDecision {
        should_water: true,
        volume_liters: 1_500.0,
        deficit_mm: 12.0,
    });
    assert_eq!(at(&mut sys, monday(8, 0)), 0);

    let thursday = LocalTime {
        julian_day: 100,
        day_of_week: 4,
        ..monday(7, 0)
    };
    assert_eq!(at(&mut sys, thursday), 1);
    assert_eq!(sys.platform().missed_days, vec![(1, 2)]);
    let task = *sys.queued_tasks().next().unwrap();
    assert_eq!(task.target, Target::Volume { liters: 1_000.0 });
}

#[test]
fn rtc_failures_raise_rtc_error_until_recovery() {
    let mut sys = system();
    for _ in 0..2 {
        sys.run_scheduler();
    }
    assert_eq!(sys.status(), SystemStatus::Ok);
    sys.run_scheduler();
    assert_eq!(sys.status(), SystemStatus::RtcError);

    assert_eq!(at(&mut sys, monday(12, 0)), 0);
    assert_eq!(sys.status(), SystemStatus::Ok);
}
