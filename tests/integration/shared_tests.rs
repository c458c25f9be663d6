//! Command surface and the thread-shared handle.

use std::sync::Arc;

use crate::mock_hw::{MockPlatform, system};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use irrigator::app::commands::{Command, CommandOutcome};
use irrigator::app::events::WateringEvent;
use irrigator::app::shared::SharedSystem;
use irrigator::config::SystemConfig;
use irrigator::error::WateringError;
use irrigator::flow_monitor::FlowVerdict;
use irrigator::fsm::{SystemState, SystemStatus};
use irrigator::model::Trigger;
use irrigator::power::PowerMode;
use irrigator::safety::{LockLevel, LockReason, LockScope};
use irrigator::sensors::flow::FlowNotifier;

fn shared() -> SharedSystem<MockPlatform> {
    SharedSystem::new(system())
}

#[test]
fn water_command_queues_and_tick_starts() {
    let s = shared();
    assert_eq!(
        s.handle_command(Command::WaterDuration {
            channel: 3,
            minutes: 5,
            trigger: Trigger::Remote,
        }),
        Ok(CommandOutcome::Done)
    );
    assert_eq!(
        s.handle_command(Command::GetQueueDepth),
        Ok(CommandOutcome::QueueDepth(1))
    );
    assert!(s.tick());
    let status = s.get_status().unwrap();
    assert_eq!(status.state, SystemState::Watering);
    assert_eq!(status.active.unwrap().channel, 3);
}

#[test]
fn invalid_command_surfaces_the_error() {
    let s = shared();
    assert_eq!(
        s.handle_command(Command::WaterVolume {
            channel: 0,
            liters: -1.0,
            trigger: Trigger::Manual,
        }),
        Err(WateringError::InvalidParam)
    );
    assert_eq!(
        s.handle_command(Command::SetFlowCalibration(0)),
        Err(WateringError::InvalidParam)
    );
}

#[test]
fn pause_resume_stop_through_commands() {
    let s = shared();
    s.handle_command(Command::WaterDuration {
        channel: 1,
        minutes: 10,
        trigger: Trigger::Manual,
    })
    .unwrap();
    s.tick();
    assert_eq!(
        s.handle_command(Command::PauseCurrent),
        Ok(CommandOutcome::Applied(true))
    );
    assert_eq!(
        s.handle_command(Command::ResumeCurrent),
        Ok(CommandOutcome::Applied(true))
    );
    assert_eq!(
        s.handle_command(Command::StopCurrent),
        Ok(CommandOutcome::Applied(true))
    );
    assert_eq!(
        s.handle_command(Command::StopCurrent),
        Ok(CommandOutcome::Applied(false))
    );
}

#[test]
fn power_mode_changes_loop_cadence() {
    let s = shared();
    assert_eq!(s.task_loop_interval_ms(), 500);
    s.handle_command(Command::SetPowerMode(PowerMode::EnergySaving))
        .unwrap();
    assert_eq!(s.task_loop_interval_ms(), 2_000);
    assert_eq!(s.scheduler_interval_ms(), 120_000);
}

#[test]
fn periodic_work_skips_while_a_command_holds_the_state() {
    let s = shared();
    let (ticked, scheduled) = s.with_system(|_| (s.tick(), s.run_scheduler())).unwrap();
    assert!(!ticked);
    assert_eq!(scheduled, None);
}

#[test]
fn commands_time_out_while_the_state_is_held() {
    let s = shared();
    let nested = s
        .with_system(|_| s.handle_command(Command::GetQueueDepth))
        .unwrap();
    assert_eq!(nested, Err(WateringError::Busy));
}

#[test]
fn clear_errors_resets_the_flow_monitor() {
    let s = shared();
    s.handle_command(Command::WaterDuration {
        channel: 0,
        minutes: 10,
        trigger: Trigger::Manual,
    })
    .unwrap();
    for _ in 0..3 {
        s.tick();
        s.with_system(|sys| sys.platform_mut().advance(6_000)).unwrap();
        assert!(matches!(
            s.run_flow_check(),
            Some(FlowVerdict::NoFlow { .. })
        ));
    }
    assert_eq!(s.get_status().unwrap().status, SystemStatus::Fault);

    assert_eq!(
        s.handle_command(Command::ClearErrors),
        Ok(CommandOutcome::Applied(true))
    );
    assert_eq!(s.get_status().unwrap().status, SystemStatus::Ok);

    // A fresh attempt budget: the next dry start is retried again.
    s.handle_command(Command::WaterDuration {
        channel: 0,
        minutes: 10,
        trigger: Trigger::Manual,
    })
    .unwrap();
    s.tick();
    s.with_system(|sys| sys.platform_mut().advance(6_000)).unwrap();
    assert!(matches!(
        s.run_flow_check(),
        Some(FlowVerdict::NoFlow {
            attempt: 1,
            retry: true,
            ..
        })
    ));
}

#[test]
fn config_update_reaches_the_flow_monitor() {
    let s = shared();
    let strict = SystemConfig {
        max_no_flow_attempts: 1,
        ..SystemConfig::default()
    };
    assert_eq!(
        s.handle_command(Command::UpdateConfig(strict.clone())),
        Ok(CommandOutcome::Done)
    );
    assert_eq!(s.with_system(|sys| sys.config().clone()), Ok(strict));

    s.handle_command(Command::WaterDuration {
        channel: 4,
        minutes: 10,
        trigger: Trigger::Manual,
    })
    .unwrap();
    s.tick();
    s.with_system(|sys| sys.platform_mut().advance(6_000)).unwrap();
    assert!(matches!(
        s.run_flow_check(),
        Some(FlowVerdict::NoFlow {
            attempt: 1,
            retry: false,
            ..
        })
    ));
    assert_eq!(s.get_status().unwrap().status, SystemStatus::Fault);
}

#[test]
fn rejected_config_update_leaves_the_monitor_alone() {
    let s = shared();
    let bad = SystemConfig {
        max_no_flow_attempts: 0,
        ..SystemConfig::default()
    };
    assert!(s.handle_command(Command::UpdateConfig(bad)).is_err());

    s.handle_command(Command::WaterDuration {
        channel: 4,
        minutes: 10,
        trigger: Trigger::Manual,
    })
    .unwrap();
    s.tick();
    s.with_system(|sys| sys.platform_mut().advance(6_000)).unwrap();
    assert!(matches!(
        s.run_flow_check(),
        Some(FlowVerdict::NoFlow {
            attempt: 1,
            retry: true,
            ..
        })
    ));
}

#[test]
fn clear_lock_command() {
    let s = shared();
    s.with_system(|sys| {
        sys.set_hydraulic_lock(LockScope::Global, LockLevel::Hard, LockReason::Admin)
    })
    .unwrap()
    .unwrap();
    assert_eq!(s.get_status().unwrap().status, SystemStatus::Locked);
    s.handle_command(Command::ClearLock(LockScope::Global))
        .unwrap();
    assert_eq!(s.get_status().unwrap().status, SystemStatus::Ok);
}

#[test]
fn flow_notification_becomes_an_event() {
    let s = shared();
    let signal: Signal<CriticalSectionRawMutex, ()> = Signal::new();
    let mut notifier = FlowNotifier::new(&signal, 0);
    assert!(!s.notify_flow(&mut notifier));
    signal.signal(());
    s.with_system(|sys| sys.platform_mut().add_pulses(42)).unwrap();
    assert!(s.notify_flow(&mut notifier));

    let sys = s.into_inner();
    assert!(sys
        .platform()
        .events
        .iter()
        .any(|e| *e == WateringEvent::FlowUpdate { pulses: 42 }));
}

#[test]
fn handle_is_shareable_across_threads() {
    let s = Arc::new(shared());
    let worker = {
        let s = Arc::clone(&s);
        std::thread::spawn(move || {
            s.handle_command(Command::WaterDuration {
                channel: 2,
                minutes: 1,
                trigger: Trigger::Remote,
            })
        })
    };
    assert_eq!(worker.join().unwrap(), Ok(CommandOutcome::Done));
    assert_eq!(s.queue_depth(), Ok(1));
}
