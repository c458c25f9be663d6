//! Irrigator firmware — main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  ValveBank     EspClock    Thermistor   NvsAdapter  LogSink    │
//! │  (ValvePort)   (Clock)     (Environment)(Storage)   (Events)   │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │         WateringSystem (behind SharedSystem)           │    │
//! │  │  Queue · FSM · Valves · Safety · Scheduler             │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  task loop · scheduler loop · flow check · flow notifier       │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use esp_idf_hal::gpio::{AnyOutputPin, Output, OutputPin, PinDriver};
use esp_idf_hal::peripherals::Peripherals;
use log::{error, info, warn};

use irrigator::adapters::collaborators::{DemandUnavailable, NoRainCompensation};
use irrigator::adapters::hardware::BoardPlatform;
use irrigator::adapters::nvs::NvsAdapter;
use irrigator::adapters::time::EspClock;
use irrigator::app::service::WateringSystem;
use irrigator::app::shared::SharedSystem;
use irrigator::drivers::valve::ValveBank;
use irrigator::drivers::{hw_init, watchdog::Watchdog};
use irrigator::persistence;
use irrigator::pins;
use irrigator::sensors::flow::{FLOW_SIGNAL, FlowNotifier, NOTIFY_INTERVAL_MS};
use irrigator::sensors::temperature::TemperatureSensor;

type Pin = PinDriver<'static, AnyOutputPin, Output>;
type Board = BoardPlatform<ValveBank<Pin, Pin>, DemandUnavailable, NoRainCompensation>;

/// TWDT budget for the task loop; must exceed the slowest loop cadence
/// plus the longest master-valve delay.
const TASK_LOOP_WDT_MS: u32 = 15 * 60 * 1000;

fn output(pin: impl OutputPin + 'static) -> Result<Pin> {
    Ok(PinDriver::output(pin.downgrade_output())?)
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Irrigator v{}                       ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Peripherals ────────────────────────────────────────
    hw_init::init_peripherals()?;
    if let Err(e) = hw_init::init_isr_service() {
        error!("ISR service init failed: {}, flow monitoring disabled", e);
    }

    let p = Peripherals::take()?;
    let zones = [
        output(p.pins.gpio1)?,
        output(p.pins.gpio2)?,
        output(p.pins.gpio3)?,
        output(p.pins.gpio4)?,
        output(p.pins.gpio5)?,
        output(p.pins.gpio6)?,
        output(p.pins.gpio7)?,
        output(p.pins.gpio8)?,
    ];
    let master = output(p.pins.gpio21)?;
    info!(
        "valves: zones on GPIO {:?}, master on GPIO {}",
        pins::ZONE_VALVE_GPIOS,
        pins::MASTER_VALVE_GPIO
    );
    let valves = ValveBank::new(zones, Some(master));

    // ── 3. Storage + configuration ────────────────────────────
    let nvs = NvsAdapter::new().map_err(|e| anyhow::anyhow!("NVS init failed: {e}"))?;
    let config = persistence::load_config(&nvs);
    info!("config: power mode {}", config.power_mode.name());

    // ── 4. Engine ─────────────────────────────────────────────
    let board: Board = BoardPlatform::new(
        valves,
        EspClock::new(),
        TemperatureSensor::new(pins::TEMP_ADC1_CHANNEL),
        nvs,
        DemandUnavailable,
        NoRainCompensation,
    );
    let mut system = WateringSystem::new(board, config)?;
    if let Err(e) = system.init() {
        error!("initial close-all failed: {e}");
    }
    let shared = Arc::new(SharedSystem::new(system));

    // ── 5. Scheduler thread ───────────────────────────────────
    {
        let shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("scheduler".into())
            .stack_size(8 * 1024)
            .spawn(move || {
                loop {
                    if let Some(n) = shared.run_scheduler() {
                        if n > 0 {
                            info!("scheduler: {} task(s) queued", n);
                        }
                    }
                    let ms = shared.scheduler_interval_ms();
                    thread::sleep(Duration::from_millis(u64::from(ms)));
                }
            })?;
    }

    // ── 6. Flow notification job ──────────────────────────────
    {
        let shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("flow-notify".into())
            .stack_size(4 * 1024)
            .spawn(move || {
                let mut notifier = FlowNotifier::new(&FLOW_SIGNAL, NOTIFY_INTERVAL_MS);
                loop {
                    shared.notify_flow(&mut notifier);
                    thread::sleep(Duration::from_millis(NOTIFY_INTERVAL_MS));
                }
            })?;
    }

    info!("System ready. Entering task loop.");

    // ── 7. Task loop (main thread) ────────────────────────────
    let watchdog = Watchdog::subscribe(TASK_LOOP_WDT_MS);
    loop {
        if !shared.tick() {
            warn!("task loop: tick skipped");
        }
        shared.run_flow_check();
        watchdog.feed();
        let ms = shared.task_loop_interval_ms();
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}
