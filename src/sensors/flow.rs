//! Hall-effect flow sensor pulse counter.
//!
//! An ISR calls [`flow_isr_edge`] on every rising edge.  Edges closer than
//! [`DEBOUNCE_US`] to the previous accepted edge are treated as contact
//! bounce and dropped.  Counting is lock-free (`AtomicU32`), the correct
//! pattern for state shared between an ISR and task context on ESP32.
//!
//! Accepted edges also raise [`FLOW_SIGNAL`], a coalescing signal drained
//! by the lightweight notification job through [`FlowNotifier`].  The
//! notifier is throttled independently of the flow monitor so pulse
//! bursts never flood telemetry.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

/// Minimum spacing between accepted edges.
pub const DEBOUNCE_US: u64 = 2_000;

/// Minimum spacing between `FlowUpdate` notifications.
pub const NOTIFY_INTERVAL_MS: u64 = 500;

const NEVER: u64 = u64::MAX;

/// Debounced, ISR-safe pulse counter.
pub struct PulseCounter {
    count: AtomicU32,
    last_edge_us: AtomicU64,
}

impl PulseCounter {
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
            last_edge_us: AtomicU64::new(NEVER),
        }
    }

    /// Register one edge seen at `now_us`.  Returns `true` if it counted.
    pub fn on_edge(&self, now_us: u64) -> bool {
        let last = self.last_edge_us.load(Ordering::Relaxed);
        if last != NEVER && now_us.saturating_sub(last) < DEBOUNCE_US {
            return false;
        }
        self.last_edge_us.store(now_us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    /// Zero the counter and return the value it held.
    pub fn reset(&self) -> u32 {
        self.count.swap(0, Ordering::Relaxed)
    }
}

impl Default for PulseCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Board-wide counter fed by the GPIO ISR.
/// `static` because ISR callbacks in ESP-IDF cannot capture closures.
pub static PULSE_COUNTER: PulseCounter = PulseCounter::new();

/// Raised on every accepted pulse; drained by [`FlowNotifier`].
pub static FLOW_SIGNAL: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// ISR body: count the edge and wake the notification job.
pub fn flow_isr_edge(now_us: u64) {
    if PULSE_COUNTER.on_edge(now_us) {
        FLOW_SIGNAL.signal(());
    }
}

/// Registered with `PinDriver::subscribe` on device.
#[cfg(target_os = "espidf")]
pub fn flow_isr_handler() {
    // SAFETY: esp_timer_get_time is ISR-safe and has no preconditions.
    let now_us = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
    flow_isr_edge(now_us.max(0) as u64);
}

/// Deferred, throttled consumer of [`FLOW_SIGNAL`].
pub struct FlowNotifier<'a> {
    signal: &'a Signal<CriticalSectionRawMutex, ()>,
    min_interval_ms: u64,
    last_sent_ms: Option<u64>,
}

impl<'a> FlowNotifier<'a> {
    pub const fn new(signal: &'a Signal<CriticalSectionRawMutex, ()>, min_interval_ms: u64) -> Self {
        Self {
            signal,
            min_interval_ms,
            last_sent_ms: None,
        }
    }

    /// Returns `true` when a notification is due now.
    ///
    /// A pending signal seen inside the throttle window stays pending and
    /// is reported on the first poll after the window closes.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if self
            .last_sent_ms
            .is_some_and(|t| now_ms.saturating_sub(t) < self.min_interval_ms)
        {
            return false;
        }
        if self.signal.try_take().is_none() {
            return false;
        }
        self.last_sent_ms = Some(now_ms);
        true
    }
}
