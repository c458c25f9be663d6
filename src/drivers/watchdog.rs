//! Task Watchdog Timer (TWDT) wrapper for the task-processing loop.
//!
//! The loop that opens and closes valves must never stall silently: if it
//! stops feeding the TWDT the device panics and reboots, and boot drives
//! every valve closed.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
use log::{info, warn};

pub struct Watchdog {
    #[cfg(target_os = "espidf")]
    subscribed: bool,
    timeout_ms: u32,
}

impl Watchdog {
    /// Subscribe the calling thread with a `timeout_ms` budget.
    pub fn subscribe(timeout_ms: u32) -> Self {
        #[cfg(target_os = "espidf")]
        {
            let cfg = esp_task_wdt_config_t {
                timeout_ms,
                idle_core_mask: 0,
                trigger_panic: true,
            };
            // SAFETY: plain FFI calls with a fully initialised config.
            let ret = unsafe { esp_task_wdt_reconfigure(&cfg) };
            if ret != ESP_OK {
                warn!("TWDT reconfigure returned {} (may already be configured)", ret);
            }
            // SAFETY: null subscribes the calling task.
            let ret = unsafe { esp_task_wdt_add(core::ptr::null_mut()) };
            let subscribed = ret == ESP_OK;
            if subscribed {
                info!("Watchdog: task subscribed ({} ms, panic on trigger)", timeout_ms);
            } else {
                warn!("Watchdog: failed to subscribe ({})", ret);
            }
            Self {
                subscribed,
                timeout_ms,
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("Watchdog(sim): {} ms budget, not enforced", timeout_ms);
            if timeout_ms == 0 {
                warn!("Watchdog(sim): zero timeout");
            }
            Self { timeout_ms }
        }
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    pub fn feed(&self) {
        #[cfg(target_os = "espidf")]
        if self.subscribed {
            // SAFETY: the calling task subscribed in `subscribe`.
            unsafe {
                esp_task_wdt_reset();
            }
        }
    }
}
