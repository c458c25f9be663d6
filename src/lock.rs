//! Bounded-wait lock around shared engine state.
//!
//! Built on `embassy_sync`'s mutex with a critical-section raw mutex, the
//! same primitive the ISR signalling uses, so one lock type serves every
//! target.  Nothing here ever waits without a deadline:
//!
//! - [`StateLock::try_with`] never blocks; periodic ticks use it and skip
//!   the cycle when the state is busy.
//! - [`StateLock::with_timeout`] polls until a monotonic deadline and
//!   then reports [`WateringError::Timeout`]; command handlers use it.

use std::time::{Duration, Instant};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use log::warn;

use crate::error::{Result, WateringError};

pub struct StateLock<T> {
    inner: Mutex<CriticalSectionRawMutex, T>,
}

impl<T> StateLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Run `f` if the lock is free right now.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.inner.try_lock().ok()?;
        Some(f(&mut guard))
    }

    /// Run `f` once the lock is free, giving up after `timeout_ms`.
    pub fn with_timeout<R>(&self, timeout_ms: u32, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        loop {
            if let Ok(mut guard) = self.inner.try_lock() {
                return Ok(f(&mut guard));
            }
            if Instant::now() >= deadline {
                warn!("state lock not acquired within {} ms", timeout_ms);
                return Err(WateringError::Timeout);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}
