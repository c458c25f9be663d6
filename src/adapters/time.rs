//! ESP32 clock adapter.
//!
//! Implements [`ClockPort`]:
//!
//! - **`target_os = "espidf"`**: monotonic time from `esp_timer_get_time()`,
//!   delays through FreeRTOS, wall time from `gettimeofday` +
//!   `localtime_r` (TZ configured by SNTP provisioning).
//! - **`not(target_os = "espidf")`**: `std::time::Instant` and
//!   `SystemTime` in UTC, for host-side simulation.
//!
//! A wall clock earlier than 2020-01-01 has never been synced and is
//! reported as [`WateringError::RtcFailure`].

use crate::app::ports::ClockPort;
use crate::error::{Result, WateringError};
use crate::model::LocalTime;

/// Anything earlier means the RTC was never set.
const EPOCH_2020: i64 = 1_577_836_800;

pub struct EspClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for EspClock {
    fn default() -> Self {
        Self::new()
    }
}

impl EspClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    #[cfg(target_os = "espidf")]
    fn unix_now() -> Option<i64> {
        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        // SAFETY: `tv` is a valid out-param; the timezone argument may be null.
        let ret = unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) };
        (ret == 0).then_some(tv.tv_sec as i64)
    }

    #[cfg(target_os = "espidf")]
    fn broken_down(secs: i64) -> Result<LocalTime> {
        use esp_idf_svc::sys::{gmtime_r, localtime_r, time_t, tm};

        let t = secs as time_t;
        // SAFETY: `tm` is plain old data; zeroed is a valid value.
        let mut local: tm = unsafe { core::mem::zeroed() };
        let mut utc: tm = unsafe { core::mem::zeroed() };
        // SAFETY: both pointers reference live stack values.
        let ok = unsafe {
            !localtime_r(&t, &mut local).is_null() && !gmtime_r(&t, &mut utc).is_null()
        };
        if !ok {
            return Err(WateringError::RtcFailure);
        }

        let mut day_shift = local.tm_yday - utc.tm_yday;
        if day_shift > 1 {
            day_shift = -1;
        } else if day_shift < -1 {
            day_shift = 1;
        }
        let offset = day_shift * 1440 + (local.tm_hour - utc.tm_hour) * 60
            + (local.tm_min - utc.tm_min);

        Ok(LocalTime {
            year: u16::try_from(local.tm_year + 1900).map_err(|_| WateringError::RtcFailure)?,
            julian_day: u16::try_from(local.tm_yday + 1).map_err(|_| WateringError::RtcFailure)?,
            hour: local.tm_hour as u8,
            minute: local.tm_min as u8,
            day_of_week: local.tm_wday as u8,
            utc_offset_minutes: offset as i16,
        })
    }
}

impl ClockPort for EspClock {
    #[cfg(target_os = "espidf")]
    fn now_ms(&self) -> u64 {
        // SAFETY: esp_timer_get_time has no preconditions.
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }).max(0) as u64 / 1_000
    }

    #[cfg(not(target_os = "espidf"))]
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    #[cfg(target_os = "espidf")]
    fn delay_ms(&mut self, ms: u32) {
        esp_idf_hal::delay::FreeRtos::delay_ms(ms);
    }

    #[cfg(not(target_os = "espidf"))]
    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(u64::from(ms)));
    }

    #[cfg(target_os = "espidf")]
    fn read_rtc(&mut self) -> Result<LocalTime> {
        match Self::unix_now() {
            Some(secs) if secs >= EPOCH_2020 => Self::broken_down(secs),
            _ => Err(WateringError::RtcFailure),
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn read_rtc(&mut self) -> Result<LocalTime> {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|_| WateringError::RtcFailure)?
            .as_secs();
        let secs = i64::try_from(secs).map_err(|_| WateringError::RtcFailure)?;
        if secs < EPOCH_2020 {
            return Err(WateringError::RtcFailure);
        }
        local_time_from_unix(secs, 0).ok_or(WateringError::RtcFailure)
    }
}

/// Break a Unix timestamp into local wall time at a fixed UTC offset.
pub fn local_time_from_unix(secs: i64, utc_offset_minutes: i16) -> Option<LocalTime> {
    let local = secs.checked_add(i64::from(utc_offset_minutes) * 60)?;
    let days = local.div_euclid(86_400);
    let sod = local.rem_euclid(86_400);

    // 1970-01-01 was a Thursday.
    let day_of_week = (days + 4).rem_euclid(7) as u8;

    let mut year: i64 = 1970;
    let mut rem = days;
    if rem < 0 {
        return None;
    }
    loop {
        let len = i64::from(crate::model::days_in_year(u16::try_from(year).ok()?));
        if rem < len {
            break;
        }
        rem -= len;
        year += 1;
    }

    Some(LocalTime {
        year: u16::try_from(year).ok()?,
        julian_day: (rem + 1) as u16,
        hour: (sod / 3_600) as u8,
        minute: (sod % 3_600 / 60) as u8,
        day_of_week,
        utc_offset_minutes,
    })
}
