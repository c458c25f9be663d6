//! Sunrise / sunset times for solar-relative schedules.
//!
//! NOAA general solar position approximation, good to a few minutes at
//! temperate latitudes.  Returns `None` during polar day/night so callers
//! fall back to the fixed start time.

use core::f32::consts::PI;

use crate::model::SolarEvent;

/// Sun centre 50′ below the horizon (refraction + apparent radius).
const ZENITH_DEG: f32 = 90.833;

/// Local minute-of-day at which `event` happens.
pub fn event_minutes(
    latitude: f32,
    longitude: f32,
    julian_day: u16,
    utc_offset_minutes: i16,
    event: SolarEvent,
) -> Option<u16> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }
    let gamma = 2.0 * PI / 365.0 * (f32::from(julian_day) - 1.0);

    let eq_time = 229.18
        * (0.000_075 + 0.001_868 * gamma.cos()
            - 0.032_077 * gamma.sin()
            - 0.014_615 * (2.0 * gamma).cos()
            - 0.040_849 * (2.0 * gamma).sin());

    let decl = 0.006_918 - 0.399_912 * gamma.cos() + 0.070_257 * gamma.sin()
        - 0.006_758 * (2.0 * gamma).cos()
        + 0.000_907 * (2.0 * gamma).sin()
        - 0.002_697 * (3.0 * gamma).cos()
        + 0.001_48 * (3.0 * gamma).sin();

    let lat = latitude.to_radians();
    let cos_ha = ZENITH_DEG.to_radians().cos() / (lat.cos() * decl.cos()) - lat.tan() * decl.tan();
    if !cos_ha.is_finite() || !(-1.0..=1.0).contains(&cos_ha) {
        return None;
    }
    let ha_deg = cos_ha.acos().to_degrees();

    let utc_min = match event {
        SolarEvent::Sunrise => 720.0 - 4.0 * (longitude + ha_deg) - eq_time,
        SolarEvent::Sunset => 720.0 - 4.0 * (longitude - ha_deg) - eq_time,
    };
    let local = (utc_min + f32::from(utc_offset_minutes)).round() as i32;
    Some(local.rem_euclid(24 * 60) as u16)
}
