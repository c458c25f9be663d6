//! Typed records persisted through the [`StoragePort`].
//!
//! Every record is a postcard blob under the `"watering"` namespace.
//! Absent keys decode to `None` so first boot falls back to defaults;
//! undecodable blobs surface as `InvalidData`.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::app::ports::{StorageError, StoragePort};
use crate::config::SystemConfig;
use crate::error::{Result, WateringError};
use crate::model::{CHANNEL_NAME_LEN, Channel, GeoLocation, HydraulicProfile, Schedule};

pub const NAMESPACE: &str = "watering";
pub const KEY_CONFIG: &str = "syscfg";
pub const KEY_LOCKS: &str = "hlock";
pub const KEY_CALIBRATION: &str = "flowcal";

/// Largest blob any record may occupy.
pub const MAX_RECORD_SIZE: usize = 512;

/// NVS key for a channel's schedule (`sched0` … `sched7`).
pub fn schedule_key(channel: u8) -> heapless::String<16> {
    let mut key = heapless::String::new();
    let _ = core::fmt::Write::write_fmt(&mut key, format_args!("sched{}", channel));
    key
}

/// Per-channel record stored under [`schedule_key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub name: heapless::String<CHANNEL_NAME_LEN>,
    pub schedule: Schedule,
    pub location: Option<GeoLocation>,
    pub profile: HydraulicProfile,
    pub periodic_anchor_day: Option<u32>,
}

impl From<&Channel> for ChannelRecord {
    fn from(ch: &Channel) -> Self {
        Self {
            name: ch.name.clone(),
            schedule: ch.schedule,
            location: ch.location,
            profile: ch.profile,
            periodic_anchor_day: ch.periodic_anchor_day,
        }
    }
}

impl ChannelRecord {
    pub fn apply_to(self, ch: &mut Channel) {
        ch.name = self.name;
        ch.schedule = self.schedule;
        ch.location = self.location;
        ch.profile = self.profile;
        ch.periodic_anchor_day = self.periodic_anchor_day;
    }
}

/// Stored system configuration, or defaults when absent or unusable.
pub fn load_config(storage: &impl StoragePort) -> SystemConfig {
    match load::<SystemConfig>(storage, KEY_CONFIG) {
        Ok(Some(cfg)) => match cfg.validate() {
            Ok(()) => cfg,
            Err(e) => {
                warn!("persistence: stored config rejected ({e}), using defaults");
                SystemConfig::default()
            }
        },
        Ok(None) => SystemConfig::default(),
        Err(e) => {
            warn!("persistence: config unreadable ({e}), using defaults");
            SystemConfig::default()
        }
    }
}

pub fn load<T: DeserializeOwned>(storage: &impl StoragePort, key: &str) -> Result<Option<T>> {
    let mut buf = [0u8; MAX_RECORD_SIZE];
    match storage.read(NAMESPACE, key, &mut buf) {
        Ok(len) => {
            let bytes = buf.get(..len).ok_or(WateringError::InvalidData)?;
            postcard::from_bytes(bytes).map(Some).map_err(|_| {
                warn!("persistence: '{}' is corrupt", key);
                WateringError::InvalidData
            })
        }
        Err(StorageError::NotFound) => Ok(None),
        Err(e) => {
            warn!("persistence: read '{}' failed: {e}", key);
            Err(e.into())
        }
    }
}

pub fn save<T: Serialize>(storage: &mut impl StoragePort, key: &str, value: &T) -> Result<()> {
    let bytes = postcard::to_allocvec(value).map_err(|_| WateringError::InvalidData)?;
    if bytes.len() > MAX_RECORD_SIZE {
        return Err(WateringError::InvalidData);
    }
    storage.write(NAMESPACE, key, &bytes)?;
    debug!("persistence: saved '{}' ({} bytes)", key, bytes.len());
    Ok(())
}
