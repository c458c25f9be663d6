//! Application core — domain logic behind port traits.
//!
//! This module holds the watering engine: task queue, valve sequencing,
//! safety gating and the command surface.  All interaction with hardware,
//! storage and the outside world happens through the **port traits** in
//! [`ports`], so the whole engine runs on the host against mocks.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
pub mod shared;
