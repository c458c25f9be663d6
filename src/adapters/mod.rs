//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter         | Implements            | Connects to                 |
//! |-----------------|-----------------------|-----------------------------|
//! | `hardware`      | all ports (`Platform`)| board peripherals below     |
//! | `log_sink`      | EventSink             | Serial log output           |
//! | `nvs`           | StoragePort           | NVS / in-memory store       |
//! | `time`          | ClockPort             | esp_timer, RTC + timezone   |
//! | `collaborators` | DemandPort, RainPort  | stand-ins when not fitted   |

pub mod collaborators;
pub mod hardware;
pub mod log_sink;
pub mod nvs;
pub mod time;
