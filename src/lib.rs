//! Irrigator firmware library.
//!
//! Multi-zone irrigation controller: task queue, master/zone valve
//! sequencing, flow supervision, freeze and hydraulic-lock gating, and
//! calendar/solar/auto scheduling.  Exposes the pure-logic modules for
//! host testing; every ESP-IDF-specific body is guarded by
//! `#[cfg(target_os = "espidf")]` within its module.

#![deny(unused_must_use)]

pub mod app;
pub mod clock;
pub mod config;
pub mod error;
pub mod flow_monitor;
pub mod fsm;
pub mod lock;
pub mod model;
pub mod persistence;
pub mod power;
pub mod safety;
pub mod scheduler;
pub mod solar;
pub mod task_manager;
pub mod valves;

pub mod adapters;
pub mod drivers;
pub mod pins;
pub mod sensors;
