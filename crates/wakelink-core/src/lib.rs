//! Core state management for the wakelink companion.
//!
//! [`Controller`] is the entry point: it owns the transport session
//! from `wakelink-ble`, keeps the [`AlarmStore`](store::AlarmStore)
//! reconciled with device responses, recomputes countdowns, and
//! supervises reconnection. UI layers observe everything through watch
//! and broadcast channels; nothing here blocks on the device.

pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod schedule;
pub mod store;
pub mod stream;

mod supervisor;

pub use config::CompanionConfig;
pub use controller::Controller;
pub use error::CoreError;
pub use model::{Alarm, DeviceStatus, NewAlarm, DEFAULT_VIBRATION_STRENGTH, DISABLED_LABEL};
pub use store::AlarmStore;
pub use stream::{AlarmStream, AlarmWatchStream};

// Re-export the ble-layer types that appear in this crate's public API.
pub use wakelink_ble::{AlarmTarget, ConnectMode, SessionState};
