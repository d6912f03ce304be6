//! Wire codec and transport session for PicoAlarmClock devices.
//!
//! The codec lives in [`wire`], the connection state machine in
//! [`session`], and the platform seam in [`link`]. Scripted test
//! doubles live behind the `testing` feature.

pub mod error;
pub mod link;
pub mod session;
pub mod wire;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::LinkError;
pub use link::{
    Advertisement, BleConnection, BleLink, DeviceId, DeviceMemory, RememberedDevice, DEVICE_NAME,
    TARGET_MTU,
};
pub use session::{ConnectMode, Notification, Session, SessionConfig, SessionState};
pub use wire::{AckKind, AddAlarm, AlarmRecord, AlarmTarget, Command, DeviceEvent, StatusRecord};
