//! Transport capability traits.
//!
//! The underlying wireless stack (connection establishment, GATT
//! discovery, MTU negotiation mechanics) lives behind [`BleLink`] /
//! [`BleConnection`]; the session only needs `send(bytes)`, a
//! notification stream, and scan/connect primitives. Remembered-device
//! persistence is the [`DeviceMemory`] capability, implemented by
//! `wakelink-config`.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::LinkError;

/// Advertised name of the alarm clock; scans match on substring.
pub const DEVICE_NAME: &str = "PicoAlarmClock";

/// GATT profile published by the device firmware.
pub const ALARM_SERVICE_UUID: &str = "12345678-1234-5678-9abc-123456789abc";
pub const COMMAND_CHAR_UUID: &str = "12345678-1234-5678-9abc-123456789abd";
pub const RESPONSE_CHAR_UUID: &str = "12345678-1234-5678-9abc-123456789abe";
pub const STATUS_CHAR_UUID: &str = "12345678-1234-5678-9abc-123456789abf";

/// MTU the session asks for on connect. The device sizes its responses
/// for this; failure to negotiate is non-fatal.
pub const TARGET_MTU: usize = 185;

// ── Identity ─────────────────────────────────────────────────────────

/// Opaque platform identifier for a peripheral (address or UUID,
/// depending on the OS).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// One advertisement observed during a scan.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub id: DeviceId,
    pub name: Option<String>,
}

// ── Link capability ──────────────────────────────────────────────────

/// The wireless transport capability.
///
/// Implementations wrap a platform BLE stack; tests use the scripted
/// link in [`crate::testing`].
pub trait BleLink: Send + Sync + 'static {
    type Conn: BleConnection;

    /// Ask the platform for scan/connect permission. `false` fails
    /// closed: no scan or connect is attempted.
    fn request_permission(&self) -> impl Future<Output = bool> + Send;

    /// Begin advertising discovery. The receiver yields advertisements
    /// until [`stop_scan`](Self::stop_scan) is called or the scan fails;
    /// the session applies the name filter itself.
    fn start_scan(&self)
    -> impl Future<Output = Result<mpsc::Receiver<Advertisement>, LinkError>> + Send;

    /// Stop an in-progress scan. Best effort.
    fn stop_scan(&self) -> impl Future<Output = ()> + Send;

    /// Establish a connection: link, service/characteristic discovery,
    /// and notification subscription. The returned receiver yields one
    /// `Vec<u8>` per response notification; the channel closing signals
    /// link loss.
    fn connect(
        &self,
        id: &DeviceId,
    ) -> impl Future<Output = Result<(Self::Conn, mpsc::Receiver<Vec<u8>>), LinkError>> + Send;
}

/// A live connection to the device.
pub trait BleConnection: Send + Sync + 'static {
    /// Write one command payload to the command characteristic.
    /// Fire-and-forget: completion means the bytes were handed to the
    /// link, not that the device responded.
    fn send(&self, payload: &[u8]) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Request a larger MTU. Returns the negotiated value; errors are
    /// non-fatal and the caller falls back to the default size.
    fn negotiate_mtu(&self, target: usize) -> impl Future<Output = Result<usize, LinkError>> + Send;

    /// Tear down the connection. Best effort; never errors.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;
}

// ── Remembered-device persistence ────────────────────────────────────

/// The device the app last connected to, persisted for direct
/// reconnection without a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RememberedDevice {
    pub id: DeviceId,
    pub name: String,
}

/// Simple key-value persistence for the remembered device.
///
/// Failures are swallowed by implementations: losing the remembered
/// device only costs a scan on the next connect.
pub trait DeviceMemory: Send + Sync {
    fn load(&self) -> Option<RememberedDevice>;
    fn save(&self, device: &RememberedDevice);
    fn forget(&self);
}
