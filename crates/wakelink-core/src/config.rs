//! Tunables for the controller, supervisor, and session.

use std::time::Duration;

use wakelink_ble::{DEVICE_NAME, SessionConfig, TARGET_MTU};

/// Controller configuration.
///
/// The defaults match the clock firmware's advertised name and the
/// timings the companion has always used; override fields before
/// constructing a [`Controller`](crate::Controller) to tune them.
#[derive(Debug, Clone)]
pub struct CompanionConfig {
    /// Advertised name fragment to look for while scanning.
    pub device_name: String,
    /// Scan window for user-initiated connects.
    pub manual_scan_timeout: Duration,
    /// Scan window for supervisor-initiated connects.
    pub auto_scan_timeout: Duration,
    /// Pause between link establishment and the hydration commands.
    pub settle_delay: Duration,
    /// How long an announced alarm list may take to finish arriving.
    pub list_timeout: Duration,
    /// Pause after an ordinary failed reconnect attempt.
    pub retry_delay: Duration,
    /// Pause after an unexpected failed reconnect attempt.
    pub retry_delay_slow: Duration,
    /// How often countdown labels are recomputed from the local clock.
    pub countdown_interval: Duration,
    /// Whether the supervisor reconnects automatically after link loss.
    pub auto_reconnect: bool,
    /// MTU to request after connecting.
    pub target_mtu: usize,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME.to_owned(),
            manual_scan_timeout: Duration::from_secs(10),
            auto_scan_timeout: Duration::from_secs(15),
            settle_delay: Duration::from_millis(500),
            list_timeout: Duration::from_secs(3),
            retry_delay: Duration::from_secs(10),
            retry_delay_slow: Duration::from_secs(15),
            countdown_interval: Duration::from_secs(60),
            auto_reconnect: true,
            target_mtu: TARGET_MTU,
        }
    }
}

impl CompanionConfig {
    /// The session-level slice of this configuration.
    pub(crate) fn session_config(&self) -> SessionConfig {
        SessionConfig {
            device_name: self.device_name.clone(),
            manual_scan_timeout: self.manual_scan_timeout,
            auto_scan_timeout: self.auto_scan_timeout,
            settle_delay: self.settle_delay,
            target_mtu: self.target_mtu,
        }
    }
}
