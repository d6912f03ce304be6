use thiserror::Error;

/// Top-level error type for the `wakelink-ble` crate.
///
/// Covers every failure mode of the transport layer: permission checks,
/// scanning, connection establishment, and writes to the command
/// characteristic. `wakelink-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum LinkError {
    // ── Permissions ─────────────────────────────────────────────────
    /// The platform denied Bluetooth scan/connect permission.
    /// No scan or connect is attempted in this case.
    #[error("Bluetooth permission denied")]
    PermissionDenied,

    // ── Scanning ────────────────────────────────────────────────────
    /// The scan itself failed at the transport level.
    #[error("Scan failed: {0}")]
    ScanFailed(String),

    /// No matching device advertised within the scan window.
    #[error("No alarm clock found within {timeout_secs}s")]
    ScanTimeout { timeout_secs: u64 },

    // ── Connection ──────────────────────────────────────────────────
    /// Link establishment or service discovery failed.
    #[error("Failed to connect to {device}: {reason}")]
    ConnectFailed { device: String, reason: String },

    /// An operation required a live connection and there was none.
    #[error("Not connected")]
    NotConnected,

    // ── Writes ──────────────────────────────────────────────────────
    /// Handing bytes to the link failed. The write is fire-and-forget:
    /// success means the bytes reached the local stack, not the device.
    #[error("Send failed: {0}")]
    SendFailed(String),
}

impl LinkError {
    /// Returns `true` if this is a transient failure worth retrying
    /// on the ordinary (shorter) backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ScanFailed(_)
                | Self::ScanTimeout { .. }
                | Self::ConnectFailed { .. }
                | Self::SendFailed(_)
        )
    }
}
