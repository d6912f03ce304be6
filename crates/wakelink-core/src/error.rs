//! Error types for the core crate.

use wakelink_ble::LinkError;

/// Errors surfaced by [`Controller`](crate::Controller) operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The platform refused Bluetooth access.
    #[error("Bluetooth permission denied")]
    PermissionDenied,

    /// An operation required an active connection and there was none.
    #[error("Not connected to an alarm clock")]
    NotConnected,

    /// A remove, toggle, or edit named an alarm the local store does not have.
    #[error("No alarm matching '{target}'")]
    AlarmNotFound { target: String },

    /// An alarm request failed local validation before anything was sent.
    #[error("Invalid alarm: {message}")]
    InvalidAlarm { message: String },

    /// The device reported an error over the wire.
    #[error("Device error: {message}")]
    Device { message: String },

    /// The underlying link failed.
    #[error("Transport error: {0}")]
    Transport(#[source] LinkError),
}

impl From<LinkError> for CoreError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::PermissionDenied => Self::PermissionDenied,
            LinkError::NotConnected => Self::NotConnected,
            other => Self::Transport(other),
        }
    }
}

impl CoreError {
    /// Whether a failed connection attempt is worth retrying on the
    /// ordinary cadence. Slow-path failures (permission problems,
    /// anything unexpected) get a longer pause.
    pub(crate) fn is_ordinary_connect_failure(&self) -> bool {
        match self {
            Self::Transport(inner) => inner.is_transient(),
            Self::NotConnected => true,
            _ => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn link_errors_translate_at_the_seam() {
        assert!(matches!(
            CoreError::from(LinkError::PermissionDenied),
            CoreError::PermissionDenied
        ));
        assert!(matches!(
            CoreError::from(LinkError::NotConnected),
            CoreError::NotConnected
        ));
        assert!(matches!(
            CoreError::from(LinkError::SendFailed("gatt write failed".into())),
            CoreError::Transport(_)
        ));
    }

    #[test]
    fn transient_transport_failures_are_ordinary() {
        let err = CoreError::from(LinkError::ScanTimeout { timeout_secs: 15 });
        assert!(err.is_ordinary_connect_failure());
        assert!(!CoreError::PermissionDenied.is_ordinary_connect_failure());
    }
}
