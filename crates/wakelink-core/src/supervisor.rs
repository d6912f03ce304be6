//! Reconnection supervisor.
//!
//! Whenever the session sits disconnected, the supervisor attempts an
//! auto-mode connect. Failures wait a fixed delay before the next
//! attempt: the ordinary cadence for transient transport failures, a
//! slower one for anything unexpected. Delays are fixed, never
//! exponential.

use tracing::{debug, info, warn};
use wakelink_ble::{BleLink, ConnectMode, SessionState};

use crate::controller::Controller;

pub(crate) async fn run<L: BleLink>(controller: Controller<L>) {
    let cancel = controller.cancel_token();
    let mut state = controller.connection_state();
    debug!("reconnection supervisor started");

    loop {
        // Park until the session is disconnected.
        while *state.borrow_and_update() != SessionState::Disconnected {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                changed = state.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        let attempt = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            result = controller.try_connect(ConnectMode::Auto) => result,
        };

        match attempt {
            Ok(()) => {
                info!("auto-reconnect established a connection");
            }
            Err(err) => {
                let delay = if err.is_ordinary_connect_failure() {
                    controller.config().retry_delay
                } else {
                    controller.config().retry_delay_slow
                };
                warn!(
                    error = %err,
                    delay_secs = delay.as_secs(),
                    "auto-reconnect failed, waiting before the next attempt"
                );
                // The failed attempt itself churned the state watch
                // (Scanning, Connecting, back to Disconnected). Mark
                // that seen, or the pause would end immediately.
                state.mark_unchanged();
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                    // A manual connect during the pause ends the wait.
                    changed = state.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}
