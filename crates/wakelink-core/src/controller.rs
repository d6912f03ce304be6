//! The controller: the single entry point applications hold.
//!
//! Owns the transport session, the alarm store, and the background
//! tasks that keep them consistent: the response router, the
//! disconnect monitor, the countdown ticker, and (when enabled) the
//! reconnection supervisor. All mutating operations apply an
//! optimistic overlay before transmitting and revert it if the send
//! fails; device responses reconcile the overlay away.

use std::sync::{Arc, Mutex as StdMutex};

use chrono::Local;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use wakelink_ble::{
    AlarmTarget, BleLink, Command, ConnectMode, DeviceEvent, DeviceMemory, Session, SessionState,
};

use crate::config::CompanionConfig;
use crate::error::CoreError;
use crate::model::{Alarm, DeviceStatus, NewAlarm};
use crate::store::AlarmStore;
use crate::stream::AlarmStream;
use crate::supervisor;

const RAW_CHANNEL_CAPACITY: usize = 256;

/// Handle to the companion core. Cheaply cloneable; all clones share
/// the same session, store, and background tasks.
pub struct Controller<L: BleLink> {
    inner: Arc<ControllerInner<L>>,
}

impl<L: BleLink> Clone for Controller<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ControllerInner<L: BleLink> {
    config: CompanionConfig,
    session: Session<L>,
    store: Arc<AlarmStore>,
    status: watch::Sender<Option<DeviceStatus>>,
    last_error: watch::Sender<Option<String>>,
    raw_tx: broadcast::Sender<Arc<str>>,
    cancel: CancellationToken,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl<L: BleLink> Controller<L> {
    /// Build a controller and spawn its background tasks. Must be
    /// called from within a Tokio runtime.
    pub fn new(
        link: L,
        config: CompanionConfig,
        memory: Option<Arc<dyn DeviceMemory>>,
    ) -> Self {
        let session = Session::new(link, config.session_config(), memory);
        let (status, _) = watch::channel(None);
        let (last_error, _) = watch::channel(None);
        let (raw_tx, _) = broadcast::channel(RAW_CHANNEL_CAPACITY);

        let controller = Self {
            inner: Arc::new(ControllerInner {
                config,
                session,
                store: Arc::new(AlarmStore::new()),
                status,
                last_error,
                raw_tx,
                cancel: CancellationToken::new(),
                tasks: StdMutex::new(Vec::new()),
            }),
        };

        let mut handles = vec![
            tokio::spawn(router_task(controller.clone())),
            tokio::spawn(monitor_task(controller.clone())),
            tokio::spawn(countdown_task(controller.clone())),
        ];
        if controller.inner.config.auto_reconnect {
            handles.push(tokio::spawn(supervisor::run(controller.clone())));
        }
        if let Ok(mut tasks) = controller.inner.tasks.lock() {
            *tasks = handles;
        }

        controller
    }

    // ── Connection lifecycle ────────────────────────────────────────

    /// Connect now, on the user-initiated (shorter) scan window.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.try_connect(ConnectMode::Manual).await
    }

    pub(crate) async fn try_connect(&self, mode: ConnectMode) -> Result<(), CoreError> {
        match self.inner.session.connect(mode).await {
            Ok(()) => {
                self.inner.last_error.send_replace(None);
                Ok(())
            }
            Err(err) => {
                let err = CoreError::from(err);
                self.set_error(err.to_string());
                Err(err)
            }
        }
    }

    /// Tear down the connection. With auto-reconnect enabled the
    /// supervisor will establish a new one.
    pub async fn disconnect(&self) {
        self.inner.session.disconnect().await;
    }

    /// Stop all background tasks and drop the connection. The
    /// controller is inert afterwards.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handles = match self.inner.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            let _ = handle.await;
        }
        self.inner.session.disconnect().await;
    }

    /// Drop the persisted device; the next connect starts with a scan.
    pub fn forget_device(&self) {
        self.inner.session.forget_device();
    }

    // ── Device operations ───────────────────────────────────────────

    /// Ask the device for its full alarm list. The store presents the
    /// authoritative list while loading; a transfer that stalls longer
    /// than the configured timeout is closed out with whatever arrived.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        self.ensure_connected()?;
        let generation = self.inner.store.begin_refresh();
        self.spawn_transfer_watchdog(generation);
        if let Err(err) = self.send(Command::List).await {
            self.inner.store.transfer_timed_out(generation);
            return Err(err);
        }
        Ok(())
    }

    /// Create an alarm. Returns the index the alarm is expected to
    /// land on; the device's list response confirms it.
    pub async fn add(&self, request: NewAlarm) -> Result<u32, CoreError> {
        request.validate()?;
        self.ensure_connected()?;
        let index = self.inner.store.speculate_add(&request, &Local::now());
        match self.send(Command::Add(request.to_wire())).await {
            Ok(()) => Ok(index),
            Err(err) => {
                self.inner.store.revert();
                Err(err)
            }
        }
    }

    /// Remove an alarm by index or name.
    pub async fn remove(&self, target: impl Into<AlarmTarget>) -> Result<(), CoreError> {
        let target = target.into();
        self.ensure_connected()?;
        let Some(_removed) = self.inner.store.speculate_remove(&target) else {
            return Err(CoreError::AlarmNotFound {
                target: target.to_string(),
            });
        };
        match self.send(Command::Remove(target)).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.inner.store.revert();
                Err(err)
            }
        }
    }

    /// Flip an alarm's enabled state.
    pub async fn toggle(&self, target: impl Into<AlarmTarget>) -> Result<(), CoreError> {
        let target = target.into();
        self.ensure_connected()?;
        let toggled = self.inner.store.speculate_toggle(&target, &Local::now());
        if toggled.is_none() {
            return Err(CoreError::AlarmNotFound {
                target: target.to_string(),
            });
        }
        match self.send(Command::Toggle(target)).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.inner.store.revert();
                Err(err)
            }
        }
    }

    /// Replace an alarm with the merged result of `request`. The wire
    /// has no edit command, so this transmits a remove followed by an
    /// add. A send failure between the two leaves the device with the
    /// alarm removed; the next refresh shows the true state.
    pub async fn edit(
        &self,
        target: impl Into<AlarmTarget>,
        request: NewAlarm,
    ) -> Result<(), CoreError> {
        let target = target.into();
        request.validate()?;
        self.ensure_connected()?;
        let Some(original) = self
            .inner
            .store
            .speculate_edit(&target, &request, &Local::now())
        else {
            return Err(CoreError::AlarmNotFound {
                target: target.to_string(),
            });
        };
        let result = async {
            self.send(Command::Remove(AlarmTarget::Index(original.index)))
                .await?;
            self.send(Command::Add(request.to_wire())).await
        }
        .await;
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                self.inner.store.revert();
                Err(err)
            }
        }
    }

    /// Ask for a status snapshot. The response lands in [`Self::status`].
    pub async fn request_status(&self) -> Result<(), CoreError> {
        self.ensure_connected()?;
        self.send(Command::Status).await
    }

    /// Liveness probe; the device answers with a heartbeat.
    pub async fn ping(&self) -> Result<(), CoreError> {
        self.ensure_connected()?;
        self.send(Command::Ping).await
    }

    // ── Observation ─────────────────────────────────────────────────

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<SessionState> {
        self.inner.session.state()
    }

    /// Current connection state.
    pub fn current_state(&self) -> SessionState {
        self.inner.session.current_state()
    }

    /// A live view of the presented alarm list.
    pub fn alarms(&self) -> AlarmStream {
        AlarmStream::new(self.inner.store.subscribe())
    }

    /// Current snapshot of the presented alarm list, by device index.
    pub fn alarms_snapshot(&self) -> Arc<Vec<Alarm>> {
        self.inner.store.snapshot()
    }

    /// The presented list ordered by trigger time of day.
    pub fn chronological(&self) -> Vec<Alarm> {
        self.inner.store.chronological()
    }

    /// Watch receiver for the list-refresh loading flag.
    pub fn loading(&self) -> watch::Receiver<bool> {
        self.inner.store.subscribe_loading()
    }

    /// Watch receiver for the latest device status. `None` while
    /// disconnected or before the first status response.
    pub fn status(&self) -> watch::Receiver<Option<DeviceStatus>> {
        self.inner.status.subscribe()
    }

    /// Watch receiver for the most recent error message.
    pub fn last_error(&self) -> watch::Receiver<Option<String>> {
        self.inner.last_error.subscribe()
    }

    /// Clear the displayed error.
    pub fn clear_error(&self) {
        self.inner.last_error.send_replace(None);
    }

    /// Subscribe to raw response lines, decoded or not.
    pub fn raw_responses(&self) -> broadcast::Receiver<Arc<str>> {
        self.inner.raw_tx.subscribe()
    }

    /// Direct access to the alarm store.
    pub fn store(&self) -> &Arc<AlarmStore> {
        &self.inner.store
    }

    // ── Internals ───────────────────────────────────────────────────

    pub(crate) fn config(&self) -> &CompanionConfig {
        &self.inner.config
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub(crate) fn set_error(&self, message: String) {
        self.inner.last_error.send_replace(Some(message));
    }

    fn ensure_connected(&self) -> Result<(), CoreError> {
        if self.current_state() == SessionState::Connected {
            Ok(())
        } else {
            Err(CoreError::NotConnected)
        }
    }

    async fn send(&self, command: Command) -> Result<(), CoreError> {
        match self.inner.session.send(&command).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = CoreError::from(err);
                self.set_error(err.to_string());
                Err(err)
            }
        }
    }

    fn spawn_transfer_watchdog(&self, generation: u64) {
        let controller = self.clone();
        tokio::spawn(async move {
            let timeout = controller.inner.config.list_timeout;
            tokio::select! {
                biased;
                () = controller.inner.cancel.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    controller.inner.store.transfer_timed_out(generation);
                }
            }
        });
    }
}

// ── Background tasks ────────────────────────────────────────────────

/// Routes decoded device events into the store and the observation
/// channels. The single consumer of the session's event stream.
async fn router_task<L: BleLink>(controller: Controller<L>) {
    let cancel = controller.cancel_token();
    let mut events = controller.inner.session.events();
    loop {
        let notification = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            received = events.recv() => match received {
                Ok(notification) => notification,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "response router lagged behind the event stream");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
        };

        let _ = controller
            .inner
            .raw_tx
            .send(Arc::from(notification.raw.as_str()));

        match &notification.event {
            DeviceEvent::ListStart { count } => {
                debug!(count, "list transfer announced");
                let generation = controller.inner.store.list_started(*count);
                if *count > 0 {
                    controller.spawn_transfer_watchdog(generation);
                }
            }
            DeviceEvent::Alarm(record) => {
                controller.inner.store.record(Alarm::from(record.clone()));
            }
            DeviceEvent::Status(record) => {
                controller
                    .inner
                    .status
                    .send_replace(Some(DeviceStatus::from(record.clone())));
            }
            DeviceEvent::ListCleared => {
                controller.inner.store.cleared();
            }
            DeviceEvent::Ack(kind) => {
                debug!(?kind, "device acknowledged an operation");
            }
            DeviceEvent::Error { message } => {
                // Device-side rejection; the link itself stays up.
                warn!(message, "device reported an error");
                controller.set_error(
                    CoreError::Device {
                        message: message.clone(),
                    }
                    .to_string(),
                );
            }
            DeviceEvent::Heartbeat => {
                trace!("heartbeat");
            }
            DeviceEvent::Unknown { raw } => {
                debug!(raw, "unrecognized response");
            }
        }
    }
}

/// Clears session-scoped caches when the connection drops.
async fn monitor_task<L: BleLink>(controller: Controller<L>) {
    let cancel = controller.cancel_token();
    let mut state = controller.connection_state();
    let mut previous = *state.borrow_and_update();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            changed = state.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
        let current = *state.borrow_and_update();
        if current == SessionState::Disconnected && previous != SessionState::Disconnected {
            debug!("connection lost, clearing session caches");
            controller.inner.store.clear_all();
            controller.inner.status.send_replace(None);
        }
        previous = current;
    }
}

/// Periodically recomputes countdown labels from the local clock.
async fn countdown_task<L: BleLink>(controller: Controller<L>) {
    let cancel = controller.cancel_token();
    let mut ticker = tokio::time::interval(controller.inner.config.countdown_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                controller.inner.store.recompute_countdowns(&Local::now());
            }
        }
    }
}
