//! Transport session: owns the single logical connection.
//!
//! Drives the `disconnected → scanning → connecting → connected` state
//! machine, prefers a direct connect to the remembered device over a
//! fresh scan, spawns the notification reader that decodes frames into
//! the event broadcast, and auto-issues `list` + `status` shortly after
//! connecting to hydrate consumers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::link::{
    Advertisement, BleConnection, BleLink, DeviceMemory, RememberedDevice, DEVICE_NAME, TARGET_MTU,
};
use crate::wire::{self, Command, DeviceEvent};

const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── State machine ────────────────────────────────────────────────────

/// Connection state observable by consumers. Owned exclusively by the
/// session; everything else only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Scanning,
    Connecting,
    Connected,
}

/// Whether a connect attempt was user-initiated or came from the
/// reconnection supervisor. Picks the scan window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Manual scan: 10 s window.
    Manual,
    /// Auto-connect: 15 s window.
    Auto,
}

/// Session tuning. Defaults mirror the device firmware's expectations.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Substring filter applied to advertised names (case-insensitive).
    pub device_name: String,
    pub manual_scan_timeout: Duration,
    pub auto_scan_timeout: Duration,
    /// Pause between entering `Connected` and the hydration commands.
    pub settle_delay: Duration,
    pub target_mtu: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME.to_owned(),
            manual_scan_timeout: Duration::from_secs(10),
            auto_scan_timeout: Duration::from_secs(15),
            settle_delay: Duration::from_millis(500),
            target_mtu: TARGET_MTU,
        }
    }
}

// ── Notifications ────────────────────────────────────────────────────

/// A decoded response frame plus its raw text, broadcast to consumers.
/// The raw text is republished verbatim to external listeners.
#[derive(Debug, Clone)]
pub struct Notification {
    pub raw: String,
    pub event: DeviceEvent,
}

// ── Session ──────────────────────────────────────────────────────────

/// Handle to the transport session. Cheaply cloneable.
pub struct Session<L: BleLink> {
    inner: Arc<SessionInner<L>>,
}

impl<L: BleLink> Clone for Session<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SessionInner<L: BleLink> {
    link: L,
    config: SessionConfig,
    memory: Option<Arc<dyn DeviceMemory>>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<Arc<Notification>>,
    conn: Mutex<Option<ActiveConn<L::Conn>>>,
    /// Serializes connect attempts (manual vs supervisor).
    connect_gate: Mutex<()>,
    /// Bumped per established connection so a stale reader can never
    /// clobber the state of a newer connection.
    generation: AtomicU64,
}

struct ActiveConn<C> {
    conn: C,
    generation: u64,
    reader_cancel: CancellationToken,
}

impl<L: BleLink> Session<L> {
    pub fn new(link: L, config: SessionConfig, memory: Option<Arc<dyn DeviceMemory>>) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(SessionInner {
                link,
                config,
                memory,
                state,
                events,
                conn: Mutex::new(None),
                connect_gate: Mutex::new(()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to connection state changes.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Current connection state.
    pub fn current_state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Subscribe to the decoded-event broadcast stream.
    pub fn events(&self) -> broadcast::Receiver<Arc<Notification>> {
        self.inner.events.subscribe()
    }

    /// The persisted device from the last scan-based connect, if any.
    pub fn remembered_device(&self) -> Option<RememberedDevice> {
        self.inner.memory.as_ref().and_then(|m| m.load())
    }

    /// Drop the persisted device; the next connect starts with a scan.
    pub fn forget_device(&self) {
        if let Some(memory) = &self.inner.memory {
            memory.forget();
        }
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Connect to the alarm clock.
    ///
    /// Checks permission first (fails closed), then tries a direct
    /// connect to the remembered device, then falls back to a
    /// scan-by-name where the first matching advertisement wins. A
    /// successful scan connect persists the device for next time.
    pub async fn connect(&self, mode: ConnectMode) -> Result<(), LinkError> {
        let inner = &self.inner;
        let _gate = inner.connect_gate.lock().await;

        if *inner.state.borrow() == SessionState::Connected {
            return Ok(());
        }

        if !inner.link.request_permission().await {
            warn!("bluetooth permission denied; not scanning");
            return Err(LinkError::PermissionDenied);
        }

        // Direct attempt to the remembered device, skipping discovery.
        if let Some(remembered) = inner.memory.as_ref().and_then(|m| m.load()) {
            inner.state.send_replace(SessionState::Connecting);
            debug!(device = %remembered.id, "trying direct connect to remembered device");
            match self.establish(&remembered.id).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(error = %e, "direct connect failed, falling back to scan");
                }
            }
        }

        inner.state.send_replace(SessionState::Scanning);
        let timeout = match mode {
            ConnectMode::Manual => inner.config.manual_scan_timeout,
            ConnectMode::Auto => inner.config.auto_scan_timeout,
        };

        let advertisement = match self.scan_for_device(timeout).await {
            Ok(adv) => adv,
            Err(e) => {
                inner.state.send_replace(SessionState::Disconnected);
                return Err(e);
            }
        };

        inner.state.send_replace(SessionState::Connecting);
        match self.establish(&advertisement.id).await {
            Ok(()) => {
                if let Some(memory) = &inner.memory {
                    memory.save(&RememberedDevice {
                        id: advertisement.id.clone(),
                        name: advertisement
                            .name
                            .unwrap_or_else(|| inner.config.device_name.clone()),
                    });
                }
                Ok(())
            }
            Err(e) => {
                inner.state.send_replace(SessionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Tear down the connection. Best effort; teardown errors are
    /// logged, not propagated.
    pub async fn disconnect(&self) {
        let active = self.inner.conn.lock().await.take();
        if let Some(active) = active {
            active.reader_cancel.cancel();
            active.conn.disconnect().await;
        }
        self.inner.state.send_replace(SessionState::Disconnected);
        debug!("session disconnected");
    }

    // ── Sending ──────────────────────────────────────────────────────

    /// Encode and send one command.
    ///
    /// Fire-and-forget: there is no correlation id on the wire, so the
    /// eventual response is observable only through the event stream.
    pub async fn send(&self, command: &Command) -> Result<(), LinkError> {
        send_text(&self.inner, &command.encode()).await
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Wait for the first advertisement matching the name filter.
    async fn scan_for_device(&self, timeout: Duration) -> Result<Advertisement, LinkError> {
        let inner = &self.inner;
        let mut rx = inner.link.start_scan().await?;
        let filter = inner.config.device_name.to_lowercase();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(adv)) => {
                    let matches = adv
                        .name
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(&filter));
                    if matches {
                        // First match wins; no best-RSSI policy.
                        inner.link.stop_scan().await;
                        info!(device = %adv.id, name = ?adv.name, "found alarm clock");
                        return Ok(adv);
                    }
                }
                Ok(None) => {
                    return Err(LinkError::ScanFailed("scan ended unexpectedly".into()));
                }
                Err(_) => {
                    inner.link.stop_scan().await;
                    return Err(LinkError::ScanTimeout {
                        timeout_secs: timeout.as_secs(),
                    });
                }
            }
        }
    }

    /// Establish the link, start the reader, and schedule hydration.
    async fn establish(&self, id: &crate::link::DeviceId) -> Result<(), LinkError> {
        let inner = &self.inner;
        let (conn, notify_rx) = inner.link.connect(id).await?;

        // Opportunistic MTU bump; the default size still works.
        match conn.negotiate_mtu(inner.config.target_mtu).await {
            Ok(mtu) => debug!(mtu, "MTU negotiated"),
            Err(e) => debug!(error = %e, "MTU negotiation failed, using default"),
        }

        let generation = inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let reader_cancel = CancellationToken::new();

        *inner.conn.lock().await = Some(ActiveConn {
            conn,
            generation,
            reader_cancel: reader_cancel.clone(),
        });

        tokio::spawn(reader_task(
            Arc::clone(&self.inner),
            notify_rx,
            generation,
            reader_cancel,
        ));

        inner.state.send_replace(SessionState::Connected);
        info!(device = %id, "connected to alarm clock");

        tokio::spawn(hydrate_task(Arc::clone(&self.inner)));
        Ok(())
    }
}

async fn send_text<L: BleLink>(inner: &SessionInner<L>, text: &str) -> Result<(), LinkError> {
    let guard = inner.conn.lock().await;
    let active = guard.as_ref().ok_or(LinkError::NotConnected)?;
    debug!(command = text, "sending");
    active.conn.send(text.as_bytes()).await
}

/// Read notifications until cancellation or link loss. The channel
/// closing is the link-loss signal: clear the connection and return to
/// `Disconnected` so the supervisor can take over.
async fn reader_task<L: BleLink>(
    inner: Arc<SessionInner<L>>,
    mut notify_rx: mpsc::Receiver<Vec<u8>>,
    generation: u64,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            frame = notify_rx.recv() => {
                let Some(bytes) = frame else {
                    info!("notification stream ended; link lost");
                    let mut guard = inner.conn.lock().await;
                    if guard.as_ref().is_some_and(|c| c.generation == generation) {
                        guard.take();
                        inner.state.send_replace(SessionState::Disconnected);
                    }
                    return;
                };

                let text = String::from_utf8_lossy(&bytes);
                match wire::decode(&text) {
                    Some(event) => {
                        // No subscribers is fine; hydration still ran.
                        let _ = inner.events.send(Arc::new(Notification {
                            raw: text.trim().to_owned(),
                            event,
                        }));
                    }
                    None => {
                        debug!(raw = %text, "dropping malformed frame");
                    }
                }
            }
        }
    }
}

/// After the settle delay, ask for the alarm list and device status so
/// consumers start from fresh state.
async fn hydrate_task<L: BleLink>(inner: Arc<SessionInner<L>>) {
    tokio::time::sleep(inner.config.settle_delay).await;
    if *inner.state.borrow() != SessionState::Connected {
        return;
    }
    for command in [Command::List, Command::Status] {
        if let Err(e) = send_text(&inner, &command.encode()).await {
            debug!(error = %e, "hydration command failed");
            return;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
