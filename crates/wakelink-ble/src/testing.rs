//! Scripted in-process link for tests.
//!
//! The real transport is a platform BLE stack with nothing like wiremock
//! available, so tests drive a [`MockLink`]: advertisements, connection
//! acceptance, send failures, and device responses are all programmable,
//! and frames can be injected or the link dropped mid-session.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::LinkError;
use crate::link::{
    Advertisement, BleConnection, BleLink, DeviceId, DeviceMemory, RememberedDevice,
};

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

#[derive(Default)]
struct Shared {
    deny_permission: AtomicBool,
    refuse_connections: AtomicBool,
    fail_sends: AtomicBool,
    adverts: Mutex<Vec<Advertisement>>,
    scan_count: AtomicUsize,
    scan_tx: Mutex<Option<mpsc::Sender<Advertisement>>>,
    connect_attempts: AtomicUsize,
    connected_to: Mutex<Option<DeviceId>>,
    notify_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    responder: Mutex<Option<Responder>>,
    sent: Mutex<Vec<String>>,
}

/// A scripted BLE link. Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct MockLink {
    shared: Arc<Shared>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_permission(&self) {
        self.shared.deny_permission.store(true, Ordering::SeqCst);
    }

    /// Every future connect attempt fails at the transport level.
    pub fn refuse_connections(&self) {
        self.shared.refuse_connections.store(true, Ordering::SeqCst);
    }

    /// Every future send fails at the transport level.
    pub fn fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Add an advertisement that future scans will observe.
    pub fn advertise(&self, id: &str, name: Option<&str>) {
        self.lock(&self.shared.adverts).push(Advertisement {
            id: DeviceId::from(id),
            name: name.map(str::to_owned),
        });
    }

    /// Script the device: called with each sent command, returns the
    /// response frames to notify back.
    pub fn respond_with(&self, responder: impl FnMut(&str) -> Vec<String> + Send + 'static) {
        *self.lock(&self.shared.responder) = Some(Box::new(responder));
    }

    /// Inject an unsolicited notification frame.
    pub fn push(&self, text: &str) {
        let tx = self
            .lock(&self.shared.notify_tx)
            .clone()
            .expect("push requires a live connection");
        tx.try_send(text.as_bytes().to_vec())
            .expect("mock notification channel full");
    }

    /// Simulate link loss: the notification channel closes.
    pub fn drop_link(&self) {
        self.lock(&self.shared.notify_tx).take();
    }

    pub fn scan_count(&self) -> usize {
        self.shared.scan_count.load(Ordering::SeqCst)
    }

    pub fn connect_attempts(&self) -> usize {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn connected_to(&self) -> Option<DeviceId> {
        self.lock(&self.shared.connected_to).clone()
    }

    /// All command texts sent so far, in order.
    pub fn sent_commands(&self) -> Vec<String> {
        self.lock(&self.shared.sent).clone()
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().expect("mock lock poisoned")
    }
}

impl BleLink for MockLink {
    type Conn = MockConnection;

    async fn request_permission(&self) -> bool {
        !self.shared.deny_permission.load(Ordering::SeqCst)
    }

    async fn start_scan(&self) -> Result<mpsc::Receiver<Advertisement>, LinkError> {
        self.shared.scan_count.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        for adv in &*self.lock(&self.shared.adverts) {
            let _ = tx.try_send(adv.clone());
        }
        // Keep the sender alive so the scan stays open until stopped.
        *self.lock(&self.shared.scan_tx) = Some(tx);
        Ok(rx)
    }

    async fn stop_scan(&self) {
        self.lock(&self.shared.scan_tx).take();
    }

    async fn connect(
        &self,
        id: &DeviceId,
    ) -> Result<(Self::Conn, mpsc::Receiver<Vec<u8>>), LinkError> {
        self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.shared.refuse_connections.load(Ordering::SeqCst) {
            return Err(LinkError::ConnectFailed {
                device: id.to_string(),
                reason: "connection refused by mock".into(),
            });
        }

        let (tx, rx) = mpsc::channel(64);
        *self.lock(&self.shared.notify_tx) = Some(tx);
        *self.lock(&self.shared.connected_to) = Some(id.clone());

        Ok((
            MockConnection {
                shared: Arc::clone(&self.shared),
            },
            rx,
        ))
    }
}

pub struct MockConnection {
    shared: Arc<Shared>,
}

impl BleConnection for MockConnection {
    async fn send(&self, payload: &[u8]) -> Result<(), LinkError> {
        let text = String::from_utf8_lossy(payload).into_owned();
        self.shared
            .sent
            .lock()
            .expect("mock lock poisoned")
            .push(text.clone());

        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(LinkError::SendFailed("send refused by mock".into()));
        }

        let replies = {
            let mut responder = self.shared.responder.lock().expect("mock lock poisoned");
            responder.as_mut().map(|f| f(&text)).unwrap_or_default()
        };
        if !replies.is_empty() {
            let tx = self
                .shared
                .notify_tx
                .lock()
                .expect("mock lock poisoned")
                .clone();
            if let Some(tx) = tx {
                for reply in replies {
                    tx.try_send(reply.into_bytes())
                        .expect("mock notification channel full");
                }
            }
        }
        Ok(())
    }

    async fn negotiate_mtu(&self, target: usize) -> Result<usize, LinkError> {
        Ok(target)
    }

    async fn disconnect(&self) {
        self.shared
            .notify_tx
            .lock()
            .expect("mock lock poisoned")
            .take();
    }
}

/// In-memory [`DeviceMemory`] for tests.
#[derive(Default)]
pub struct MemoryCell {
    device: Mutex<Option<RememberedDevice>>,
}

impl DeviceMemory for MemoryCell {
    fn load(&self) -> Option<RememberedDevice> {
        self.device.lock().expect("mock lock poisoned").clone()
    }

    fn save(&self, device: &RememberedDevice) {
        *self.device.lock().expect("mock lock poisoned") = Some(device.clone());
    }

    fn forget(&self) {
        self.device.lock().expect("mock lock poisoned").take();
    }
}
