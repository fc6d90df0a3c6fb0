//! In-memory transport used by unit tests

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::transport::{DisconnectHandler, Transport, TransportError};

#[derive(Default)]
struct Inner {
    connected: AtomicBool,
    not_ready: AtomicBool,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    heartbeats: AtomicUsize,
    connect_script: Mutex<VecDeque<bool>>,
    failing: Mutex<HashSet<String>>,
    attempted: Mutex<Vec<String>>,
    sent: Mutex<Vec<String>>,
    scheduled: Mutex<Vec<(String, Duration)>>,
    handler: Mutex<Option<DisconnectHandler>>,
}

/// Records every call; connects succeed unless scripted otherwise
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected() -> Self {
        let transport = Self::new();
        transport.inner.connected.store(true, Ordering::SeqCst);
        transport
    }

    /// Results returned by successive `connect` calls before falling back to `true`
    pub fn script_connects(&self, results: &[bool]) {
        self.inner
            .connect_script
            .lock()
            .unwrap()
            .extend(results.iter().copied());
    }

    pub fn fail_command(&self, name: &str) {
        self.inner.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn set_ready(&self, ready: bool) {
        self.inner.not_ready.store(!ready, Ordering::SeqCst);
    }

    /// Simulate the link dropping: mark disconnected and fire the handler
    pub fn drop_link(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.fire_disconnect_handler();
    }

    /// Fire the handler without touching the connection state
    pub fn fire_disconnect_handler(&self) {
        if let Some(handler) = self.inner.handler.lock().unwrap().as_ref() {
            handler();
        }
    }

    pub fn attempted(&self) -> Vec<String> {
        self.inner.attempted.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.inner.sent.lock().unwrap().clone()
    }

    pub fn scheduled(&self) -> Vec<(String, Duration)> {
        self.inner.scheduled.lock().unwrap().clone()
    }

    pub fn heartbeats(&self) -> usize {
        self.inner.heartbeats.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.inner.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn has_disconnect_handler(&self) -> bool {
        self.inner.handler.lock().unwrap().is_some()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> bool {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);
        let ok = self
            .inner
            .connect_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(true);
        if ok {
            self.inner.connected.store(true, Ordering::SeqCst);
        }
        ok
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.inner.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    async fn wait_until_ready(&self, timeout: Duration) -> Result<(), TransportError> {
        if self.inner.not_ready.load(Ordering::SeqCst) {
            tokio::time::sleep(timeout).await;
            return Err(TransportError::ReadyTimeout(timeout));
        }
        Ok(())
    }

    async fn send_command_by_name(&self, name: &str) -> Result<String, TransportError> {
        self.inner.attempted.lock().unwrap().push(name.to_string());
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.inner.failing.lock().unwrap().contains(name) {
            return Err(TransportError::UnknownCommand(name.to_string()));
        }
        self.inner.sent.lock().unwrap().push(name.to_string());
        Ok(format!("OK:{name}"))
    }

    async fn schedule_disconnect_command(
        &self,
        name: &str,
        delay: Duration,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.inner
            .scheduled
            .lock()
            .unwrap()
            .push((name.to_string(), delay));
        Ok(())
    }

    async fn send_heartbeat(&self) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.inner.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_disconnect_handler(&self, handler: Option<DisconnectHandler>) {
        *self.inner.handler.lock().unwrap() = handler;
    }
}
