//! Bluetooth LE client for the IR blaster
//!
//! Scans by advertised name, connects, resolves saved-code names to indices,
//! and watches adapter events so a dropped link reaches the disconnect
//! handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::protocol::{
    decode_status, CodeTable, ScheduleRequest, SAVED_CODES_UUID, SCHEDULE_UUID, SEND_UUID,
    SERVICE_UUID, STATUS_UUID,
};
use super::{DisconnectHandler, Transport, TransportError};

const SCAN_DURATION: Duration = Duration::from_secs(10);
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);
const SAVED_CODES_ATTEMPTS: usize = 3;
const SAVED_CODES_RETRY_DELAY: Duration = Duration::from_secs(1);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Handles needed for GATT traffic on a connected blaster
#[derive(Clone)]
struct Gatt {
    peripheral: Peripheral,
    saved_codes: Characteristic,
    send: Characteristic,
    status: Characteristic,
    schedule: Characteristic,
}

/// A live connection plus the task watching for its loss
struct Link {
    gatt: Gatt,
    watcher: JoinHandle<()>,
}

/// BLE transport to the blaster
pub struct BleTransport {
    device_name: String,
    link: Mutex<Option<Link>>,
    connected: Arc<AtomicBool>,
    /// Cached name->index table; `None` means reload on next send
    codes: Mutex<Option<CodeTable>>,
    /// One status round-trip at a time
    send_lock: Mutex<()>,
    on_disconnect: Arc<StdMutex<Option<DisconnectHandler>>>,
}

impl BleTransport {
    /// Create a transport that will look for `device_name` when connecting
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            link: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            codes: Mutex::new(None),
            send_lock: Mutex::new(()),
            on_disconnect: Arc::new(StdMutex::new(None)),
        }
    }

    async fn try_connect(&self) -> Result<(), TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        let peripheral = self.find_device(&adapter).await?;

        // Subscribe first so a drop during service discovery is still seen
        let events = adapter.events().await?;
        peripheral.connect().await?;
        peripheral.discover_services().await?;

        let characteristics = peripheral.characteristics();
        let find = |uuid| {
            characteristics
                .iter()
                .find(|c| c.service_uuid == SERVICE_UUID && c.uuid == uuid)
                .cloned()
                .ok_or(TransportError::MissingCharacteristic(uuid))
        };
        let gatt = Gatt {
            saved_codes: find(SAVED_CODES_UUID)?,
            send: find(SEND_UUID)?,
            status: find(STATUS_UUID)?,
            schedule: find(SCHEDULE_UUID)?,
            peripheral: peripheral.clone(),
        };

        *self.codes.lock().await = None;
        self.connected.store(true, Ordering::SeqCst);
        let watcher = watch_disconnects(
            disconnections(events),
            peripheral.id(),
            Arc::clone(&self.connected),
            Arc::clone(&self.on_disconnect),
        );
        if let Some(old) = self.link.lock().await.replace(Link { gatt, watcher }) {
            old.watcher.abort();
        }

        info!(device = %self.device_name, "connected to IR blaster");
        Ok(())
    }

    /// Scan for the first peripheral whose advertised name matches
    async fn find_device(&self, adapter: &Adapter) -> Result<Peripheral, TransportError> {
        info!(device = %self.device_name, "scanning for BLE device");
        adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(SCAN_DURATION).await;
        let peripherals = adapter.peripherals().await?;
        if let Err(e) = adapter.stop_scan().await {
            debug!(?e, "failed to stop scan");
        }

        for peripheral in peripherals {
            let name = peripheral
                .properties()
                .await?
                .and_then(|props| props.local_name);
            if matches_device_name(&self.device_name, name.as_deref()) {
                info!(name = ?name, address = %peripheral.address(), "found IR blaster");
                return Ok(peripheral);
            }
        }

        warn!(device = %self.device_name, "device not found");
        Err(TransportError::DeviceNotFound(self.device_name.clone()))
    }

    async fn gatt(&self) -> Result<Gatt, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.link
            .lock()
            .await
            .as_ref()
            .map(|link| link.gatt.clone())
            .ok_or(TransportError::NotConnected)
    }

    /// Read and parse the saved codes list, retrying on empty or invalid data
    async fn read_saved_codes(&self, attempts: usize) -> Result<CodeTable, TransportError> {
        let gatt = self.gatt().await?;
        let mut last_error = None;

        for attempt in 1..=attempts {
            let raw = gatt.peripheral.read(&gatt.saved_codes).await?;
            match CodeTable::parse(&raw) {
                Ok(table) => return Ok(table),
                Err(e) => {
                    if attempt < attempts {
                        debug!(attempt, error = %e, "saved codes read failed, retrying");
                        tokio::time::sleep(SAVED_CODES_RETRY_DELAY).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| TransportError::MalformedCodes("no read attempted".to_string())))
    }

    async fn resolve_index(&self, name: &str) -> Result<u8, TransportError> {
        let mut cache = self.codes.lock().await;
        let table = match cache.take() {
            Some(table) => table,
            None => {
                let table = self.read_saved_codes(SAVED_CODES_ATTEMPTS).await?;
                debug!(codes = table.len(), "saved codes loaded");
                table
            }
        };
        let index = table.index_of(name);
        *cache = Some(table);
        index.ok_or_else(|| TransportError::UnknownCommand(name.to_string()))
    }

    /// Write a saved-code index and wait for the status notification
    async fn send_index(&self, gatt: &Gatt, index: u8) -> Result<String, TransportError> {
        let _guard = self.send_lock.lock().await;

        let mut notifications = gatt.peripheral.notifications().await?;
        gatt.peripheral.subscribe(&gatt.status).await?;
        let result = write_and_await_status(gatt, &mut notifications, index).await;
        if let Err(e) = gatt.peripheral.unsubscribe(&gatt.status).await {
            debug!(?e, "failed to unsubscribe from status");
        }
        result
    }

    async fn write_schedule(&self, request: ScheduleRequest) -> Result<(), TransportError> {
        let gatt = self.gatt().await?;
        let payload = request.to_bytes()?;
        gatt.peripheral
            .write(&gatt.schedule, &payload, WriteType::WithResponse)
            .await?;
        Ok(())
    }
}

async fn write_and_await_status<S>(
    gatt: &Gatt,
    notifications: &mut S,
    index: u8,
) -> Result<String, TransportError>
where
    S: Stream<Item = ValueNotification> + Unpin,
{
    gatt.peripheral
        .write(&gatt.send, &[index], WriteType::WithResponse)
        .await?;

    let status = tokio::time::timeout(STATUS_TIMEOUT, async {
        while let Some(notification) = notifications.next().await {
            if notification.uuid == STATUS_UUID {
                return Some(decode_status(&notification.value));
            }
        }
        None
    })
    .await
    .map_err(|_| TransportError::StatusTimeout(STATUS_TIMEOUT))?;

    // Stream ends only when the peripheral goes away
    status.ok_or(TransportError::NotConnected)
}

/// IDs of peripherals the adapter reports as disconnected
fn disconnections<S>(events: S) -> impl Stream<Item = PeripheralId> + Send + 'static
where
    S: Stream<Item = CentralEvent> + Send + 'static,
{
    events.filter_map(|event| async move {
        match event {
            CentralEvent::DeviceDisconnected(id) => Some(id),
            _ => None,
        }
    })
}

/// Spawn a task that clears `connected` and fires the disconnect handler
/// once `id` shows up in `dropped`
fn watch_disconnects<S, I>(
    dropped: S,
    id: I,
    connected: Arc<AtomicBool>,
    handler: Arc<StdMutex<Option<DisconnectHandler>>>,
) -> JoinHandle<()>
where
    S: Stream<Item = I> + Send + 'static,
    I: PartialEq + Send + 'static,
{
    tokio::spawn(async move {
        let mut dropped = std::pin::pin!(dropped);
        while let Some(gone) = dropped.next().await {
            if gone != id {
                continue;
            }
            warn!("BLE disconnected");
            connected.store(false, Ordering::SeqCst);
            let guard = handler.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(callback) = guard.as_ref() {
                callback();
            }
            break;
        }
    })
}

/// Case-insensitive substring match of the configured name
fn matches_device_name(wanted: &str, advertised: Option<&str>) -> bool {
    advertised
        .map(|name| name.to_lowercase().contains(&wanted.to_lowercase()))
        .unwrap_or(false)
}

#[async_trait]
impl Transport for BleTransport {
    async fn connect(&self) -> bool {
        if self.is_connected() {
            return true;
        }
        match self.try_connect().await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "connect failed");
                false
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.set_disconnect_handler(None);
        self.connected.store(false, Ordering::SeqCst);
        *self.codes.lock().await = None;

        let link = self.link.lock().await.take();
        if let Some(link) = link {
            link.watcher.abort();
            if let Err(e) = link.gatt.peripheral.disconnect().await {
                warn!(?e, "BLE disconnect failed");
            }
        }
        info!("disconnected from IR blaster");
    }

    async fn wait_until_ready(&self, timeout: Duration) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        tokio::time::timeout(timeout, async {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match self.read_saved_codes(1).await {
                    Ok(_) => return,
                    Err(e) => debug!(attempt, error = %e, "link not ready yet"),
                }
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        })
        .await
        .map_err(|_| TransportError::ReadyTimeout(timeout))
    }

    async fn send_command_by_name(&self, name: &str) -> Result<String, TransportError> {
        let gatt = self.gatt().await?;
        let index = self.resolve_index(name).await?;
        debug!(command = %name, index, "sending saved code");
        self.send_index(&gatt, index).await
    }

    async fn schedule_disconnect_command(
        &self,
        name: &str,
        delay: Duration,
    ) -> Result<(), TransportError> {
        self.write_schedule(ScheduleRequest::Arm {
            delay_seconds: delay.as_secs(),
            command: name.to_string(),
        })
        .await?;
        info!(command = %name, delay_secs = delay.as_secs(), "auto-disconnect command armed");
        Ok(())
    }

    async fn send_heartbeat(&self) -> Result<(), TransportError> {
        self.write_schedule(ScheduleRequest::heartbeat()).await
    }

    fn set_disconnect_handler(&self, handler: Option<DisconnectHandler>) {
        *self
            .on_disconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }
}
