//! `btleplug` implementation of [`DeviceChannel`].

use async_trait::async_trait;
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures_lite::{Stream, StreamExt};
use ideal_led_lib::constants::{NOTIFY_UUID, SERVICE_UUID, WRITE_CMD_UUID};
use ideal_led_lib::{ChannelError, DeviceChannel, WriteMode};
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

const SCAN_POLL: Duration = Duration::from_millis(250);

/// A device seen during a scan
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    /// Advertises the controller's command service
    pub is_controller: bool,
}

#[derive(Clone)]
struct Link {
    peripheral: Peripheral,
    command: Characteristic,
}

pub struct BleChannel {
    adapter: Adapter,
    link: Mutex<Option<Link>>,
    notifications: tokio::sync::Mutex<Option<NotificationStream>>,
}

fn backend(e: btleplug::Error) -> ChannelError {
    ChannelError::Backend(e.to_string())
}

/// Only a refusal of the write itself counts as rejected; a dropped link is not.
fn write_error(e: btleplug::Error, mode: WriteMode) -> ChannelError {
    match e {
        btleplug::Error::NotConnected | btleplug::Error::DeviceNotFound => ChannelError::Disconnected,
        btleplug::Error::NotSupported(_) | btleplug::Error::PermissionDenied if mode == WriteMode::WithResponse => {
            ChannelError::WriteRejected(e.to_string())
        }
        // some backends only report the GATT status as text
        e if mode == WriteMode::WithResponse && refusal_text(&e.to_string()) => ChannelError::WriteRejected(e.to_string()),
        e => backend(e),
    }
}

fn refusal_text(message: &str) -> bool {
    let message = message.to_lowercase();
    ["not permitted", "notpermitted", "not supported", "notsupported"]
        .iter()
        .any(|needle| message.contains(needle))
}

fn uuid(s: &str) -> Result<Uuid, ChannelError> {
    Uuid::parse_str(s).map_err(|e| ChannelError::Backend(format!("invalid UUID {s}: {e}")))
}

/// First Bluetooth adapter on this host
pub async fn default_adapter() -> Result<Adapter, ChannelError> {
    let manager = Manager::new().await.map_err(backend)?;
    let adapters = manager.adapters().await.map_err(backend)?;
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| ChannelError::Backend("No Bluetooth adapter found".to_string()))
}

/// Scan for `duration` and list everything seen, controllers first.
pub async fn discover(adapter: &Adapter, duration: Duration) -> Result<Vec<DiscoveredDevice>, ChannelError> {
    let service = uuid(SERVICE_UUID)?;
    adapter.start_scan(ScanFilter::default()).await.map_err(backend)?;
    sleep(duration).await;
    if let Err(e) = adapter.stop_scan().await {
        debug!("Failed to stop scan cleanly: {e}");
    }

    let mut devices = Vec::new();
    for peripheral in adapter.peripherals().await.map_err(backend)? {
        let Some(properties) = peripheral.properties().await.map_err(backend)? else {
            continue;
        };
        devices.push(DiscoveredDevice {
            address: peripheral_address(&peripheral, properties.address.to_string()),
            name: properties.local_name,
            rssi: properties.rssi,
            is_controller: properties.services.contains(&service),
        });
    }
    devices.sort_by_key(|d| (!d.is_controller, std::cmp::Reverse(d.rssi)));
    Ok(devices)
}

/// Platforms without MAC access (macOS) only expose an opaque peripheral id.
fn peripheral_address(peripheral: &Peripheral, mac: String) -> String {
    if mac == "00:00:00:00:00:00" {
        peripheral.id().to_string()
    } else {
        mac
    }
}

impl BleChannel {
    pub fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            link: Mutex::new(None),
            notifications: tokio::sync::Mutex::new(None),
        }
    }

    fn link(&self) -> Result<Link, ChannelError> {
        self.link
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(ChannelError::Disconnected)
    }

    async fn find(&self, address: &str) -> Result<Peripheral, ChannelError> {
        self.adapter.start_scan(ScanFilter::default()).await.map_err(backend)?;
        loop {
            for peripheral in self.adapter.peripherals().await.map_err(backend)? {
                let Some(properties) = peripheral.properties().await.map_err(backend)? else {
                    continue;
                };
                let found = peripheral_address(&peripheral, properties.address.to_string());
                if found.eq_ignore_ascii_case(address) || peripheral.id().to_string().eq_ignore_ascii_case(address) {
                    if let Err(e) = self.adapter.stop_scan().await {
                        debug!("Failed to stop scan cleanly: {e}");
                    }
                    info!("Found {address} ({:?}, rssi {:?})", properties.local_name, properties.rssi);
                    return Ok(peripheral);
                }
            }
            sleep(SCAN_POLL).await;
        }
    }
}

#[async_trait]
impl DeviceChannel for BleChannel {
    async fn connect(&self, address: &str) -> Result<(), ChannelError> {
        let peripheral = self.find(address).await?;
        if !peripheral.is_connected().await.map_err(backend)? {
            peripheral.connect().await.map_err(backend)?;
        }
        peripheral.discover_services().await.map_err(backend)?;

        let write_uuid = uuid(WRITE_CMD_UUID)?;
        let notify_uuid = uuid(NOTIFY_UUID)?;
        let characteristics = peripheral.characteristics();
        let command = characteristics
            .iter()
            .find(|c| c.uuid == write_uuid)
            .cloned()
            .ok_or_else(|| ChannelError::Backend(format!("Command characteristic {WRITE_CMD_UUID} not found")))?;

        match characteristics.iter().find(|c| c.uuid == notify_uuid) {
            Some(notify) if notify.properties.contains(CharPropFlags::NOTIFY) => {
                peripheral.subscribe(notify).await.map_err(backend)?;
                let stream = peripheral.notifications().await.map_err(backend)?;
                *self.notifications.lock().await = Some(stream);
            }
            _ => warn!("Notify characteristic {NOTIFY_UUID} unavailable, responses will not be seen"),
        }

        *self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Link { peripheral, command });
        Ok(())
    }

    async fn write(&self, data: &[u8], mode: WriteMode) -> Result<(), ChannelError> {
        let link = self.link()?;
        let write_type = match mode {
            WriteMode::WithResponse => {
                if !link.command.properties.contains(CharPropFlags::WRITE) {
                    return Err(ChannelError::WriteRejected("characteristic has no write-with-response".to_string()));
                }
                WriteType::WithResponse
            }
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        trace!("write {:?} {}", write_type, hex::encode(data));

        link.peripheral
            .write(&link.command, data, write_type)
            .await
            .map_err(|e| write_error(e, mode))
    }

    async fn next_notification(&self) -> Result<Bytes, ChannelError> {
        let mut guard = self.notifications.lock().await;
        let Some(stream) = guard.as_mut() else {
            // nothing subscribed: behave like a silent controller
            return std::future::pending().await;
        };
        match stream.next().await {
            Some(notification) => Ok(Bytes::from(notification.value)),
            None => Err(ChannelError::Disconnected),
        }
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        *self.notifications.lock().await = None;
        let link = self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        match link {
            Some(link) => link.peripheral.disconnect().await.map_err(backend),
            None => Ok(()),
        }
    }
}
