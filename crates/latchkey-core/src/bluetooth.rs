//! BlueZ-backed [`Radio`] via `bluer`.
//!
//! The adapter advertises as a connectable peripheral. Connection changes are
//! picked up by watching the `Connected` property of every device BlueZ knows
//! about, including devices that appear after the watch started. Devices that
//! are already connected when they are first watched are reported as a
//! connection.

use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle, Type};
use bluer::{Adapter, AdapterEvent, Address, DeviceEvent, DeviceProperty, Session};
use futures::stream::{BoxStream, SelectAll};
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::radio::{ConnectHandler, MonitorFailure, Radio, RadioError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The default BlueZ adapter acting as a peripheral.
pub struct BluerRadio {
    _session: Session,
    adapter: Adapter,
    advertisement: Mutex<Option<AdvertisementHandle>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BluerRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluerRadio")
            .field("adapter", &self.adapter.name())
            .finish_non_exhaustive()
    }
}

impl BluerRadio {
    /// Connect to bluetoothd and pick the default adapter.
    ///
    /// # Errors
    ///
    /// Returns [`RadioError::EnableFailed`] if the D-Bus session cannot be
    /// opened, or [`RadioError::AdapterNotFound`] if there is no adapter.
    pub async fn new() -> Result<Self, RadioError> {
        let session = Session::new()
            .await
            .map_err(|e| RadioError::EnableFailed {
                message: e.to_string(),
            })?;
        let adapter = session.default_adapter().await.map_err(|e| {
            warn!(error = %e, "No default Bluetooth adapter");
            RadioError::AdapterNotFound
        })?;
        debug!(adapter = adapter.name(), "Using Bluetooth adapter");
        Ok(Self {
            _session: session,
            adapter,
            advertisement: Mutex::new(None),
            monitor: Mutex::new(None),
        })
    }

    fn device_address(identifier: &str) -> Result<Address, RadioError> {
        Address::from_str(identifier).map_err(|_| RadioError::InvalidAddress {
            address: identifier.to_string(),
        })
    }
}

impl Drop for BluerRadio {
    fn drop(&mut self) {
        if let Some(monitor) = lock(&self.monitor).take() {
            monitor.abort();
        }
    }
}

#[async_trait]
impl Radio for BluerRadio {
    async fn enable(&self) -> Result<(), RadioError> {
        self.adapter
            .set_powered(true)
            .await
            .map_err(|e| RadioError::EnableFailed {
                message: e.to_string(),
            })?;
        info!(adapter = self.adapter.name(), "Bluetooth adapter powered on");
        Ok(())
    }

    async fn advertise(
        &self,
        name: &str,
        service: Uuid,
        window: Duration,
    ) -> Result<(), RadioError> {
        let advertisement = Advertisement {
            advertisement_type: Type::Peripheral,
            service_uuids: BTreeSet::from([service]),
            local_name: Some(name.to_string()),
            discoverable: Some(true),
            timeout: Some(window),
            ..Default::default()
        };
        let handle = self
            .adapter
            .advertise(advertisement)
            .await
            .map_err(|e| RadioError::AdvertiseFailed {
                message: e.to_string(),
            })?;
        *lock(&self.advertisement) = Some(handle);
        Ok(())
    }

    async fn stop_advertise(&self) -> Result<(), RadioError> {
        // Dropping the handle unregisters the advertisement.
        drop(lock(&self.advertisement).take());
        Ok(())
    }

    fn set_connect_handler(&self, handler: ConnectHandler) -> MonitorFailure {
        let (failed, failure) = oneshot::channel();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            let _ = failed.send(RadioError::MonitorFailed {
                message: "no Tokio runtime to run the connection monitor".to_string(),
            });
            return failure;
        };
        let adapter = self.adapter.clone();
        let task = runtime.spawn(async move {
            let message = match watch_connections(adapter, handler).await {
                Ok(()) => "adapter event stream ended".to_string(),
                Err(e) => e.to_string(),
            };
            error!(error = %message, "Connection monitor stopped");
            let _ = failed.send(RadioError::MonitorFailed { message });
        });
        if let Some(previous) = lock(&self.monitor).replace(task) {
            previous.abort();
        }
        failure
    }

    async fn disconnect(&self, identifier: &str) -> Result<(), RadioError> {
        let address = Self::device_address(identifier)?;
        let device_error = |e: bluer::Error| RadioError::DisconnectFailed {
            address: identifier.to_string(),
            message: e.to_string(),
        };
        let device = self.adapter.device(address).map_err(device_error)?;
        device.disconnect().await.map_err(device_error)
    }

    async fn write_characteristic(
        &self,
        identifier: &str,
        characteristic: Uuid,
        bytes: &[u8],
    ) -> Result<(), RadioError> {
        let address = Self::device_address(identifier)?;
        let write_error = |e: bluer::Error| RadioError::WriteFailed {
            address: identifier.to_string(),
            message: e.to_string(),
        };
        let device = self.adapter.device(address).map_err(write_error)?;
        for service in device.services().await.map_err(write_error)? {
            for candidate in service.characteristics().await.map_err(write_error)? {
                if candidate.uuid().await.map_err(write_error)? == characteristic {
                    return candidate.write(bytes).await.map_err(write_error);
                }
            }
        }
        Err(RadioError::CharacteristicNotFound {
            address: identifier.to_string(),
            uuid: characteristic,
        })
    }
}

type DeviceEvents = BoxStream<'static, (Address, DeviceEvent)>;

/// Subscribe to `address` and report it if it is connected already.
///
/// The subscription comes first so a connection racing the query is seen by
/// at least one of the two.
async fn watch_device(
    adapter: &Adapter,
    address: Address,
    devices: &mut SelectAll<DeviceEvents>,
    handler: &ConnectHandler,
) -> bluer::Result<()> {
    let device = adapter.device(address)?;
    let events = device.events().await?;
    devices.push(events.map(move |event| (address, event)).boxed());

    match device.is_connected().await {
        Ok(true) => {
            debug!(device = %address, "Device already connected");
            handler(address.to_string(), true);
        }
        Ok(false) => {}
        Err(e) => warn!(device = %address, error = %e, "Cannot read connection state"),
    }
    Ok(())
}

/// Forward `Connected` property changes of every device to `handler`.
///
/// Returns only when the adapter itself can no longer be watched.
async fn watch_connections(adapter: Adapter, handler: ConnectHandler) -> bluer::Result<()> {
    let adapter_events = adapter.events().await?;
    tokio::pin!(adapter_events);

    let mut watched = HashSet::new();
    let mut devices: SelectAll<DeviceEvents> = SelectAll::new();
    for address in adapter.device_addresses().await? {
        match watch_device(&adapter, address, &mut devices, &handler).await {
            Ok(()) => {
                watched.insert(address);
            }
            Err(e) => warn!(device = %address, error = %e, "Cannot watch device"),
        }
    }
    debug!(devices = watched.len(), "Connection monitor started");

    loop {
        tokio::select! {
            Some(event) = adapter_events.next() => match event {
                AdapterEvent::DeviceAdded(address) if watched.insert(address) => {
                    if let Err(e) = watch_device(&adapter, address, &mut devices, &handler).await {
                        warn!(device = %address, error = %e, "Cannot watch device");
                        watched.remove(&address);
                    }
                }
                AdapterEvent::DeviceRemoved(address) => {
                    watched.remove(&address);
                }
                _ => {}
            },
            Some((address, event)) = devices.next() => {
                if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(connected)) = event {
                    handler(address.to_string(), connected);
                }
            }
            else => return Ok(()),
        }
    }
}
