//! BlueZ D-Bus transport.
//!
//! Talks to the `bluetoothd` daemon through the `bluer` crate. Adapter events
//! and per-device property changes are forwarded into a single channel that
//! backs the stream returned by [`Transport::open`].

use super::transport::{
    BusEvent, DEVICE_INTERFACE, DeviceHandle, DeviceProperties, DiscoveryFilter,
    PROPERTY_ADDRESS, PROPERTY_MANUFACTURER_DATA, PROPERTY_NAME, PROPERTY_RSSI, Subscription,
    Transport, TransportError,
};
use crate::mac_address::MacAddress;
use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, Device, DeviceEvent, DeviceProperty, Session,
};
use futures::StreamExt;
use futures::channel::mpsc;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::BoxStream;
use std::sync::{Mutex, OnceLock, PoisonError};
use tokio::task::AbortHandle;
use tracing::{debug, info};

fn call_error(method: &'static str) -> impl FnOnce(bluer::Error) -> TransportError {
    move |e| TransportError::Call {
        method,
        message: e.to_string(),
    }
}

fn unavailable(e: bluer::Error) -> TransportError {
    TransportError::Unavailable(e.to_string())
}

/// Object path BlueZ gives a device on `adapter`.
fn device_handle(adapter: &str, address: Address) -> DeviceHandle {
    let address = MacAddress::from(address).to_string().replace(':', "_");
    DeviceHandle::new(format!("/org/bluez/{adapter}/dev_{address}"))
}

fn device_address(device: &DeviceHandle) -> Result<Address, TransportError> {
    device
        .as_str()
        .rsplit_once("/dev_")
        .and_then(|(_, address)| address.replace('_', ":").parse::<MacAddress>().ok())
        .map(Address::from)
        .ok_or_else(|| TransportError::UnknownDevice(device.clone()))
}

/// D-Bus name of a device property, as reported in change signals.
fn property_name(property: &DeviceProperty) -> &'static str {
    match property {
        DeviceProperty::RemoteAddress(_) => PROPERTY_ADDRESS,
        DeviceProperty::Name(_) => PROPERTY_NAME,
        DeviceProperty::Rssi(_) => PROPERTY_RSSI,
        DeviceProperty::ManufacturerData(_) => PROPERTY_MANUFACTURER_DATA,
        _ => "Other",
    }
}

fn adapter_event(adapter: &str, event: AdapterEvent) -> Option<BusEvent> {
    match event {
        AdapterEvent::DeviceAdded(address) => Some(BusEvent::InterfacesAdded {
            device: device_handle(adapter, address),
            interfaces: vec![DEVICE_INTERFACE.to_string()],
        }),
        AdapterEvent::DeviceRemoved(address) => Some(BusEvent::InterfacesRemoved {
            device: device_handle(adapter, address),
            interfaces: vec![DEVICE_INTERFACE.to_string()],
        }),
        AdapterEvent::PropertyChanged(AdapterProperty::Discovering(discovering)) => {
            Some(BusEvent::DiscoveringChanged(discovering))
        }
        _ => None,
    }
}

struct Connection {
    _session: Session,
    adapter: Adapter,
    events: mpsc::UnboundedSender<BusEvent>,
}

/// [`Transport`] backed by the BlueZ daemon.
///
/// Nothing touches D-Bus until [`Transport::open`] is called.
#[derive(Default)]
pub struct BluezTransport {
    connection: OnceLock<Connection>,
    tasks: Mutex<Vec<AbortHandle>>,
    discovery: Mutex<Option<AbortHandle>>,
}

impl BluezTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn connection(&self) -> Result<&Connection, TransportError> {
        self.connection
            .get()
            .ok_or_else(|| TransportError::Unavailable("not connected".to_string()))
    }

    fn device(&self, device: &DeviceHandle) -> Result<Device, TransportError> {
        let address = device_address(device)?;
        self.connection()?
            .adapter
            .device(address)
            .map_err(call_error("Device"))
    }

    async fn connect(
        &self,
        adapter_name: &str,
    ) -> Result<BoxStream<'static, BusEvent>, TransportError> {
        if self.connection.get().is_some() {
            return Err(TransportError::Unavailable("already connected".to_string()));
        }

        let session = Session::new().await.map_err(unavailable)?;
        let adapter = if adapter_name.is_empty() {
            session.default_adapter().await.map_err(unavailable)?
        } else {
            session.adapter(adapter_name).map_err(unavailable)?
        };
        adapter
            .set_powered(true)
            .await
            .map_err(call_error("SetPowered"))?;
        info!(adapter = adapter.name(), "Using Bluetooth adapter");

        let adapter_events = adapter.events().await.map_err(call_error("AddMatch"))?;
        let (sender, receiver) = mpsc::unbounded();

        let name = adapter.name().to_string();
        let forward = sender.clone();
        let task = tokio::spawn(async move {
            let mut adapter_events = Box::pin(adapter_events);
            while let Some(event) = adapter_events.next().await {
                if let Some(event) = adapter_event(&name, event)
                    && forward.unbounded_send(event).is_err()
                {
                    return;
                }
            }
            debug!(adapter = %name, "Adapter event stream ended");
            forward.close_channel();
        });
        self.track(task.abort_handle());

        let connection = Connection {
            _session: session,
            adapter,
            events: sender,
        };
        self.connection
            .set(connection)
            .map_err(|_| TransportError::Unavailable("already connected".to_string()))?;

        Ok(receiver.boxed())
    }

    fn track(&self, task: AbortHandle) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    async fn discover(&self) -> Result<(), TransportError> {
        let connection = self.connection()?;
        let discovery = connection
            .adapter
            .discover_devices()
            .await
            .map_err(call_error("StartDiscovery"))?;

        // The discovery session lasts as long as this task holds the stream.
        let name = connection.adapter.name().to_string();
        let forward = connection.events.clone();
        let task = tokio::spawn(async move {
            let mut discovery = Box::pin(discovery);
            while let Some(event) = discovery.next().await {
                if let AdapterEvent::DeviceAdded(_) = event
                    && let Some(event) = adapter_event(&name, event)
                    && forward.unbounded_send(event).is_err()
                {
                    return;
                }
            }
        });

        let previous = self
            .discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task.abort_handle());
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }

    async fn properties(&self, device: &DeviceHandle) -> Result<DeviceProperties, TransportError> {
        let properties = self
            .device(device)?
            .all_properties()
            .await
            .map_err(call_error("GetAll"))?;

        let mut result = DeviceProperties::default();
        for property in properties {
            match property {
                DeviceProperty::RemoteAddress(address) => {
                    result.address = Some(MacAddress::from(address).to_string());
                }
                DeviceProperty::Name(name) => result.name = Some(name),
                DeviceProperty::Rssi(rssi) => result.rssi = Some(rssi),
                DeviceProperty::ManufacturerData(data) => {
                    result.manufacturer_data = data.into_iter().collect();
                }
                _ => {}
            }
        }
        Ok(result)
    }

    async fn watch(&self, handle: &DeviceHandle) -> Result<Subscription, TransportError> {
        let forward = self.connection()?.events.clone();
        let events = self
            .device(handle)?
            .events()
            .await
            .map_err(call_error("AddMatch"))?;

        let device = handle.clone();
        let task = tokio::spawn(async move {
            let mut events = Box::pin(events);
            while let Some(DeviceEvent::PropertyChanged(property)) = events.next().await {
                let event = BusEvent::PropertiesChanged {
                    device: device.clone(),
                    changed: vec![property_name(&property).to_string()],
                };
                if forward.unbounded_send(event).is_err() {
                    return;
                }
            }
        });

        let abort = task.abort_handle();
        Ok(Subscription::new(move || abort.abort()))
    }
}

impl Drop for BluezTransport {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
        if let Some(discovery) = self
            .discovery
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            discovery.abort();
        }
    }
}

impl Transport for BluezTransport {
    fn open<'a>(
        &'a self,
        adapter: &'a str,
    ) -> BoxFuture<'a, Result<BoxStream<'static, BusEvent>, TransportError>> {
        self.connect(adapter).boxed()
    }

    fn set_discovery_filter(
        &self,
        filter: DiscoveryFilter,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            let filter = bluer::DiscoveryFilter {
                duplicate_data: filter.duplicate_data,
                ..Default::default()
            };
            self.connection()?
                .adapter
                .set_discovery_filter(filter)
                .await
                .map_err(call_error("SetDiscoveryFilter"))
        }
        .boxed()
    }

    fn start_discovery(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        self.discover().boxed()
    }

    fn stop_discovery(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            // Dropping the last discovery stream makes bluer issue StopDiscovery.
            let discovery = self
                .discovery
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(discovery) = discovery {
                discovery.abort();
            }
            Ok(())
        }
        .boxed()
    }

    fn device_address<'a>(
        &'a self,
        device: &'a DeviceHandle,
    ) -> BoxFuture<'a, Result<String, TransportError>> {
        async move {
            let address = self
                .device(device)?
                .remote_address()
                .await
                .map_err(call_error("Get"))?;
            Ok(MacAddress::from(address).to_string())
        }
        .boxed()
    }

    fn device_properties<'a>(
        &'a self,
        device: &'a DeviceHandle,
    ) -> BoxFuture<'a, Result<DeviceProperties, TransportError>> {
        self.properties(device).boxed()
    }

    fn subscribe<'a>(
        &'a self,
        device: &'a DeviceHandle,
    ) -> BoxFuture<'a, Result<Subscription, TransportError>> {
        self.watch(device).boxed()
    }
}
