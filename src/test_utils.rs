use crate::advertisement::AdvertisementRecord;
use crate::codec::RUUVI_MANUFACTURER_ID;
use crate::listener::transport::{
    BusEvent, DEVICE_INTERFACE, DeviceHandle, DeviceProperties, DiscoveryFilter, Subscription,
    Transport, TransportError,
};
use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

/// MAC embedded in the reference format 5 payload.
pub const TEST_MAC: &str = "CB:B8:33:4C:88:4F";

/// Reference format 5 payload from the Ruuvi sensor protocol documentation.
pub const FORMAT5_PAYLOAD: &str = "0512FC5394C37C0004FFFC040CAC364200CDCBB8334C884F";

/// Reference format 3 payload.
pub const FORMAT3_PAYLOAD: &str = "03291A1ECE1EFC18F94202CA0B53";

pub fn hex_payload(hex: &str) -> Vec<u8> {
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
        .collect()
}

/// A Ruuvi advertisement from [`TEST_MAC`] carrying `hex`.
pub fn record_with(hex: &str) -> AdvertisementRecord {
    AdvertisementRecord {
        mac: TEST_MAC.to_string(),
        device_name: String::new(),
        manufacturer_id: RUUVI_MANUFACTURER_ID,
        manufacturer_data: hex_payload(hex),
        signal_strength: 40,
    }
}

pub fn format5_record() -> AdvertisementRecord {
    record_with(FORMAT5_PAYLOAD)
}

pub fn format3_record() -> AdvertisementRecord {
    record_with(FORMAT3_PAYLOAD)
}

/// Properties of a device advertising the reference format 5 payload.
pub fn ruuvi_properties(mac: &str) -> DeviceProperties {
    DeviceProperties {
        address: Some(mac.to_string()),
        name: None,
        rssi: Some(40),
        manufacturer_data: BTreeMap::from([(RUUVI_MANUFACTURER_ID, hex_payload(FORMAT5_PAYLOAD))]),
    }
}

#[derive(Debug, Default)]
struct FakeState {
    devices: HashMap<DeviceHandle, DeviceProperties>,
    calls: Vec<String>,
    subscriptions: BTreeSet<DeviceHandle>,
    start_discovery_failures: usize,
    open_failure: Option<String>,
    failing_get_all: BTreeSet<DeviceHandle>,
}

/// In-memory [`Transport`] with a scriptable event stream.
#[derive(Debug)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
    sender: Mutex<Option<mpsc::UnboundedSender<BusEvent>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<BusEvent>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded();
        Self {
            state: Arc::default(),
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Register a device object, returning its BlueZ style handle.
    pub fn add_device(&self, properties: DeviceProperties) -> DeviceHandle {
        let address = properties.address.clone().unwrap_or_default();
        let handle =
            DeviceHandle::new(format!("/org/bluez/hci0/dev_{}", address.replace(':', "_")));
        self.state
            .lock()
            .unwrap()
            .devices
            .insert(handle.clone(), properties);
        handle
    }

    pub fn push(&self, event: BusEvent) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            sender.unbounded_send(event).unwrap();
        }
    }

    /// Announce `device` as the object manager would.
    pub fn announce(&self, device: &DeviceHandle) {
        self.push(BusEvent::InterfacesAdded {
            device: device.clone(),
            interfaces: vec![DEVICE_INTERFACE.to_string()],
        });
    }

    /// End the event stream.
    pub fn close(&self) {
        self.sender.lock().unwrap().take();
    }

    /// Make the next `count` StartDiscovery calls fail.
    pub fn fail_start_discovery(&self, count: usize) {
        self.state.lock().unwrap().start_discovery_failures = count;
    }

    /// Make every GetAll on `device` fail while address reads keep working.
    pub fn fail_get_all(&self, device: &DeviceHandle) {
        self.state.lock().unwrap().failing_get_all.insert(device.clone());
    }

    pub fn fail_open(&self, message: &str) {
        self.state.lock().unwrap().open_failure = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls whose method name starts with one of `methods`.
    pub fn calls_matching(&self, methods: &[&str]) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| methods.iter().any(|method| call.starts_with(method)))
            .collect()
    }

    /// Devices with a live subscription, sorted.
    pub fn subscriptions(&self) -> Vec<DeviceHandle> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .cloned()
            .collect()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn properties(&self, device: &DeviceHandle) -> Result<DeviceProperties, TransportError> {
        self.state
            .lock()
            .unwrap()
            .devices
            .get(device)
            .cloned()
            .ok_or_else(|| TransportError::UnknownDevice(device.clone()))
    }
}

impl Transport for FakeTransport {
    fn open<'a>(
        &'a self,
        adapter: &'a str,
    ) -> BoxFuture<'a, Result<BoxStream<'static, BusEvent>, TransportError>> {
        async move {
            self.record(format!("Open({adapter})"));
            if let Some(message) = self.state.lock().unwrap().open_failure.clone() {
                return Err(TransportError::Unavailable(message));
            }
            let receiver = self.receiver.lock().unwrap().take().ok_or(TransportError::Closed)?;
            Ok(receiver.boxed())
        }
        .boxed()
    }

    fn set_discovery_filter(
        &self,
        filter: DiscoveryFilter,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            self.record(format!(
                "SetDiscoveryFilter(duplicate_data={})",
                filter.duplicate_data
            ));
            Ok(())
        }
        .boxed()
    }

    fn start_discovery(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            self.record("StartDiscovery".to_string());
            let mut state = self.state.lock().unwrap();
            if state.start_discovery_failures > 0 {
                state.start_discovery_failures -= 1;
                return Err(TransportError::Call {
                    method: "StartDiscovery",
                    message: "org.bluez.Error.NotReady".to_string(),
                });
            }
            Ok(())
        }
        .boxed()
    }

    fn stop_discovery(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            self.record("StopDiscovery".to_string());
            Ok(())
        }
        .boxed()
    }

    fn device_address<'a>(
        &'a self,
        device: &'a DeviceHandle,
    ) -> BoxFuture<'a, Result<String, TransportError>> {
        async move {
            self.record(format!("Get(Address, {device})"));
            self.properties(device)?
                .address
                .ok_or_else(|| TransportError::Call {
                    method: "Get",
                    message: "org.freedesktop.DBus.Error.InvalidArgs".to_string(),
                })
        }
        .boxed()
    }

    fn device_properties<'a>(
        &'a self,
        device: &'a DeviceHandle,
    ) -> BoxFuture<'a, Result<DeviceProperties, TransportError>> {
        async move {
            self.record(format!("GetAll({device})"));
            if self.state.lock().unwrap().failing_get_all.contains(device) {
                return Err(TransportError::Call {
                    method: "GetAll",
                    message: "org.freedesktop.DBus.Error.NoReply".to_string(),
                });
            }
            self.properties(device)
        }
        .boxed()
    }

    fn subscribe<'a>(
        &'a self,
        device: &'a DeviceHandle,
    ) -> BoxFuture<'a, Result<Subscription, TransportError>> {
        async move {
            self.record(format!("Subscribe({device})"));
            self.properties(device)?;
            self.state
                .lock()
                .unwrap()
                .subscriptions
                .insert(device.clone());

            let state = Arc::clone(&self.state);
            let device = device.clone();
            Ok(Subscription::new(move || {
                state.lock().unwrap().subscriptions.remove(&device);
            }))
        }
        .boxed()
    }
}
