//! The capability the listener needs from the platform Bluetooth service.
//!
//! [`Transport`] covers the adapter calls BlueZ exposes on
//! `org.bluez.Adapter1`, the device property reads on `org.bluez.Device1` and
//! a single stream of bus signals. Tests run the listener against an
//! in-memory implementation.

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// D-Bus interface implemented by every BlueZ device object.
pub const DEVICE_INTERFACE: &str = "org.bluez.Device1";

/// Device property names as they appear in property-change signals.
pub const PROPERTY_ADDRESS: &str = "Address";
pub const PROPERTY_NAME: &str = "Name";
pub const PROPERTY_RSSI: &str = "RSSI";
pub const PROPERTY_MANUFACTURER_DATA: &str = "ManufacturerData";

/// Opaque identifier of a platform device object (a D-Bus object path for BlueZ).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(Arc<str>);

impl DeviceHandle {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(Arc::from(path.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from a single transport call or subscription.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("{method} failed: {message}")]
    Call {
        method: &'static str,
        message: String,
    },
    #[error("Unknown device {0}")]
    UnknownDevice(DeviceHandle),
    #[error("Bluetooth service unavailable: {0}")]
    Unavailable(String),
    #[error("Bluetooth event stream closed")]
    Closed,
}

/// Signals delivered by the platform Bluetooth service.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// Object manager announced a new object.
    InterfacesAdded {
        device: DeviceHandle,
        interfaces: Vec<String>,
    },
    /// Object manager withdrew interfaces from an object.
    InterfacesRemoved {
        device: DeviceHandle,
        interfaces: Vec<String>,
    },
    /// Properties of a subscribed device changed.
    PropertiesChanged {
        device: DeviceHandle,
        changed: Vec<String>,
    },
    /// The adapter's `Discovering` property changed.
    DiscoveringChanged(bool),
}

/// Discovery filter applied to the adapter before discovery starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiscoveryFilter {
    /// Report every advertisement, not just the first per device
    pub duplicate_data: bool,
}

/// Result of a "get all properties" call on a device object.
///
/// Properties the device did not expose are `None` / empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceProperties {
    pub address: Option<String>,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    /// Manufacturer data keyed by company identifier
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
}

/// A live signal subscription. Dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Wrap the action that tears the subscription down.
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Asynchronous access to the platform Bluetooth service.
///
/// Calls may be issued concurrently with the event stream being consumed.
/// Property-change signals for a device are only delivered on the stream
/// returned by [`Transport::open`] while a [`Subscription`] for it is alive.
pub trait Transport: Send + Sync {
    /// Connect to the service and return its signal stream.
    ///
    /// An empty `adapter` selects the platform default adapter.
    fn open<'a>(
        &'a self,
        adapter: &'a str,
    ) -> BoxFuture<'a, Result<BoxStream<'static, BusEvent>, TransportError>>;

    fn set_discovery_filter(
        &self,
        filter: DiscoveryFilter,
    ) -> BoxFuture<'_, Result<(), TransportError>>;

    fn start_discovery(&self) -> BoxFuture<'_, Result<(), TransportError>>;

    fn stop_discovery(&self) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Read the device's `Address` property.
    fn device_address<'a>(
        &'a self,
        device: &'a DeviceHandle,
    ) -> BoxFuture<'a, Result<String, TransportError>>;

    /// Read every `org.bluez.Device1` property of the device at once.
    fn device_properties<'a>(
        &'a self,
        device: &'a DeviceHandle,
    ) -> BoxFuture<'a, Result<DeviceProperties, TransportError>>;

    /// Subscribe to the device's property-change signal.
    fn subscribe<'a>(
        &'a self,
        device: &'a DeviceHandle,
    ) -> BoxFuture<'a, Result<Subscription, TransportError>>;
}
