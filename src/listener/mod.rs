//! BLE discovery and advertisement listening.
//!
//! A [`Listener`] owns one adapter. [`Listener::start`] connects to the
//! Bluetooth service, turns discovery on and then dispatches bus events until
//! [`Listener::stop`] is called or discovery is lost for good. Every event is
//! handled to completion before the next one is read.
//!
//! Devices are tracked in a [`DeviceRegistry`] and every manufacturer data
//! change of a tracked device is handed to the callback as an
//! [`AdvertisementRecord`].

pub mod assembler;
#[cfg(feature = "bluer")]
pub mod bluer;
pub mod registry;
pub mod transport;

pub use registry::{Blacklist, DeviceRegistry, Insertion};
pub use transport::{
    BusEvent, DeviceHandle, DeviceProperties, DiscoveryFilter, Subscription, Transport,
    TransportError,
};

use crate::advertisement::AdvertisementRecord;
use crate::mac_address::canonicalize;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Receives every assembled advertisement, on the task running [`Listener::start`].
pub type Callback = Box<dyn Fn(AdvertisementRecord) + Send + Sync>;

/// Lifecycle of a [`Listener`]. `Stopped` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Idle,
    Discovering,
    Stopped,
    Failed,
}

impl fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscoveryState::Idle => "idle",
            DiscoveryState::Discovering => "discovering",
            DiscoveryState::Stopped => "stopped",
            DiscoveryState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How often, and how far apart, discovery is restarted after the adapter
/// drops out of discovery on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub times: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            times: 2,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Errors that end [`Listener::start`].
#[derive(Error, Debug)]
pub enum ListenError {
    #[error("Cannot connect to the Bluetooth service: {0}")]
    Connection(#[source] TransportError),
    #[error("Discovery lost, {attempts} restart attempts failed")]
    DiscoveryLost {
        attempts: u32,
        #[source]
        source: Option<TransportError>,
    },
    #[error("Listener cannot be started from the {0} state")]
    InvalidState(DiscoveryState),
}

/// Discovery controller for one Bluetooth adapter.
pub struct Listener {
    callback: Callback,
    adapter: String,
    transport: Arc<dyn Transport>,
    registry: DeviceRegistry,
    retry: RetryPolicy,
    state: Mutex<DiscoveryState>,
    started: AtomicBool,
    stop_requested: AtomicBool,
    wakeup: Notify,
    /// Held from the last registry check until the callback returns.
    emit_gate: Mutex<()>,
    /// Thread currently inside the callback, if any.
    emitting_on: Mutex<Option<ThreadId>>,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("adapter", &self.adapter)
            .field("state", &self.state())
            .field("registry", &self.registry)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Listener {
    /// Create a listener for `adapter_name`. An empty name selects the
    /// default adapter.
    pub fn new(
        callback: impl Fn(AdvertisementRecord) + Send + Sync + 'static,
        adapter_name: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            callback: Box::new(callback),
            adapter: adapter_name.into(),
            transport,
            registry: DeviceRegistry::new(),
            retry: RetryPolicy::default(),
            state: Mutex::new(DiscoveryState::Idle),
            started: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            wakeup: Notify::new(),
            emit_gate: Mutex::new(()),
            emitting_on: Mutex::new(None),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    pub fn state(&self) -> DiscoveryState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_discovering(&self) -> bool {
        self.state() == DiscoveryState::Discovering
    }

    fn set_state(&self, state: DiscoveryState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Run discovery until [`stop`](Self::stop) is called.
    ///
    /// A listener runs once; calling this again fails with
    /// [`ListenError::InvalidState`].
    ///
    /// # Errors
    /// - [`ListenError::Connection`] if the Bluetooth service cannot be
    ///   reached, or its event stream ends.
    /// - [`ListenError::DiscoveryLost`] once discovery could not be restarted.
    pub async fn start(&self) -> Result<(), ListenError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ListenError::InvalidState(self.state()));
        }
        if self.stop_requested() {
            self.set_state(DiscoveryState::Stopped);
            return Ok(());
        }

        let mut events = match self.transport.open(&self.adapter).await {
            Ok(events) => events,
            Err(e) => {
                self.set_state(DiscoveryState::Failed);
                return Err(ListenError::Connection(e));
            }
        };
        info!(adapter = %self.adapter, "Connected to Bluetooth service");

        let filter = DiscoveryFilter {
            duplicate_data: true,
        };
        if let Err(e) = self.transport.set_discovery_filter(filter).await {
            warn!(
                error = %e,
                "Cannot set discovery filter, duplicate advertisements may be dropped"
            );
        }

        let result = match self.transport.start_discovery().await {
            Ok(()) => {
                self.set_state(DiscoveryState::Discovering);
                info!(adapter = %self.adapter, "Discovery started");
                self.dispatch(&mut events).await
            }
            Err(e) => {
                warn!(error = %e, "Cannot start discovery");
                match self.retry_discovery(Some(e)).await {
                    Ok(true) => self.dispatch(&mut events).await,
                    Ok(false) => Ok(()),
                    Err(e) => Err(e),
                }
            }
        };

        self.shutdown(&result).await;
        result
    }

    /// Ask a running [`start`](Self::start) to return.
    ///
    /// Idempotent and callable from any thread or task. It only sets a flag
    /// and wakes the dispatch loop; the stop-discovery call itself is issued
    /// by the task running `start` on its way out. It is not async-signal-safe:
    /// call it from a task watching for signals, as the binary does.
    pub fn stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            debug!(adapter = %self.adapter, "Stop requested");
        }
        self.wakeup.notify_one();
    }

    /// Exclude `mac` from discovery and forget every device resolved to it.
    ///
    /// Once this returns no packet from those devices reaches the callback.
    /// A packet already inside the callback on another thread is waited for.
    pub fn blacklist(&self, mac: &str) {
        let evicted = self.registry.blacklist(mac);
        if !self.is_emitting_thread() {
            drop(self.lock_emit_gate());
        }
        info!(mac = %canonicalize(mac), evicted = evicted.len(), "Blacklisted");
    }

    fn lock_emit_gate(&self) -> MutexGuard<'_, ()> {
        self.emit_gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A callback blacklisting from inside itself must not wait on its own gate.
    fn is_emitting_thread(&self) -> bool {
        *self.emitting_on.lock().unwrap_or_else(PoisonError::into_inner)
            == Some(thread::current().id())
    }

    fn set_emitting_thread(&self, owner: Option<ThreadId>) {
        *self.emitting_on.lock().unwrap_or_else(PoisonError::into_inner) = owner;
    }

    /// Blacklisted MACs in the order they were added.
    pub fn get_blacklist(&self) -> Vec<String> {
        self.registry.blacklisted()
    }

    /// Number of devices currently tracked.
    pub fn tracked_devices(&self) -> usize {
        self.registry.len()
    }

    async fn dispatch(
        &self,
        events: &mut BoxStream<'static, BusEvent>,
    ) -> Result<(), ListenError> {
        loop {
            if self.stop_requested() {
                return Ok(());
            }
            tokio::select! {
                biased;
                () = self.wakeup.notified() => {}
                event = events.next() => match event {
                    Some(event) => self.handle_event(event).await?,
                    None => return Err(ListenError::Connection(TransportError::Closed)),
                },
            }
        }
    }

    async fn handle_event(&self, event: BusEvent) -> Result<(), ListenError> {
        match event {
            BusEvent::InterfacesAdded { device, interfaces } => {
                self.add_device(&device, &interfaces).await;
            }
            BusEvent::InterfacesRemoved { device, interfaces } => {
                self.remove_device(&device, &interfaces);
            }
            BusEvent::PropertiesChanged { device, changed } => {
                self.on_properties_changed(&device, &changed).await;
            }
            BusEvent::DiscoveringChanged(true) => debug!("Adapter reports discovering"),
            BusEvent::DiscoveringChanged(false) => self.on_discovery_stopped().await?,
        }
        Ok(())
    }

    async fn on_discovery_stopped(&self) -> Result<(), ListenError> {
        if self.stop_requested() || !self.is_discovering() {
            return Ok(());
        }
        warn!(adapter = %self.adapter, "Discovery stopped unexpectedly");
        self.retry_discovery(None).await.map(|_| ())
    }

    /// Restart discovery, sleeping `backoff` before each of at most `times`
    /// attempts.
    ///
    /// Returns `Ok(false)` if a stop was requested meanwhile. On exhaustion the
    /// listener is marked failed and stopped.
    async fn retry_discovery(
        &self,
        mut last_error: Option<TransportError>,
    ) -> Result<bool, ListenError> {
        let RetryPolicy { times, backoff } = self.retry;

        for attempt in 1..=times {
            tokio::select! {
                biased;
                () = self.wakeup.notified() => {}
                () = tokio::time::sleep(backoff) => {}
            }
            if self.stop_requested() {
                return Ok(false);
            }

            match self.transport.start_discovery().await {
                Ok(()) => {
                    self.set_state(DiscoveryState::Discovering);
                    info!(attempt, "Discovery restarted");
                    return Ok(true);
                }
                Err(e) => {
                    warn!(attempt, times, error = %e, "Discovery restart failed");
                    last_error = Some(e);
                }
            }
        }

        self.set_state(DiscoveryState::Failed);
        self.stop();
        Err(ListenError::DiscoveryLost {
            attempts: times,
            source: last_error,
        })
    }

    async fn shutdown(&self, result: &Result<(), ListenError>) {
        if self.is_discovering() {
            match self.transport.stop_discovery().await {
                Ok(()) => info!(adapter = %self.adapter, "Discovery stopped"),
                Err(e) => warn!(error = %e, "Cannot stop discovery"),
            }
        }
        self.registry.clear();
        self.set_state(match result {
            Ok(()) => DiscoveryState::Stopped,
            Err(_) => DiscoveryState::Failed,
        });
    }

    /// Start tracking a device announced by the object manager.
    ///
    /// Failures are logged and leave the device untracked.
    pub async fn add_device(&self, device: &DeviceHandle, interfaces: &[String]) {
        if self.registry.contains(device) {
            return;
        }
        debug!(%device, ?interfaces, "Device added");

        let mac = match self.transport.device_address(device).await {
            Ok(mac) => canonicalize(&mac),
            Err(e) => {
                warn!(%device, error = %e, "Cannot resolve device address");
                return;
            }
        };
        if self.registry.is_blacklisted(&mac) {
            debug!(%device, %mac, "Ignoring blacklisted device");
            return;
        }

        let subscription = match self.transport.subscribe(device).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(%device, %mac, error = %e, "Cannot subscribe to device");
                return;
            }
        };

        match self.registry.insert(device.clone(), subscription, mac.clone()) {
            Insertion::Inserted => {
                debug!(%device, %mac, "Tracking device");
                self.emit_packet(device).await;
            }
            Insertion::AlreadyTracked => {}
            Insertion::Blacklisted => debug!(%device, %mac, "Ignoring blacklisted device"),
        }
    }

    /// Forget a device once its `org.bluez.Device1` interface is withdrawn.
    pub fn remove_device(&self, device: &DeviceHandle, interfaces: &[String]) {
        if !interfaces
            .iter()
            .any(|interface| interface == transport::DEVICE_INTERFACE)
        {
            return;
        }
        if let Some(mac) = self.registry.remove(device) {
            debug!(%device, %mac, "Device removed");
        }
    }

    /// Emit a packet when a tracked device's manufacturer data changed.
    pub async fn on_properties_changed<S: AsRef<str>>(
        &self,
        device: &DeviceHandle,
        changed: &[S],
    ) {
        if !assembler::should_emit(changed) || !self.registry.contains(device) {
            return;
        }
        self.emit_packet(device).await;
    }

    async fn emit_packet(&self, device: &DeviceHandle) {
        let properties = match self.transport.device_properties(device).await {
            Ok(properties) => properties,
            Err(e) => {
                warn!(%device, error = %e, "Cannot read device properties");
                return;
            }
        };
        let record = assembler::assemble(properties);

        let _gate = self.lock_emit_gate();
        // The device may have been blacklisted while its properties were read.
        if !self.registry.contains(device) {
            return;
        }
        self.set_emitting_thread(Some(thread::current().id()));
        (self.callback)(record);
        self.set_emitting_thread(None);
    }
}
