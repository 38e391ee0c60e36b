//! Tracked devices and the MAC blacklist.
//!
//! Both live behind one lock so that blacklisting a MAC and tracking a device
//! resolving to it can never interleave: whichever takes the lock second sees
//! the other's effect.

use super::transport::{DeviceHandle, Subscription};
use crate::mac_address::canonicalize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Append-only set of excluded MAC addresses, kept in insertion order.
#[derive(Debug, Default, Clone)]
pub struct Blacklist {
    macs: Vec<String>,
}

impl Blacklist {
    /// Returns `false` if the MAC was already present.
    pub fn insert(&mut self, mac: &str) -> bool {
        let mac = canonicalize(mac);
        if self.macs.contains(&mac) {
            return false;
        }
        self.macs.push(mac);
        true
    }

    pub fn contains(&self, mac: &str) -> bool {
        let mac = canonicalize(mac);
        self.macs.contains(&mac)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.macs.clone()
    }
}

#[derive(Debug)]
struct TrackedDevice {
    subscription: Subscription,
    mac: String,
}

#[derive(Debug, Default)]
struct RegistryState {
    devices: HashMap<DeviceHandle, TrackedDevice>,
    blacklist: Blacklist,
}

/// Outcome of [`DeviceRegistry::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    Inserted,
    AlreadyTracked,
    Blacklisted,
}

/// Devices currently subscribed to, keyed by platform handle.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    state: Mutex<RegistryState>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, device: &DeviceHandle) -> bool {
        self.lock().devices.contains_key(device)
    }

    pub fn is_blacklisted(&self, mac: &str) -> bool {
        self.lock().blacklist.contains(mac)
    }

    /// Track `device` unless it is already tracked or `mac` is blacklisted.
    ///
    /// A rejected subscription is dropped, and so cancelled, after the lock
    /// is released.
    pub fn insert(
        &self,
        device: DeviceHandle,
        subscription: Subscription,
        mac: String,
    ) -> Insertion {
        let mut state = self.lock();
        let outcome = if state.blacklist.contains(&mac) {
            Insertion::Blacklisted
        } else if state.devices.contains_key(&device) {
            Insertion::AlreadyTracked
        } else {
            state
                .devices
                .insert(device, TrackedDevice { subscription, mac });
            return Insertion::Inserted;
        };
        drop(state);
        drop(subscription);
        outcome
    }

    /// Stop tracking `device`, returning the MAC it resolved to.
    pub fn remove(&self, device: &DeviceHandle) -> Option<String> {
        let removed = self.lock().devices.remove(device)?;
        let TrackedDevice { subscription, mac } = removed;
        subscription.unsubscribe();
        Some(mac)
    }

    /// Blacklist `mac` and evict every tracked device resolved to it.
    ///
    /// Returns the evicted handles.
    pub fn blacklist(&self, mac: &str) -> Vec<DeviceHandle> {
        let evicted: Vec<(DeviceHandle, TrackedDevice)> = {
            let mut state = self.lock();
            state.blacklist.insert(mac);
            let mac = canonicalize(mac);
            let handles: Vec<DeviceHandle> = state
                .devices
                .iter()
                .filter(|(_, tracked)| canonicalize(&tracked.mac) == mac)
                .map(|(handle, _)| handle.clone())
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| state.devices.remove_entry(&handle))
                .collect()
        };

        evicted
            .into_iter()
            .map(|(handle, tracked)| {
                tracked.subscription.unsubscribe();
                handle
            })
            .collect()
    }

    pub fn blacklisted(&self) -> Vec<String> {
        self.lock().blacklist.to_vec()
    }

    pub fn len(&self) -> usize {
        self.lock().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every tracked device, cancelling their subscriptions.
    pub fn clear(&self) {
        let devices = std::mem::take(&mut self.lock().devices);
        drop(devices);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    const MAC: &str = "CB:B8:33:4C:88:4F";

    fn handle(n: u8) -> DeviceHandle {
        DeviceHandle::new(format!("/org/bluez/hci0/dev_{n}"))
    }

    fn counted_subscription(counter: &Arc<AtomicUsize>) -> Subscription {
        let counter = Arc::clone(counter);
        Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_blacklist_insert_is_idempotent() {
        let mut blacklist = Blacklist::default();
        assert!(blacklist.insert(MAC));
        assert!(!blacklist.insert(MAC));
        assert!(!blacklist.insert(&MAC.to_lowercase()));
        assert_eq!(blacklist.to_vec(), vec![MAC.to_string()]);
    }

    #[test]
    fn test_blacklist_preserves_insertion_order() {
        let mut blacklist = Blacklist::default();
        blacklist.insert("11:22:33:44:55:66");
        blacklist.insert("AA:BB:CC:DD:EE:FF");
        blacklist.insert("00:00:00:00:00:01");
        assert_eq!(
            blacklist.to_vec(),
            vec!["11:22:33:44:55:66", "AA:BB:CC:DD:EE:FF", "00:00:00:00:00:01"]
        );
    }

    #[test]
    fn test_insert_tracks_once() {
        let registry = DeviceRegistry::new();
        let cancelled = Arc::new(AtomicUsize::new(0));

        assert_eq!(
            registry.insert(handle(1), counted_subscription(&cancelled), MAC.into()),
            Insertion::Inserted
        );
        assert_eq!(
            registry.insert(handle(1), counted_subscription(&cancelled), MAC.into()),
            Insertion::AlreadyTracked
        );

        assert_eq!(registry.len(), 1);
        // only the duplicate subscription was cancelled
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert!(registry.contains(&handle(1)));
    }

    #[test]
    fn test_insert_refuses_blacklisted_mac() {
        let registry = DeviceRegistry::new();
        let cancelled = Arc::new(AtomicUsize::new(0));
        registry.blacklist(MAC);

        assert_eq!(
            registry.insert(handle(1), counted_subscription(&cancelled), MAC.into()),
            Insertion::Blacklisted
        );
        assert!(registry.is_empty());
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_unsubscribes() {
        let registry = DeviceRegistry::new();
        let cancelled = Arc::new(AtomicUsize::new(0));
        let _ = registry.insert(handle(1), counted_subscription(&cancelled), MAC.into());

        assert_eq!(registry.remove(&handle(1)), Some(MAC.to_string()));
        assert_eq!(registry.remove(&handle(1)), None);
        assert!(!registry.contains(&handle(1)));
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_blacklist_evicts_matching_devices_only() {
        let registry = DeviceRegistry::new();
        let cancelled = Arc::new(AtomicUsize::new(0));
        let _ = registry.insert(handle(1), counted_subscription(&cancelled), MAC.into());
        let _ = registry.insert(handle(2), counted_subscription(&cancelled), MAC.into());
        let _ = registry.insert(
            handle(3),
            counted_subscription(&cancelled),
            "AA:BB:CC:DD:EE:FF".into(),
        );

        let mut evicted = registry.blacklist(&MAC.to_lowercase());
        evicted.sort();

        assert_eq!(evicted, vec![handle(1), handle(2)]);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&handle(3)));
        assert_eq!(cancelled.load(Ordering::SeqCst), 2);
        assert!(registry.is_blacklisted(MAC));
        assert_eq!(registry.blacklisted(), vec![MAC.to_string()]);
    }

    #[test]
    fn test_clear_unsubscribes_everything() {
        let registry = DeviceRegistry::new();
        let cancelled = Arc::new(AtomicUsize::new(0));
        let _ = registry.insert(handle(1), counted_subscription(&cancelled), MAC.into());
        let _ = registry.insert(
            handle(2),
            counted_subscription(&cancelled),
            "AA:BB:CC:DD:EE:FF".into(),
        );

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(cancelled.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_blacklist_and_insert() {
        let registry = Arc::new(DeviceRegistry::new());
        let cancelled = Arc::new(AtomicUsize::new(0));

        let inserter = {
            let registry = Arc::clone(&registry);
            let cancelled = Arc::clone(&cancelled);
            thread::spawn(move || {
                for n in 0..100u8 {
                    let _ = registry.insert(
                        handle(n),
                        counted_subscription(&cancelled),
                        MAC.to_string(),
                    );
                }
            })
        };
        let blacklister = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.blacklist(MAC))
        };

        inserter.join().unwrap();
        blacklister.join().unwrap();

        // every device either got evicted or was refused
        assert!(registry.is_empty());
        assert_eq!(cancelled.load(Ordering::SeqCst), 100);
    }
}
