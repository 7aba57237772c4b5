//! DeviceRegistry: the live list of nearby wearables.
//!
//! The vendor transport offers two unreliable views of the world: a
//! known-device snapshot that has to be polled, and per-device status
//! callbacks.  The registry folds both into one published list with exactly
//! one entry per device, using the pure reducer from `wristlink_core`.
//!
//! # Single writer
//!
//! All mutations happen on one background loop that owns the listener table.
//! It wakes for three reasons:
//!
//! - the poll interval ticks → diff the snapshot, publish, then register
//!   status listeners for new devices;
//! - a status callback fired → merge it into its entry and publish;
//! - shutdown was requested → exit.
//!
//! The loop also keeps the last known name of every device it has seen, so a
//! watch that drops out of a poll and reconnects with a blank name keeps its
//! name.
//!
//! Observers get a `tokio::sync::watch` receiver, so a new subscriber always
//! sees the latest list immediately and slow subscribers only ever skip
//! intermediate lists.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wristlink_core::{
    pick_current_device, reduce, Device, DeviceId, DeviceList, KnownNames, RegistryEvent,
};

use super::transport::{ListenerGuard, VendorTransport};

/// Default poll period for the known-device snapshot.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A status callback, tagged with the registration it came from.
struct StatusEvent {
    device: DeviceId,
    registration: u64,
    update: Device,
}

/// An active status listener for one listed device.
struct Registration {
    token: u64,
    _guard: ListenerGuard,
}

struct RegistryInner {
    transport: Arc<dyn VendorTransport>,
    poll_interval: Duration,
    list_tx: watch::Sender<DeviceList>,
    started: AtomicBool,
    cancel: CancellationToken,
}

/// Handle to the device registry.  Cheap to clone; all clones share one
/// poll loop and one published list.
#[derive(Clone)]
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
}

impl DeviceRegistry {
    pub fn new(transport: Arc<dyn VendorTransport>, poll_interval: Duration) -> Self {
        let (list_tx, _) = watch::channel(DeviceList::default());
        Self {
            inner: Arc::new(RegistryInner {
                transport,
                poll_interval,
                list_tx,
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Returns a receiver of the published device list.
    ///
    /// The first call made inside a Tokio runtime starts the poll loop on
    /// that runtime; it then runs until [`shutdown`](Self::shutdown), however
    /// many receivers come and go.  Called outside a runtime, the receiver
    /// stays on the empty list until a later call starts the loop.
    pub fn subscribe(&self) -> watch::Receiver<DeviceList> {
        let rx = self.inner.list_tx.subscribe();
        if self.inner.started.load(Ordering::Acquire) {
            return rx;
        }
        match Handle::try_current() {
            Ok(handle) => {
                if !self.inner.started.swap(true, Ordering::AcqRel) {
                    info!(interval = ?self.inner.poll_interval, "starting device registry");
                    handle.spawn(Arc::clone(&self.inner).run());
                }
            }
            Err(_) => warn!("no Tokio runtime; device registry poll loop not started"),
        }
        rx
    }

    /// The most recently published list.
    pub fn snapshot(&self) -> DeviceList {
        Arc::clone(&self.inner.list_tx.borrow())
    }

    /// Picks the device commands should go to from the current list.
    pub fn current_device(&self, preferred: Option<DeviceId>) -> Option<Device> {
        pick_current_device(&self.snapshot(), preferred)
    }

    /// Stops the poll loop and releases every status listener.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }
}

impl RegistryInner {
    async fn run(self: Arc<Self>) {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<StatusEvent>();
        let mut listeners: HashMap<DeviceId, Registration> = HashMap::new();
        let mut names = KnownNames::new();
        let mut next_token: u64 = 0;

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                _ = ticker.tick() => {
                    self.poll(&mut listeners, &mut names, &event_tx, &mut next_token);
                }

                Some(event) = event_rx.recv() => {
                    self.apply_status(&listeners, &mut names, event);
                }
            }
        }

        // Dropping the table unregisters every remaining listener.
        drop(listeners);
        debug!("device registry stopped");
    }

    fn current(&self) -> DeviceList {
        Arc::clone(&self.list_tx.borrow())
    }

    fn poll(
        &self,
        listeners: &mut HashMap<DeviceId, Registration>,
        names: &mut KnownNames,
        event_tx: &mpsc::UnboundedSender<StatusEvent>,
        next_token: &mut u64,
    ) {
        let snapshot = match self.transport.known_devices() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "device poll failed; keeping the previous list");
                return;
            }
        };

        let previous = self.current();
        let reduction = reduce(&previous, names, RegistryEvent::Snapshot(snapshot));

        // Publish first: observers must see a device before its status
        // events can arrive.
        if reduction.changed {
            debug!(
                added = reduction.added.len(),
                removed = reduction.removed.len(),
                "publishing device list"
            );
            self.list_tx.send_replace(Arc::new(reduction.next.clone()));
        }

        for id in &reduction.removed {
            if listeners.remove(id).is_some() {
                debug!(device = %id, "device gone; status listener released");
            }
        }

        // Covers newly added devices and earlier registrations that failed.
        for device in &reduction.next {
            if listeners.contains_key(&device.id) {
                continue;
            }
            *next_token += 1;
            let token = *next_token;
            let tx = event_tx.clone();
            let id = device.id;
            let registered = self.transport.register_status_listener(
                id,
                Box::new(move |update| {
                    let _ = tx.send(StatusEvent {
                        device: id,
                        registration: token,
                        update,
                    });
                }),
            );
            match registered {
                Ok(listener) => {
                    debug!(device = %id, %listener, "status listener registered");
                    listeners.insert(
                        id,
                        Registration {
                            token,
                            _guard: ListenerGuard::new(Arc::clone(&self.transport), listener),
                        },
                    );
                }
                Err(e) => {
                    warn!(device = %id, error = %e, "status listener registration failed; retrying next tick");
                }
            }
        }
    }

    fn apply_status(
        &self,
        listeners: &HashMap<DeviceId, Registration>,
        names: &mut KnownNames,
        event: StatusEvent,
    ) {
        let active = listeners
            .get(&event.device)
            .is_some_and(|r| r.token == event.registration);
        if !active {
            debug!(device = %event.device, "discarding status event from a released listener");
            return;
        }

        let mut update = event.update;
        update.id = event.device;
        let previous = self.current();
        let reduction = reduce(&previous, names, RegistryEvent::StatusChanged(update));
        if reduction.changed {
            debug!(device = %event.device, "device status changed");
            self.list_tx.send_replace(Arc::new(reduction.next));
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
