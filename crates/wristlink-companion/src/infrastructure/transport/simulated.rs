//! In-process stand-in for the vendor SDK.
//!
//! [`SimulatedTransport`] implements [`VendorTransport`] entirely in memory.
//! Tests script how it behaves (initialization outcome, poll results,
//! delivery statuses, replies, app-info and open-app outcomes) and inspect
//! what the code under test did with it (sent payloads, live listeners).
//! The headless binary uses it with a [`Responder`] that plays the watch.
//!
//! Callbacks are always invoked after the internal lock is released, so a
//! callback may call back into the transport.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;
use wristlink_core::{CommandType, Device, DeviceId, Value};

use crate::application::transport::{
    AppInfo, AppInfoCallback, AppInfoError, DeliveryCallback, InboundCallback, InboundMessage,
    ListenerId, MessageStatus, OpenAppCallback, OpenAppStatus, SdkEvent, SdkListener,
    StatusCallback, TransportError, VendorTransport,
};

/// How a scripted callback fires.
#[derive(Debug, Clone, PartialEq)]
pub enum Script<T> {
    /// Invoke the callback once, synchronously.
    Once(T),
    /// Invoke the callback twice, synchronously.
    Twice(T, T),
    /// Invoke the callback once after a delay, from a spawned task.
    After(Duration, T),
    /// Keep the callback alive but never invoke it.
    Never,
}

/// Produces the watch's replies to a sent payload.
pub type Responder = Box<dyn Fn(DeviceId, &[Value]) -> Vec<Vec<Value>> + Send + Sync>;

/// Runs while a status listener for the device is being registered.  A
/// returned update is delivered to the new listener before registration
/// returns, the way some SDKs replay the current status.
pub type RegisterHook = Box<dyn Fn(DeviceId) -> Option<Device> + Send + Sync>;

type Shared<T> = Arc<dyn Fn(T) + Send + Sync>;

struct ScriptedReply {
    payloads: Vec<Vec<Value>>,
    before_delivery: bool,
}

struct SimState {
    next_listener: u64,
    init: Script<SdkEvent>,
    sdk_listener: Option<Shared<SdkEvent>>,
    initialize_calls: usize,
    shutdown_calls: usize,

    known: Vec<Device>,
    poll_failures: usize,
    status_registration_failures: usize,
    status_register_hook: Option<Arc<RegisterHook>>,

    inbound: HashMap<ListenerId, (DeviceId, Shared<InboundMessage>)>,
    status: HashMap<ListenerId, (DeviceId, Shared<Device>)>,

    delivery: Script<MessageStatus>,
    replies: HashMap<CommandType, VecDeque<ScriptedReply>>,
    responder: Option<Arc<Responder>>,
    sent: Vec<(DeviceId, Vec<Value>)>,

    app_info: Script<Result<AppInfo, AppInfoError>>,
    open_app: Script<OpenAppStatus>,

    /// Callbacks scripted to never fire, kept so their receivers stay pending.
    parked: Vec<Box<dyn Any + Send>>,
}

/// A scriptable, in-memory [`VendorTransport`].
pub struct SimulatedTransport {
    state: Mutex<SimState>,
}

impl SimulatedTransport {
    /// Creates a transport that initializes immediately, knows no devices,
    /// delivers every message successfully, and reports the watch app as
    /// installed and opened.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                next_listener: 0,
                init: Script::Once(SdkEvent::Ready),
                sdk_listener: None,
                initialize_calls: 0,
                shutdown_calls: 0,
                known: Vec::new(),
                poll_failures: 0,
                status_registration_failures: 0,
                status_register_hook: None,
                inbound: HashMap::new(),
                status: HashMap::new(),
                delivery: Script::Once(MessageStatus::Success),
                replies: HashMap::new(),
                responder: None,
                sent: Vec::new(),
                app_info: Script::Once(Ok(AppInfo {
                    app_id: String::new(),
                    version: 1,
                })),
                open_app: Script::Once(OpenAppStatus::PromptNotShown),
                parked: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Scripting ─────────────────────────────────────────────────────────────

    /// Sets what `initialize` reports to its listener.
    pub fn set_init(&self, script: Script<SdkEvent>) {
        self.lock().init = script;
    }

    pub fn set_known_devices(&self, devices: Vec<Device>) {
        self.lock().known = devices;
    }

    /// Makes the next `count` calls to `known_devices` fail.
    pub fn fail_next_polls(&self, count: usize) {
        self.lock().poll_failures = count;
    }

    /// Makes the next `count` status listener registrations fail.
    pub fn fail_next_status_registrations(&self, count: usize) {
        self.lock().status_registration_failures = count;
    }

    /// Installs a hook run inside every successful status registration.
    pub fn set_status_register_hook(&self, hook: RegisterHook) {
        self.lock().status_register_hook = Some(Arc::new(hook));
    }

    /// Sets the delivery status reported for every subsequent send.
    pub fn set_delivery(&self, script: Script<MessageStatus>) {
        self.lock().delivery = script;
    }

    pub fn set_app_info(&self, script: Script<Result<AppInfo, AppInfoError>>) {
        self.lock().app_info = script;
    }

    pub fn set_open_app(&self, script: Script<OpenAppStatus>) {
        self.lock().open_app = script;
    }

    /// Queues `payloads` to be pushed to the sender's device right after the
    /// delivery callback of the next send of `command`.
    pub fn script_reply(&self, command: CommandType, payloads: Vec<Vec<Value>>) {
        self.queue_reply(command, payloads, false);
    }

    /// Like [`script_reply`](Self::script_reply), but the payloads are pushed
    /// before the delivery callback runs.
    pub fn script_reply_before_delivery(&self, command: CommandType, payloads: Vec<Vec<Value>>) {
        self.queue_reply(command, payloads, true);
    }

    fn queue_reply(&self, command: CommandType, payloads: Vec<Vec<Value>>, before_delivery: bool) {
        self.lock()
            .replies
            .entry(command)
            .or_default()
            .push_back(ScriptedReply {
                payloads,
                before_delivery,
            });
    }

    /// Installs a responder consulted for every send that has no scripted
    /// reply.
    pub fn set_responder(&self, responder: Responder) {
        self.lock().responder = Some(Arc::new(responder));
    }

    // ── Event injection ───────────────────────────────────────────────────────

    /// Fires `event` at the current SDK listener.  Returns `false` if
    /// `initialize` has not been called.
    pub fn fire_sdk_event(&self, event: SdkEvent) -> bool {
        let listener = self.lock().sdk_listener.clone();
        match listener {
            Some(listener) => {
                listener(event);
                true
            }
            None => false,
        }
    }

    /// Pushes `message` to every inbound listener of `device`.  Returns the
    /// number of listeners invoked.
    pub fn emit_inbound(&self, device: DeviceId, message: InboundMessage) -> usize {
        let targets: Vec<Shared<InboundMessage>> = self
            .lock()
            .inbound
            .values()
            .filter(|(d, _)| *d == device)
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in &targets {
            cb(message.clone());
        }
        targets.len()
    }

    /// Pushes a status update to every status listener of `update.id`.
    /// Returns the number of listeners invoked.
    pub fn emit_status(&self, update: Device) -> usize {
        let targets: Vec<Shared<Device>> = self
            .lock()
            .status
            .values()
            .filter(|(d, _)| *d == update.id)
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in &targets {
            cb(update.clone());
        }
        targets.len()
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    pub fn active_listener_count(&self) -> usize {
        let state = self.lock();
        state.inbound.len() + state.status.len()
    }

    pub fn inbound_listener_count(&self, device: DeviceId) -> usize {
        self.lock()
            .inbound
            .values()
            .filter(|(d, _)| *d == device)
            .count()
    }

    pub fn status_listener_count(&self, device: DeviceId) -> usize {
        self.lock()
            .status
            .values()
            .filter(|(d, _)| *d == device)
            .count()
    }

    /// Every payload sent so far, in order.
    pub fn sent_payloads(&self) -> Vec<(DeviceId, Vec<Value>)> {
        self.lock().sent.clone()
    }

    pub fn initialize_calls(&self) -> usize {
        self.lock().initialize_calls
    }

    pub fn shutdown_calls(&self) -> usize {
        self.lock().shutdown_calls
    }

    fn allocate_listener(state: &mut SimState) -> ListenerId {
        state.next_listener += 1;
        ListenerId(state.next_listener)
    }

    fn run_script<T, F>(&self, script: Script<T>, callback: F)
    where
        T: Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        match script {
            Script::Once(value) => callback(value),
            Script::Twice(first, second) => {
                callback(first);
                callback(second);
            }
            Script::After(delay, value) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    callback(value);
                });
            }
            Script::Never => self.lock().parked.push(Box::new(callback)),
        }
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl VendorTransport for SimulatedTransport {
    fn initialize(&self, listener: SdkListener) {
        let listener: Shared<SdkEvent> = Arc::from(listener);
        let script = {
            let mut state = self.lock();
            state.initialize_calls += 1;
            state.sdk_listener = Some(Arc::clone(&listener));
            state.init.clone()
        };
        self.run_script(script, move |event| listener(event));
    }

    fn shutdown(&self) {
        let mut state = self.lock();
        state.shutdown_calls += 1;
        state.sdk_listener = None;
    }

    fn send_message(
        &self,
        device: DeviceId,
        app_id: &str,
        payload: Vec<Value>,
        callback: DeliveryCallback,
    ) {
        let (script, scripted, responder) = {
            let mut state = self.lock();
            state.sent.push((device, payload.clone()));
            let scripted = payload
                .first()
                .and_then(Value::as_int)
                .and_then(|tag| CommandType::try_from(tag).ok())
                .and_then(|command| state.replies.get_mut(&command))
                .and_then(VecDeque::pop_front);
            (state.delivery.clone(), scripted, state.responder.clone())
        };
        debug!(device = %device, app_id, "simulated send");

        let (replies, before_delivery) = match (scripted, responder) {
            (Some(reply), _) => (reply.payloads, reply.before_delivery),
            (None, Some(responder)) => (responder(device, &payload), false),
            (None, None) => (Vec::new(), false),
        };

        if before_delivery {
            for reply in &replies {
                self.emit_inbound(device, InboundMessage::ok(reply.clone()));
            }
        }
        self.run_script(script, move |status| callback(status));
        if !before_delivery {
            for reply in replies {
                self.emit_inbound(device, InboundMessage::ok(reply));
            }
        }
    }

    fn register_inbound_listener(
        &self,
        device: DeviceId,
        _app_id: &str,
        callback: InboundCallback,
    ) -> Result<ListenerId, TransportError> {
        let mut state = self.lock();
        let id = Self::allocate_listener(&mut state);
        state.inbound.insert(id, (device, Arc::from(callback)));
        Ok(id)
    }

    fn register_status_listener(
        &self,
        device: DeviceId,
        callback: StatusCallback,
    ) -> Result<ListenerId, TransportError> {
        let callback: Shared<Device> = Arc::from(callback);
        let (id, hook) = {
            let mut state = self.lock();
            if state.status_registration_failures > 0 {
                state.status_registration_failures -= 1;
                return Err(TransportError::InvalidState);
            }
            let id = Self::allocate_listener(&mut state);
            state.status.insert(id, (device, Arc::clone(&callback)));
            (id, state.status_register_hook.clone())
        };
        if let Some(update) = hook.and_then(|hook| hook(device)) {
            callback(update);
        }
        Ok(id)
    }

    fn unregister_listener(&self, id: ListenerId) {
        let mut state = self.lock();
        state.inbound.remove(&id);
        state.status.remove(&id);
    }

    fn known_devices(&self) -> Result<Vec<Device>, TransportError> {
        let mut state = self.lock();
        if state.poll_failures > 0 {
            state.poll_failures -= 1;
            return Err(TransportError::ServiceUnavailable);
        }
        Ok(state.known.clone())
    }

    fn get_app_info(&self, _device: DeviceId, _app_id: &str, callback: AppInfoCallback) {
        let script = self.lock().app_info.clone();
        self.run_script(script, move |result| callback(result));
    }

    fn open_app(&self, _device: DeviceId, _app_id: &str, callback: OpenAppCallback) {
        let script = self.lock().open_app.clone();
        self.run_script(script, move |status| callback(status));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
