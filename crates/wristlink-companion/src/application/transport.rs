//! The vendor transport port.
//!
//! The wearable vendor ships an SDK that moves lists of primitive values
//! between the phone and the watch.  Everything it offers is callback-based,
//! and every callback may fire more than once and on any thread.  This module
//! describes that surface as the [`VendorTransport`] trait so the rest of the
//! application can be written (and tested) without the real SDK.
//!
//! # Testability
//!
//! Unit tests use the `mockall`-generated `MockVendorTransport`; integration
//! tests and the headless binary use
//! [`SimulatedTransport`](crate::infrastructure::transport::simulated::SimulatedTransport).

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use wristlink_core::{Device, DeviceId, Value};

/// Opaque handle for a registered inbound or status listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle notifications delivered to the listener passed to
/// [`VendorTransport::initialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkEvent {
    /// The SDK is connected to the vendor's phone-side service.
    Ready,
    /// Initialization failed.
    InitializeError(InitErrorKind),
    /// The vendor service went away; everything must be initialized again.
    Shutdown,
}

/// Why the SDK could not initialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitErrorKind {
    /// The vendor's phone-side service is not installed.
    ServiceNotInstalled,
    /// The vendor's phone-side service is too old for this SDK.
    ServiceUpgradeNeeded,
    Other(String),
}

/// Local delivery status of an outbound message, or the status attached to
/// an inbound one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Success,
    DeviceUnavailable,
    AppNotInstalled,
    TransportFailure,
}

impl MessageStatus {
    pub fn is_success(self) -> bool {
        self == MessageStatus::Success
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageStatus::Success => "success",
            MessageStatus::DeviceUnavailable => "device unavailable",
            MessageStatus::AppNotInstalled => "app not installed",
            MessageStatus::TransportFailure => "transport failure",
        };
        f.write_str(s)
    }
}

/// A message pushed by the watch app.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub status: MessageStatus,
    pub payload: Vec<Value>,
}

impl InboundMessage {
    /// Convenience constructor for a successfully received payload.
    pub fn ok(payload: Vec<Value>) -> Self {
        Self {
            status: MessageStatus::Success,
            payload,
        }
    }
}

/// What the vendor SDK reports about the installed watch app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub app_id: String,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppInfoError {
    #[error("app is not installed on the device")]
    NotInstalled,
    #[error("app info query failed: {0}")]
    Failed(String),
}

/// Outcome of asking the device to bring the watch app to the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAppStatus {
    /// The user was shown a prompt to open the app.
    PromptShown,
    /// No prompt was needed; the app is already open.
    PromptNotShown,
    AppNotInstalled,
    AppAlreadyRunning,
    UnknownFailure,
}

impl OpenAppStatus {
    /// Only the two prompt outcomes mean the app is (about to be) in front.
    pub fn is_success(self) -> bool {
        matches!(self, OpenAppStatus::PromptShown | OpenAppStatus::PromptNotShown)
    }
}

/// Synchronous failures reported by the vendor SDK.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("vendor service unavailable")]
    ServiceUnavailable,
    #[error("transport is not in a state that allows this call")]
    InvalidState,
    #[error("unknown device {0}")]
    InvalidDevice(DeviceId),
    #[error("transport error: {0}")]
    Other(String),
}

pub type SdkListener = Box<dyn Fn(SdkEvent) + Send + Sync>;
pub type DeliveryCallback = Box<dyn Fn(MessageStatus) + Send + Sync>;
pub type InboundCallback = Box<dyn Fn(InboundMessage) + Send + Sync>;
pub type StatusCallback = Box<dyn Fn(Device) + Send + Sync>;
pub type AppInfoCallback = Box<dyn Fn(Result<AppInfo, AppInfoError>) + Send + Sync>;
pub type OpenAppCallback = Box<dyn Fn(OpenAppStatus) + Send + Sync>;

/// Trait abstracting the vendor wearable SDK.
///
/// Implementations must tolerate calls from any thread.  None of the methods
/// block; results arrive through the supplied callbacks.
#[cfg_attr(test, mockall::automock)]
pub trait VendorTransport: Send + Sync {
    /// Starts connecting to the vendor service.  `listener` receives every
    /// subsequent [`SdkEvent`] until the next `initialize` call.
    fn initialize(&self, listener: SdkListener);

    /// Releases the SDK.
    fn shutdown(&self);

    /// Sends `payload` to the watch app `app_id` on `device`.
    fn send_message(
        &self,
        device: DeviceId,
        app_id: &str,
        payload: Vec<Value>,
        callback: DeliveryCallback,
    );

    fn register_inbound_listener(
        &self,
        device: DeviceId,
        app_id: &str,
        callback: InboundCallback,
    ) -> Result<ListenerId, TransportError>;

    fn register_status_listener(
        &self,
        device: DeviceId,
        callback: StatusCallback,
    ) -> Result<ListenerId, TransportError>;

    /// Removes a listener.  Unknown ids are ignored.
    fn unregister_listener(&self, id: ListenerId);

    /// Returns the devices the vendor service currently knows about.
    fn known_devices(&self) -> Result<Vec<Device>, TransportError>;

    fn get_app_info(&self, device: DeviceId, app_id: &str, callback: AppInfoCallback);

    fn open_app(&self, device: DeviceId, app_id: &str, callback: OpenAppCallback);
}

// ── Listener ownership ────────────────────────────────────────────────────────

/// Unregisters a listener when dropped.
pub struct ListenerGuard {
    transport: Arc<dyn VendorTransport>,
    id: ListenerId,
}

impl ListenerGuard {
    pub fn new(transport: Arc<dyn VendorTransport>, id: ListenerId) -> Self {
        Self { transport, id }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.transport.unregister_listener(self.id);
    }
}

/// A registered listener exposed as an async stream of its events.
///
/// Vendor callbacks push into an unbounded channel; [`Subscription::recv`]
/// pulls from it.  Dropping the subscription unregisters the listener, so a
/// subscription owned by a future is released on every exit path of that
/// future, including cancellation.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    guard: ListenerGuard,
}

impl Subscription<InboundMessage> {
    /// Opens a subscription to messages from `app_id` on `device`.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if registration is refused.
    pub fn inbound(
        transport: &Arc<dyn VendorTransport>,
        device: DeviceId,
        app_id: &str,
    ) -> Result<Self, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = transport.register_inbound_listener(
            device,
            app_id,
            Box::new(move |message| {
                // Receiver gone means the subscription is being dropped.
                let _ = tx.send(message);
            }),
        )?;
        Ok(Self {
            rx,
            guard: ListenerGuard::new(Arc::clone(transport), id),
        })
    }
}

impl<T> Subscription<T> {
    /// Waits for the next event.  Returns `None` once the transport has
    /// dropped the callback.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn id(&self) -> ListenerId {
        self.guard.id()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
