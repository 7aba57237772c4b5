//! Correlator: "send a command, await the typed reply" on top of an
//! uncorrelated message stream.
//!
//! The vendor transport has no request identifiers.  A reply is recognised
//! only by its response type, so a query works like this:
//!
//! ```text
//! ensure_ready ─► gate.prepare (best-effort) ─► open inbound subscription
//!      ─► start signal ─► warm-up delay ─► encode + send
//!      ─► first decoded response of the expected type wins
//! ```
//!
//! all under one overall deadline.  The command is always sent.  A response
//! that turns up before the send has been confirmed is held until the
//! delivery callback reports success, and a failed delivery fails the query
//! even if a response was already held.  The listener is an ordinary future owned
//! by the query future; it holds the [`Subscription`], so when the query
//! finishes, fails, times out, or is dropped by its caller, the inbound
//! listener is unregistered on the spot.
//!
//! Because two queries to the same device could not tell their replies
//! apart, the correlator allows at most one query in flight per device and
//! rejects a second one with [`QueryError::Busy`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;
use wristlink_core::{
    decode_response, encode_command, Command, DecodeError, DeviceId, ExpectedResponse, Response,
    ResponseType,
};

use super::app_gate::AppReadinessGate;
use super::device_registry::DeviceRegistry;
use super::resolve_once::ResolveOnce;
use super::session::{SessionError, SessionManager};
use super::transport::{MessageStatus, Subscription, TransportError, VendorTransport};

// ── Timings ───────────────────────────────────────────────────────────────────

/// Timeouts and delays used by the correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTimings {
    /// How long a device may take to answer a query.  Watches can need
    /// minutes for large transfers.
    pub response_timeout: Duration,
    /// Added to `response_timeout` to cover session and gate setup.
    pub deadline_buffer: Duration,
    /// Overall bound for a fire-and-forget [`Correlator::send`].
    pub send_timeout: Duration,
    /// Delay between opening the inbound subscription and sending.
    pub warmup: Duration,
}

impl QueryTimings {
    /// Overall deadline of one [`Correlator::query`].
    pub fn query_deadline(&self) -> Duration {
        self.response_timeout + self.deadline_buffer
    }
}

impl Default for QueryTimings {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(300),
            deadline_buffer: Duration::from_secs(10),
            send_timeout: Duration::from_secs(30),
            warmup: Duration::from_millis(500),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// How a failure should be presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The vendor service must be installed.
    InstallRequired,
    /// The vendor service must be updated.
    UpdateRequired,
    DeviceUnreachable,
    /// The watch sent something this side cannot read: an unknown message
    /// type, a malformed message, or a response of the wrong shape.
    ProtocolMismatch,
    DeviceBusy,
    NoDeviceSelected,
    Other,
}

impl From<&SessionError> for FailureClass {
    fn from(error: &SessionError) -> Self {
        match error {
            SessionError::NeedsInstall => FailureClass::InstallRequired,
            SessionError::NeedsUpdate => FailureClass::UpdateRequired,
            SessionError::InitFailed(_) => FailureClass::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("message delivery failed: {0}")]
    DeliveryFailed(MessageStatus),
    /// The transport dropped the delivery callback without invoking it.
    #[error("transport abandoned the delivery callback")]
    Abandoned,
    #[error("send timed out")]
    Timeout,
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl SendError {
    pub fn class(&self) -> FailureClass {
        match self {
            SendError::Session(e) => e.into(),
            SendError::DeliveryFailed(_) | SendError::Abandoned | SendError::Timeout => {
                FailureClass::DeviceUnreachable
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error(transparent)]
    Send(SendError),
    #[error("could not decode device response: {0}")]
    Decode(#[from] DecodeError),
    #[error("inbound message failed: {0}")]
    InboundFailed(MessageStatus),
    #[error("inbound subscription closed before a response arrived")]
    SubscriptionClosed,
    /// A response of the expected type did not carry the expected payload.
    #[error("response did not match {0:?}")]
    UnexpectedResponse(ResponseType),
    #[error("query timed out")]
    Timeout,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("a query to device {0} is already in flight")]
    Busy(DeviceId),
    #[error("no device selected")]
    NoDeviceSelected,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl QueryError {
    pub fn class(&self) -> FailureClass {
        match self {
            QueryError::Session(e) => e.into(),
            QueryError::Send(e) => e.class(),
            QueryError::Decode(_) | QueryError::UnexpectedResponse(_) => {
                FailureClass::ProtocolMismatch
            }
            QueryError::InboundFailed(_)
            | QueryError::SubscriptionClosed
            | QueryError::Timeout
            | QueryError::Transport(_) => FailureClass::DeviceUnreachable,
            QueryError::Busy(_) => FailureClass::DeviceBusy,
            QueryError::NoDeviceSelected => FailureClass::NoDeviceSelected,
        }
    }
}

impl From<SendError> for QueryError {
    fn from(error: SendError) -> Self {
        // Session errors keep their own variant whichever path raised them.
        match error {
            SendError::Session(e) => QueryError::Session(e),
            other => QueryError::Send(other),
        }
    }
}

// ── Messenger abstraction ─────────────────────────────────────────────────────

/// Command/reply access to a wearable.
///
/// Implemented by [`Correlator`]; higher layers depend on this trait so they
/// can be tested with a fake.
#[async_trait]
pub trait DeviceMessenger: Send + Sync {
    async fn query(
        &self,
        device: DeviceId,
        command: Command,
        expected: ResponseType,
    ) -> Result<Response, QueryError>;

    async fn send(&self, device: DeviceId, command: Command) -> Result<(), SendError>;
}

// ── In-flight slots ───────────────────────────────────────────────────────────

type Slots = Arc<Mutex<HashSet<DeviceId>>>;

/// Marks a device as having a query in flight until dropped.
struct SlotGuard {
    slots: Slots,
    device: DeviceId,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.device);
    }
}

// ── Correlator ────────────────────────────────────────────────────────────────

pub struct Correlator {
    transport: Arc<dyn VendorTransport>,
    session: Arc<SessionManager>,
    gate: AppReadinessGate,
    registry: DeviceRegistry,
    timings: QueryTimings,
    in_flight: Slots,
}

impl Correlator {
    pub fn new(
        transport: Arc<dyn VendorTransport>,
        session: Arc<SessionManager>,
        gate: AppReadinessGate,
        registry: DeviceRegistry,
        timings: QueryTimings,
    ) -> Self {
        Self {
            transport,
            session,
            gate,
            registry,
            timings,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn timings(&self) -> QueryTimings {
        self.timings
    }

    /// Sends `command` to `device` and waits for the first response of type
    /// `expected`.
    ///
    /// Responses of other types that arrive in the meantime are skipped.
    ///
    /// # Errors
    ///
    /// - [`QueryError::Busy`] if another query to `device` is in flight.
    /// - [`QueryError::Session`] if the SDK cannot be brought up.
    /// - [`QueryError::Send`] if the transport reports a failed delivery.
    /// - [`QueryError::Decode`] if the device sends something undecodable.
    /// - [`QueryError::Timeout`] once the overall deadline passes.
    pub async fn query(
        &self,
        device: DeviceId,
        command: Command,
        expected: ResponseType,
    ) -> Result<Response, QueryError> {
        let _slot = self.reserve(device)?;
        let deadline = self.timings.query_deadline();
        let span = info_span!(
            "query",
            request = %Uuid::new_v4(),
            device = %device,
            command = ?command.command_type(),
            ?expected
        );

        async move {
            match timeout(deadline, self.run_query(device, &command, expected)).await {
                Ok(result) => {
                    if let Err(e) = &result {
                        warn!(error = %e, "query failed");
                    }
                    result
                }
                Err(_) => {
                    warn!(?deadline, "query timed out");
                    Err(QueryError::Timeout)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Typed form of [`query`](Self::query).
    ///
    /// ```ignore
    /// let info: DeviceInfo = correlator.query_as(device, Command::RequestDeviceInfo).await?;
    /// ```
    pub async fn query_as<T: ExpectedResponse>(
        &self,
        device: DeviceId,
        command: Command,
    ) -> Result<T, QueryError> {
        let response = self.query(device, command, T::RESPONSE_TYPE).await?;
        T::from_response(response).ok_or(QueryError::UnexpectedResponse(T::RESPONSE_TYPE))
    }

    /// Queries whichever device the registry currently considers selected.
    ///
    /// # Errors
    ///
    /// [`QueryError::NoDeviceSelected`] when no device qualifies, otherwise
    /// as [`query`](Self::query).
    pub async fn query_current(
        &self,
        preferred: Option<DeviceId>,
        command: Command,
        expected: ResponseType,
    ) -> Result<Response, QueryError> {
        let device = self
            .registry
            .current_device(preferred)
            .ok_or(QueryError::NoDeviceSelected)?;
        self.query(device.id, command, expected).await
    }

    /// Sends `command` without waiting for a reply.
    ///
    /// # Errors
    ///
    /// Fails on session errors, on any non-success delivery status, and when
    /// the send timeout passes first.
    pub async fn send(&self, device: DeviceId, command: Command) -> Result<(), SendError> {
        let run = async {
            self.session.ensure_ready().await?;
            self.transmit(device, &command).await
        };
        match timeout(self.timings.send_timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                warn!(device = %device, "send timed out");
                Err(SendError::Timeout)
            }
        }
    }

    fn reserve(&self, device: DeviceId) -> Result<SlotGuard, QueryError> {
        let mut slots = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !slots.insert(device) {
            return Err(QueryError::Busy(device));
        }
        Ok(SlotGuard {
            slots: Arc::clone(&self.in_flight),
            device,
        })
    }

    async fn run_query(
        &self,
        device: DeviceId,
        command: &Command,
        expected: ResponseType,
    ) -> Result<Response, QueryError> {
        self.session.ensure_ready().await?;

        if let Err(e) = self.gate.prepare(device).await {
            warn!(error = %e, "app readiness gate failed; sending anyway");
        }

        let (started_tx, started_rx) = oneshot::channel();
        let listener = self.await_response(device, expected, started_tx);
        tokio::pin!(listener);

        // The start signal only says the subscription exists, not that the
        // watch side is attached yet.
        tokio::select! {
            biased;
            result = &mut listener => return result,
            _ = started_rx => {}
        }

        let send = async {
            sleep(self.timings.warmup).await;
            self.transmit(device, command).await
        };
        tokio::pin!(send);

        // Keep listening while the send is in progress, but let nothing
        // resolve the query before the command has gone out.
        let mut held: Option<Result<Response, QueryError>> = None;
        let delivered = loop {
            tokio::select! {
                biased;
                outcome = &mut send => break outcome,
                result = &mut listener, if held.is_none() => {
                    debug!("response arrived before delivery was confirmed; holding it");
                    held = Some(result);
                }
            }
        };
        delivered?;
        debug!("command delivered; awaiting response");

        match held {
            Some(result) => result,
            None => listener.await,
        }
    }

    /// The listener side of a query.  Owns the inbound subscription for its
    /// whole life.
    async fn await_response(
        &self,
        device: DeviceId,
        expected: ResponseType,
        started: oneshot::Sender<()>,
    ) -> Result<Response, QueryError> {
        let mut subscription = Subscription::inbound(&self.transport, device, self.gate.app_id())?;
        debug!(listener = %subscription.id(), "inbound subscription open");
        let _ = started.send(());

        while let Some(message) = subscription.recv().await {
            if !message.status.is_success() {
                return Err(QueryError::InboundFailed(message.status));
            }
            let response = decode_response(&message.payload)?;
            let received = response.response_type();
            if received == expected {
                info!(?received, "response matched");
                return Ok(response);
            }
            debug!(?received, "skipping non-matching response");
        }
        Err(QueryError::SubscriptionClosed)
    }

    /// Encodes and sends `command`, resolving on the first delivery callback.
    async fn transmit(&self, device: DeviceId, command: &Command) -> Result<(), SendError> {
        let payload = encode_command(command);
        let (resolver, rx) = ResolveOnce::new();
        debug!(device = %device, fields = payload.len(), "sending command");
        self.transport.send_message(
            device,
            self.gate.app_id(),
            payload,
            Box::new(move |status| {
                if !resolver.resolve(status) {
                    debug!(%status, "ignoring duplicate delivery callback");
                }
            }),
        );

        match rx.await {
            Ok(MessageStatus::Success) => Ok(()),
            Ok(status) => Err(SendError::DeliveryFailed(status)),
            Err(_) => Err(SendError::Abandoned),
        }
    }
}

#[async_trait]
impl DeviceMessenger for Correlator {
    async fn query(
        &self,
        device: DeviceId,
        command: Command,
        expected: ResponseType,
    ) -> Result<Response, QueryError> {
        Correlator::query(self, device, command, expected).await
    }

    async fn send(&self, device: DeviceId, command: Command) -> Result<(), SendError> {
        Correlator::send(self, device, command).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
