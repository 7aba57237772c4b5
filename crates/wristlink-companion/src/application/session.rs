//! SessionManager: the connect/initialize state machine for the vendor SDK.
//!
//! Nothing can be sent to a watch until the SDK reports that it is ready.
//! [`SessionManager::ensure_ready`] hides that from callers: it starts an
//! initialization attempt when needed, joins one that is already running, and
//! returns immediately once the session is ready.
//!
//! # State machine (for beginners)
//!
//! ```text
//!                  ensure_ready()
//! NotConnected ───────────────────► Initializing
//!      ▲                                 │
//!      │  InitializeError / Shutdown     │ Ready
//!      └─────────────────────────────────┤
//!      │                                 ▼
//!      └────────── Shutdown ──────────  Ready
//! ```
//!
//! Every attempt gets a number.  The SDK listener registered for an attempt
//! carries that number, so events that belong to an attempt that has since
//! been superseded are ignored instead of corrupting the current one.
//!
//! Failed attempts are never retried automatically; the next
//! `ensure_ready()` call starts a fresh one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::transport::{InitErrorKind, SdkEvent, VendorTransport};

/// Connection state of the vendor SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotConnected,
    Initializing,
    Ready,
}

/// Why the session could not be brought up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The vendor's phone-side service must be installed.
    #[error("the wearable vendor service is not installed")]
    NeedsInstall,
    /// The vendor's phone-side service must be updated.
    #[error("the wearable vendor service needs an update")]
    NeedsUpdate,
    #[error("transport initialization failed: {0}")]
    InitFailed(String),
}

impl From<InitErrorKind> for SessionError {
    fn from(kind: InitErrorKind) -> Self {
        match kind {
            InitErrorKind::ServiceNotInstalled => SessionError::NeedsInstall,
            InitErrorKind::ServiceUpgradeNeeded => SessionError::NeedsUpdate,
            InitErrorKind::Other(reason) => SessionError::InitFailed(reason),
        }
    }
}

const SHUTDOWN_DURING_INIT: &str = "transport shut down during initialization";

type Outcome = Option<Result<(), SessionError>>;

struct Inner {
    state: SessionState,
    /// Number of the most recent attempt.  Events tagged with any other
    /// number are stale.
    attempt: u64,
    /// Outcome channel for the most recent attempt.
    outcome: Option<watch::Sender<Outcome>>,
}

struct Shared {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    fn finish(&self, inner: &mut Inner, next: SessionState, result: Result<(), SessionError>) {
        self.set_state(inner, next);
        if let Some(tx) = &inner.outcome {
            tx.send_replace(Some(result));
        }
    }

    fn handle_event(&self, attempt: u64, event: SdkEvent) {
        let mut inner = self.lock();
        if attempt != inner.attempt {
            debug!(attempt, current = inner.attempt, ?event, "ignoring event from superseded attempt");
            return;
        }

        match (inner.state, event) {
            (SessionState::Initializing, SdkEvent::Ready) => {
                info!(attempt, "vendor transport ready");
                self.finish(&mut inner, SessionState::Ready, Ok(()));
            }
            (SessionState::Initializing, SdkEvent::InitializeError(kind)) => {
                let error = SessionError::from(kind);
                warn!(attempt, %error, "vendor transport failed to initialize");
                self.finish(&mut inner, SessionState::NotConnected, Err(error));
            }
            (SessionState::Initializing, SdkEvent::Shutdown) => {
                warn!(attempt, "vendor transport shut down during initialization");
                self.finish(
                    &mut inner,
                    SessionState::NotConnected,
                    Err(SessionError::InitFailed(SHUTDOWN_DURING_INIT.to_string())),
                );
            }
            (SessionState::Ready, SdkEvent::Shutdown) => {
                warn!(attempt, "vendor transport shut down");
                self.set_state(&mut inner, SessionState::NotConnected);
            }
            (state, event) => {
                debug!(attempt, ?state, ?event, "ignoring duplicate SDK event");
            }
        }
    }
}

/// Owns the SDK session.  Construct one per process and share it through an
/// `Arc`.
pub struct SessionManager {
    transport: Arc<dyn VendorTransport>,
    shared: Arc<Shared>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn VendorTransport>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::NotConnected);
        Self {
            transport,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SessionState::NotConnected,
                    attempt: 0,
                    outcome: None,
                }),
                state_tx,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Returns a receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Waits until the session is ready, starting an initialization attempt
    /// if none is running.
    ///
    /// Concurrent callers share one attempt: `initialize` is issued once and
    /// every caller observes the same outcome.
    ///
    /// # Errors
    ///
    /// Returns the classified initialization failure of the attempt this call
    /// joined.
    pub async fn ensure_ready(&self) -> Result<(), SessionError> {
        let (mut outcome, start) = {
            let mut inner = self.shared.lock();
            match inner.state {
                SessionState::Ready => return Ok(()),
                SessionState::Initializing => match &inner.outcome {
                    Some(tx) => (tx.subscribe(), None),
                    None => {
                        return Err(SessionError::InitFailed(
                            "initialization attempt has no outcome channel".to_string(),
                        ))
                    }
                },
                SessionState::NotConnected => {
                    inner.attempt += 1;
                    let (tx, rx) = watch::channel(None);
                    inner.outcome = Some(tx);
                    self.shared.set_state(&mut inner, SessionState::Initializing);
                    (rx, Some(inner.attempt))
                }
            }
        };

        // The lock is released before calling into the transport: the SDK may
        // invoke the listener synchronously.
        if let Some(attempt) = start {
            info!(attempt, "initializing vendor transport");
            let shared = Arc::clone(&self.shared);
            self.transport
                .initialize(Box::new(move |event| shared.handle_event(attempt, event)));
        }

        let finished = outcome
            .wait_for(Option::is_some)
            .await
            .map(|outcome| (*outcome).clone());
        match finished {
            Ok(Some(result)) => result,
            Ok(None) | Err(_) => Err(SessionError::InitFailed(
                "initialization attempt was abandoned".to_string(),
            )),
        }
    }

    /// Shuts the SDK down and reverts to `NotConnected`.
    ///
    /// A pending initialization fails the same way it would if the transport
    /// itself had shut down.  Late events from the torn-down attempt are
    /// ignored.
    pub fn teardown(&self) {
        let previous = {
            let mut inner = self.shared.lock();
            let previous = inner.state;
            if previous == SessionState::Initializing {
                self.shared.finish(
                    &mut inner,
                    SessionState::NotConnected,
                    Err(SessionError::InitFailed(SHUTDOWN_DURING_INIT.to_string())),
                );
            } else {
                self.shared.set_state(&mut inner, SessionState::NotConnected);
            }
            inner.attempt += 1;
            inner.outcome = None;
            previous
        };

        if previous != SessionState::NotConnected {
            info!(?previous, "tearing down vendor transport session");
            self.transport.shutdown();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
