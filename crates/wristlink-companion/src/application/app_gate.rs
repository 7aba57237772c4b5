//! AppReadinessGate: make sure the watch app is installed and in front.
//!
//! A watch only answers commands while the companion watch app is running.
//! Before a query the gate asks the vendor SDK whether the app is installed
//! and then asks the device to open it.  Both steps are single-shot vendor
//! callbacks that may fire more than once, so each is wrapped in a
//! [`ResolveOnce`] and bounded by a step timeout.
//!
//! The gate is best-effort: the correlator logs its failures and carries on,
//! because some firmware reports ambiguous statuses for an app that is in
//! fact running.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info};
use wristlink_core::DeviceId;

use super::resolve_once::ResolveOnce;
use super::session::{SessionError, SessionManager};
use super::transport::{AppInfo, AppInfoError, OpenAppStatus, VendorTransport};

/// Default bound for each gate step.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// The gate step that timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStep {
    AppInfo,
    OpenApp,
}

impl fmt::Display for GateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateStep::AppInfo => f.write_str("app info"),
            GateStep::OpenApp => f.write_str("open app"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("watch app is not installed")]
    NotInstalled,
    #[error("app info query failed: {0}")]
    AppInfoFailed(String),
    #[error("device refused to open the watch app: {0:?}")]
    OpenFailed(OpenAppStatus),
    #[error("{0} step timed out")]
    Timeout(GateStep),
    /// The transport dropped a callback without ever invoking it.
    #[error("transport abandoned the gate callback")]
    Transport,
    #[error(transparent)]
    Session(#[from] SessionError),
}

pub struct AppReadinessGate {
    transport: Arc<dyn VendorTransport>,
    session: Arc<SessionManager>,
    app_id: String,
    step_timeout: Duration,
}

impl AppReadinessGate {
    pub fn new(
        transport: Arc<dyn VendorTransport>,
        session: Arc<SessionManager>,
        app_id: impl Into<String>,
        step_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            session,
            app_id: app_id.into(),
            step_timeout,
        }
    }

    /// The watch app this gate prepares.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Checks that the watch app is installed on `device`, then asks the
    /// device to open it.
    ///
    /// # Errors
    ///
    /// See [`GateError`].  Callers are expected to treat every error as a
    /// warning.
    pub async fn prepare(&self, device: DeviceId) -> Result<(), GateError> {
        self.session.ensure_ready().await?;
        let info = self.app_info(device).await?;
        debug!(device = %device, version = info.version, "watch app installed");
        let status = self.open_app(device).await?;
        info!(device = %device, ?status, "watch app opened");
        Ok(())
    }

    async fn app_info(&self, device: DeviceId) -> Result<AppInfo, GateError> {
        let (resolver, rx) = ResolveOnce::new();
        self.transport.get_app_info(
            device,
            &self.app_id,
            Box::new(move |result| {
                if !resolver.resolve(result) {
                    debug!("ignoring duplicate app info callback");
                }
            }),
        );

        match timeout(self.step_timeout, rx).await {
            Err(_) => Err(GateError::Timeout(GateStep::AppInfo)),
            Ok(Err(_)) => Err(GateError::Transport),
            Ok(Ok(Ok(info))) => Ok(info),
            Ok(Ok(Err(AppInfoError::NotInstalled))) => Err(GateError::NotInstalled),
            Ok(Ok(Err(AppInfoError::Failed(reason)))) => Err(GateError::AppInfoFailed(reason)),
        }
    }

    async fn open_app(&self, device: DeviceId) -> Result<OpenAppStatus, GateError> {
        let (resolver, rx) = ResolveOnce::new();
        self.transport.open_app(
            device,
            &self.app_id,
            Box::new(move |status| {
                if !resolver.resolve(status) {
                    debug!(?status, "ignoring duplicate open app callback");
                }
            }),
        );

        match timeout(self.step_timeout, rx).await {
            Err(_) => Err(GateError::Timeout(GateStep::OpenApp)),
            Ok(Err(_)) => Err(GateError::Transport),
            Ok(Ok(status)) if status.is_success() => Ok(status),
            Ok(Ok(status)) => Err(GateError::OpenFailed(status)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::application::transport::{
        InitErrorKind, MockVendorTransport, OpenAppCallback, SdkEvent,
    };

    const APP: &str = "a3421feed289106a538cb9547ab12095";

    fn installed() -> AppInfo {
        AppInfo {
            app_id: APP.to_string(),
            version: 12,
        }
    }

    /// A mock whose SDK initializes immediately.
    fn ready_mock() -> MockVendorTransport {
        let mut mock = MockVendorTransport::new();
        mock.expect_initialize()
            .returning(|listener| listener(SdkEvent::Ready));
        mock
    }

    fn gate(mock: MockVendorTransport) -> AppReadinessGate {
        let transport: Arc<dyn VendorTransport> = Arc::new(mock);
        let session = Arc::new(SessionManager::new(Arc::clone(&transport)));
        AppReadinessGate::new(transport, session, APP, DEFAULT_STEP_TIMEOUT)
    }

    #[tokio::test]
    async fn test_prepare_succeeds_when_installed_and_opened() {
        // Arrange
        let mut mock = ready_mock();
        mock.expect_get_app_info()
            .withf(|_, app_id, _| app_id.to_string() == APP)
            .times(1)
            .returning(|_, _, cb| cb(Ok(installed())));
        mock.expect_open_app()
            .times(1)
            .returning(|_, _, cb| cb(OpenAppStatus::PromptShown));

        // Act
        let result = gate(mock).prepare(DeviceId(1)).await;

        // Assert
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_already_open_app_counts_as_success() {
        let mut mock = ready_mock();
        mock.expect_get_app_info()
            .returning(|_, _, cb| cb(Ok(installed())));
        mock.expect_open_app()
            .returning(|_, _, cb| cb(OpenAppStatus::PromptNotShown));

        assert_eq!(gate(mock).prepare(DeviceId(1)).await, Ok(()));
    }

    #[tokio::test]
    async fn test_not_installed_stops_before_open() {
        let mut mock = ready_mock();
        mock.expect_get_app_info()
            .returning(|_, _, cb| cb(Err(AppInfoError::NotInstalled)));
        mock.expect_open_app().never();

        assert_eq!(
            gate(mock).prepare(DeviceId(1)).await,
            Err(GateError::NotInstalled)
        );
    }

    #[tokio::test]
    async fn test_other_app_info_failure_is_distinguished() {
        let mut mock = ready_mock();
        mock.expect_get_app_info()
            .returning(|_, _, cb| cb(Err(AppInfoError::Failed("busy".to_string()))));

        assert_eq!(
            gate(mock).prepare(DeviceId(1)).await,
            Err(GateError::AppInfoFailed("busy".to_string()))
        );
    }

    #[tokio::test]
    async fn test_duplicate_callbacks_resolve_on_the_first() {
        let mut mock = ready_mock();
        mock.expect_get_app_info().returning(|_, _, cb| {
            cb(Ok(installed()));
            cb(Err(AppInfoError::NotInstalled));
        });
        mock.expect_open_app().returning(|_, _, cb| {
            cb(OpenAppStatus::PromptShown);
            cb(OpenAppStatus::UnknownFailure);
            cb(OpenAppStatus::AppNotInstalled);
        });

        assert_eq!(gate(mock).prepare(DeviceId(1)).await, Ok(()));
    }

    #[tokio::test]
    async fn test_ambiguous_open_statuses_are_failures() {
        for status in [
            OpenAppStatus::AppNotInstalled,
            OpenAppStatus::AppAlreadyRunning,
            OpenAppStatus::UnknownFailure,
        ] {
            let mut mock = ready_mock();
            mock.expect_get_app_info()
                .returning(|_, _, cb| cb(Ok(installed())));
            mock.expect_open_app()
                .returning(move |_, _, cb| cb(status));

            assert_eq!(
                gate(mock).prepare(DeviceId(1)).await,
                Err(GateError::OpenFailed(status))
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_open_step_times_out() {
        // Arrange: keep the callback alive but never call it.
        let parked: Arc<Mutex<Vec<OpenAppCallback>>> = Arc::new(Mutex::new(Vec::new()));
        let keep = Arc::clone(&parked);
        let mut mock = ready_mock();
        mock.expect_get_app_info()
            .returning(|_, _, cb| cb(Ok(installed())));
        mock.expect_open_app()
            .returning(move |_, _, cb| keep.lock().unwrap().push(cb));

        // Act
        let result = gate(mock).prepare(DeviceId(1)).await;

        // Assert
        assert_eq!(result, Err(GateError::Timeout(GateStep::OpenApp)));
        assert_eq!(parked.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_callback_is_a_transport_error() {
        let mut mock = ready_mock();
        mock.expect_get_app_info().returning(|_, _, cb| drop(cb));

        assert_eq!(
            gate(mock).prepare(DeviceId(1)).await,
            Err(GateError::Transport)
        );
    }

    #[tokio::test]
    async fn test_session_failure_propagates() {
        let mut mock = MockVendorTransport::new();
        mock.expect_initialize().returning(|listener| {
            listener(SdkEvent::InitializeError(InitErrorKind::ServiceNotInstalled))
        });
        mock.expect_get_app_info().never();

        assert_eq!(
            gate(mock).prepare(DeviceId(1)).await,
            Err(GateError::Session(SessionError::NeedsInstall))
        );
    }
}
