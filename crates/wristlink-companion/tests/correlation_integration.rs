//! Integration tests for request/response correlation.
//!
//! These tests drive the `Correlator` through its public API against the
//! in-memory `SimulatedTransport`, the same way the binary wires it up.  They
//! cover the orderings a real vendor SDK produces:
//!
//! - the reply arriving before the delivery callback,
//! - a reply arriving during the warm-up delay, before anything was sent,
//! - unrelated traffic arriving ahead of the expected reply,
//! - a reply landing exactly at the end of the warm-up delay,
//! - cancellation by deadline or by the caller dropping the query.
//!
//! After every scenario the transport must be left with no inbound
//! listeners registered.
//!
//! All tests run on a paused Tokio clock, so the five-minute response
//! timeout completes instantly.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{sleep, timeout, Instant};

use wristlink_companion::application::app_gate::{AppReadinessGate, DEFAULT_STEP_TIMEOUT};
use wristlink_companion::application::correlator::{
    Correlator, FailureClass, QueryError, QueryTimings, SendError,
};
use wristlink_companion::application::device_registry::{DeviceRegistry, DEFAULT_POLL_INTERVAL};
use wristlink_companion::application::session::{SessionError, SessionManager, SessionState};
use wristlink_companion::application::transport::{
    InboundMessage, InitErrorKind, MessageStatus, SdkEvent, VendorTransport,
};
use wristlink_companion::infrastructure::transport::simulated::{Script, SimulatedTransport};
use wristlink_core::protocol::messages::{DeviceInfo, Pong, RouteLoaded};
use wristlink_core::{
    encode_command, encode_response, Command, CommandType, DeviceId, Response, ResponseType, Value,
};

const APP: &str = "a3421feed289106a538cb9547ab12095";
const WATCH: DeviceId = DeviceId(3_316_781_058);

struct Harness {
    sim: Arc<SimulatedTransport>,
    session: Arc<SessionManager>,
    correlator: Correlator,
}

fn harness() -> Harness {
    let sim = Arc::new(SimulatedTransport::new());
    let transport: Arc<dyn VendorTransport> = sim.clone();
    let session = Arc::new(SessionManager::new(Arc::clone(&transport)));
    let gate = AppReadinessGate::new(
        Arc::clone(&transport),
        Arc::clone(&session),
        APP,
        DEFAULT_STEP_TIMEOUT,
    );
    let registry = DeviceRegistry::new(Arc::clone(&transport), DEFAULT_POLL_INTERVAL);
    let correlator = Correlator::new(
        transport,
        Arc::clone(&session),
        gate,
        registry,
        QueryTimings::default(),
    );
    Harness {
        sim,
        session,
        correlator,
    }
}

fn pong(token: i64) -> Vec<Value> {
    encode_response(&Response::Pong(Pong { token }))
}

fn device_info() -> Vec<Value> {
    encode_response(&Response::DeviceInfo(DeviceInfo {
        protocol_version: 1,
        app_version: "1.4.0".to_string(),
        screen_width: 260,
        screen_height: 260,
    }))
}

// ── Ordering ──────────────────────────────────────────────────────────────────

/// The SDK may deliver the watch's reply before it reports the send as
/// delivered.  The query must still resolve, and exactly once.
#[tokio::test(start_paused = true)]
async fn test_reply_before_delivery_callback_resolves_once() {
    // Arrange
    let h = harness();
    h.sim
        .script_reply_before_delivery(CommandType::Ping, vec![pong(4), pong(4)]);

    // Act
    let result = h
        .correlator
        .query(WATCH, Command::Ping { token: 4 }, ResponseType::Pong)
        .await;

    // Assert
    assert_eq!(result, Ok(Response::Pong(Pong { token: 4 })));
    assert_eq!(h.sim.sent_payloads().len(), 1);
    assert_eq!(h.sim.inbound_listener_count(WATCH), 0);
}

/// A reply held while the delivery callback is slow is returned once the
/// delivery succeeds.
#[tokio::test(start_paused = true)]
async fn test_early_reply_is_returned_after_slow_delivery() {
    // Arrange
    let h = harness();
    let delivery = Duration::from_secs(2);
    h.sim
        .set_delivery(Script::After(delivery, MessageStatus::Success));
    h.sim
        .script_reply_before_delivery(CommandType::Ping, vec![pong(8)]);
    let start = Instant::now();

    // Act
    let result = h
        .correlator
        .query(WATCH, Command::Ping { token: 8 }, ResponseType::Pong)
        .await;

    // Assert
    assert_eq!(result, Ok(Response::Pong(Pong { token: 8 })));
    assert!(start.elapsed() >= h.correlator.timings().warmup + delivery);
    assert_eq!(h.sim.sent_payloads().len(), 1);
    assert_eq!(h.sim.inbound_listener_count(WATCH), 0);
}

/// A failed delivery fails the query even when a reply was already seen.
#[tokio::test(start_paused = true)]
async fn test_delivery_failure_wins_over_early_reply() {
    let h = harness();
    h.sim.set_delivery(Script::After(
        Duration::from_secs(2),
        MessageStatus::TransportFailure,
    ));
    h.sim
        .script_reply_before_delivery(CommandType::Ping, vec![pong(5)]);

    let result = h
        .correlator
        .query(WATCH, Command::Ping { token: 5 }, ResponseType::Pong)
        .await;

    assert_eq!(
        result,
        Err(QueryError::Send(SendError::DeliveryFailed(
            MessageStatus::TransportFailure
        )))
    );
    assert_eq!(h.sim.inbound_listener_count(WATCH), 0);
}

/// A matching message that shows up while the command is still waiting out
/// the warm-up delay does not stand in for sending it.
#[tokio::test(start_paused = true)]
async fn test_reply_during_warmup_still_sends_the_command() {
    // Arrange
    let h = harness();
    let route_loaded = encode_response(&Response::RouteLoaded(RouteLoaded { route_id: 6 }));

    // Act
    let (result, delivered) = tokio::join!(
        h.correlator.query(
            WATCH,
            Command::LoadRoute {
                route_id: 6,
                route: vec![0x5a; 64],
            },
            ResponseType::RouteLoaded,
        ),
        async {
            sleep(Duration::from_millis(100)).await;
            let delivered = h.sim.emit_inbound(WATCH, InboundMessage::ok(route_loaded));
            (delivered, h.sim.sent_payloads().len())
        }
    );

    // Assert
    assert_eq!(delivered, (1, 0));
    assert_eq!(
        result,
        Ok(Response::RouteLoaded(RouteLoaded { route_id: 6 }))
    );
    let sent = h.sim.sent_payloads();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, WATCH);
    assert_eq!(
        sent[0].1,
        encode_command(&Command::LoadRoute {
            route_id: 6,
            route: vec![0x5a; 64],
        })
    );
    assert_eq!(h.sim.inbound_listener_count(WATCH), 0);
}

/// Replies of other types are skipped until the expected one arrives.
#[tokio::test(start_paused = true)]
async fn test_unrelated_reply_is_skipped() {
    // Arrange
    let h = harness();
    h.sim
        .script_reply(CommandType::Ping, vec![device_info(), pong(2)]);

    // Act
    let result = h
        .correlator
        .query(WATCH, Command::Ping { token: 2 }, ResponseType::Pong)
        .await;

    // Assert
    assert_eq!(result, Ok(Response::Pong(Pong { token: 2 })));
}

/// Traffic from another device never resolves a query.
#[tokio::test(start_paused = true)]
async fn test_reply_from_another_device_is_not_matched() {
    let h = harness();
    let other = DeviceId(1_092_004_117);
    h.sim.set_delivery(Script::Never);

    let (result, delivered) = tokio::join!(
        timeout(
            Duration::from_secs(60),
            h.correlator
                .query(WATCH, Command::Ping { token: 1 }, ResponseType::Pong),
        ),
        async {
            sleep(Duration::from_secs(1)).await;
            h.sim.emit_inbound(other, InboundMessage::ok(pong(1)))
        }
    );

    assert!(result.is_err(), "query must still be waiting");
    assert_eq!(delivered, 0);
    assert_eq!(h.sim.inbound_listener_count(WATCH), 0);
}

/// A reply that lands exactly as the warm-up delay ends is still matched,
/// whichever of the two timers fires first.
#[tokio::test(start_paused = true)]
async fn test_reply_at_warmup_boundary_is_matched() {
    // Arrange
    let h = harness();
    let warmup = h.correlator.timings().warmup;

    // Act
    let (result, delivered) = tokio::join!(
        h.correlator
            .query(WATCH, Command::Ping { token: 3 }, ResponseType::Pong),
        async {
            sleep(warmup).await;
            h.sim.emit_inbound(WATCH, InboundMessage::ok(pong(3)))
        }
    );

    // Assert
    assert_eq!(delivered, 1);
    assert_eq!(result, Ok(Response::Pong(Pong { token: 3 })));
    assert_eq!(h.sim.inbound_listener_count(WATCH), 0);
}

// ── Failures ──────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_malformed_reply_fails_with_decode_error() {
    // Arrange
    let h = harness();
    h.sim.script_reply(
        CommandType::Ping,
        vec![vec![Value::Text("garbage".to_string())]],
    );

    // Act
    let result = h
        .correlator
        .query(WATCH, Command::Ping { token: 1 }, ResponseType::Pong)
        .await;

    // Assert
    let err = result.expect_err("malformed reply must fail");
    assert!(matches!(err, QueryError::Decode(_)), "got {err:?}");
    assert_eq!(err.class(), FailureClass::ProtocolMismatch);
    assert_eq!(h.sim.inbound_listener_count(WATCH), 0);
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_hits_the_deadline() {
    // Arrange
    let h = harness();
    let deadline = h.correlator.timings().query_deadline();
    let start = Instant::now();

    // Act
    let result = h
        .correlator
        .query(WATCH, Command::RequestDeviceInfo, ResponseType::DeviceInfo)
        .await;

    // Assert
    assert_eq!(result, Err(QueryError::Timeout));
    assert!(start.elapsed() >= deadline);
    assert_eq!(h.sim.inbound_listener_count(WATCH), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_delivery_fails_the_query() {
    let h = harness();
    h.sim
        .set_delivery(Script::Once(MessageStatus::DeviceUnavailable));

    let result = h
        .correlator
        .query(WATCH, Command::Ping { token: 1 }, ResponseType::Pong)
        .await;

    assert_eq!(
        result,
        Err(QueryError::Send(SendError::DeliveryFailed(
            MessageStatus::DeviceUnavailable
        )))
    );
    assert_eq!(h.sim.inbound_listener_count(WATCH), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_vendor_service_is_classified_as_install() {
    // Arrange
    let h = harness();
    h.sim.set_init(Script::Once(SdkEvent::InitializeError(
        InitErrorKind::ServiceNotInstalled,
    )));

    // Act
    let result = h
        .correlator
        .query(WATCH, Command::Ping { token: 1 }, ResponseType::Pong)
        .await;

    // Assert
    assert_eq!(result, Err(QueryError::Session(SessionError::NeedsInstall)));
    assert_eq!(
        result.unwrap_err().class(),
        FailureClass::InstallRequired
    );
    assert!(h.sim.sent_payloads().is_empty());
}

// ── Cancellation ──────────────────────────────────────────────────────────────

/// Dropping an in-flight query releases its listener and its device slot.
#[tokio::test(start_paused = true)]
async fn test_dropped_query_releases_listener_and_slot() {
    // Arrange
    let h = harness();
    h.sim.set_delivery(Script::Never);

    // Act: give up on the query after a few seconds.
    let abandoned = timeout(
        Duration::from_secs(5),
        h.correlator
            .query(WATCH, Command::Ping { token: 1 }, ResponseType::Pong),
    )
    .await;

    // Assert
    assert!(abandoned.is_err());
    assert_eq!(h.sim.inbound_listener_count(WATCH), 0);

    h.sim.set_delivery(Script::Once(MessageStatus::Success));
    h.sim.script_reply(CommandType::Ping, vec![pong(2)]);
    let next = h
        .correlator
        .query(WATCH, Command::Ping { token: 2 }, ResponseType::Pong)
        .await;
    assert_eq!(next, Ok(Response::Pong(Pong { token: 2 })));
}

/// A second query to the same device while one is pending is rejected.
#[tokio::test(start_paused = true)]
async fn test_concurrent_query_to_same_device_is_busy() {
    let h = harness();
    h.sim.script_reply(CommandType::Ping, vec![pong(1)]);

    let (first, second) = tokio::join!(
        h.correlator
            .query(WATCH, Command::Ping { token: 1 }, ResponseType::Pong),
        h.correlator
            .query(WATCH, Command::Ping { token: 2 }, ResponseType::Pong),
    );

    assert_eq!(first, Ok(Response::Pong(Pong { token: 1 })));
    assert_eq!(second, Err(QueryError::Busy(WATCH)));
    assert_eq!(second.unwrap_err().class(), FailureClass::DeviceBusy);
}

// ── Send ──────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_send_resolves_once_on_duplicate_delivery_callbacks() {
    let h = harness();
    h.sim.set_delivery(Script::Twice(
        MessageStatus::Success,
        MessageStatus::TransportFailure,
    ));

    let result = h.correlator.send(WATCH, Command::ClearRoutes).await;

    assert_eq!(result, Ok(()));
    assert_eq!(h.sim.sent_payloads().len(), 1);
}

// ── Session sharing ───────────────────────────────────────────────────────────

/// Concurrent first callers share one SDK initialization.
#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_initialization() {
    // Arrange
    let h = harness();
    h.sim
        .set_init(Script::After(Duration::from_secs(1), SdkEvent::Ready));

    // Act
    let mut callers = JoinSet::new();
    for _ in 0..5 {
        let session = Arc::clone(&h.session);
        callers.spawn(async move { session.ensure_ready().await });
    }
    let mut results = Vec::new();
    while let Some(joined) = callers.join_next().await {
        results.push(joined.expect("caller task panicked"));
    }

    // Assert
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(h.sim.initialize_calls(), 1);
    assert_eq!(h.session.state(), SessionState::Ready);
}
