//! End-to-end tracking scenarios.
//!
//! These tests run a small in-process WebSocket server (auth ack, room
//! joins, scripted pushes, forced closes) plus scripted order fetchers,
//! so every scenario is hermetic: no external daemon required.
//!
//! Run with:
//! ```bash
//! cargo test --test tracking_scenarios
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

use courier_link::{
    CourierLinkClient, CourierLinkError, CourierLinkTimeouts, MemoryCredentialStore, OrderFetcher,
    OrderSnapshot, OrderStatus, ReconnectPolicy, Result, TrackingHandlers, TrackingMode,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone, Debug)]
enum ServerOp {
    Send(Value),
    /// Close every live connection; the listener keeps accepting.
    Close,
    /// Close connections and stop accepting new ones.
    Shutdown,
    /// Keep live sockets open but stop servicing them; pings go
    /// unanswered from here on. New connections behave normally.
    Stall,
}

/// Accepts connections, answers the auth handshake, replies to pings,
/// and relays scripted operations to every live connection.
async fn spawn_server() -> (String, broadcast::Sender<ServerOp>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (ops_tx, _) = broadcast::channel::<ServerOp>(64);

    let ops = ops_tx.clone();
    tokio::spawn(async move {
        let mut accept_ops = ops.subscribe();
        loop {
            let stream = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(_) => return,
                },
                op = accept_ops.recv() => match op {
                    Ok(ServerOp::Shutdown) | Err(broadcast::error::RecvError::Closed) => return,
                    _ => continue,
                },
            };
            let mut ops_rx = ops.subscribe();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                loop {
                    tokio::select! {
                        op = ops_rx.recv() => match op {
                            Ok(ServerOp::Send(value)) => {
                                if ws
                                    .send(Message::Text(value.to_string().into()))
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                            Ok(ServerOp::Close) | Ok(ServerOp::Shutdown) => {
                                let _ = ws.close(None).await;
                                return;
                            }
                            Ok(ServerOp::Stall) => loop {
                                match ops_rx.recv().await {
                                    Ok(ServerOp::Close) | Ok(ServerOp::Shutdown) | Err(_) => {
                                        let _ = ws.close(None).await;
                                        return;
                                    }
                                    _ => {}
                                }
                            },
                            Err(_) => return,
                        },
                        frame = ws.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                let value: Value = serde_json::from_str(text.as_str())
                                    .unwrap_or(Value::Null);
                                if value["type"] == "authenticate" {
                                    let ack = json!({
                                        "type": "auth_success",
                                        "session_id": "test-session",
                                    });
                                    if ws
                                        .send(Message::Text(ack.to_string().into()))
                                        .await
                                        .is_err()
                                    {
                                        return;
                                    }
                                }
                                // join_room / leave_room need no reply.
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = ws.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                            _ => {}
                        },
                    }
                }
            });
        }
    });

    (format!("ws://{}", addr), ops_tx)
}

fn room_status(order_id: &str, status: &str) -> ServerOp {
    ServerOp::Send(json!({
        "type": "room_event",
        "room": format!("order:{}", order_id),
        "event": "status_update",
        "data": {"status": status},
    }))
}

/// Counts calls and always fails; for scenarios where polling must
/// never start.
struct CountingFetcher {
    calls: AtomicUsize,
}

impl CountingFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl OrderFetcher for CountingFetcher {
    async fn fetch_order(&self, _order_id: &str) -> Result<OrderSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CourierLinkError::Fetch("should not be polling".to_string()))
    }
}

/// Serves a fixed snapshot that tests can swap at runtime.
struct SwappableFetcher {
    current: Mutex<OrderSnapshot>,
    calls: AtomicUsize,
}

impl SwappableFetcher {
    fn new(status: &str) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(snapshot(status)),
            calls: AtomicUsize::new(0),
        })
    }

    fn set_status(&self, status: &str) {
        *self.current.lock().unwrap() = snapshot(status);
    }
}

#[async_trait]
impl OrderFetcher for SwappableFetcher {
    async fn fetch_order(&self, _order_id: &str) -> Result<OrderSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.current.lock().unwrap().clone())
    }
}

fn snapshot(status: &str) -> OrderSnapshot {
    OrderSnapshot {
        status: status.to_string(),
        driver: None,
        driver_location: None,
        estimated_delivery_minutes: None,
        message: None,
    }
}

struct Observed {
    statuses: Mutex<Vec<OrderStatus>>,
    modes: Mutex<Vec<TrackingMode>>,
}

impl Observed {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(Vec::new()),
            modes: Mutex::new(Vec::new()),
        })
    }

    fn handlers(self: &Arc<Self>) -> TrackingHandlers {
        let statuses = Arc::clone(self);
        let modes = Arc::clone(self);
        TrackingHandlers::new()
            .on_status_update(move |update| {
                statuses.statuses.lock().unwrap().push(update.status);
            })
            .on_mode_change(move |mode| {
                modes.modes.lock().unwrap().push(mode);
            })
    }

    fn statuses(&self) -> Vec<OrderStatus> {
        self.statuses.lock().unwrap().clone()
    }

    fn modes(&self) -> Vec<TrackingMode> {
        self.modes.lock().unwrap().clone()
    }
}

fn build_client(
    ws_url: &str,
    fetcher: Arc<dyn OrderFetcher>,
    handlers: TrackingHandlers,
) -> CourierLinkClient {
    build_client_with_timeouts(ws_url, fetcher, handlers, CourierLinkTimeouts::for_testing())
}

fn build_client_with_timeouts(
    ws_url: &str,
    fetcher: Arc<dyn OrderFetcher>,
    handlers: TrackingHandlers,
    timeouts: CourierLinkTimeouts,
) -> CourierLinkClient {
    init_logging();
    CourierLinkClient::builder()
        .base_url("http://127.0.0.1:1")
        .ws_url(ws_url)
        .credential_store(Arc::new(MemoryCredentialStore::with_credential(
            "auth_token",
            "test-token",
        )))
        .timeouts(timeouts)
        .reconnect_policy(
            ReconnectPolicy::new()
                .with_base_delay_ms(20)
                .with_max_delay_ms(100)
                .with_max_attempts(None),
        )
        .handlers(handlers)
        .fetcher(fetcher)
        .build()
        .unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_realtime_happy_path_never_polls() {
    let (ws_url, ops) = spawn_server().await;
    let observed = Observed::new();
    let fetcher = CountingFetcher::new();
    let client = build_client(&ws_url, fetcher.clone(), observed.handlers());

    let session = client.track_order("42").await.unwrap();
    assert!(
        wait_until(|| session.mode() == TrackingMode::Realtime, Duration::from_secs(2)).await,
        "channel should come up within the guard window"
    );

    ops.send(room_status("42", "preparing")).unwrap();
    ops.send(room_status("42", "preparing")).unwrap();
    ops.send(room_status("42", "ready")).unwrap();

    assert!(
        wait_until(
            || observed.statuses() == vec![OrderStatus::Preparing, OrderStatus::Ready],
            Duration::from_secs(2)
        )
        .await,
        "expected deduplicated preparing -> ready, got {:?}",
        observed.statuses()
    );
    assert_eq!(session.mode(), TrackingMode::Realtime);
    assert_eq!(
        fetcher.calls.load(Ordering::SeqCst),
        0,
        "poller must not run while realtime is healthy"
    );

    session.stop_tracking();
}

#[tokio::test]
async fn test_unreachable_server_falls_back_to_polling() {
    let observed = Observed::new();
    let fetcher = SwappableFetcher::new("pending");
    let client = build_client("ws://127.0.0.1:1", fetcher.clone(), observed.handlers());

    let session = client.track_order("42").await.unwrap();
    assert!(
        wait_until(|| session.mode() == TrackingMode::Polling, Duration::from_secs(2)).await,
        "guard timer should activate polling"
    );
    assert!(
        wait_until(
            || session.last_known_status() == Some(OrderStatus::Pending),
            Duration::from_secs(2)
        )
        .await
    );
    assert!(fetcher.calls.load(Ordering::SeqCst) >= 1);

    session.stop_tracking();
}

#[tokio::test]
async fn test_connection_drop_switches_to_polling_then_back() {
    let (ws_url, ops) = spawn_server().await;
    let observed = Observed::new();
    let fetcher = SwappableFetcher::new("preparing");
    let client = build_client(&ws_url, fetcher.clone(), observed.handlers());

    let session = client.track_order("42").await.unwrap();
    assert!(wait_until(|| session.mode() == TrackingMode::Realtime, Duration::from_secs(2)).await);

    // Kill every live connection; the session must cover the gap. The
    // polling window can be short (the channel reconnects quickly), so
    // check the recorded mode history rather than sampling.
    ops.send(ServerOp::Close).unwrap();
    assert!(
        wait_until(
            || observed.modes().contains(&TrackingMode::Polling),
            Duration::from_secs(2)
        )
        .await,
        "disconnect should flip the session to polling"
    );

    // The channel keeps reconnecting; once it succeeds the poller stops.
    assert!(
        wait_until(|| session.mode() == TrackingMode::Realtime, Duration::from_secs(3)).await,
        "reconnect should flip the session back to realtime"
    );

    // Pushed events flow again after the reconnect.
    ops.send(room_status("42", "ready")).unwrap();
    assert!(
        wait_until(
            || session.last_known_status() == Some(OrderStatus::Ready),
            Duration::from_secs(2)
        )
        .await
    );

    session.stop_tracking();
}

#[tokio::test]
async fn test_silent_connection_is_detected_and_covered_by_polling() {
    let (ws_url, ops) = spawn_server().await;
    let observed = Observed::new();
    let fetcher = SwappableFetcher::new("preparing");
    let client = build_client_with_timeouts(
        &ws_url,
        fetcher.clone(),
        observed.handlers(),
        CourierLinkTimeouts::for_testing()
            .with_heartbeat_interval(Duration::from_millis(100))
            .with_heartbeat_timeout(Duration::from_millis(100)),
    );

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&reasons);
    client.bus().subscribe("disconnect", move |payload| {
        r.lock()
            .unwrap()
            .push(payload["reason"].as_str().unwrap_or("").to_string());
    });

    let session = client.track_order("42").await.unwrap();
    assert!(wait_until(|| session.mode() == TrackingMode::Realtime, Duration::from_secs(2)).await);

    // The server keeps the socket open but stops answering pings; a
    // missed pong must count as a disconnect, not hang forever.
    ops.send(ServerOp::Stall).unwrap();
    assert!(
        wait_until(
            || reasons.lock().unwrap().iter().any(|r| r == "heartbeat timeout"),
            Duration::from_secs(3)
        )
        .await,
        "stalled connection should be torn down, got {:?}",
        reasons.lock().unwrap()
    );
    assert!(
        wait_until(
            || observed.modes().contains(&TrackingMode::Polling),
            Duration::from_secs(2)
        )
        .await,
        "session should cover the stall with polling"
    );

    session.stop_tracking();
}

#[tokio::test]
async fn test_same_status_from_both_paths_emits_once() {
    let (ws_url, ops) = spawn_server().await;
    let observed = Observed::new();
    let fetcher = SwappableFetcher::new("preparing");
    let client = build_client(&ws_url, fetcher.clone(), observed.handlers());

    let session = client.track_order("42").await.unwrap();
    assert!(wait_until(|| session.mode() == TrackingMode::Realtime, Duration::from_secs(2)).await);

    // Realtime delivers "preparing" first...
    ops.send(room_status("42", "preparing")).unwrap();
    assert!(
        wait_until(
            || session.last_known_status() == Some(OrderStatus::Preparing),
            Duration::from_secs(2)
        )
        .await
    );

    // ...then the server goes away for good and the poller sees the
    // same state. Shutdown stops the listener so reconnects keep
    // failing and the session stays on polling.
    ops.send(ServerOp::Shutdown).unwrap();
    assert!(wait_until(|| session.mode() == TrackingMode::Polling, Duration::from_secs(2)).await);
    assert!(wait_until(|| fetcher.calls.load(Ordering::SeqCst) >= 2, Duration::from_secs(2)).await);
    assert_eq!(observed.statuses(), vec![OrderStatus::Preparing]);

    // A real change through the poll path still gets through.
    fetcher.set_status("picked_up");
    assert!(
        wait_until(
            || session.last_known_status() == Some(OrderStatus::PickedUp),
            Duration::from_secs(2)
        )
        .await
    );
    assert_eq!(
        observed.statuses(),
        vec![OrderStatus::Preparing, OrderStatus::PickedUp]
    );

    session.stop_tracking();
}

#[tokio::test]
async fn test_terminal_status_survives_late_pushes() {
    let (ws_url, ops) = spawn_server().await;
    let observed = Observed::new();
    let fetcher = CountingFetcher::new();
    let client = build_client(&ws_url, fetcher, observed.handlers());

    let session = client.track_order("42").await.unwrap();
    assert!(wait_until(|| session.mode() == TrackingMode::Realtime, Duration::from_secs(2)).await);

    ops.send(room_status("42", "delivered")).unwrap();
    assert!(
        wait_until(
            || session.last_known_status() == Some(OrderStatus::Delivered),
            Duration::from_secs(2)
        )
        .await
    );

    // Late frames after the terminal state change nothing.
    ops.send(room_status("42", "picked_up")).unwrap();
    ops.send(room_status("42", "cancelled")).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(session.last_known_status(), Some(OrderStatus::Delivered));
    assert_eq!(observed.statuses(), vec![OrderStatus::Delivered]);

    session.stop_tracking();
}

#[tokio::test]
async fn test_events_for_other_orders_are_ignored() {
    let (ws_url, ops) = spawn_server().await;
    let observed = Observed::new();
    let fetcher = CountingFetcher::new();
    let client = build_client(&ws_url, fetcher, observed.handlers());

    let session = client.track_order("42").await.unwrap();
    assert!(wait_until(|| session.mode() == TrackingMode::Realtime, Duration::from_secs(2)).await);

    ops.send(room_status("99", "delivered")).unwrap();
    ops.send(room_status("42", "accepted")).unwrap();
    assert!(
        wait_until(
            || session.last_known_status() == Some(OrderStatus::Accepted),
            Duration::from_secs(2)
        )
        .await
    );
    assert_eq!(observed.statuses(), vec![OrderStatus::Accepted]);

    session.stop_tracking();
}

#[tokio::test]
async fn test_legacy_flat_frames_are_normalized() {
    let (ws_url, ops) = spawn_server().await;
    let observed = Observed::new();
    let fetcher = CountingFetcher::new();
    let client = build_client(&ws_url, fetcher, observed.handlers());

    let locations = Arc::new(Mutex::new(Vec::new()));
    let l = Arc::clone(&locations);
    let bus = client.bus();
    bus.subscribe("driver:location_update", move |payload| {
        l.lock()
            .unwrap()
            .push((payload["latitude"].as_f64(), payload["longitude"].as_f64()));
    });

    let session = client.track_order("42").await.unwrap();
    assert!(wait_until(|| session.mode() == TrackingMode::Realtime, Duration::from_secs(2)).await);

    // Old-generation frames: camelCase names, flat payloads, both
    // location encodings.
    ops.send(ServerOp::Send(json!({
        "type": "orderStatusUpdated", "orderId": "42", "status": "picked_up"
    })))
    .unwrap();
    ops.send(ServerOp::Send(json!({
        "type": "driverLocationUpdate", "orderId": "42", "lat": 9.03, "lng": 38.75
    })))
    .unwrap();
    ops.send(ServerOp::Send(json!({
        "type": "room_event", "room": "order:42", "event": "location_update",
        "data": {"coordinates": [38.76, 9.04]}
    })))
    .unwrap();

    assert!(
        wait_until(|| locations.lock().unwrap().len() == 2, Duration::from_secs(2)).await,
        "both location encodings should normalize and publish"
    );
    assert_eq!(observed.statuses(), vec![OrderStatus::PickedUp]);
    assert_eq!(
        *locations.lock().unwrap(),
        vec![
            (Some(9.03), Some(38.75)),
            (Some(9.04), Some(38.76)),
        ]
    );

    session.stop_tracking();
}

#[tokio::test]
async fn test_stop_tracking_keeps_shared_channel_alive() {
    let (ws_url, ops) = spawn_server().await;
    let fetcher = CountingFetcher::new();
    let client = build_client(&ws_url, fetcher, TrackingHandlers::new());

    let first = client.track_order("42").await.unwrap();
    let second = client.track_order("43").await.unwrap();
    assert!(wait_until(|| first.mode() == TrackingMode::Realtime, Duration::from_secs(2)).await);
    assert!(wait_until(|| second.mode() == TrackingMode::Realtime, Duration::from_secs(2)).await);

    first.stop_tracking();
    assert!(client.channel().is_connected());

    // The surviving session still receives pushes.
    ops.send(room_status("43", "ready")).unwrap();
    assert!(
        wait_until(
            || second.last_known_status() == Some(OrderStatus::Ready),
            Duration::from_secs(2)
        )
        .await
    );

    second.stop_tracking();
    client.shutdown().await.unwrap();
}
