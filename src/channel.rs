//! Realtime channel: one background task owning one WebSocket.
//!
//! The public [`RealtimeChannel`] handle talks to the task over a
//! command channel; connection state is exposed through a `watch` so
//! callers can await transitions without polling. The task multiplexes
//! commands, inbound frames, the heartbeat timer, and the pong
//! deadline in a single `select!` loop, reconnects with exponential
//! backoff, and re-joins every reference-counted room after each
//! successful reconnect.
//!
//! All inbound tracking frames are normalized (see
//! [`protocol`](crate::protocol)) and published on the
//! [`EventBus`](crate::EventBus); the channel itself holds no order
//! state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::bus::EventBus;
use crate::error::{CourierLinkError, Result};
use crate::events;
use crate::options::ReconnectPolicy;
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::timeouts::CourierLinkTimeouts;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Stand-in deadline for disabled timers.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365);

const CMD_CHANNEL_CAPACITY: usize = 64;

/// Connection lifecycle of the realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none in progress.
    Disconnected,
    /// Dialing, handshaking, or waiting out a backoff delay.
    Connecting,
    /// Handshake acknowledged; frames flow.
    Connected,
    /// Deliberate teardown in progress.
    Closing,
    /// Reconnect budget exhausted; nothing scheduled. Only an explicit
    /// `connect()` leaves this state.
    Failed,
}

/// Static configuration for one channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket endpoint, `ws://` or `wss://`.
    pub url: String,
    pub timeouts: CourierLinkTimeouts,
    pub reconnect: ReconnectPolicy,
}

enum ChannelCmd {
    Connect { token: String },
    Disconnect,
    JoinRoom { room: String },
    LeaveRoom { room: String },
    Shutdown,
}

/// Handle to the background connection task. Cheap operations; all
/// real work happens on the task.
pub struct RealtimeChannel {
    cmd_tx: mpsc::Sender<ChannelCmd>,
    state_rx: watch::Receiver<ConnectionState>,
    _task: JoinHandle<()>,
}

impl RealtimeChannel {
    /// Spawns the connection task. The channel starts disconnected and
    /// stays idle until [`connect`](Self::connect) is called.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ChannelConfig, bus: Arc<EventBus>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let task = tokio::spawn(channel_task(cmd_rx, state_tx, config, bus));
        Self {
            cmd_tx,
            state_rx,
            _task: task,
        }
    }

    /// Starts connecting with the given credential. Idempotent: while
    /// connecting or connected this only refreshes the stored
    /// credential. After the channel parked in `Failed`, this restarts
    /// the attempt budget.
    pub async fn connect(&self, credential: impl Into<String>) -> Result<()> {
        self.send_cmd(ChannelCmd::Connect {
            token: credential.into(),
        })
        .await
    }

    /// Closes the connection and cancels any pending reconnect.
    /// Safe to call at any time, in any state.
    pub async fn disconnect(&self) -> Result<()> {
        self.send_cmd(ChannelCmd::Disconnect).await
    }

    /// Joins a room (or bumps its reference count). The subscription
    /// survives reconnects; the task re-sends joins after each
    /// successful handshake.
    pub async fn join_room(&self, room: impl Into<String>) -> Result<()> {
        self.send_cmd(ChannelCmd::JoinRoom { room: room.into() }).await
    }

    /// Drops one reference to a room; the room is left on the wire
    /// when the count reaches zero.
    pub async fn leave_room(&self, room: impl Into<String>) -> Result<()> {
        self.send_cmd(ChannelCmd::LeaveRoom { room: room.into() }).await
    }

    /// Fire-and-forget leave for synchronous teardown paths. If the
    /// command queue is momentarily full the leave is retried from a
    /// spawned task so the room refcount cannot leak.
    pub(crate) fn leave_room_now(&self, room: &str) {
        let cmd = ChannelCmd::LeaveRoom {
            room: room.to_string(),
        };
        if let Err(mpsc::error::TrySendError::Full(cmd)) = self.cmd_tx.try_send(cmd) {
            let tx = self.cmd_tx.clone();
            tokio::spawn(async move {
                if tx.send(cmd).await.is_err() {
                    log::debug!("[courier-link] Channel task gone before room leave");
                }
            });
        }
    }

    /// Stops the background task permanently. Further commands fail.
    pub async fn shutdown(&self) -> Result<()> {
        self.send_cmd(ChannelCmd::Shutdown).await
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Waits up to `timeout` for the channel to reach `Connected`.
    /// Returns immediately with `true` if it already is.
    pub async fn check_connection(&self, timeout: Duration) -> bool {
        let mut rx = self.state_rx.clone();
        if *rx.borrow() == ConnectionState::Connected {
            return true;
        }
        tokio::time::timeout(timeout, async {
            while rx.changed().await.is_ok() {
                if *rx.borrow() == ConnectionState::Connected {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }

    async fn send_cmd(&self, cmd: ChannelCmd) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| CourierLinkError::Transport("channel task is not running".to_string()))
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        // Best effort; if the queue is full the task dies with the
        // runtime anyway.
        let _ = self.cmd_tx.try_send(ChannelCmd::Shutdown);
    }
}

fn decrement_room(rooms: &mut HashMap<String, usize>, room: &str) -> bool {
    if let Some(count) = rooms.get_mut(room) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            rooms.remove(room);
            return true;
        }
    }
    false
}

async fn send_msg(stream: &mut WsStream, msg: &ClientMessage) -> Result<()> {
    let payload = serde_json::to_string(msg)?;
    stream
        .send(Message::Text(payload.into()))
        .await
        .map_err(|e| CourierLinkError::Transport(format!("failed to send frame: {}", e)))
}

/// Dials, upgrades, and completes the authenticated handshake.
async fn establish(url: &str, token: &str, timeouts: &CourierLinkTimeouts) -> Result<WsStream> {
    let mut connect_url = url::Url::parse(url)
        .map_err(|e| CourierLinkError::Configuration(format!("invalid channel url: {}", e)))?;
    connect_url.query_pairs_mut().append_pair("token", token);

    let (mut stream, _response) =
        match tokio::time::timeout(timeouts.connect_timeout, connect_async(connect_url.to_string()))
            .await
        {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                return Err(CourierLinkError::Transport(format!(
                    "connection failed: {}",
                    e
                )))
            }
            Err(_) => {
                return Err(CourierLinkError::Timeout(format!(
                    "connect timed out after {:?}",
                    timeouts.connect_timeout
                )))
            }
        };

    send_msg(
        &mut stream,
        &ClientMessage::Authenticate {
            token: token.to_string(),
        },
    )
    .await?;
    wait_for_auth_ack(&mut stream, timeouts.handshake_timeout).await?;
    Ok(stream)
}

/// Waits for the auth ack, tolerating pings and early frames.
async fn wait_for_auth_ack(stream: &mut WsStream, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CourierLinkError::Timeout(format!(
                "no handshake ack within {:?}",
                timeout
            )));
        }
        let frame = match tokio::time::timeout(remaining, stream.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                return Err(CourierLinkError::Transport(format!(
                    "handshake failed: {}",
                    e
                )))
            }
            Ok(None) => {
                return Err(CourierLinkError::Transport(
                    "connection closed during handshake".to_string(),
                ))
            }
            Err(_) => {
                return Err(CourierLinkError::Timeout(format!(
                    "no handshake ack within {:?}",
                    timeout
                )))
            }
        };
        match frame {
            Message::Text(text) => match serde_json::from_str::<ServerMessage>(text.as_str()) {
                Ok(ServerMessage::AuthSuccess { .. }) => return Ok(()),
                Ok(ServerMessage::AuthError { message }) => {
                    return Err(CourierLinkError::Authentication(message))
                }
                Ok(_) | Err(_) => {
                    // Server pushed something before the ack; ignore.
                    log::debug!("[courier-link] Skipping pre-ack frame during handshake");
                }
            },
            Message::Ping(payload) => {
                let _ = stream.send(Message::Pong(payload)).await;
            }
            Message::Close(_) => {
                return Err(CourierLinkError::Transport(
                    "server closed connection during handshake".to_string(),
                ))
            }
            _ => {}
        }
    }
}

/// Background task: owns the socket, the room registry, and all timers.
async fn channel_task(
    mut cmd_rx: mpsc::Receiver<ChannelCmd>,
    state_tx: watch::Sender<ConnectionState>,
    config: ChannelConfig,
    bus: Arc<EventBus>,
) {
    let ChannelConfig {
        url,
        timeouts,
        reconnect: policy,
    } = config;

    let mut rooms: HashMap<String, usize> = HashMap::new();
    let mut ws: Option<WsStream> = None;
    let mut token: Option<String> = None;
    let mut want_connected = false;
    let mut attempts: u32 = 0;
    let mut shutdown = false;

    let has_heartbeat = !timeouts.heartbeat_interval.is_zero();
    let heartbeat = if has_heartbeat {
        timeouts.heartbeat_interval
    } else {
        FAR_FUTURE
    };
    let has_pong_deadline = has_heartbeat && !timeouts.heartbeat_timeout.is_zero();
    let pong_window = timeouts.heartbeat_timeout;

    let mut idle_deadline = Instant::now() + heartbeat;
    let mut awaiting_pong = false;
    let mut pong_deadline = Instant::now() + FAR_FUTURE;

    loop {
        if shutdown {
            if let Some(mut stream) = ws.take() {
                let _ = stream.close(None).await;
                bus.publish(events::DISCONNECT, &json!({"reason": "shutdown"}));
            }
            let _ = state_tx.send(ConnectionState::Disconnected);
            log::debug!("[courier-link] Channel task stopped");
            return;
        }

        if let Some(ref mut stream) = ws {
            let idle_sleep = tokio::time::sleep_until(idle_deadline);
            tokio::pin!(idle_sleep);
            let pong_sleep = tokio::time::sleep_until(pong_deadline);
            tokio::pin!(pong_sleep);

            tokio::select! {
                biased;

                _ = &mut pong_sleep, if has_pong_deadline && awaiting_pong => {
                    log::warn!(
                        "[courier-link] No pong within {:?}; treating connection as dead",
                        pong_window
                    );
                    awaiting_pong = false;
                    ws = None;
                    let _ = state_tx.send(ConnectionState::Disconnected);
                    bus.publish(
                        events::DISCONNECT,
                        &json!({"reason": "heartbeat timeout"}),
                    );
                    continue;
                }

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ChannelCmd::Connect { token: t }) => {
                            // Already connected; just refresh the credential.
                            token = Some(t);
                        }
                        Some(ChannelCmd::Disconnect) => {
                            let _ = state_tx.send(ConnectionState::Closing);
                            want_connected = false;
                            awaiting_pong = false;
                            if let Some(mut stream) = ws.take() {
                                let _ = stream.close(None).await;
                            }
                            let _ = state_tx.send(ConnectionState::Disconnected);
                            bus.publish(
                                events::DISCONNECT,
                                &json!({"reason": "client disconnected"}),
                            );
                            continue;
                        }
                        Some(ChannelCmd::JoinRoom { room }) => {
                            let count = rooms.entry(room.clone()).or_insert(0);
                            *count += 1;
                            if *count == 1 {
                                if let Err(e) =
                                    send_msg(stream, &ClientMessage::JoinRoom { room }).await
                                {
                                    log::warn!("[courier-link] Join send failed: {}", e);
                                }
                            }
                        }
                        Some(ChannelCmd::LeaveRoom { room }) => {
                            if decrement_room(&mut rooms, &room) {
                                if let Err(e) =
                                    send_msg(stream, &ClientMessage::LeaveRoom { room }).await
                                {
                                    log::warn!("[courier-link] Leave send failed: {}", e);
                                }
                            }
                        }
                        Some(ChannelCmd::Shutdown) | None => {
                            shutdown = true;
                            continue;
                        }
                    }
                }

                _ = &mut idle_sleep, if has_heartbeat && !awaiting_pong => {
                    if stream.send(Message::Ping(Bytes::new())).await.is_err() {
                        ws = None;
                        let _ = state_tx.send(ConnectionState::Disconnected);
                        bus.publish(
                            events::DISCONNECT,
                            &json!({"reason": "ping send failed"}),
                        );
                        continue;
                    }
                    if has_pong_deadline {
                        awaiting_pong = true;
                        pong_deadline = Instant::now() + pong_window;
                    }
                    idle_deadline = Instant::now() + heartbeat;
                }

                frame = stream.next() => {
                    // Any inbound traffic counts as liveness.
                    idle_deadline = Instant::now() + heartbeat;
                    if awaiting_pong {
                        awaiting_pong = false;
                        pong_deadline = Instant::now() + FAR_FUTURE;
                    }
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match protocol::normalize_frame(text.as_str()) {
                                Ok(Some(event)) => bus.publish(event.name, &event.payload),
                                Ok(None) => {}
                                Err(e) => log::warn!(
                                    "[courier-link] Dropping malformed frame: {}",
                                    e
                                ),
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = stream.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Binary(_))) => {
                            log::debug!("[courier-link] Ignoring binary frame");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| f.reason.to_string())
                                .filter(|r| !r.is_empty())
                                .unwrap_or_else(|| "server closed connection".to_string());
                            log::info!("[courier-link] Channel closed by server: {}", reason);
                            ws = None;
                            awaiting_pong = false;
                            let _ = state_tx.send(ConnectionState::Disconnected);
                            bus.publish(events::DISCONNECT, &json!({"reason": reason}));
                            continue;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            log::warn!("[courier-link] Channel read error: {}", e);
                            ws = None;
                            awaiting_pong = false;
                            let _ = state_tx.send(ConnectionState::Disconnected);
                            bus.publish(
                                events::DISCONNECT,
                                &json!({"reason": format!("read error: {}", e)}),
                            );
                            continue;
                        }
                        None => {
                            ws = None;
                            awaiting_pong = false;
                            let _ = state_tx.send(ConnectionState::Disconnected);
                            bus.publish(
                                events::DISCONNECT,
                                &json!({"reason": "stream ended"}),
                            );
                            continue;
                        }
                    }
                }
            }
        } else if want_connected {
            if let Some(max) = policy.max_attempts {
                if attempts >= max {
                    log::warn!(
                        "[courier-link] Giving up after {} connection attempts",
                        attempts
                    );
                    let _ = state_tx.send(ConnectionState::Failed);
                    bus.publish(
                        events::CONNECT_ERROR,
                        &json!({
                            "message": format!("gave up after {} attempts", attempts),
                            "attempts": attempts,
                        }),
                    );
                    want_connected = false;
                    continue;
                }
            }

            if attempts > 0 {
                let delay = policy.delay_for(attempts - 1);
                log::info!(
                    "[courier-link] Reconnecting in {:?} (attempt {})",
                    delay,
                    attempts + 1
                );
                let backoff = tokio::time::sleep(delay);
                tokio::pin!(backoff);
                let mut aborted = false;
                loop {
                    tokio::select! {
                        biased;

                        cmd = cmd_rx.recv() => {
                            match cmd {
                                Some(ChannelCmd::Connect { token: t }) => {
                                    token = Some(t);
                                }
                                Some(ChannelCmd::Disconnect) => {
                                    want_connected = false;
                                    aborted = true;
                                    break;
                                }
                                Some(ChannelCmd::JoinRoom { room }) => {
                                    *rooms.entry(room).or_insert(0) += 1;
                                }
                                Some(ChannelCmd::LeaveRoom { room }) => {
                                    decrement_room(&mut rooms, &room);
                                }
                                Some(ChannelCmd::Shutdown) | None => {
                                    shutdown = true;
                                    aborted = true;
                                    break;
                                }
                            }
                        }

                        _ = &mut backoff => break,
                    }
                }
                if aborted {
                    if !shutdown {
                        let _ = state_tx.send(ConnectionState::Disconnected);
                    }
                    continue;
                }
            }

            let Some(ref tok) = token else {
                log::warn!("[courier-link] Connect requested without a credential");
                want_connected = false;
                let _ = state_tx.send(ConnectionState::Disconnected);
                continue;
            };
            let tok = tok.clone();

            let _ = state_tx.send(ConnectionState::Connecting);
            match establish(&url, &tok, &timeouts).await {
                Ok(mut stream) => {
                    attempts = 0;
                    // Re-assert every live room after (re)connect.
                    for room in rooms.keys() {
                        if let Err(e) = send_msg(
                            &mut stream,
                            &ClientMessage::JoinRoom { room: room.clone() },
                        )
                        .await
                        {
                            log::warn!("[courier-link] Room re-join failed: {}", e);
                        }
                    }
                    ws = Some(stream);
                    idle_deadline = Instant::now() + heartbeat;
                    awaiting_pong = false;
                    pong_deadline = Instant::now() + FAR_FUTURE;
                    let _ = state_tx.send(ConnectionState::Connected);
                    bus.publish(events::CONNECT, &json!({}));
                    log::info!("[courier-link] Channel connected ({} rooms)", rooms.len());
                }
                Err(e) => {
                    attempts += 1;
                    log::warn!(
                        "[courier-link] Connection attempt {} failed: {}",
                        attempts,
                        e
                    );
                    if !policy.auto_reconnect {
                        let _ = state_tx.send(ConnectionState::Failed);
                        bus.publish(
                            events::CONNECT_ERROR,
                            &json!({"message": e.to_string(), "attempts": attempts}),
                        );
                        want_connected = false;
                    }
                }
            }
        } else {
            match cmd_rx.recv().await {
                Some(ChannelCmd::Connect { token: t }) => {
                    token = Some(t);
                    want_connected = true;
                    if *state_tx.borrow() == ConnectionState::Failed {
                        // Explicit reconnect restarts the attempt budget.
                        attempts = 0;
                    }
                }
                Some(ChannelCmd::Disconnect) => {
                    // Same outward contract as the connected path: a
                    // deliberate disconnect always announces itself.
                    let _ = state_tx.send(ConnectionState::Disconnected);
                    bus.publish(
                        events::DISCONNECT,
                        &json!({"reason": "client disconnected"}),
                    );
                }
                Some(ChannelCmd::JoinRoom { room }) => {
                    *rooms.entry(room).or_insert(0) += 1;
                }
                Some(ChannelCmd::LeaveRoom { room }) => {
                    decrement_room(&mut rooms, &room);
                }
                Some(ChannelCmd::Shutdown) | None => {
                    shutdown = true;
                }
            }
        }
    }
}
