//! Client connection runtime: one logical connection to the broker across
//! physical reconnects.
//!
//! The link lifecycle is an explicit state machine
//! (`Disconnected → Connecting → Connected → ReconnectScheduled → ...`).
//! The desired-subscription set and the last accepted auth token are durable
//! fields read on every reconnect, so a recovered link replays the full
//! session instead of relying on whatever closures were in flight when the
//! socket died.

use crate::error::{ClientError, Result};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use realtime_protocol::{AuthPayload, ConnId, Envelope};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::{interval, timeout, timeout_at, Instant};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

/// Configuration for the client runtime.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bound on the connect handshake.
    pub connect_timeout: Duration,
    /// Bound on waiting for an `authenticated`/`auth_error` reply.
    pub auth_timeout: Duration,
    /// Interval between keepalive ping frames.
    pub heartbeat_interval: Duration,
    /// Initial delay before a reconnection attempt.
    pub reconnect_base_delay: Duration,
    /// Maximum reconnection delay (for exponential backoff).
    pub reconnect_max_delay: Duration,
    /// Attempt cap; exceeding it emits a terminal event and stops retrying.
    pub max_reconnect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            max_reconnect_attempts: 10,
        }
    }
}

/// Connection link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectScheduled,
}

/// Events delivered to registered listeners.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The socket opened (initial connect or reconnect).
    Open,
    /// The socket closed, for any reason.
    Closed,
    /// A parsed envelope arrived from the broker.
    Envelope(Envelope),
    /// The reconnect attempt cap was exceeded; no further automatic retries.
    ReconnectExhausted,
}

/// Listener registry key. `Message` fires for every inbound envelope in
/// addition to the envelope's own kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Closed,
    Message,
    Welcome,
    Authenticated,
    AuthError,
    Subscribed,
    Unsubscribed,
    Broadcast,
    UserJoined,
    UserLeft,
    Error,
    ReconnectExhausted,
}

pub type ListenerId = u64;
type Listener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

enum Command {
    Send(Envelope),
    Close,
}

/// Handle to the client runtime. Cheap to clone; all clones drive the same
/// logical connection.
#[derive(Clone)]
pub struct RealtimeClient {
    pub(crate) inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    url: String,
    pub(crate) config: ClientConfig,
    state: Mutex<LinkState>,
    /// Signalled on every link state transition.
    state_changed: Notify,
    cmd_tx: Mutex<Option<mpsc::Sender<Command>>>,
    /// Channels the caller wants to be in, independent of socket state.
    desired: Mutex<HashSet<String>>,
    /// Last token the broker accepted; the only token replayed on reconnect.
    accepted_token: Mutex<Option<String>>,
    /// Token most recently presented, promoted to accepted on success.
    last_sent_token: Mutex<Option<String>>,
    pending_auth: Mutex<Option<oneshot::Sender<std::result::Result<String, String>>>>,
    attempts: AtomicU32,
    /// Bumped by explicit connect/disconnect; stale drivers and scheduled
    /// reconnects compare against it and stand down.
    generation: AtomicU64,
    listeners: Mutex<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
    next_listener_id: AtomicU64,
    client_id: Mutex<Option<ConnId>>,
}

impl RealtimeClient {
    pub fn new(url: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                url: url.into(),
                config,
                state: Mutex::new(LinkState::Disconnected),
                state_changed: Notify::new(),
                cmd_tx: Mutex::new(None),
                desired: Mutex::new(HashSet::new()),
                accepted_token: Mutex::new(None),
                last_sent_token: Mutex::new(None),
                pending_auth: Mutex::new(None),
                attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                listeners: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(1),
                client_id: Mutex::new(None),
            }),
        }
    }

    /// Open the connection. Resolves once the handshake completes, or errors
    /// on failure/timeout. A no-op while already connected; when a handshake
    /// is already in flight (concurrent `connect()` or a scheduled reconnect
    /// that started dialing), waits for that handshake's outcome instead of
    /// starting a second one.
    pub async fn connect(&self) -> Result<()> {
        let wait_for_inflight = {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            match *state {
                LinkState::Connected => return Ok(()),
                LinkState::Connecting => true,
                _ => {
                    *state = LinkState::Connecting;
                    false
                }
            }
        };
        if wait_for_inflight {
            return self.await_handshake().await;
        }
        // New generation cancels any reconnect still scheduled from before.
        let gen = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        match Arc::clone(&self.inner).open_socket(gen).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.set_state(LinkState::Disconnected);
                Err(e)
            }
        }
    }

    /// Wait for a handshake another task already started. Resolves when the
    /// link leaves `Connecting`: connected, or failed.
    async fn await_handshake(&self) -> Result<()> {
        let deadline = Instant::now() + self.inner.config.connect_timeout;
        loop {
            // Register for the wakeup before reading the state.
            let notified = self.inner.state_changed.notified();
            match self.state() {
                LinkState::Connected => return Ok(()),
                LinkState::Connecting => {}
                _ => return Err(ClientError::NotConnected),
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Err(ClientError::ConnectTimeout);
            }
        }
    }

    /// Close the connection and cancel any pending reconnect. No further
    /// automatic attempts occur until `connect()` is called again.
    pub fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.set_state(LinkState::Disconnected);
        self.inner.attempts.store(0, Ordering::SeqCst);
        if let Some(tx) = self
            .inner
            .cmd_tx
            .lock()
            .expect("cmd_tx lock poisoned")
            .take()
        {
            let _ = tx.try_send(Command::Close);
        }
    }

    /// Present a session token and wait for the broker's verdict.
    pub async fn authenticate(&self, token: &str) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending_auth.lock().expect("auth lock poisoned");
            *pending = Some(tx);
        }
        *self
            .inner
            .last_sent_token
            .lock()
            .expect("token lock poisoned") = Some(token.to_string());

        if let Err(e) = self.inner.send_envelope(Envelope::Authenticate {
            payload: AuthPayload {
                token: Some(token.to_string()),
            },
        }) {
            self.inner
                .pending_auth
                .lock()
                .expect("auth lock poisoned")
                .take();
            return Err(e);
        }

        match timeout(self.inner.config.auth_timeout, rx).await {
            Err(_) => {
                self.inner
                    .pending_auth
                    .lock()
                    .expect("auth lock poisoned")
                    .take();
                Err(ClientError::AuthTimeout)
            }
            Ok(Err(_)) => Err(ClientError::ChannelClosed),
            Ok(Ok(Ok(user_id))) => Ok(user_id),
            Ok(Ok(Err(message))) => Err(ClientError::AuthRejected(message)),
        }
    }

    /// Mark a channel as desired and join it if currently connected. While
    /// disconnected the join is deferred and replayed on (re)connect.
    pub fn subscribe(&self, channel: &str) {
        self.inner
            .desired
            .lock()
            .expect("desired lock poisoned")
            .insert(channel.to_string());
        let _ = self.inner.send_envelope(Envelope::Subscribe {
            channel: channel.to_string(),
        });
    }

    /// Remove a channel from the desired set and leave it if connected.
    pub fn unsubscribe(&self, channel: &str) {
        self.inner
            .desired
            .lock()
            .expect("desired lock poisoned")
            .remove(channel);
        let _ = self.inner.send_envelope(Envelope::Unsubscribe {
            channel: channel.to_string(),
        });
    }

    /// Publish to a channel. Errors when not connected.
    pub fn broadcast(&self, channel: &str, payload: Value) -> Result<()> {
        if self.state() != LinkState::Connected {
            return Err(ClientError::NotConnected);
        }
        self.inner.send_envelope(Envelope::Broadcast {
            channel: channel.to_string(),
            payload,
            user_id: None,
        })
    }

    /// Register a listener for an event kind.
    pub fn on(
        &self,
        kind: EventKind,
        listener: impl Fn(&ClientEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .listeners
            .lock()
            .expect("listeners lock poisoned")
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a previously registered listener.
    pub fn off(&self, id: ListenerId) {
        let mut listeners = self.inner.listeners.lock().expect("listeners lock poisoned");
        for entries in listeners.values_mut() {
            entries.retain(|(listener_id, _)| *listener_id != id);
        }
    }

    pub fn state(&self) -> LinkState {
        *self.inner.state.lock().expect("state lock poisoned")
    }

    /// The connection id assigned by the broker's `welcome`, if connected.
    pub fn client_id(&self) -> Option<ConnId> {
        *self.inner.client_id.lock().expect("client_id lock poisoned")
    }

    /// Snapshot of the desired-subscription set.
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner
            .desired
            .lock()
            .expect("desired lock poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

impl ClientInner {
    /// Transition the link state and wake anything waiting on it.
    fn set_state(&self, next: LinkState) {
        *self.state.lock().expect("state lock poisoned") = next;
        self.state_changed.notify_waiters();
    }

    /// Open the socket, install the command queue, spawn the driver, and
    /// replay the durable session state.
    async fn open_socket(self: Arc<Self>, gen: u64) -> Result<()> {
        info!("Connecting to {}", self.url);
        let (ws, _response) = timeout(self.config.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| ClientError::ConnectTimeout)??;

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        *self.cmd_tx.lock().expect("cmd_tx lock poisoned") = Some(cmd_tx);
        self.set_state(LinkState::Connected);
        self.attempts.store(0, Ordering::SeqCst);

        let driver = Arc::clone(&self);
        tokio::spawn(async move { driver.drive(ws, cmd_rx, gen).await });

        info!("Connected to {}", self.url);
        self.dispatch(&ClientEvent::Open);

        // Replay: last accepted token first, then every desired channel.
        // Subscriptions are idempotent broker-side, order does not matter.
        let token = self
            .accepted_token
            .lock()
            .expect("token lock poisoned")
            .clone();
        if let Some(token) = token {
            *self
                .last_sent_token
                .lock()
                .expect("token lock poisoned") = Some(token.clone());
            let _ = self.send_envelope(Envelope::Authenticate {
                payload: AuthPayload { token: Some(token) },
            });
        }
        let channels: Vec<String> = self
            .desired
            .lock()
            .expect("desired lock poisoned")
            .iter()
            .cloned()
            .collect();
        for channel in channels {
            let _ = self.send_envelope(Envelope::Subscribe { channel });
        }
        Ok(())
    }

    /// Socket driver: read loop, command queue, and heartbeat, multiplexed on
    /// one task until the socket dies or the caller closes it.
    async fn drive(
        self: Arc<Self>,
        ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
        mut cmd_rx: mpsc::Receiver<Command>,
        gen: u64,
    ) {
        let (mut write, mut read) = ws.split();
        let mut ping_interval = interval(self.config.heartbeat_interval);
        ping_interval.reset(); // don't fire immediately

        let mut explicit_close = false;
        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                        Some(Ok(Message::Ping(data))) => {
                            if write.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            debug!("Received pong");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("Received close frame: {:?}", frame);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("WebSocket error: {:?}", e);
                            break;
                        }
                        None => break,
                    }
                }

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Send(env)) => {
                            let json = match serde_json::to_string(&env) {
                                Ok(j) => j,
                                Err(e) => {
                                    warn!("Failed to serialize envelope: {}", e);
                                    continue;
                                }
                            };
                            if write.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        Some(Command::Close) | None => {
                            explicit_close = true;
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }

        self.dispatch(&ClientEvent::Closed);
        if !explicit_close {
            counter!("client_disconnects_total").increment(1);
            self.handle_link_down(gen);
        }
    }

    /// React to an unexpected link loss: schedule exactly one reconnect, or
    /// give up once the attempt cap is exceeded.
    fn handle_link_down(self: &Arc<Self>, gen: u64) {
        if self.generation.load(Ordering::SeqCst) != gen {
            // Explicitly disconnected or superseded in the meantime.
            return;
        }

        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state == LinkState::ReconnectScheduled {
                return;
            }
            *self.cmd_tx.lock().expect("cmd_tx lock poisoned") = None;

            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > self.config.max_reconnect_attempts {
                *state = LinkState::Disconnected;
                drop(state);
                self.state_changed.notify_waiters();
                warn!(
                    "Giving up after {} reconnect attempts",
                    self.config.max_reconnect_attempts
                );
                self.dispatch(&ClientEvent::ReconnectExhausted);
                return;
            }
            *state = LinkState::ReconnectScheduled;
        }
        self.state_changed.notify_waiters();

        let attempt = self.attempts.load(Ordering::SeqCst);
        let delay = backoff_delay(&self.config, attempt);
        warn!("Link down, reconnect attempt {} in {:?}", attempt, delay);
        counter!("client_reconnect_attempts_total").increment(1);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if inner.generation.load(Ordering::SeqCst) != gen {
                return;
            }
            {
                let mut state = inner.state.lock().expect("state lock poisoned");
                if *state != LinkState::ReconnectScheduled {
                    return;
                }
                *state = LinkState::Connecting;
            }
            if let Err(e) = Arc::clone(&inner).open_socket(gen).await {
                debug!("Reconnect attempt failed: {:?}", e);
                inner.handle_link_down(gen);
            }
        });
    }

    /// Parse and dispatch one inbound text frame.
    pub(crate) fn handle_frame(&self, text: &str) {
        let env: Envelope = match serde_json::from_str(text) {
            Ok(env) => env,
            Err(e) => {
                warn!("Ignoring malformed frame: {}", e);
                return;
            }
        };

        match &env {
            Envelope::Welcome { payload } => {
                *self.client_id.lock().expect("client_id lock poisoned") =
                    Some(payload.client_id);
            }
            Envelope::Authenticated { payload } => {
                // Promote the presented token: it is now the replay token.
                let sent = self
                    .last_sent_token
                    .lock()
                    .expect("token lock poisoned")
                    .clone();
                *self
                    .accepted_token
                    .lock()
                    .expect("token lock poisoned") = sent;
                if let Some(tx) = self
                    .pending_auth
                    .lock()
                    .expect("auth lock poisoned")
                    .take()
                {
                    let _ = tx.send(Ok(payload.user_id.clone()));
                }
            }
            Envelope::AuthError { payload } => {
                if let Some(tx) = self
                    .pending_auth
                    .lock()
                    .expect("auth lock poisoned")
                    .take()
                {
                    let _ = tx.send(Err(payload.message.clone()));
                }
            }
            _ => {}
        }

        self.dispatch(&ClientEvent::Envelope(env));
    }

    fn send_envelope(&self, env: Envelope) -> Result<()> {
        let guard = self.cmd_tx.lock().expect("cmd_tx lock poisoned");
        let tx = guard.as_ref().ok_or(ClientError::NotConnected)?;
        tx.try_send(Command::Send(env))
            .map_err(|_| ClientError::NotConnected)
    }

    /// Invoke listeners for an event. Callbacks run outside the registry
    /// lock so they may register/remove listeners or send.
    pub(crate) fn dispatch(&self, event: &ClientEvent) {
        let mut kinds = vec![event_kind(event)];
        if matches!(event, ClientEvent::Envelope(_)) {
            kinds.push(EventKind::Message);
        }

        let listeners: Vec<Listener> = {
            let map = self.listeners.lock().expect("listeners lock poisoned");
            kinds
                .iter()
                .filter_map(|kind| map.get(kind))
                .flatten()
                .map(|(_, listener)| listener.clone())
                .collect()
        };
        for listener in listeners {
            listener(event);
        }
    }
}

fn event_kind(event: &ClientEvent) -> EventKind {
    match event {
        ClientEvent::Open => EventKind::Open,
        ClientEvent::Closed => EventKind::Closed,
        ClientEvent::ReconnectExhausted => EventKind::ReconnectExhausted,
        ClientEvent::Envelope(env) => match env {
            Envelope::Welcome { .. } => EventKind::Welcome,
            Envelope::Authenticate { .. } | Envelope::Authenticated { .. } => {
                EventKind::Authenticated
            }
            Envelope::AuthError { .. } => EventKind::AuthError,
            Envelope::Subscribe { .. } | Envelope::Subscribed { .. } => EventKind::Subscribed,
            Envelope::Unsubscribe { .. } | Envelope::Unsubscribed { .. } => {
                EventKind::Unsubscribed
            }
            Envelope::Broadcast { .. } => EventKind::Broadcast,
            Envelope::UserJoined { .. } => EventKind::UserJoined,
            Envelope::UserLeft { .. } => EventKind::UserLeft,
            Envelope::Error { .. } => EventKind::Error,
        },
    }
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped.
fn backoff_delay(config: &ClientConfig, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    config
        .reconnect_base_delay
        .saturating_mul(1u32 << shift)
        .min(config.reconnect_max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn make_client() -> RealtimeClient {
        RealtimeClient::new("ws://127.0.0.1:1/ws", ClientConfig::default())
    }

    #[test]
    fn test_backoff_monotonic_up_to_cap() {
        let config = ClientConfig {
            reconnect_base_delay: Duration::from_millis(100),
            reconnect_max_delay: Duration::from_secs(5),
            ..ClientConfig::default()
        };

        let delays: Vec<Duration> = (1..=10).map(|a| backoff_delay(&config, a)).collect();
        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(5));

        // Large attempt counts must not overflow.
        assert_eq!(backoff_delay(&config, u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_subscribe_deferred_while_disconnected() {
        let client = make_client();
        client.subscribe("room:1");
        client.subscribe("room:2");
        client.unsubscribe("room:2");

        let mut subs = client.subscriptions();
        subs.sort();
        assert_eq!(subs, ["room:1"]);
        assert_eq!(client.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_broadcast_fails_while_disconnected() {
        let client = make_client();
        let err = client.broadcast("room:1", json!({})).unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_waits_out_a_stuck_handshake() {
        let client = RealtimeClient::new(
            "ws://127.0.0.1:1/ws",
            ClientConfig {
                connect_timeout: Duration::from_millis(50),
                ..ClientConfig::default()
            },
        );
        // Another task owns an in-flight handshake that never completes.
        *client.inner.state.lock().unwrap() = LinkState::Connecting;

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectTimeout));

        // And resolves early when the handshake fails.
        let waiter = client.clone();
        let handle = tokio::spawn(async move { waiter.connect().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.inner.set_state(LinkState::Disconnected);
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[test]
    fn test_listener_registry_on_off() {
        let client = make_client();
        let hits = Arc::new(AtomicUsize::new(0));

        let counted = hits.clone();
        let id = client.on(EventKind::Broadcast, move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        let all = hits.clone();
        client.on(EventKind::Message, move |_| {
            all.fetch_add(10, Ordering::SeqCst);
        });

        let env = Envelope::Broadcast {
            channel: "room:1".to_string(),
            payload: json!({}),
            user_id: None,
        };
        client.inner.dispatch(&ClientEvent::Envelope(env.clone()));
        assert_eq!(hits.load(Ordering::SeqCst), 11);

        client.off(id);
        client.inner.dispatch(&ClientEvent::Envelope(env));
        assert_eq!(hits.load(Ordering::SeqCst), 21);
    }

    #[test]
    fn test_only_accepted_token_becomes_replay_token() {
        let client = make_client();
        let inner = &client.inner;

        *inner.last_sent_token.lock().unwrap() = Some("bad-token".to_string());
        inner.handle_frame(r#"{"type":"auth_error","payload":{"message":"Invalid token"}}"#);
        assert_eq!(*inner.accepted_token.lock().unwrap(), None);

        *inner.last_sent_token.lock().unwrap() = Some("good-token".to_string());
        inner.handle_frame(r#"{"type":"authenticated","payload":{"userId":"user-a"}}"#);
        assert_eq!(
            inner.accepted_token.lock().unwrap().as_deref(),
            Some("good-token")
        );
    }

    #[test]
    fn test_welcome_records_client_id() {
        let client = make_client();
        let id = uuid::Uuid::new_v4();
        client.inner.handle_frame(&format!(
            r#"{{"type":"welcome","payload":{{"clientId":"{}"}}}}"#,
            id
        ));
        assert_eq!(client.client_id(), Some(id));
    }
}
