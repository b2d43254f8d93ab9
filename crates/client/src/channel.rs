//! Per-channel broadcast + presence object on top of the client runtime.
//!
//! A `Channel` has its own subscribe state machine, independent of the
//! underlying socket: `closed → joining → joined`, `joining → errored`,
//! `joined/joining → leaving → closed`. The broker replays the join on
//! reconnect (the runtime keeps the channel in its desired set), so a joined
//! channel self-heals without the caller doing anything.

use crate::error::{ClientError, Result};
use crate::presence::{PresenceDiff, PresenceMap, PresenceRecord};
use crate::runtime::{ClientEvent, EventKind, ListenerId, RealtimeClient};
use realtime_protocol::Envelope;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Reserved application-level event name carrying tracked presence state.
pub const PRESENCE_EVENT: &str = "presence";

/// Channel subscribe state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Joining,
    Joined,
    Leaving,
    Errored,
}

/// Discrete status events surfaced to the caller. Raw transport errors never
/// reach this level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
}

/// Application-level framing inside a `broadcast` envelope's payload.
#[derive(Debug, Serialize, Deserialize)]
struct BroadcastFields {
    event: String,
    payload: Value,
}

/// A delivered channel broadcast.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    /// Application-level event name.
    pub event: String,
    pub payload: Value,
    /// Authenticated sender, stamped by the broker.
    pub user_id: Option<String>,
}

type StatusCallback = Arc<dyn Fn(ChannelStatus) + Send + Sync>;
type BroadcastCallback = Arc<dyn Fn(&BroadcastMessage) + Send + Sync>;
type PresenceCallback = Arc<dyn Fn(&PresenceDiff) + Send + Sync>;

/// Handle to one named channel. Cheap to clone.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    name: String,
    client: RealtimeClient,
    state: Mutex<ChannelState>,
    status_callbacks: Mutex<Vec<StatusCallback>>,
    broadcast_callbacks: Mutex<HashMap<String, Vec<BroadcastCallback>>>,
    presence_callbacks: Mutex<Vec<PresenceCallback>>,
    presence: Mutex<PresenceMap>,
    listener_ids: Mutex<Vec<ListenerId>>,
}

impl RealtimeClient {
    /// Create a handle for a named channel. The channel is inert until
    /// `subscribe()` is called.
    pub fn channel(&self, name: impl Into<String>) -> Channel {
        Channel {
            inner: Arc::new(ChannelInner {
                name: name.into(),
                client: self.clone(),
                state: Mutex::new(ChannelState::Closed),
                status_callbacks: Mutex::new(Vec::new()),
                broadcast_callbacks: Mutex::new(HashMap::new()),
                presence_callbacks: Mutex::new(Vec::new()),
                presence: Mutex::new(PresenceMap::new()),
                listener_ids: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Tear down a channel: leave it and drop all of its listeners.
    pub fn remove_channel(&self, channel: &Channel) {
        channel.unsubscribe();
    }
}

impl Channel {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.lock().expect("state lock poisoned")
    }

    /// Register a callback for status transitions.
    pub fn on_status(&self, callback: impl Fn(ChannelStatus) + Send + Sync + 'static) {
        self.inner
            .status_callbacks
            .lock()
            .expect("status lock poisoned")
            .push(Arc::new(callback));
    }

    /// Register a callback for broadcasts with a given application event
    /// name on this channel.
    pub fn on_broadcast(
        &self,
        event: impl Into<String>,
        callback: impl Fn(&BroadcastMessage) + Send + Sync + 'static,
    ) {
        self.inner
            .broadcast_callbacks
            .lock()
            .expect("broadcast lock poisoned")
            .entry(event.into())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Register a callback for presence joins/leaves on this channel.
    pub fn on_presence(&self, callback: impl Fn(&PresenceDiff) + Send + Sync + 'static) {
        self.inner
            .presence_callbacks
            .lock()
            .expect("presence lock poisoned")
            .push(Arc::new(callback));
    }

    /// Join the channel. Idempotent: calling while already joining or joined
    /// has no additional effect.
    pub fn subscribe(&self) {
        {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            match *state {
                ChannelState::Joining | ChannelState::Joined => return,
                _ => *state = ChannelState::Joining,
            }
        }
        self.register_runtime_listeners();
        self.inner.client.subscribe(&self.inner.name);
    }

    /// Leave the channel, clear all listeners and presence. No-op while
    /// already closed.
    pub fn unsubscribe(&self) {
        {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            if *state == ChannelState::Closed {
                return;
            }
            *state = ChannelState::Leaving;
        }
        let ids: Vec<ListenerId> = self
            .inner
            .listener_ids
            .lock()
            .expect("listener_ids lock poisoned")
            .drain(..)
            .collect();
        for id in ids {
            self.inner.client.off(id);
        }
        self.inner.client.unsubscribe(&self.inner.name);

        self.inner
            .presence
            .lock()
            .expect("presence lock poisoned")
            .clear();
        self.inner
            .broadcast_callbacks
            .lock()
            .expect("broadcast lock poisoned")
            .clear();
        self.inner
            .presence_callbacks
            .lock()
            .expect("presence lock poisoned")
            .clear();

        *self.inner.state.lock().expect("state lock poisoned") = ChannelState::Closed;
        self.inner.notify_status(ChannelStatus::Closed);
        self.inner
            .status_callbacks
            .lock()
            .expect("status lock poisoned")
            .clear();
    }

    /// Publish an application event to the channel. A no-op with a warning
    /// when the channel is not joined.
    pub fn send(&self, event: impl Into<String>, payload: Value) -> Result<()> {
        if self.state() != ChannelState::Joined {
            warn!(
                "Dropping send to channel {} before it is joined",
                self.inner.name
            );
            return Ok(());
        }
        let body = serde_json::to_value(BroadcastFields {
            event: event.into(),
            payload,
        })?;
        self.inner.client.broadcast(&self.inner.name, body)
    }

    /// Publish the caller's presence state to the channel. Requires the
    /// joined state.
    pub fn track(&self, state: Value) -> Result<()> {
        if self.state() != ChannelState::Joined {
            return Err(ClientError::NotJoined(self.inner.name.clone()));
        }
        let body = serde_json::to_value(BroadcastFields {
            event: PRESENCE_EVENT.to_string(),
            payload: state,
        })?;
        self.inner.client.broadcast(&self.inner.name, body)
    }

    /// Snapshot of the aggregated presence map.
    pub fn presence_state(&self) -> HashMap<String, Vec<PresenceRecord>> {
        self.inner
            .presence
            .lock()
            .expect("presence lock poisoned")
            .state()
    }

    fn register_runtime_listeners(&self) {
        let mut ids = self
            .inner
            .listener_ids
            .lock()
            .expect("listener_ids lock poisoned");
        if !ids.is_empty() {
            return;
        }

        let envelope_target = Arc::clone(&self.inner);
        ids.push(self.inner.client.on(EventKind::Message, move |event| {
            if let ClientEvent::Envelope(env) = event {
                envelope_target.handle_envelope(env);
            }
        }));

        let close_target = Arc::clone(&self.inner);
        ids.push(self.inner.client.on(EventKind::Closed, move |_| {
            close_target.handle_link_closed();
        }));

        let exhausted_target = Arc::clone(&self.inner);
        ids.push(
            self.inner
                .client
                .on(EventKind::ReconnectExhausted, move |_| {
                    exhausted_target.handle_reconnect_exhausted();
                }),
        );
    }
}

impl ChannelInner {
    /// Apply one inbound envelope to this channel's state machine and
    /// presence map. Envelopes for other channels are ignored.
    fn handle_envelope(&self, env: &Envelope) {
        if env.channel() != Some(self.name.as_str()) {
            return;
        }

        match env {
            Envelope::Subscribed { .. } => {
                {
                    let mut state = self.state.lock().expect("state lock poisoned");
                    if !matches!(*state, ChannelState::Joining | ChannelState::Errored) {
                        return;
                    }
                    *state = ChannelState::Joined;
                }
                self.notify_status(ChannelStatus::Subscribed);
            }
            Envelope::Broadcast {
                payload, user_id, ..
            } => {
                let fields: BroadcastFields = match serde_json::from_value(payload.clone()) {
                    Ok(fields) => fields,
                    Err(_) => {
                        warn!(
                            "Ignoring unframed broadcast on channel {}",
                            self.name
                        );
                        return;
                    }
                };

                if fields.event == PRESENCE_EVENT {
                    // Tracked state is attributable only when the broker
                    // stamped an authenticated sender on the envelope.
                    if let Some(user_id) = user_id {
                        let diff = self
                            .presence
                            .lock()
                            .expect("presence lock poisoned")
                            .track(user_id, fields.payload);
                        self.notify_presence(&diff);
                    }
                } else {
                    let msg = BroadcastMessage {
                        event: fields.event.clone(),
                        payload: fields.payload,
                        user_id: user_id.clone(),
                    };
                    let callbacks: Vec<BroadcastCallback> = self
                        .broadcast_callbacks
                        .lock()
                        .expect("broadcast lock poisoned")
                        .get(&fields.event)
                        .map(|list| list.to_vec())
                        .unwrap_or_default();
                    for callback in callbacks {
                        callback(&msg);
                    }
                }
            }
            Envelope::UserJoined { payload, .. } => {
                let key = presence_key(payload.user_id.as_deref(), payload.client_id);
                let record = PresenceRecord {
                    user_id: payload.user_id.clone(),
                    client_id: Some(payload.client_id.to_string()),
                    state: Value::Null,
                };
                let diff = self
                    .presence
                    .lock()
                    .expect("presence lock poisoned")
                    .join(&key, record);
                self.notify_presence(&diff);
            }
            Envelope::UserLeft { payload, .. } => {
                let key = presence_key(payload.user_id.as_deref(), payload.client_id);
                let diff = self
                    .presence
                    .lock()
                    .expect("presence lock poisoned")
                    .leave(&key);
                if let Some(diff) = diff {
                    self.notify_presence(&diff);
                }
            }
            _ => {}
        }
    }

    /// The socket dropped. A join still in flight becomes an error; a joined
    /// channel stays joined and heals when the runtime replays the join.
    fn handle_link_closed(&self) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state != ChannelState::Joining {
                return;
            }
            *state = ChannelState::Errored;
        }
        self.notify_status(ChannelStatus::ChannelError);
    }

    /// The runtime gave up reconnecting; the join will never complete.
    fn handle_reconnect_exhausted(&self) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if !matches!(*state, ChannelState::Joining | ChannelState::Joined) {
                return;
            }
            *state = ChannelState::Errored;
        }
        self.notify_status(ChannelStatus::TimedOut);
    }

    fn notify_status(&self, status: ChannelStatus) {
        let callbacks: Vec<StatusCallback> = self
            .status_callbacks
            .lock()
            .expect("status lock poisoned")
            .to_vec();
        for callback in callbacks {
            callback(status);
        }
    }

    fn notify_presence(&self, diff: &PresenceDiff) {
        let callbacks: Vec<PresenceCallback> = self
            .presence_callbacks
            .lock()
            .expect("presence lock poisoned")
            .to_vec();
        for callback in callbacks {
            callback(diff);
        }
    }
}

/// Participants are keyed by authenticated user id when available, falling
/// back to the connection id for anonymous members.
fn presence_key(user_id: Option<&str>, client_id: realtime_protocol::ConnId) -> String {
    user_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| client_id.to_string())
}
