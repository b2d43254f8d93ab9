//! Connection state and the channel-membership registry.
//!
//! The registry is the broker's only shared mutable state: a connection map
//! plus a channel → subscriber-set index, both on DashMap so per-connection
//! handlers never block each other. Writes to peers go through bounded
//! per-connection queues with `try_send`, so a slow peer drops its own frames
//! instead of stalling fan-out to others.

use crate::error::{BrokerError, Result};
use axum::extract::ws::{Message, Utf8Bytes};
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use realtime_protocol::{ConnId, Envelope, MembershipPayload};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Buffer size for per-connection outbound queues. A connection that falls
/// this far behind starts losing frames rather than blocking the broker.
pub const CONN_CHANNEL_BUFFER_SIZE: usize = 256;

/// State for a single accepted connection.
pub struct ConnectionState {
    /// Unique connection identifier, fresh per accept.
    pub id: ConnId,
    /// Bounded queue feeding this connection's socket writer.
    pub tx: mpsc::Sender<Message>,
    /// Channel names this connection is currently subscribed to.
    pub channels: DashSet<String>,
    /// Authenticated user id, absent until `authenticate` succeeds.
    user_id: RwLock<Option<String>>,
    /// Timestamp when the connection was accepted.
    pub connected_at: i64,
    /// Timestamp of the last pong (or accept) observed.
    last_pong: AtomicI64,
}

impl ConnectionState {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4(),
            tx,
            channels: DashSet::new(),
            user_id: RwLock::new(None),
            connected_at: now,
            last_pong: AtomicI64::new(now),
        }
    }

    /// Send an envelope to this connection. Non-blocking; drops the frame if
    /// the outbound queue is full or closed.
    pub fn send(&self, env: &Envelope) -> Result<()> {
        let json = serde_json::to_string(env)?;
        self.tx
            .try_send(Message::Text(Utf8Bytes::from(json)))
            .map_err(|_| BrokerError::ChannelSend)
    }

    /// Record a pong from the peer.
    pub fn update_pong(&self) {
        self.last_pong
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_pong_time(&self) -> i64 {
        self.last_pong.load(Ordering::Relaxed)
    }

    /// The authenticated user id, if authentication has succeeded.
    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().expect("user_id lock poisoned").clone()
    }

    pub fn set_user_id(&self, user_id: String) {
        *self.user_id.write().expect("user_id lock poisoned") = Some(user_id);
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }

    /// The membership payload other channel members see for this connection.
    pub fn membership(&self) -> MembershipPayload {
        MembershipPayload {
            user_id: self.user_id(),
            client_id: self.id,
        }
    }
}

/// Registry of connections and channel memberships.
///
/// Invariant: a channel has an entry in the index if and only if at least one
/// connection is subscribed to it. Empty channels are pruned immediately.
pub struct ConnectionRegistry {
    /// Connection id → connection state.
    connections: DashMap<ConnId, Arc<ConnectionState>>,
    /// Channel name → subscriber set.
    channels: DashMap<String, DashSet<ConnId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    /// Register a newly accepted connection.
    pub fn register(&self, conn: Arc<ConnectionState>) -> ConnId {
        let id = conn.id;
        self.connections.insert(id, conn);
        info!("Connection {} registered", id);
        id
    }

    /// Remove a connection, prune its channel memberships, and notify the
    /// remaining members of each channel it was in.
    ///
    /// Idempotent: the heartbeat sweep and the socket task's cleanup may both
    /// call this for the same connection; the second call is a no-op.
    pub fn unregister(&self, conn_id: &ConnId) {
        let Some((_, conn)) = self.connections.remove(conn_id) else {
            return;
        };
        let membership = conn.membership();
        for channel in conn.channels.iter() {
            let channel = channel.key().clone();
            self.remove_member(&channel, conn_id);
            self.broadcast_to_channel(
                &channel,
                &Envelope::UserLeft {
                    channel: channel.clone(),
                    payload: membership.clone(),
                },
                None,
            );
        }
        info!("Connection {} unregistered", conn_id);
    }

    pub fn get(&self, conn_id: &ConnId) -> Option<Arc<ConnectionState>> {
        self.connections.get(conn_id).map(|c| c.clone())
    }

    /// Add a connection to a channel, creating the channel entry lazily.
    /// Returns whether the membership is new; a duplicate join changes
    /// nothing.
    pub fn subscribe(&self, conn_id: &ConnId, channel: &str) -> Result<bool> {
        let conn = self
            .connections
            .get(conn_id)
            .ok_or_else(|| BrokerError::ConnectionNotFound(conn_id.to_string()))?;

        let added = conn.channels.insert(channel.to_string());
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(*conn_id);

        debug!("Connection {} subscribed to {}", conn_id, channel);
        Ok(added)
    }

    /// Remove a connection from a channel, pruning the entry if now empty.
    /// Returns whether a membership was actually removed.
    pub fn unsubscribe(&self, conn_id: &ConnId, channel: &str) -> Result<bool> {
        let conn = self
            .connections
            .get(conn_id)
            .ok_or_else(|| BrokerError::ConnectionNotFound(conn_id.to_string()))?;

        let removed = conn.channels.remove(channel).is_some();
        self.remove_member(channel, conn_id);

        debug!("Connection {} unsubscribed from {}", conn_id, channel);
        Ok(removed)
    }

    fn remove_member(&self, channel: &str, conn_id: &ConnId) {
        if let Some(members) = self.channels.get(channel) {
            members.remove(conn_id);
        }
        self.channels.remove_if(channel, |_, members| members.is_empty());
    }

    /// Current subscribers of a channel.
    pub fn subscribers(&self, channel: &str) -> Vec<Arc<ConnectionState>> {
        match self.channels.get(channel) {
            Some(members) => members
                .iter()
                .filter_map(|id| self.connections.get(&id).map(|c| c.clone()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Fan an envelope out to every subscriber of a channel, optionally
    /// excluding one connection (the sender).
    pub fn broadcast_to_channel(&self, channel: &str, env: &Envelope, exclude: Option<&ConnId>) {
        let members = self.subscribers(channel);
        if members.is_empty() {
            return;
        }

        // Pre-serialize once.
        let json = match serde_json::to_string(env) {
            Ok(j) => j,
            Err(e) => {
                warn!("Failed to serialize fan-out envelope: {}", e);
                return;
            }
        };

        for member in members {
            if exclude.is_some_and(|id| *id == member.id) {
                continue;
            }
            if member
                .tx
                .try_send(Message::Text(Utf8Bytes::from(json.clone())))
                .is_err()
            {
                debug!("Dropped frame for slow connection {}", member.id);
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Forcibly terminate connections whose last pong is older than
    /// `max_idle_ms`. Termination follows the same cleanup path as a normal
    /// disconnect: membership pruning plus `user_left` notifications.
    pub fn sweep_stale(&self, max_idle_ms: i64) -> usize {
        let now = Utc::now().timestamp_millis();
        let stale: Vec<ConnId> = self
            .connections
            .iter()
            .filter(|entry| now - entry.value().last_pong_time() > max_idle_ms)
            .map(|entry| *entry.key())
            .collect();

        let count = stale.len();
        for id in stale {
            warn!("Heartbeat timeout, terminating connection {}", id);
            if let Some(conn) = self.get(&id) {
                // Best effort: tell the peer before tearing down.
                let _ = conn.tx.try_send(Message::Close(None));
            }
            self.unregister(&id);
        }
        count
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_conn() -> (Arc<ConnectionState>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(CONN_CHANNEL_BUFFER_SIZE);
        (Arc::new(ConnectionState::new(tx)), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let Message::Text(text) = msg {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }

    #[test]
    fn test_subscribe_unsubscribe_net_effect() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = make_conn();
        let id = registry.register(conn);

        assert!(registry.subscribe(&id, "room:1").unwrap());
        assert!(!registry.subscribe(&id, "room:1").unwrap()); // duplicate join
        assert_eq!(registry.subscribers("room:1").len(), 1);

        assert!(registry.unsubscribe(&id, "room:1").unwrap());
        assert!(registry.subscribers("room:1").is_empty());
        assert!(!registry.get(&id).unwrap().is_subscribed("room:1"));

        // A second leave removes nothing.
        assert!(!registry.unsubscribe(&id, "room:1").unwrap());
    }

    #[test]
    fn test_empty_channel_pruned() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = make_conn();
        let id = registry.register(conn);

        registry.subscribe(&id, "room:1").unwrap();
        assert_eq!(registry.channel_count(), 1);

        registry.unsubscribe(&id, "room:1").unwrap();
        assert_eq!(registry.channel_count(), 0);
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let registry = ConnectionRegistry::new();
        let (a, mut a_rx) = make_conn();
        let (b, mut b_rx) = make_conn();
        let a_id = registry.register(a);
        let b_id = registry.register(b);
        registry.subscribe(&a_id, "room:1").unwrap();
        registry.subscribe(&b_id, "room:1").unwrap();

        let env = Envelope::Broadcast {
            channel: "room:1".to_string(),
            payload: json!({"event": "ping"}),
            user_id: None,
        };
        registry.broadcast_to_channel("room:1", &env, Some(&a_id));

        assert!(drain(&mut a_rx).is_empty());
        let delivered = drain(&mut b_rx);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0], env);
    }

    #[test]
    fn test_unregister_notifies_each_channel_once() {
        let registry = ConnectionRegistry::new();
        let (a, _a_rx) = make_conn();
        let (b, mut b_rx) = make_conn();
        let a_id = registry.register(a);
        let b_id = registry.register(b);
        for channel in ["room:a", "room:b"] {
            registry.subscribe(&a_id, channel).unwrap();
            registry.subscribe(&b_id, channel).unwrap();
        }

        registry.unregister(&a_id);

        let left: Vec<Envelope> = drain(&mut b_rx);
        assert_eq!(left.len(), 2);
        let mut channels: Vec<&str> = left
            .iter()
            .map(|env| match env {
                Envelope::UserLeft { channel, payload } => {
                    assert_eq!(payload.client_id, a_id);
                    channel.as_str()
                }
                other => panic!("unexpected envelope: {:?}", other),
            })
            .collect();
        channels.sort();
        assert_eq!(channels, ["room:a", "room:b"]);

        // Neither channel retains the disconnected connection.
        assert_eq!(registry.subscribers("room:a").len(), 1);
        assert_eq!(registry.subscribers("room:b").len(), 1);

        // A second unregister is a no-op.
        registry.unregister(&a_id);
        assert!(drain(&mut b_rx).is_empty());
    }

    #[test]
    fn test_sweep_removes_only_stale_connections() {
        let registry = ConnectionRegistry::new();
        let (stale, _stale_rx) = make_conn();
        let (fresh, _fresh_rx) = make_conn();
        let stale_id = registry.register(stale);
        let fresh_id = registry.register(fresh);

        // Backdate the stale connection's pong.
        registry
            .get(&stale_id)
            .unwrap()
            .last_pong
            .store(Utc::now().timestamp_millis() - 120_000, Ordering::Relaxed);

        let swept = registry.sweep_stale(60_000);
        assert_eq!(swept, 1);
        assert!(registry.get(&stale_id).is_none());
        assert!(registry.get(&fresh_id).is_some());
    }
}
