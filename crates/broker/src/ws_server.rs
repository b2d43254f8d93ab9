//! WebSocket server handler using Axum.

use crate::auth::SessionStore;
use crate::connection::{ConnectionRegistry, ConnectionState, CONN_CHANNEL_BUFFER_SIZE};
use crate::error::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use realtime_protocol::{
    AuthenticatedPayload, Envelope, ErrorPayload, WelcomePayload,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Broker timing configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Interval between ping frames (and between heartbeat sweeps).
    pub heartbeat_interval: Duration,
    /// A connection whose last pong is older than this is terminated.
    pub heartbeat_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
        }
    }
}

/// Shared application state.
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub sessions: Arc<dyn SessionStore>,
    pub config: BrokerConfig,
}

/// Create the WebSocket router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let connections = state.registry.connection_count();
    let channels = state.registry.channel_count();
    format!(
        r#"{{"status":"ok","connections":{},"channels":{}}}"#,
        connections, channels
    )
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection from accept to cleanup.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Bounded queue so a slow peer drops frames instead of stalling fan-out.
    let (tx, mut rx) = mpsc::channel::<Message>(CONN_CHANNEL_BUFFER_SIZE);

    let conn = Arc::new(ConnectionState::new(tx));
    let conn_id = state.registry.register(conn.clone());

    counter!("broker_connections_total").increment(1);
    gauge!("broker_active_connections").set(state.registry.connection_count() as f64);

    info!("Connection {} accepted", conn_id);

    // Forward queued messages to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let close = matches!(msg, Message::Close(_));
            if ws_tx.send(msg).await.is_err() || close {
                break;
            }
        }
    });

    // The welcome envelope carries the assigned connection id.
    let _ = conn.send(&Envelope::Welcome {
        payload: WelcomePayload { client_id: conn_id },
    });

    let mut ping_interval = interval(state.config.heartbeat_interval);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping_interval.reset(); // don't ping immediately

    loop {
        tokio::select! {
            biased;

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        if let Err(e) = handle_message(&state, &conn, msg).await {
                            warn!("Error handling message from {}: {:?}", conn_id, e);
                            let _ = conn.send(&Envelope::error(e.to_string()));
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {:?}", conn_id, e);
                        break;
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if conn.tx.try_send(Message::Ping(vec![].into())).is_err() {
                    break;
                }
            }
        }
    }

    // Cleanup: prune memberships and notify remaining channel members.
    state.registry.unregister(&conn_id);
    send_task.abort();

    counter!("broker_disconnections_total").increment(1);
    gauge!("broker_active_connections").set(state.registry.connection_count() as f64);

    info!("Connection {} closed", conn_id);
}

/// Handle a single WebSocket message.
async fn handle_message(
    state: &Arc<AppState>,
    conn: &Arc<ConnectionState>,
    msg: Message,
) -> Result<()> {
    match msg {
        Message::Text(text) => match serde_json::from_str::<Envelope>(&text) {
            Ok(env) => handle_envelope(state, conn, env).await,
            Err(_) => {
                // Malformed input is reported to the sender and otherwise
                // ignored; the connection stays open.
                counter!("broker_protocol_errors_total").increment(1);
                let _ = conn.send(&Envelope::error("Invalid message format"));
                Ok(())
            }
        },
        Message::Ping(data) => {
            conn.update_pong();
            let _ = conn.tx.try_send(Message::Pong(data));
            Ok(())
        }
        Message::Pong(_) => {
            conn.update_pong();
            Ok(())
        }
        // Binary frames are not part of the protocol.
        Message::Binary(_) => {
            let _ = conn.send(&Envelope::error("Invalid message format"));
            Ok(())
        }
        Message::Close(_) => Ok(()),
    }
}

/// Dispatch a parsed envelope from a client.
pub(crate) async fn handle_envelope(
    state: &Arc<AppState>,
    conn: &Arc<ConnectionState>,
    env: Envelope,
) -> Result<()> {
    match env {
        Envelope::Subscribe { channel } => {
            let joined = state.registry.subscribe(&conn.id, &channel)?;
            let _ = conn.send(&Envelope::Subscribed {
                channel: channel.clone(),
            });

            // Tell the other members, but only when membership actually
            // changed; a duplicate join is acked without fan-out. The joiner
            // learns of existing members through their subsequent presence
            // traffic.
            if joined {
                state.registry.broadcast_to_channel(
                    &channel,
                    &Envelope::UserJoined {
                        channel: channel.clone(),
                        payload: conn.membership(),
                    },
                    Some(&conn.id),
                );
                counter!("broker_subscriptions_total").increment(1);
            }
            Ok(())
        }
        Envelope::Unsubscribe { channel } => {
            let left = state.registry.unsubscribe(&conn.id, &channel)?;
            let _ = conn.send(&Envelope::Unsubscribed {
                channel: channel.clone(),
            });

            // No departure notification for a connection that was never a
            // member.
            if left {
                state.registry.broadcast_to_channel(
                    &channel,
                    &Envelope::UserLeft {
                        channel: channel.clone(),
                        payload: conn.membership(),
                    },
                    Some(&conn.id),
                );
            }
            Ok(())
        }
        Envelope::Broadcast {
            channel, payload, ..
        } => {
            if !conn.is_subscribed(&channel) {
                debug!(
                    "Connection {} broadcast to unjoined channel {}",
                    conn.id, channel
                );
                let _ = conn.send(&Envelope::error(
                    crate::error::BrokerError::NotSubscribed(channel.clone()).to_string(),
                ));
                return Ok(());
            }

            // Re-stamp with the sender's authenticated identity; the sender
            // never receives its own echo.
            state.registry.broadcast_to_channel(
                &channel,
                &Envelope::Broadcast {
                    channel: channel.clone(),
                    payload,
                    user_id: conn.user_id(),
                },
                Some(&conn.id),
            );

            counter!("broker_broadcasts_total").increment(1);
            Ok(())
        }
        Envelope::Authenticate { payload } => {
            let Some(token) = payload.token else {
                let _ = conn.send(&Envelope::AuthError {
                    payload: ErrorPayload {
                        message: "Missing token".to_string(),
                    },
                });
                return Ok(());
            };

            match state.sessions.validate(&token).await {
                Some(user_id) => {
                    conn.set_user_id(user_id.clone());
                    info!("Connection {} authenticated as {}", conn.id, user_id);
                    let _ = conn.send(&Envelope::Authenticated {
                        payload: AuthenticatedPayload { user_id },
                    });
                }
                None => {
                    debug!("Connection {} presented an invalid token", conn.id);
                    let _ = conn.send(&Envelope::AuthError {
                        payload: ErrorPayload {
                            message: "Invalid token".to_string(),
                        },
                    });
                }
            }
            Ok(())
        }
        // Server-to-client types arriving from a client are rejected like any
        // other bad request; the connection stays open.
        Envelope::Welcome { .. }
        | Envelope::Authenticated { .. }
        | Envelope::AuthError { .. }
        | Envelope::Subscribed { .. }
        | Envelope::Unsubscribed { .. }
        | Envelope::UserJoined { .. }
        | Envelope::UserLeft { .. }
        | Envelope::Error { .. } => {
            let _ = conn.send(&Envelope::error("Unexpected message type"));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::InMemorySessionStore;
    use realtime_protocol::AuthPayload;
    use serde_json::json;

    fn make_state() -> Arc<AppState> {
        let sessions = InMemorySessionStore::new();
        sessions.insert("token-a", "user-a");
        Arc::new(AppState {
            registry: Arc::new(ConnectionRegistry::new()),
            sessions: Arc::new(sessions),
            config: BrokerConfig::default(),
        })
    }

    fn make_conn(state: &Arc<AppState>) -> (Arc<ConnectionState>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(CONN_CHANNEL_BUFFER_SIZE);
        let conn = Arc::new(ConnectionState::new(tx));
        state.registry.register(conn.clone());
        (conn, rx)
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

    #[tokio::test]
    async fn test_subscribe_acks_and_notifies_others() {
        let state = make_state();
        let (a, mut a_rx) = make_conn(&state);
        let (b, mut b_rx) = make_conn(&state);

        handle_envelope(&state, &a, Envelope::Subscribe { channel: "room:1".into() })
            .await
            .unwrap();
        // Joiner gets the ack, nobody else is in the room yet.
        assert_eq!(
            drain(&mut a_rx),
            vec![Envelope::Subscribed { channel: "room:1".into() }]
        );

        handle_envelope(&state, &b, Envelope::Subscribe { channel: "room:1".into() })
            .await
            .unwrap();
        // Existing member sees the join, the joiner does not.
        let to_a = drain(&mut a_rx);
        assert_eq!(to_a.len(), 1);
        assert!(matches!(
            &to_a[0],
            Envelope::UserJoined { channel, payload }
                if channel == "room:1" && payload.client_id == b.id
        ));
        assert_eq!(
            drain(&mut b_rx),
            vec![Envelope::Subscribed { channel: "room:1".into() }]
        );
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_acked_without_refanout() {
        let state = make_state();
        let (a, mut a_rx) = make_conn(&state);
        let (b, mut b_rx) = make_conn(&state);
        for conn in [&a, &b] {
            handle_envelope(&state, conn, Envelope::Subscribe { channel: "room:1".into() })
                .await
                .unwrap();
        }
        drain(&mut a_rx);
        drain(&mut b_rx);

        // B joins again; membership is unchanged.
        handle_envelope(&state, &b, Envelope::Subscribe { channel: "room:1".into() })
            .await
            .unwrap();

        assert_eq!(
            drain(&mut b_rx),
            vec![Envelope::Subscribed { channel: "room:1".into() }]
        );
        assert!(
            drain(&mut a_rx).is_empty(),
            "members must not see a join for an existing membership"
        );
        assert_eq!(state.registry.subscribers("room:1").len(), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_without_membership_notifies_nobody() {
        let state = make_state();
        let (a, mut a_rx) = make_conn(&state);
        let (c, mut c_rx) = make_conn(&state);
        handle_envelope(&state, &a, Envelope::Subscribe { channel: "room:1".into() })
            .await
            .unwrap();
        drain(&mut a_rx);

        // C was never a member of the room.
        handle_envelope(&state, &c, Envelope::Unsubscribe { channel: "room:1".into() })
            .await
            .unwrap();
        assert_eq!(
            drain(&mut c_rx),
            vec![Envelope::Unsubscribed { channel: "room:1".into() }]
        );
        assert!(
            drain(&mut a_rx).is_empty(),
            "members must not see a departure for a non-member"
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_acks_and_notifies_remaining() {
        let state = make_state();
        let (a, mut a_rx) = make_conn(&state);
        let (b, mut b_rx) = make_conn(&state);
        for conn in [&a, &b] {
            handle_envelope(&state, conn, Envelope::Subscribe { channel: "room:1".into() })
                .await
                .unwrap();
        }
        drain(&mut a_rx);
        drain(&mut b_rx);

        handle_envelope(&state, &a, Envelope::Unsubscribe { channel: "room:1".into() })
            .await
            .unwrap();

        assert_eq!(
            drain(&mut a_rx),
            vec![Envelope::Unsubscribed { channel: "room:1".into() }]
        );
        let to_b = drain(&mut b_rx);
        assert_eq!(to_b.len(), 1);
        assert!(matches!(
            &to_b[0],
            Envelope::UserLeft { channel, payload }
                if channel == "room:1" && payload.client_id == a.id
        ));
    }

    #[tokio::test]
    async fn test_broadcast_requires_membership() {
        let state = make_state();
        let (a, mut a_rx) = make_conn(&state);

        handle_envelope(
            &state,
            &a,
            Envelope::Broadcast {
                channel: "room:1".into(),
                payload: json!({"event": "ping"}),
                user_id: None,
            },
        )
        .await
        .unwrap();

        let replies = drain(&mut a_rx);
        assert_eq!(replies.len(), 1);
        assert!(matches!(
            &replies[0],
            Envelope::Error { payload } if payload.message.contains("Not subscribed")
        ));
    }

    #[tokio::test]
    async fn test_broadcast_stamps_sender_identity_and_skips_sender() {
        let state = make_state();
        let (a, mut a_rx) = make_conn(&state);
        let (b, mut b_rx) = make_conn(&state);
        handle_envelope(
            &state,
            &a,
            Envelope::Authenticate {
                payload: AuthPayload { token: Some("token-a".into()) },
            },
        )
        .await
        .unwrap();
        for conn in [&a, &b] {
            handle_envelope(&state, conn, Envelope::Subscribe { channel: "room:1".into() })
                .await
                .unwrap();
        }
        drain(&mut a_rx);
        drain(&mut b_rx);

        handle_envelope(
            &state,
            &a,
            Envelope::Broadcast {
                channel: "room:1".into(),
                payload: json!({"event": "ping"}),
                // A forged userId from the client is ignored.
                user_id: Some("someone-else".into()),
            },
        )
        .await
        .unwrap();

        assert!(drain(&mut a_rx).is_empty(), "sender must not see its own echo");
        let to_b = drain(&mut b_rx);
        assert_eq!(to_b.len(), 1);
        assert!(matches!(
            &to_b[0],
            Envelope::Broadcast { channel, user_id, .. }
                if channel == "room:1" && user_id.as_deref() == Some("user-a")
        ));
    }

    #[tokio::test]
    async fn test_authenticate_failure_leaves_connection_usable() {
        let state = make_state();
        let (a, mut a_rx) = make_conn(&state);

        handle_envelope(
            &state,
            &a,
            Envelope::Authenticate { payload: AuthPayload { token: None } },
        )
        .await
        .unwrap();
        handle_envelope(
            &state,
            &a,
            Envelope::Authenticate {
                payload: AuthPayload { token: Some("bogus".into()) },
            },
        )
        .await
        .unwrap();

        let replies = drain(&mut a_rx);
        assert_eq!(replies.len(), 2);
        assert!(replies
            .iter()
            .all(|env| matches!(env, Envelope::AuthError { .. })));
        assert_eq!(a.user_id(), None);

        // Still connected and allowed to subscribe.
        handle_envelope(&state, &a, Envelope::Subscribe { channel: "room:1".into() })
            .await
            .unwrap();
        assert_eq!(
            drain(&mut a_rx),
            vec![Envelope::Subscribed { channel: "room:1".into() }]
        );
    }

    #[tokio::test]
    async fn test_server_side_type_from_client_rejected() {
        let state = make_state();
        let (a, mut a_rx) = make_conn(&state);

        handle_envelope(
            &state,
            &a,
            Envelope::Subscribed { channel: "room:1".into() },
        )
        .await
        .unwrap();

        let replies = drain(&mut a_rx);
        assert_eq!(replies.len(), 1);
        assert!(matches!(
            &replies[0],
            Envelope::Error { payload } if payload.message == "Unexpected message type"
        ));
        assert_eq!(state.registry.channel_count(), 0);
    }
}
