//! Client runtime and channel layer for the realtime broker.
//!
//! Two levels of API:
//! - [`RealtimeClient`]: one logical connection to the broker — connect,
//!   authenticate, subscribe/unsubscribe, broadcast, and automatic
//!   reconnect-with-backoff that replays the session (accepted token plus the
//!   full desired-subscription set).
//! - [`Channel`]: a named channel as broadcast + presence, with its own
//!   subscribe state machine independent of the socket's ups and downs.
//!
//! ```no_run
//! use realtime_client::{ClientConfig, RealtimeClient};
//! use serde_json::json;
//!
//! # async fn run() -> realtime_client::Result<()> {
//! let client = RealtimeClient::new("ws://localhost:4000/ws", ClientConfig::default());
//! client.connect().await?;
//! client.authenticate("token-a").await?;
//!
//! let room = client.channel("room:1");
//! room.on_broadcast("cursor", |msg| println!("cursor: {}", msg.payload));
//! room.on_presence(|diff| println!("presence change for {}", diff.key));
//! room.subscribe();
//! # room.track(json!({"status": "online"}))?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod error;
pub mod presence;
pub mod runtime;

pub use channel::{BroadcastMessage, Channel, ChannelState, ChannelStatus, PRESENCE_EVENT};
pub use error::{ClientError, Result};
pub use presence::{PresenceDiff, PresenceMap, PresenceRecord};
pub use runtime::{ClientConfig, ClientEvent, EventKind, LinkState, ListenerId, RealtimeClient};
