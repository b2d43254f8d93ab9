//! Local realtime pub/sub broker.
//!
//! Stands in for a hosted realtime messaging service during development:
//! - Accepts WebSocket connections and assigns each a connection id
//! - Tracks per-connection channel subscriptions in a shared registry
//! - Fans broadcasts out to every other subscriber of a channel
//! - Emits `user_joined`/`user_left` membership notifications
//! - Authenticates connections against a session-token store
//! - Reaps dead connections via ping/pong heartbeats
//!
//! ## Architecture
//!
//! ```text
//! WebSocket clients
//!         ↓
//! ws_server (axum, one task per connection)
//!         ↓
//! ConnectionRegistry (DashMap: connections + channel index)
//!         ↓
//! fan-out to subscriber queues (bounded, try_send)
//! ```
//!
//! Everything is single-process and in-memory: no persistence, no ordering
//! guarantees beyond per-channel delivery.

pub mod auth;
pub mod connection;
pub mod error;
pub mod ws_server;

pub use auth::{InMemorySessionStore, SessionStore};
pub use connection::{ConnectionRegistry, ConnectionState};
pub use error::{BrokerError, Result};
pub use ws_server::{create_router, AppState, BrokerConfig};
