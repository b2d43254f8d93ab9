//! Session-token validation.
//!
//! The broker treats the token validator as an external collaborator: it only
//! needs a token → user id lookup. Authentication is optional; an
//! unauthenticated connection can still subscribe and receive.

use async_trait::async_trait;
use dashmap::DashMap;

/// Maps a session token to the user id it belongs to.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Returns the user id for a valid token, `None` otherwise.
    async fn validate(&self, token: &str) -> Option<String>;
}

/// In-memory session store (token → user id).
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, String>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session token for a user.
    pub fn insert(&self, token: impl Into<String>, user_id: impl Into<String>) {
        self.sessions.insert(token.into(), user_id.into());
    }

    /// Build a store from `token:user_id` pairs (used by the binary to seed
    /// sessions from the environment).
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Self {
        let store = Self::new();
        for pair in pairs {
            if let Some((token, user_id)) = pair.split_once(':') {
                store.insert(token.trim(), user_id.trim());
            }
        }
        store
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn validate(&self, token: &str) -> Option<String> {
        self.sessions.get(token).map(|entry| entry.clone())
    }
}
