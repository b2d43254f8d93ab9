//! Per-channel presence aggregation.
//!
//! A presence map goes from participant key (authenticated user id, or the
//! connection id for anonymous members) to the ordered list of records that
//! participant has contributed.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// One presence record contributed by a participant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceRecord {
    /// Authenticated user id, if the member was authenticated.
    pub user_id: Option<String>,
    /// Connection id, when known (membership events carry it, tracked state
    /// broadcasts do not).
    pub client_id: Option<String>,
    /// Participant-contributed state (`null` until the member tracks).
    pub state: Value,
}

/// The delta reported to presence callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceDiff {
    /// Participant key the delta applies to.
    pub key: String,
    pub joins: Vec<PresenceRecord>,
    pub leaves: Vec<PresenceRecord>,
}

/// Aggregated presence for one channel.
#[derive(Debug, Default)]
pub struct PresenceMap {
    entries: HashMap<String, Vec<PresenceRecord>>,
}

impl PresenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A member joined: append their initial record.
    pub fn join(&mut self, key: &str, record: PresenceRecord) -> PresenceDiff {
        self.entries
            .entry(key.to_string())
            .or_default()
            .push(record.clone());
        PresenceDiff {
            key: key.to_string(),
            joins: vec![record],
            leaves: Vec::new(),
        }
    }

    /// A member tracked new state: replace their records, preserving the
    /// connection id learned at join time.
    pub fn track(&mut self, key: &str, state: Value) -> PresenceDiff {
        let entry = self.entries.entry(key.to_string()).or_default();
        let client_id = entry.first().and_then(|r| r.client_id.clone());
        let record = PresenceRecord {
            user_id: Some(key.to_string()),
            client_id,
            state,
        };
        *entry = vec![record.clone()];
        PresenceDiff {
            key: key.to_string(),
            joins: vec![record],
            leaves: Vec::new(),
        }
    }

    /// A member left: drop every record they contributed.
    pub fn leave(&mut self, key: &str) -> Option<PresenceDiff> {
        self.entries.remove(key).map(|leaves| PresenceDiff {
            key: key.to_string(),
            joins: Vec::new(),
            leaves,
        })
    }

    /// Snapshot of the full map.
    pub fn state(&self) -> HashMap<String, Vec<PresenceRecord>> {
        self.entries.clone()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn joined_record(client_id: &str) -> PresenceRecord {
        PresenceRecord {
            user_id: Some("user-a".to_string()),
            client_id: Some(client_id.to_string()),
            state: Value::Null,
        }
    }

    #[test]
    fn test_join_then_leave_removes_entry() {
        let mut map = PresenceMap::new();
        map.join("user-a", joined_record("conn-1"));
        assert!(map.state().contains_key("user-a"));

        let diff = map.leave("user-a").unwrap();
        assert_eq!(diff.leaves.len(), 1);
        assert!(map.is_empty());
        assert!(map.leave("user-a").is_none());
    }

    #[test]
    fn test_track_replaces_state_and_keeps_client_id() {
        let mut map = PresenceMap::new();
        map.join("user-a", joined_record("conn-1"));

        let diff = map.track("user-a", json!({"status": "online"}));
        assert_eq!(diff.joins.len(), 1);
        assert_eq!(diff.joins[0].client_id.as_deref(), Some("conn-1"));

        let state = map.state();
        assert_eq!(state["user-a"].len(), 1);
        assert_eq!(state["user-a"][0].state, json!({"status": "online"}));
    }

    #[test]
    fn test_track_without_join_creates_entry() {
        let mut map = PresenceMap::new();
        let diff = map.track("user-b", json!({"status": "away"}));
        assert_eq!(diff.joins[0].client_id, None);
        assert!(map.state().contains_key("user-b"));
    }
}
