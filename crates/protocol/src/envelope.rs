//! The message envelope and its typed payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique connection identifier, generated by the broker on accept.
pub type ConnId = Uuid;

// ============================================================================
// Payloads
// ============================================================================

/// Payload of a `welcome` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomePayload {
    /// The connection id assigned by the broker.
    #[serde(rename = "clientId")]
    pub client_id: ConnId,
}

/// Payload of an `authenticate` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthPayload {
    /// Session token to validate. A missing token is rejected with
    /// `auth_error` rather than a parse failure.
    pub token: Option<String>,
}

/// Payload of an `authenticated` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedPayload {
    /// The user id the session token resolved to.
    #[serde(rename = "userId")]
    pub user_id: String,
}

/// Payload of `auth_error` and `error` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Payload of `user_joined` and `user_left` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipPayload {
    /// Authenticated user id of the member, if any.
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    /// Connection id of the member.
    #[serde(rename = "clientId")]
    pub client_id: ConnId,
}

// ============================================================================
// Envelope
// ============================================================================

/// The unit of wire transfer, tagged by `type`.
///
/// Variants cover both directions; the broker rejects server-to-client types
/// arriving from a client at dispatch time, not at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// broker → client: connection accepted.
    Welcome { payload: WelcomePayload },
    /// client → broker: present a session token.
    Authenticate { payload: AuthPayload },
    /// broker → client: auth accepted.
    Authenticated { payload: AuthenticatedPayload },
    /// broker → client: auth rejected or token missing.
    AuthError { payload: ErrorPayload },
    /// client → broker: join a channel.
    Subscribe { channel: String },
    /// broker → client: join acknowledged.
    Subscribed { channel: String },
    /// client → broker: leave a channel.
    Unsubscribe { channel: String },
    /// broker → client: leave acknowledged.
    Unsubscribed { channel: String },
    /// Publication. Client → broker carries no `userId`; the broker stamps
    /// the sender's authenticated user id on the delivered copy.
    Broadcast {
        channel: String,
        payload: Value,
        #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
    /// broker → client: a member joined the channel.
    UserJoined {
        channel: String,
        payload: MembershipPayload,
    },
    /// broker → client: a member left the channel.
    UserLeft {
        channel: String,
        payload: MembershipPayload,
    },
    /// broker → client: malformed or rejected request.
    Error { payload: ErrorPayload },
}

impl Envelope {
    /// Shorthand for an `error` envelope.
    pub fn error(message: impl Into<String>) -> Self {
        Envelope::Error {
            payload: ErrorPayload {
                message: message.into(),
            },
        }
    }

    /// The channel this envelope concerns, if it has one.
    pub fn channel(&self) -> Option<&str> {
        match self {
            Envelope::Subscribe { channel }
            | Envelope::Subscribed { channel }
            | Envelope::Unsubscribe { channel }
            | Envelope::Unsubscribed { channel }
            | Envelope::Broadcast { channel, .. }
            | Envelope::UserJoined { channel, .. }
            | Envelope::UserLeft { channel, .. } => Some(channel),
            _ => None,
        }
    }
}
