//! Wire protocol shared by the realtime broker and client.
//!
//! Every frame on the wire is a JSON object of the shape
//! `{"type": <string>, "channel"?: <string>, "payload"?: <any>, "userId"?: <id>}`.
//! The envelope is a closed enum: a frame with an unknown `type` fails to
//! deserialize, and the broker reports that back to the sender instead of
//! silently dropping it.
//!
//! Heartbeat uses the transport's native ping/pong control frames and never
//! appears as an envelope.

pub mod envelope;

pub use envelope::{
    AuthPayload, AuthenticatedPayload, ConnId, Envelope, ErrorPayload, MembershipPayload,
    WelcomePayload,
};
