//! Server-Sent Events primitives (spec.md §4.7, C7).
//!
//! Every connection accepted past the auth handshake carries an
//! authenticated `user_id`; the broadcaster is keyed by that id so a CDC
//! publish reaches every tab a user has open, with no notion of an
//! anonymous or topic-subscribed connection.

mod broadcast;
mod connection;
mod event;

pub use broadcast::{Frame, SseBroadcaster};
pub use connection::{ConnectionId, SseConnection};
pub use event::{SseEventExt, TypedEvent};

pub use axum::response::sse::{Event, KeepAlive, Sse};
