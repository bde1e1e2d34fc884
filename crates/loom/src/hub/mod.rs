//! Event Hub
//!
//! Tracks connected clients and which projects each one watches, and routes
//! project-scoped events to exactly the subscribed clients.

mod actor;
mod connection;
mod protocol;

pub use actor::{Hub, HubConfig, HubError, HubHandle, Outbox, UiResponseSink};
pub use connection::{ConnectionConfig, serve_connection};
pub use protocol::{
    ClientAction, EventBody, EventFrame, EventKind, HandshakeFrame, UiRequestPayload, parse_actions,
};
