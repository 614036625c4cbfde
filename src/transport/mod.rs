//! Adapters that connect a [crate::Session] to a concrete transport.
//!
//! Every adapter feeds envelopes received from the transport into the session
//! and writes the envelopes the session produces back to the transport. Use
//! the `connect_*` methods of [crate::Peer] to create sessions over them.
pub mod channel;
pub(crate) mod framed;
pub(crate) mod websocket;
