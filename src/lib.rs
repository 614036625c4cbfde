//! Bidirectional, multiplexed RPC between two peers.
//!
//! Both peers of a [Session] can call unary methods and open streams on the
//! other peer. Many calls and streams share one connection. Each request
//! carries an ID that correlates it with its responses so that a slow call
//! never blocks other calls.
//!
//! Handlers are collected in [Service]s and added to a [Registry]. A [Peer]
//! owns the registry and creates a [Session] for every connection, be it an
//! in-process channel, a byte stream or a websocket.
//!
//! Application messages are converted to opaque [Payload]s by a [Codec].
//! [JsonCodec] is used by default.
mod codec;
mod config;
mod envelope;
mod error;
mod header;
mod lifetime;
pub mod packet;
mod packet_stream;
mod peer;
mod registry;
mod session;
mod stream;
mod telemetry;
#[cfg(any(test, feature = "test-server"))]
pub mod test_server;
pub mod transport;
pub mod utils;

pub use tungstenite;

#[doc(inline)]
pub use codec::{Codec, CodecError, JsonCodec};
#[doc(inline)]
pub use config::Config;
#[doc(inline)]
pub use envelope::{Envelope, Payload, Request, Response, ResponseContent};
#[doc(inline)]
pub use error::{kind as error_kind, Error};
#[doc(inline)]
pub use lifetime::Lifetime;
#[doc(inline)]
pub use packet_stream::{NextPacketError, PacketStream, MAX_BODY_LEN};
#[doc(inline)]
pub use peer::Peer;
#[doc(inline)]
pub use registry::{
    CallContext, HandlerError, MethodDescriptor, Registry, RegistryError, Service,
    StreamDescriptor, StreamHandler, UnaryHandler,
};
#[doc(inline)]
pub use session::{CallError, CallOptions, Session, SessionClosed};
#[doc(inline)]
pub use stream::{ClientStream, ServerStream, StreamError};
#[doc(inline)]
pub use telemetry::{Counters, Telemetry};
