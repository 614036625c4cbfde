//! TCP server that serves an echo service. Used for testing clients written
//! in other languages.
use futures::prelude::*;

use crate::config::Config;
use crate::peer::Peer;
use crate::registry::{Registry, Service};
use crate::stream::ServerStream;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EchoMessage {
    pub data: String,
}

/// Service `Echo` with the unary method `Call` and the stream `Stream`. Both
/// reply with the messages they receive.
pub fn echo_service() -> Service {
    let mut service = Service::new("Echo");
    service
        .add_unary("Call", |_cx, message: EchoMessage| async move {
            Ok(message)
        })
        .add_stream(
            "Stream",
            true,
            true,
            |mut stream: ServerStream| async move {
                stream.ready().await?;
                while let Some(message) = stream.receive::<EchoMessage>().await? {
                    stream.send(&message).await?;
                }
                Ok(())
            },
        );
    service
}

pub async fn run(
    bind_addr: impl async_std::net::ToSocketAddrs,
    config: Config,
) -> anyhow::Result<()> {
    let mut registry = Registry::new();
    registry.register(echo_service())?;
    let peer = Peer::new(registry).with_config(config);
    let listener = async_std::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = ?listener.local_addr()?, "listening");
    loop {
        let (stream, addr) = listener.accept().await?;
        tracing::info!(?addr, "accepted connection");
        async_std::task::spawn(handle_incoming(peer.clone(), stream, addr));
    }
}

async fn handle_incoming(peer: Peer, stream: async_std::net::TcpStream, addr: std::net::SocketAddr) {
    let (read, write) = stream.split();
    let session = peer.connect_framed(write.into_sink(), crate::utils::read_to_stream(read));
    session.closed().await;
    tracing::info!(?addr, "connection closed");
}
