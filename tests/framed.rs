//! Sessions over a TCP connection.
use birpc::{Peer, Registry, Service, ServerStream};
use futures::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct EchoMessage {
    data: String,
}

fn echo_registry() -> Registry {
    let mut service = Service::new("Echo");
    service
        .add_unary("Call", |_cx, message: EchoMessage| async move { Ok(message) })
        .add_stream("Stream", true, true, |mut stream: ServerStream| async move {
            while let Some(message) = stream.receive::<EchoMessage>().await? {
                stream.send(&message).await?;
            }
            Ok(())
        });
    let mut registry = Registry::new();
    registry.register(service).unwrap();
    registry
}

fn connect_framed(peer: &Peer, stream: async_std::net::TcpStream) -> birpc::Session {
    let (read, write) = stream.split();
    peer.connect_framed(write.into_sink(), birpc::utils::read_to_stream(read))
}

/// Accept one connection on a fresh port and connect to it.
async fn connect(
    server_peer: Peer,
    client_peer: Peer,
) -> anyhow::Result<(birpc::Session, birpc::Session)> {
    let listener = async_std::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let accept = async_std::task::spawn(async move {
        let (stream, _) = listener.accept().await?;
        Ok::<_, std::io::Error>(connect_framed(&server_peer, stream))
    });
    let client = connect_framed(
        &client_peer,
        async_std::net::TcpStream::connect(addr).await?,
    );
    let server = accept.await?;
    Ok((client, server))
}

#[async_std::test]
async fn unary_and_stream() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let peer = Peer::new(echo_registry());
    let (client, _server) = connect(peer.clone(), peer).await?;

    let foo_message = EchoMessage { data: "foo".into() };
    let bar_message = EchoMessage { data: "bar".into() };
    let (foo, bar) = futures::join!(
        client.invoke::<_, EchoMessage>("Echo.Call", &foo_message),
        client.invoke::<_, EchoMessage>("Echo.Call", &bar_message),
    );
    assert_eq!(foo?.data, "foo");
    assert_eq!(bar?.data, "bar");

    let mut stream = client.open_stream("Echo.Stream");
    for data in &["a", "b", "c"] {
        stream.send(&EchoMessage { data: data.to_string() }).await?;
    }
    for data in &["a", "b", "c"] {
        let reply = stream.receive::<EchoMessage>().await?;
        assert_eq!(reply.map(|message| message.data), Some(data.to_string()));
    }
    stream.close().await?;
    assert_eq!(stream.receive::<EchoMessage>().await?, None);
    Ok(())
}

#[async_std::test]
async fn large_payload() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let peer = Peer::new(echo_registry());
    let (client, _server) = connect(peer.clone(), peer).await?;

    let data = "x".repeat(100_000);
    let reply: EchoMessage = client
        .invoke("Echo.Call", &EchoMessage { data: data.clone() })
        .await?;
    assert_eq!(reply.data, data);
    Ok(())
}

#[async_std::test]
async fn disconnect_ends_session() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let peer = Peer::new(echo_registry());
    let (client, server) = connect(peer.clone(), peer).await?;

    client.close();
    async_std::future::timeout(Duration::from_secs(5), server.closed()).await?;
    Ok(())
}

#[async_std::test]
async fn encode_failure_is_not_fatal() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let counters = Arc::new(birpc::Counters::default());
    let peer = Peer::new(echo_registry());
    let client_peer = peer.clone().with_telemetry(counters.clone());
    let (client, _server) = connect(peer, client_peer).await?;

    let method = "m".repeat(usize::from(u16::MAX) + 1);
    let result = client
        .invoke_with::<_, EchoMessage>(
            &method,
            &EchoMessage { data: "lost".into() },
            birpc::CallOptions::default().with_timeout(Duration::from_millis(100)),
        )
        .await;
    assert!(matches!(result, Err(birpc::CallError::Timeout(_))));
    assert_eq!(counters.fail_count(), 1);

    let reply: EchoMessage = client
        .invoke("Echo.Call", &EchoMessage { data: "kept".into() })
        .await?;
    assert_eq!(reply.data, "kept");
    Ok(())
}
