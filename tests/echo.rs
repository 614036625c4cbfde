//! Two peers connected by an in-process channel call each other.
use birpc::{Peer, Registry, Service, ServerStream};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct EchoMessage {
    data: String,
}

fn message(data: &str) -> EchoMessage {
    EchoMessage {
        data: data.to_string(),
    }
}

fn echo_peer() -> Peer {
    let mut service = Service::new("Echo");
    service
        .add_unary("Call", |_cx, message: EchoMessage| async move {
            if message.data == "slow" {
                async_std::task::sleep(Duration::from_millis(50)).await;
            }
            Ok(message)
        })
        .add_stream("Stream", true, true, |mut stream: ServerStream| async move {
            stream.ready().await?;
            while let Some(message) = stream.receive::<EchoMessage>().await? {
                stream.send(&message).await?;
            }
            Ok(())
        })
        .add_stream("Fail", true, false, |mut stream: ServerStream| async move {
            let _ = stream.receive::<EchoMessage>().await?;
            Err(anyhow::Error::new(birpc::Error::new("Refused", "not today")))
        });
    let mut registry = Registry::new();
    registry.register(service).unwrap();
    Peer::new(registry)
}

fn connect() -> (birpc::Session, birpc::Session) {
    let (a, b) = birpc::transport::channel::pair(16);
    (echo_peer().connect_channel(a), echo_peer().connect_channel(b))
}

#[async_std::test]
async fn unary_echo() {
    let _ = tracing_subscriber::fmt::try_init();
    let (client, server) = connect();

    let foo_message = message("foo");
    let bar_message = message("bar");
    let foo = client.invoke::<_, EchoMessage>("Echo.Call", &foo_message);
    let bar = client.invoke::<_, EchoMessage>("Echo.Call", &bar_message);
    let (foo, bar) = futures::join!(foo, bar);
    assert_eq!(foo.unwrap(), message("foo"));
    assert_eq!(bar.unwrap(), message("bar"));
    assert_eq!(client.pending_count(), 0);

    // The other direction works over the same connection
    let reply: EchoMessage = server.invoke("Echo.Call", &message("back")).await.unwrap();
    assert_eq!(reply, message("back"));
}

#[async_std::test]
async fn concurrent_calls_are_not_mixed_up() {
    let _ = tracing_subscriber::fmt::try_init();
    let (client, _server) = connect();

    let calls = (0..64)
        .map(|i| {
            let client = client.clone();
            async_std::task::spawn(async move {
                let data = if i % 7 == 0 {
                    "slow".to_string()
                } else {
                    format!("call-{}", i)
                };
                let reply = client
                    .invoke::<_, EchoMessage>("Echo.Call", &EchoMessage { data: data.clone() })
                    .await;
                (data, reply)
            })
        })
        .collect::<Vec<_>>();
    for (data, reply) in futures::future::join_all(calls).await {
        assert_eq!(reply.unwrap().data, data);
    }
    assert_eq!(client.pending_count(), 0);
}

#[async_std::test]
async fn unknown_method() {
    let _ = tracing_subscriber::fmt::try_init();
    let (client, _server) = connect();
    let error = client
        .invoke::<_, EchoMessage>("Echo.Nope", &message("foo"))
        .await
        .unwrap_err();
    let remote = error.remote().unwrap();
    assert!(remote.is(birpc::error_kind::METHOD_NOT_FOUND));
    assert_eq!(client.pending_count(), 0);
}

#[async_std::test]
async fn stream_echo() {
    let _ = tracing_subscriber::fmt::try_init();
    let (client, server) = connect();

    let mut stream = client.open_stream("Echo.Stream");
    for data in &["a", "b", "c"] {
        stream.send(&message(data)).await.unwrap();
    }
    stream.wait_until_ready().await.unwrap();
    for data in &["a", "b", "c"] {
        let reply = stream.receive::<EchoMessage>().await.unwrap();
        assert_eq!(reply, Some(message(data)));
    }
    assert_eq!(server.open_stream_count(), 1);

    stream.close().await.unwrap();
    assert_eq!(stream.receive::<EchoMessage>().await.unwrap(), None);
    assert_eq!(server.open_stream_count(), 0);
    assert_eq!(client.pending_count(), 0);
}

#[async_std::test]
async fn stream_error() {
    let _ = tracing_subscriber::fmt::try_init();
    let (client, _server) = connect();

    let mut stream = client.open_stream("Echo.Fail");
    stream.send(&message("a")).await.unwrap();
    let error = stream.receive::<EchoMessage>().await.unwrap_err();
    assert_eq!(error.remote(), Some(&birpc::Error::new("Refused", "not today")));
    assert_eq!(stream.receive::<EchoMessage>().await.unwrap(), None);
}

#[async_std::test]
async fn unknown_stream() {
    let _ = tracing_subscriber::fmt::try_init();
    let (client, _server) = connect();

    let mut stream = client.open_stream("Echo.Nope");
    stream.send(&message("a")).await.unwrap();
    let error = stream.receive::<EchoMessage>().await.unwrap_err();
    assert!(error
        .remote()
        .unwrap()
        .is(birpc::error_kind::STREAM_NOT_FOUND));
}

#[async_std::test]
async fn bye_closes_streams() {
    let _ = tracing_subscriber::fmt::try_init();
    let (client, server) = connect();

    let mut first = client.open_stream("Echo.Stream");
    let mut second = client.open_stream("Echo.Stream");
    first.send(&message("a")).await.unwrap();
    second.send(&message("b")).await.unwrap();
    assert_eq!(first.receive::<EchoMessage>().await.unwrap(), Some(message("a")));
    assert_eq!(second.receive::<EchoMessage>().await.unwrap(), Some(message("b")));
    assert_eq!(server.open_stream_count(), 2);

    client.bye().await.unwrap();
    assert_eq!(first.receive::<EchoMessage>().await.unwrap(), None);
    assert_eq!(second.receive::<EchoMessage>().await.unwrap(), None);
    assert_eq!(server.open_stream_count(), 0);

    // Still usable for unary calls
    let reply: EchoMessage = client.invoke("Echo.Call", &message("after")).await.unwrap();
    assert_eq!(reply, message("after"));
}

#[async_std::test]
async fn session_close_ends_client_streams() {
    let _ = tracing_subscriber::fmt::try_init();
    let (client, _server) = connect();

    let mut stream = client.open_stream("Echo.Stream");
    stream.send(&message("a")).await.unwrap();
    assert_eq!(stream.receive::<EchoMessage>().await.unwrap(), Some(message("a")));
    client.close();
    let end = async_std::future::timeout(Duration::from_secs(5), stream.receive::<EchoMessage>())
        .await
        .unwrap();
    assert_eq!(end.unwrap(), None);
}

#[async_std::test]
async fn ended_stream_does_not_reopen() {
    let _ = tracing_subscriber::fmt::try_init();
    let (client, server) = connect();

    let mut stream = client.open_stream("Echo.Stream");
    stream.send(&message("a")).await.unwrap();
    assert_eq!(stream.receive::<EchoMessage>().await.unwrap(), Some(message("a")));
    stream.close().await.unwrap();
    assert!(matches!(
        stream.send(&message("closed")).await,
        Err(birpc::StreamError::Ended)
    ));
    assert_eq!(stream.receive::<EchoMessage>().await.unwrap(), None);
    assert_eq!(server.open_stream_count(), 0);

    assert!(matches!(
        stream.send(&message("late")).await,
        Err(birpc::StreamError::Ended)
    ));
    drop(stream);
    // A round trip makes sure nothing else is in flight
    let reply: EchoMessage = client.invoke("Echo.Call", &message("sync")).await.unwrap();
    assert_eq!(reply, message("sync"));
    assert_eq!(server.open_stream_count(), 0);
}

#[async_std::test]
async fn stream_ended_by_error_does_not_reopen() {
    let _ = tracing_subscriber::fmt::try_init();
    let (client, server) = connect();

    let mut stream = client.open_stream("Echo.Fail");
    stream.send(&message("a")).await.unwrap();
    assert!(stream.receive::<EchoMessage>().await.is_err());
    assert_eq!(stream.receive::<EchoMessage>().await.unwrap(), None);
    assert!(matches!(
        stream.send(&message("late")).await,
        Err(birpc::StreamError::Ended)
    ));
    let reply: EchoMessage = client.invoke("Echo.Call", &message("sync")).await.unwrap();
    assert_eq!(reply, message("sync"));
    assert_eq!(server.open_stream_count(), 0);
}

#[async_std::test]
async fn closed_session_refuses_calls() {
    let _ = tracing_subscriber::fmt::try_init();
    let (client, server) = connect();

    client.close();
    client.closed().await;
    let result = async_std::future::timeout(
        Duration::from_secs(2),
        client.invoke::<_, EchoMessage>("Echo.Call", &message("x")),
    )
    .await
    .unwrap();
    assert!(matches!(result, Err(birpc::CallError::SessionClosed(_))));
    assert_eq!(client.pending_count(), 0);

    let stream = client.open_stream("Echo.Stream");
    assert!(matches!(
        stream.send(&message("x")).await,
        Err(birpc::StreamError::SessionClosed(_))
    ));
    assert_eq!(server.open_stream_count(), 0);
}
