//! Sessions over an in-memory websocket connection.
use birpc::tungstenite::Message;
use birpc::utils::Duplex;
use birpc::{Envelope, Peer, Registry, Request, Response, Service};
use futures::channel::mpsc;
use futures::prelude::*;
use std::sync::Arc;
use std::time::Duration;

type WebSocket = Duplex<
    stream::Map<mpsc::Receiver<Message>, fn(Message) -> Result<Message, birpc::tungstenite::Error>>,
    sink::SinkMapErr<mpsc::Sender<Message>, fn(mpsc::SendError) -> birpc::tungstenite::Error>,
>;

fn websocket(receiver: mpsc::Receiver<Message>, sender: mpsc::Sender<Message>) -> WebSocket {
    Duplex::new(
        receiver.map(Ok as fn(Message) -> Result<Message, birpc::tungstenite::Error>),
        sender.sink_map_err(
            (|_: mpsc::SendError| birpc::tungstenite::Error::ConnectionClosed)
                as fn(mpsc::SendError) -> birpc::tungstenite::Error,
        ),
    )
}

/// Two connected in-memory websockets.
fn websocket_pair() -> (WebSocket, WebSocket) {
    let (a_sender, b_receiver) = mpsc::channel(16);
    let (b_sender, a_receiver) = mpsc::channel(16);
    (websocket(a_receiver, a_sender), websocket(b_receiver, b_sender))
}

fn echo_peer() -> Peer {
    let mut service = Service::new("Echo");
    service.add_unary("Call", |_cx, data: String| async move { Ok(data) });
    let mut registry = Registry::new();
    registry.register(service).unwrap();
    Peer::new(registry)
}

fn payload(value: &str) -> birpc::Payload {
    birpc::Payload::new(serde_json::to_vec(value).unwrap())
}

#[async_std::test]
async fn peers_over_websocket() {
    let _ = tracing_subscriber::fmt::try_init();
    let (a, b) = websocket_pair();
    let client = echo_peer().connect_websocket(a);
    let _server = echo_peer().connect_websocket(b);
    let reply: String = client.invoke("Echo.Call", &"hello").await.unwrap();
    assert_eq!(reply, "hello");
}

#[async_std::test]
async fn binary_frames_and_ping() {
    let _ = tracing_subscriber::fmt::try_init();
    let (local, remote) = websocket_pair();
    let counters = Arc::new(birpc::Counters::default());
    let _session = echo_peer()
        .with_telemetry(counters.clone())
        .connect_websocket(local);
    let (mut remote_messages, mut remote_sink) = remote.into_inner();

    remote_sink
        .send(Message::Text("__ping__".to_string()))
        .await
        .unwrap();
    remote_sink
        .send(Message::Text("hello there".to_string()))
        .await
        .unwrap();
    let request = Envelope::Request(Request {
        id: 3,
        method: "Echo.Call".to_string(),
        payload: payload("foo"),
        is_stream: false,
    });
    remote_sink
        .send(Message::Binary(birpc::packet::encode(&request).unwrap()))
        .await
        .unwrap();

    let reply = async_std::future::timeout(Duration::from_secs(5), remote_messages.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let data = match reply {
        Message::Binary(data) => data,
        message => panic!("Unexpected message {:?}", message),
    };
    match birpc::packet::decode(&data).unwrap() {
        Envelope::Response(Response {
            id: 3,
            content: birpc::ResponseContent::Payload(reply),
        }) => assert_eq!(reply, payload("foo")),
        envelope => panic!("Unexpected envelope {:?}", envelope),
    }
    assert_eq!(counters.ping_count(), 1);
}

#[async_std::test]
async fn close_frame_ends_session() {
    let _ = tracing_subscriber::fmt::try_init();
    let (local, remote) = websocket_pair();
    let session = echo_peer().connect_websocket(local);
    let (mut remote_messages, mut remote_sink) = remote.into_inner();

    remote_sink.send(Message::Close(None)).await.unwrap();
    async_std::future::timeout(Duration::from_secs(5), session.closed())
        .await
        .unwrap();
    let close = async_std::future::timeout(Duration::from_secs(5), remote_messages.next())
        .await
        .unwrap();
    assert!(matches!(close, Some(Ok(Message::Close(None)))));
}

#[async_std::test]
async fn undecodable_frame_ends_session() {
    let _ = tracing_subscriber::fmt::try_init();
    let (local, remote) = websocket_pair();
    let session = echo_peer().connect_websocket(local);
    let (_remote_messages, mut remote_sink) = remote.into_inner();

    remote_sink.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    async_std::future::timeout(Duration::from_secs(5), session.closed())
        .await
        .unwrap();
}
