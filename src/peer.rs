use futures::channel::mpsc;
use futures::prelude::*;
use std::sync::Arc;

use crate::codec::{Codec, JsonCodec};
use crate::config::Config;
use crate::envelope::Envelope;
use crate::registry::Registry;
use crate::session::Session;
use crate::telemetry::{Observer, Telemetry};
use crate::transport::channel::ChannelEnd;

/// Creates [Session]s that serve the handlers of one [Registry].
///
/// ```no_run
/// # async fn run() -> anyhow::Result<()> {
/// use birpc::{Peer, Registry, Service};
///
/// let mut service: Service = Service::new("Echo");
/// service.add_unary("Call", |_cx, data: String| async move { Ok(data) });
/// let mut registry = Registry::new();
/// registry.register(service)?;
///
/// let stream = async_std::net::TcpStream::connect("127.0.0.1:9000").await?;
/// let (read, write) = futures::io::AsyncReadExt::split(stream);
/// let session = Peer::new(registry).connect_framed(
///     futures::io::AsyncWriteExt::into_sink(write),
///     birpc::utils::read_to_stream(read),
/// );
/// let reply: String = session.invoke("Echo.Call", &"hello").await?;
/// assert_eq!(reply, "hello");
/// # Ok(())
/// # }
/// ```
pub struct Peer<C: Codec = JsonCodec> {
    registry: Arc<Registry<C>>,
    config: Config,
    observer: Observer,
}

impl<C: Codec> Clone for Peer<C> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
            observer: self.observer.clone(),
        }
    }
}

impl<C: Codec> std::fmt::Debug for Peer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("observer", &self.observer)
            .finish()
    }
}

impl<C: Codec> Peer<C> {
    pub fn new(registry: Registry<C>) -> Self {
        Self::with_registry(Arc::new(registry))
    }

    /// Create a peer that shares its registry with other peers.
    pub fn with_registry(registry: Arc<Registry<C>>) -> Self {
        Self {
            registry,
            config: Config::default(),
            observer: Observer::default(),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.observer = Observer::new(Some(telemetry));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry<C>> {
        &self.registry
    }

    /// Start a session over raw envelope queues.
    ///
    /// The session ends when `inbound` ends.
    pub fn connect<Inbound>(&self, inbound: Inbound, outbound: mpsc::Sender<Envelope>) -> Session<C>
    where
        Inbound: Stream<Item = Envelope> + Send + Unpin + 'static,
    {
        Session::start(
            Arc::clone(&self.registry),
            self.config.clone(),
            self.observer.clone(),
            inbound,
            outbound,
        )
    }

    /// Start a session over one end of [crate::transport::channel::pair].
    pub fn connect_channel(&self, end: ChannelEnd) -> Session<C> {
        let (inbound, outbound) = end.into_inner();
        self.connect(inbound, outbound)
    }

    /// Start a session over a byte transport such as a TCP connection.
    pub fn connect_framed<Sink_, TryStream_>(&self, send: Sink_, receive: TryStream_) -> Session<C>
    where
        Sink_: Sink<Vec<u8>> + Send + Unpin + 'static,
        Sink_::Error: std::error::Error + Send + Sync + 'static,
        TryStream_: TryStream<Ok = Vec<u8>> + Send + Unpin + 'static,
        TryStream_::Error: std::error::Error + Send + Sync + 'static,
    {
        let (inbound_sender, outbound_receiver, session) = self.connect_queues();
        crate::transport::framed::spawn(
            send,
            receive,
            inbound_sender,
            outbound_receiver,
            session.lifetime().clone(),
            self.observer.clone(),
        );
        session
    }

    /// Start a session over an established websocket connection.
    pub fn connect_websocket<WebSocket>(&self, websocket: WebSocket) -> Session<C>
    where
        WebSocket: Stream<Item = Result<tungstenite::Message, tungstenite::Error>>
            + Sink<tungstenite::Message, Error = tungstenite::Error>
            + Send
            + 'static,
    {
        let (inbound_sender, outbound_receiver, session) = self.connect_queues();
        crate::transport::websocket::spawn(
            websocket,
            inbound_sender,
            outbound_receiver,
            session.lifetime().clone(),
            self.observer.clone(),
            self.config.ping_message.clone(),
        );
        session
    }

    fn connect_queues(
        &self,
    ) -> (
        mpsc::Sender<Envelope>,
        mpsc::Receiver<Envelope>,
        Session<C>,
    ) {
        let (inbound_sender, inbound_receiver) = mpsc::channel(self.config.channel_capacity);
        let (outbound_sender, outbound_receiver) = mpsc::channel(self.config.channel_capacity);
        let session = self.connect(inbound_receiver, outbound_sender);
        (inbound_sender, outbound_receiver, session)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::Service;
    use crate::telemetry::Counters;

    fn peer() -> Peer {
        let mut service = Service::new("Echo");
        service.add_unary("Call", |_cx, data: String| async move { Ok(data) });
        let mut registry = Registry::new();
        registry.register(service).unwrap();
        Peer::new(registry)
    }

    #[async_std::test]
    async fn channel_sessions() {
        let _ = tracing_subscriber::fmt::try_init();
        let (a, b) = crate::transport::channel::pair(4);
        let counters = Arc::new(Counters::default());
        let session_a = peer().connect_channel(a);
        let _session_b = peer().with_telemetry(counters.clone()).connect_channel(b);
        let reply: String = session_a.invoke("Echo.Call", &"hello").await.unwrap();
        assert_eq!(reply, "hello");
        assert_eq!(counters.success_count(), 1);
    }

    #[async_std::test]
    async fn dropped_transport_ends_session() {
        let _ = tracing_subscriber::fmt::try_init();
        let (a, b) = crate::transport::channel::pair(4);
        let session_a = peer().connect_channel(a);
        drop(b);
        async_std::future::timeout(std::time::Duration::from_secs(5), session_a.closed())
            .await
            .unwrap();
        assert!(session_a.lifetime().is_cancelled());
    }

    #[async_std::test]
    async fn default_call_timeout() {
        let _ = tracing_subscriber::fmt::try_init();
        let (a, _b) = crate::transport::channel::pair(4);
        let config = Config::default().with_call_timeout(Some(std::time::Duration::from_millis(20)));
        let session_a = peer().with_config(config).connect_channel(a);
        let result = session_a.invoke::<_, String>("Echo.Call", &"hello").await;
        assert!(matches!(result, Err(crate::CallError::Timeout(_))));
        assert_eq!(session_a.pending_count(), 0);
    }
}
