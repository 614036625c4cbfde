use chashmap::CHashMap;
use futures::channel::{mpsc, oneshot};
use futures::future::Either;
use futures::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{Codec, CodecError, JsonCodec};
use crate::config::Config;
use crate::envelope::{Envelope, Payload, Request, Response, ResponseContent};
use crate::error::Error;
use crate::lifetime::Lifetime;
use crate::registry::{CallContext, Registry};
use crate::stream::{ClientStream, ServerStream};
use crate::telemetry::Observer;

/// Error returned when an envelope cannot be queued because the session
/// ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Session is closed")]
pub struct SessionClosed;

/// Error returned by [Session::invoke] and related methods.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("Failed to encode request")]
    Encode(#[source] CodecError),
    #[error(transparent)]
    SessionClosed(#[from] SessionClosed),
    #[error("Remote peer returned error {0}")]
    Remote(Error),
    #[error("Failed to decode response")]
    Decode(#[source] CodecError),
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Call was cancelled")]
    Cancelled,
    #[error("Unexpected response {0:?}")]
    UnexpectedResponse(ResponseContent),
}

impl CallError {
    /// The error sent by the remote peer, if any.
    pub fn remote(&self) -> Option<&Error> {
        match self {
            CallError::Remote(error) => Some(error),
            _ => None,
        }
    }
}

/// Options for a single unary call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overrides the default timeout from [Config].
    pub timeout: Option<Duration>,
    /// The call fails with [CallError::Cancelled] when this lifetime is
    /// cancelled.
    pub lifetime: Option<Lifetime>,
}

impl CallOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_lifetime(mut self, lifetime: Lifetime) -> Self {
        self.lifetime = Some(lifetime);
        self
    }
}

/// Queue of envelopes that are written to the transport.
#[derive(Debug, Clone)]
pub(crate) struct Outbound {
    sender: Arc<futures::lock::Mutex<mpsc::Sender<Envelope>>>,
}

impl Outbound {
    pub fn new(sender: mpsc::Sender<Envelope>) -> Self {
        Self {
            sender: Arc::new(futures::lock::Mutex::new(sender)),
        }
    }

    pub async fn send(&self, envelope: impl Into<Envelope>) -> Result<(), SessionClosed> {
        let envelope = envelope.into();
        tracing::trace!(?envelope, "send envelope");
        let mut sender = self.sender.lock().await;
        sender.send(envelope).await.map_err(|_| SessionClosed)
    }

    /// Send from a separate task so that the caller never waits for the
    /// transport.
    fn spawn_send(&self, envelope: impl Into<Envelope>) {
        let outbound = self.clone();
        let envelope = envelope.into();
        async_std::task::spawn(async move {
            if let Err(error) = outbound.send(envelope).await {
                tracing::debug!(?error, "failed to send envelope");
            }
        });
    }
}

/// Delivery slot for responses to a request we sent.
enum Pending {
    Call(Option<oneshot::Sender<Response>>),
    Stream(mpsc::UnboundedSender<Response>),
}

/// A stream the remote peer opened and that is served by a local handler.
struct OpenStream {
    inbound: mpsc::UnboundedSender<Payload>,
    lifetime: Lifetime,
}

impl OpenStream {
    fn close(self) {
        self.inbound.close_channel();
        self.lifetime.cancel();
    }
}

/// One logical connection to a remote peer.
///
/// The session serves requests from the remote peer with the handlers of its
/// [Registry] and lets the local side call methods and open streams on the
/// remote peer. Cloning returns a handle to the same session.
pub struct Session<C: Codec = JsonCodec> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: Codec> {
    registry: Arc<Registry<C>>,
    config: Config,
    observer: Observer,
    outbound: Outbound,
    pending: CHashMap<i32, Pending>,
    open_streams: CHashMap<i32, OpenStream>,
    next_id: AtomicI32,
    lifetime: Lifetime,
}

impl<C: Codec> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Codec> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pending", &self.inner.pending.len())
            .field("open_streams", &self.inner.open_streams.len())
            .field("lifetime", &self.inner.lifetime)
            .finish()
    }
}

impl<C: Codec> Session<C> {
    /// Start serving envelopes from `inbound`. Envelopes for the remote peer
    /// are sent to `outbound`.
    pub(crate) fn start<Inbound>(
        registry: Arc<Registry<C>>,
        config: Config,
        observer: Observer,
        inbound: Inbound,
        outbound: mpsc::Sender<Envelope>,
    ) -> Self
    where
        Inbound: Stream<Item = Envelope> + Send + Unpin + 'static,
    {
        let session = Self {
            inner: Arc::new(Inner {
                registry,
                config,
                observer,
                outbound: Outbound::new(outbound),
                pending: CHashMap::new(),
                open_streams: CHashMap::new(),
                next_id: AtomicI32::new(0),
                lifetime: Lifetime::new(),
            }),
        };
        async_std::task::spawn(session.clone().consume(inbound));
        session
    }

    /// Cancelled when the inbound envelopes end or [Session::close] is
    /// called. Lifetimes of all streams are children of this lifetime.
    pub fn lifetime(&self) -> &Lifetime {
        &self.inner.lifetime
    }

    /// Resolves once the session ended.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        self.inner.lifetime.cancelled()
    }

    /// End the session. All open streams are closed. Unary calls that are
    /// still waiting for a response are not affected.
    pub fn close(&self) {
        self.inner.lifetime.cancel();
    }

    /// Tell the remote peer that we are going away.
    pub async fn bye(&self) -> Result<(), SessionClosed> {
        self.inner.outbound.send(Envelope::Bye).await
    }

    /// Number of requests we sent that still wait for a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Number of streams opened by the remote peer that are still served.
    pub fn open_stream_count(&self) -> usize {
        self.inner.open_streams.len()
    }

    pub(crate) fn outbound(&self) -> &Outbound {
        &self.inner.outbound
    }

    pub(crate) fn remove_pending(&self, id: i32) {
        self.inner.pending.remove(&id);
    }

    /// Call the unary `method` on the remote peer.
    pub async fn invoke<Req, Res>(&self, method: &str, request: &Req) -> Result<Res, CallError>
    where
        Req: serde::Serialize,
        Res: serde::de::DeserializeOwned,
    {
        self.invoke_with(method, request, CallOptions::default())
            .await
    }

    pub async fn invoke_with<Req, Res>(
        &self,
        method: &str,
        request: &Req,
        options: CallOptions,
    ) -> Result<Res, CallError>
    where
        Req: serde::Serialize,
        Res: serde::de::DeserializeOwned,
    {
        let payload = C::encode(request).map_err(CallError::Encode)?;
        let response = self.call(method, payload, options).await?;
        C::decode(&response).map_err(CallError::Decode)
    }

    /// Call the unary `method` with a payload that is already encoded.
    pub async fn call(
        &self,
        method: &str,
        payload: Payload,
        options: CallOptions,
    ) -> Result<Payload, CallError> {
        if self.inner.lifetime.is_cancelled() {
            return Err(SessionClosed.into());
        }
        let (sender, receiver) = oneshot::channel();
        let id = self.insert_pending(Pending::Call(Some(sender)));
        let _pending = PendingGuard {
            pending: &self.inner.pending,
            id,
        };

        tracing::debug!(id, method, "call");
        let request = Request {
            id,
            method: method.to_string(),
            payload,
            is_stream: false,
        };
        self.inner.outbound.send(request).await?;

        let cancelled = match options.lifetime {
            Some(lifetime) => lifetime.cancelled().left_future(),
            None => future::pending::<()>().right_future(),
        };
        let response = async move {
            futures::pin_mut!(cancelled);
            match future::select(receiver, cancelled).await {
                Either::Left((Ok(response), _)) => Ok(response),
                Either::Left((Err(oneshot::Canceled), _)) => Err(SessionClosed.into()),
                Either::Right(((), _)) => Err(CallError::Cancelled),
            }
        };
        let response = match options.timeout.or_else(|| self.inner.config.call_timeout()) {
            Some(timeout) => async_std::future::timeout(timeout, response)
                .await
                .map_err(|_| CallError::Timeout(timeout))??,
            None => response.await?,
        };

        match response.content {
            ResponseContent::Payload(payload) => Ok(payload),
            ResponseContent::Error(error) => Err(CallError::Remote(error)),
            content => Err(CallError::UnexpectedResponse(content)),
        }
    }

    /// Open a stream served by the remote `method`.
    ///
    /// The remote peer learns about the stream with the first message that is
    /// sent. On a closed session the stream has already ended and sending
    /// fails with [SessionClosed].
    pub fn open_stream(&self, method: &str) -> ClientStream<C> {
        let (sender, receiver) = mpsc::unbounded();
        let id = self.insert_pending(Pending::Stream(sender));
        tracing::debug!(id, method, "open stream");
        let lifetime = self.inner.lifetime.child();
        ClientStream::new(self.clone(), id, method.to_string(), receiver, lifetime)
    }

    /// Allocate the next free request ID and register `pending` for it.
    fn insert_pending(&self, pending: Pending) -> i32 {
        let mut pending = Some(pending);
        loop {
            let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
            self.inner
                .pending
                .alter(id, |existing| existing.or_else(|| pending.take()));
            if pending.is_none() {
                return id;
            }
            tracing::trace!(id, "skipping request ID that is still in use");
        }
    }

    #[tracing::instrument(level = "debug", skip(self, inbound))]
    async fn consume<Inbound>(self, inbound: Inbound)
    where
        Inbound: Stream<Item = Envelope> + Unpin,
    {
        let inbound = inbound.take_until(self.inner.lifetime.cancelled());
        futures::pin_mut!(inbound);
        while let Some(envelope) = inbound.next().await {
            tracing::trace!(?envelope, "received envelope");
            self.handle_envelope(envelope);
        }
        tracing::debug!("session ended");
        self.close_open_streams();
        self.inner.lifetime.cancel();
    }

    fn handle_envelope(&self, envelope: Envelope) {
        match envelope {
            Envelope::Bye => {
                tracing::debug!("remote peer said bye");
                self.close_open_streams();
            }
            Envelope::StreamClose { id } => match self.inner.open_streams.remove(&id) {
                Some(stream) => {
                    tracing::debug!(id, "stream closed by client");
                    stream.close();
                }
                None => tracing::info!(id, "received close for unknown stream"),
            },
            Envelope::Response(response) => self.deliver(response),
            Envelope::Request(request) if request.is_stream => self.handle_stream_request(request),
            Envelope::Request(request) => self.handle_unary_request(request),
            Envelope::Open(_) | Envelope::OpenAck(_) => {
                tracing::debug!("ignoring reserved envelope")
            }
        }
    }

    fn close_open_streams(&self) {
        for (id, stream) in self.inner.open_streams.clear() {
            tracing::debug!(id, "closing stream");
            stream.close();
        }
    }

    fn deliver(&self, response: Response) {
        let id = response.id;
        let delivered = match self.inner.pending.get_mut(&id) {
            Some(mut pending) => match &mut *pending {
                Pending::Call(slot) => match slot.take() {
                    Some(sender) => sender.send(response).is_ok(),
                    None => false,
                },
                Pending::Stream(sender) => sender.unbounded_send(response).is_ok(),
            },
            None => false,
        };
        if !delivered {
            tracing::info!(id, "received response for unknown request");
        }
    }

    fn handle_unary_request(&self, request: Request) {
        let Request {
            id,
            method,
            payload,
            ..
        } = request;
        let handler = match self.inner.registry.lookup_method(&method) {
            Some(descriptor) => Arc::clone(&descriptor.handler),
            None => {
                tracing::warn!(id, %method, "method not found");
                self.inner
                    .outbound
                    .spawn_send(Response::error(id, Error::method_not_found(&method)));
                return;
            }
        };

        let lifetime = self.inner.lifetime.child();
        let cx = CallContext {
            id,
            method,
            lifetime: lifetime.clone(),
        };
        let session = self.clone();
        async_std::task::spawn(async move {
            let method = cx.method.clone();
            let result = handler.call(cx, payload).await;
            lifetime.cancel();
            let response = match result {
                Ok(payload) => {
                    session.inner.observer.success();
                    Response::payload(id, payload)
                }
                Err(error) => {
                    tracing::error!(id, %method, ?error, "handler failed");
                    session.inner.observer.fail();
                    Response::error(id, error.to_remote())
                }
            };
            if let Err(error) = session.inner.outbound.send(response).await {
                tracing::debug!(id, ?error, "failed to send response");
            }
        });
    }

    fn handle_stream_request(&self, request: Request) {
        let Request {
            id,
            method,
            payload,
            ..
        } = request;

        if let Some(stream) = self.inner.open_streams.get(&id) {
            if stream.inbound.unbounded_send(payload).is_err() {
                tracing::debug!(id, "stream handler stopped receiving");
            }
            return;
        }

        let handler = match self.inner.registry.lookup_stream(&method) {
            Some(descriptor) => Arc::clone(&descriptor.handler),
            None => {
                tracing::warn!(id, %method, "stream not found");
                self.inner
                    .outbound
                    .spawn_send(Response::error(id, Error::stream_not_found(&method)));
                return;
            }
        };

        tracing::debug!(id, %method, "stream opened");
        let lifetime = self.inner.lifetime.child();
        let (inbound_sender, inbound_receiver) = mpsc::unbounded();
        let _ = inbound_sender.unbounded_send(payload);
        self.inner.open_streams.insert(
            id,
            OpenStream {
                inbound: inbound_sender,
                lifetime: lifetime.clone(),
            },
        );

        let close_sent = Arc::new(AtomicBool::new(false));
        let stream = ServerStream::<C>::new(
            id,
            method.clone(),
            self.inner.outbound.clone(),
            inbound_receiver,
            lifetime.clone(),
            Arc::clone(&close_sent),
        );
        let session = self.clone();
        async_std::task::spawn(async move {
            let outbound = &session.inner.outbound;
            let result = handler.serve(stream).await;
            session.remove_open_stream(id, &lifetime);
            lifetime.cancel();
            let result = match result {
                Ok(()) => {
                    session.inner.observer.success();
                    if close_sent.swap(true, Ordering::SeqCst) {
                        Ok(())
                    } else {
                        outbound.send(Response::close(id)).await
                    }
                }
                Err(error) => {
                    tracing::error!(id, %method, ?error, "stream handler failed");
                    session.inner.observer.fail();
                    outbound
                        .send(Response::error(id, Error::from_handler(&error)))
                        .await
                }
            };
            if let Err(error) = result {
                tracing::debug!(id, ?error, "failed to send stream response");
            }
        });
    }

    /// Remove the entry for stream `id` if it still belongs to `lifetime`.
    fn remove_open_stream(&self, id: i32, lifetime: &Lifetime) {
        self.inner.open_streams.alter(id, |entry| match entry {
            Some(stream) if stream.lifetime.ptr_eq(lifetime) => {
                stream.close();
                None
            }
            entry => entry,
        });
    }
}

/// Removes the pending entry for a unary call when the call returns or is
/// dropped.
struct PendingGuard<'a> {
    pending: &'a CHashMap<i32, Pending>,
    id: i32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}
