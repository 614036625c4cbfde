//! Handles for open streams on both sides of a session.
use futures::channel::{mpsc, oneshot};
use futures::future::{Either, Shared};
use futures::prelude::*;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::codec::{Codec, CodecError, JsonCodec};
use crate::envelope::{Envelope, Payload, Request, Response, ResponseContent};
use crate::error::Error;
use crate::lifetime::Lifetime;
use crate::session::{Outbound, Session, SessionClosed};

/// Error returned by operations on [ServerStream] and [ClientStream].
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Failed to encode stream message")]
    Encode(#[source] CodecError),
    #[error("Failed to decode stream message")]
    Decode(#[source] CodecError),
    #[error("Remote peer returned error {0}")]
    Remote(Error),
    #[error("Stream has ended")]
    Ended,
    #[error(transparent)]
    SessionClosed(#[from] SessionClosed),
}

impl StreamError {
    /// The error sent by the remote peer, if any.
    pub fn remote(&self) -> Option<&Error> {
        match self {
            StreamError::Remote(error) => Some(error),
            _ => None,
        }
    }
}

/// Server side of a stream, passed to a [crate::StreamHandler].
pub struct ServerStream<C: Codec = JsonCodec> {
    id: i32,
    method: String,
    outbound: Outbound,
    inbound: mpsc::UnboundedReceiver<Payload>,
    lifetime: Lifetime,
    close_sent: Arc<AtomicBool>,
    _codec: PhantomData<fn() -> C>,
}

impl<C: Codec> ServerStream<C> {
    pub(crate) fn new(
        id: i32,
        method: String,
        outbound: Outbound,
        inbound: mpsc::UnboundedReceiver<Payload>,
        lifetime: Lifetime,
        close_sent: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            method,
            outbound,
            inbound,
            lifetime,
            close_sent,
            _codec: PhantomData,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Cancelled when the client closes the stream, the remote peer says
    /// `Bye`, the session ends or the handler returns.
    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    /// Tell the client that the stream is ready before sending any message.
    pub async fn ready(&self) -> Result<(), StreamError> {
        self.outbound.send(Response::stream_ready(self.id)).await?;
        Ok(())
    }

    pub async fn send<T: serde::Serialize>(&self, message: &T) -> Result<(), StreamError> {
        let payload = C::encode(message).map_err(StreamError::Encode)?;
        self.send_payload(payload).await
    }

    pub async fn send_payload(&self, payload: Payload) -> Result<(), StreamError> {
        self.outbound.send(Response::payload(self.id, payload)).await?;
        Ok(())
    }

    /// Receive the next message from the client. Returns `None` once the
    /// client closed the stream or the stream lifetime ended.
    pub async fn receive<T: serde::de::DeserializeOwned>(
        &mut self,
    ) -> Result<Option<T>, StreamError> {
        match self.receive_payload().await {
            Some(payload) => C::decode(&payload).map(Some).map_err(StreamError::Decode),
            None => Ok(None),
        }
    }

    pub async fn receive_payload(&mut self) -> Option<Payload> {
        let cancelled = self.lifetime.cancelled();
        futures::pin_mut!(cancelled);
        match future::select(self.inbound.next(), cancelled).await {
            Either::Left((payload, _)) => payload,
            Either::Right(((), _)) => None,
        }
    }

    /// Tell the client that no more messages will be sent. The stream
    /// lifetime is not affected. Only the first call sends a message.
    pub async fn close(&self) -> Result<(), StreamError> {
        if !self.close_sent.swap(true, Ordering::SeqCst) {
            self.outbound.send(Response::close(self.id)).await?;
        }
        Ok(())
    }
}

impl<C: Codec> std::fmt::Debug for ServerStream<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerStream")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

/// Client side of a stream, created with [Session::open_stream].
///
/// Nothing is sent to the remote peer until the first message is sent.
/// Dropping the handle stops receiving but does not tell the server. Call
/// [ClientStream::close] for that.
///
/// Once the stream ended or was closed locally, sending fails with
/// [StreamError::Ended].
pub struct ClientStream<C: Codec = JsonCodec> {
    id: i32,
    method: String,
    outbound: Outbound,
    messages: mpsc::UnboundedReceiver<Result<Payload, Error>>,
    ready: Shared<oneshot::Receiver<()>>,
    lifetime: Lifetime,
    session_lifetime: Lifetime,
    close_sent: AtomicBool,
    _codec: PhantomData<fn() -> C>,
}

impl<C: Codec> ClientStream<C> {
    pub(crate) fn new(
        session: Session<C>,
        id: i32,
        method: String,
        responses: mpsc::UnboundedReceiver<Response>,
        lifetime: Lifetime,
    ) -> Self {
        let (messages_sender, messages) = mpsc::unbounded();
        let (ready_sender, ready) = oneshot::channel();
        let outbound = session.outbound().clone();
        let session_lifetime = session.lifetime().clone();
        async_std::task::spawn(demux(
            session,
            id,
            responses,
            messages_sender,
            ready_sender,
            lifetime.clone(),
        ));
        Self {
            id,
            method,
            outbound,
            messages,
            ready: ready.shared(),
            lifetime,
            session_lifetime,
            close_sent: AtomicBool::new(false),
            _codec: PhantomData,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    pub async fn send<T: serde::Serialize>(&self, message: &T) -> Result<(), StreamError> {
        let payload = C::encode(message).map_err(StreamError::Encode)?;
        self.send_payload(payload).await
    }

    pub async fn send_payload(&self, payload: Payload) -> Result<(), StreamError> {
        self.ensure_open()?;
        let request = Request {
            id: self.id,
            method: self.method.clone(),
            payload,
            is_stream: true,
        };
        self.outbound.send(request).await?;
        Ok(())
    }

    /// Receive the next message from the server.
    ///
    /// Returns `None` when the server closed the stream or the stream lifetime
    /// ended. An error sent by the server is returned once and ends the
    /// stream.
    pub async fn receive<T: serde::de::DeserializeOwned>(
        &mut self,
    ) -> Result<Option<T>, StreamError> {
        match self.receive_payload().await? {
            Some(payload) => C::decode(&payload).map(Some).map_err(StreamError::Decode),
            None => Ok(None),
        }
    }

    pub async fn receive_payload(&mut self) -> Result<Option<Payload>, StreamError> {
        match self.messages.next().await {
            Some(Ok(payload)) => Ok(Some(payload)),
            Some(Err(error)) => Err(StreamError::Remote(error)),
            None => Ok(None),
        }
    }

    /// Wait until the server signalled readiness or sent its first message.
    pub async fn wait_until_ready(&self) -> Result<(), StreamError> {
        self.ready.clone().await.map_err(|_| StreamError::Ended)
    }

    /// Tell the server that no more messages will be sent. Messages from the
    /// server can still be received until the server closes the stream.
    ///
    /// Only the first call sends a message.
    pub async fn close(&self) -> Result<(), StreamError> {
        if self.close_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.outbound.send(Envelope::StreamClose { id: self.id }).await?;
        Ok(())
    }

    /// A message sent on an ended stream would open a new stream on the
    /// server under the same ID.
    fn ensure_open(&self) -> Result<(), StreamError> {
        if self.session_lifetime.is_cancelled() {
            Err(SessionClosed.into())
        } else if self.lifetime.is_cancelled() || self.close_sent.load(Ordering::SeqCst) {
            Err(StreamError::Ended)
        } else {
            Ok(())
        }
    }
}

impl<C: Codec> Drop for ClientStream<C> {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}

impl<C: Codec> std::fmt::Debug for ClientStream<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientStream")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

/// Turn the raw responses for a client stream into messages.
///
/// The first response marks the stream as ready. It is swallowed if it is an
/// explicit `StreamReady`.
#[tracing::instrument(level = "debug", skip(session, responses, messages, ready, lifetime))]
async fn demux<C: Codec>(
    session: Session<C>,
    id: i32,
    responses: mpsc::UnboundedReceiver<Response>,
    messages: mpsc::UnboundedSender<Result<Payload, Error>>,
    ready: oneshot::Sender<()>,
    lifetime: Lifetime,
) {
    let mut ready = Some(ready);
    let responses = responses.take_until(lifetime.cancelled());
    futures::pin_mut!(responses);
    while let Some(response) = responses.next().await {
        tracing::trace!(?response, "stream response");
        if let Some(ready) = ready.take() {
            let _ = ready.send(());
            if response.is_stream_ready() {
                continue;
            }
        }
        match response.content {
            ResponseContent::Payload(payload) => {
                if messages.unbounded_send(Ok(payload)).is_err() {
                    break;
                }
            }
            ResponseContent::Error(error) => {
                tracing::debug!(?error, "stream failed");
                let _ = messages.unbounded_send(Err(error));
                break;
            }
            ResponseContent::Close(_) => {
                tracing::debug!("stream closed by server");
                break;
            }
            ResponseContent::StreamReady(_) => {
                tracing::trace!("ignoring repeated stream ready");
            }
        }
    }
    session.remove_pending(id);
    lifetime.cancel();
}
