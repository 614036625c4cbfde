use futures::future::BoxFuture;
use futures::prelude::*;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::codec::{Codec, CodecError, JsonCodec};
use crate::envelope::Payload;
use crate::error::Error;
use crate::lifetime::Lifetime;
use crate::stream::ServerStream;

/// Information about the unary call a handler is serving.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub id: i32,
    pub method: String,
    /// Cancelled when the handler returns or the session ends.
    pub lifetime: Lifetime,
}

/// Error returned by a [UnaryHandler].
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Handler failed")]
    Failed(#[source] anyhow::Error),
    #[error("Failed to encode response")]
    ResponseEncoding(#[source] CodecError),
}

impl HandlerError {
    /// The error that is sent to the caller.
    pub fn to_remote(&self) -> Error {
        match self {
            HandlerError::Failed(error) => Error::from_handler(error),
            HandlerError::ResponseEncoding(error) => Error::response_marshalling_failed(error),
        }
    }
}

/// Serves unary calls for one method.
pub trait UnaryHandler: Send + Sync + 'static {
    fn call(
        &self,
        cx: CallContext,
        request: Payload,
    ) -> BoxFuture<'static, Result<Payload, HandlerError>>;
}

/// Serves streams for one method.
///
/// The stream is closed with a `Close` response when the returned future
/// resolves successfully. If it fails the error is sent to the client
/// instead.
pub trait StreamHandler<C: Codec = JsonCodec>: Send + Sync + 'static {
    fn serve(&self, stream: ServerStream<C>) -> BoxFuture<'static, anyhow::Result<()>>;
}

impl<C, F, Fut> StreamHandler<C> for F
where
    C: Codec,
    F: Fn(ServerStream<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn serve(&self, stream: ServerStream<C>) -> BoxFuture<'static, anyhow::Result<()>> {
        self(stream).boxed()
    }
}

/// Decodes the request and encodes the response of a typed unary function.
struct TypedUnary<C, Req, Res, F> {
    f: F,
    _types: PhantomData<fn(C, Req) -> Res>,
}

impl<C, Req, Res, F, Fut> UnaryHandler for TypedUnary<C, Req, Res, F>
where
    C: Codec,
    Req: serde::de::DeserializeOwned + 'static,
    Res: serde::Serialize + 'static,
    F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Res>> + Send + 'static,
{
    fn call(
        &self,
        cx: CallContext,
        request: Payload,
    ) -> BoxFuture<'static, Result<Payload, HandlerError>> {
        let request = match C::decode::<Req>(&request) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(method = %cx.method, ?error, "failed to decode request");
                let error = anyhow::Error::new(error).context("Failed to decode request");
                return future::ready(Err(HandlerError::Failed(error))).boxed();
            }
        };
        let response = (self.f)(cx, request);
        async move {
            let response = response.await.map_err(HandlerError::Failed)?;
            C::encode(&response).map_err(HandlerError::ResponseEncoding)
        }
        .boxed()
    }
}

#[derive(Clone)]
pub struct MethodDescriptor {
    pub name: String,
    pub handler: Arc<dyn UnaryHandler>,
}

pub struct StreamDescriptor<C: Codec = JsonCodec> {
    pub name: String,
    pub handler: Arc<dyn StreamHandler<C>>,
    /// The handler sends messages to the client.
    pub server_streams: bool,
    /// The handler accepts messages from the client.
    pub client_streams: bool,
}

impl<C: Codec> Clone for StreamDescriptor<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            handler: Arc::clone(&self.handler),
            server_streams: self.server_streams,
            client_streams: self.client_streams,
        }
    }
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .finish()
    }
}

impl<C: Codec> std::fmt::Debug for StreamDescriptor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDescriptor")
            .field("name", &self.name)
            .field("server_streams", &self.server_streams)
            .field("client_streams", &self.client_streams)
            .finish()
    }
}

/// Named group of methods and streams that is added to a [Registry].
///
/// ```
/// # use birpc::Service;
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct Echo {
///     data: String,
/// }
///
/// let mut service = Service::<birpc::JsonCodec>::new("Echo");
/// service.add_unary("Call", |_cx, request: Echo| async move { Ok(request) });
/// ```
pub struct Service<C: Codec = JsonCodec> {
    name: String,
    methods: Vec<MethodDescriptor>,
    streams: Vec<StreamDescriptor<C>>,
}

impl<C: Codec> Service<C> {
    pub fn new(name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            methods: Vec::new(),
            streams: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a unary method that decodes requests and encodes responses with
    /// the codec `C`.
    ///
    /// Errors returned by `f` are sent to the caller. Return an [Error] to
    /// control the name and message the caller sees.
    pub fn add_unary<Req, Res, F, Fut>(&mut self, method: impl ToString, f: F) -> &mut Self
    where
        Req: serde::de::DeserializeOwned + 'static,
        Res: serde::Serialize + 'static,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Res>> + Send + 'static,
    {
        self.add_method(
            method,
            TypedUnary::<C, Req, Res, F> {
                f,
                _types: PhantomData,
            },
        )
    }

    /// Add a unary method that works on raw payloads.
    pub fn add_method(&mut self, method: impl ToString, handler: impl UnaryHandler) -> &mut Self {
        self.methods.push(MethodDescriptor {
            name: method.to_string(),
            handler: Arc::new(handler),
        });
        self
    }

    /// Add a stream served by the async function `f`.
    ///
    /// `server_streams` and `client_streams` describe which side sends
    /// messages. They are not enforced.
    pub fn add_stream<F, Fut>(
        &mut self,
        method: impl ToString,
        server_streams: bool,
        client_streams: bool,
        f: F,
    ) -> &mut Self
    where
        F: Fn(ServerStream<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_stream_handler(method, server_streams, client_streams, f)
    }

    pub fn add_stream_handler(
        &mut self,
        method: impl ToString,
        server_streams: bool,
        client_streams: bool,
        handler: impl StreamHandler<C>,
    ) -> &mut Self {
        self.streams.push(StreamDescriptor {
            name: method.to_string(),
            handler: Arc::new(handler),
            server_streams,
            client_streams,
        });
        self
    }

    fn full_name(&self, method: &str) -> String {
        format!("{}.{}", self.name, method)
    }
}

/// Error returned by [Registry::register].
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Handler for \"{name}\" is already registered")]
    Duplicate { name: String },
}

/// Handlers for all methods and streams a peer serves, keyed by
/// `"Service.method"`.
///
/// The registry is filled before any session starts and is then shared by all
/// sessions of a [crate::Peer].
pub struct Registry<C: Codec = JsonCodec> {
    methods: HashMap<String, MethodDescriptor>,
    streams: HashMap<String, StreamDescriptor<C>>,
}

impl<C: Codec> Default for Registry<C> {
    fn default() -> Self {
        Self {
            methods: HashMap::new(),
            streams: HashMap::new(),
        }
    }
}

impl<C: Codec> Registry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add all methods and streams of `service`.
    ///
    /// Nothing is added if any of the names is already taken, either by a
    /// method or a stream.
    pub fn register(&mut self, service: Service<C>) -> Result<(), RegistryError> {
        let mut names = std::collections::HashSet::new();
        let method_names = service.methods.iter().map(|method| &method.name);
        let stream_names = service.streams.iter().map(|stream| &stream.name);
        for name in method_names.chain(stream_names) {
            let full_name = service.full_name(name);
            if self.methods.contains_key(&full_name)
                || self.streams.contains_key(&full_name)
                || !names.insert(full_name.clone())
            {
                return Err(RegistryError::Duplicate { name: full_name });
            }
        }

        for mut method in service.methods.iter().cloned() {
            method.name = service.full_name(&method.name);
            tracing::debug!(name = %method.name, "registered method");
            self.methods.insert(method.name.clone(), method);
        }
        for mut stream in service.streams.iter().cloned() {
            stream.name = service.full_name(&stream.name);
            tracing::debug!(name = %stream.name, "registered stream");
            self.streams.insert(stream.name.clone(), stream);
        }
        Ok(())
    }

    pub fn lookup_method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(name)
    }

    pub fn lookup_stream(&self, name: &str) -> Option<&StreamDescriptor<C>> {
        self.streams.get(name)
    }
}

impl<C: Codec> std::fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("streams", &self.streams.keys().collect::<Vec<_>>())
            .finish()
    }
}
