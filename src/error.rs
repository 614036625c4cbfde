/// Protocol or application error that is sent between peers.
///
/// Handlers can return this error (wrapped in [anyhow::Error]) to report a
/// structured failure. The remote caller receives `name` and `message`
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, thiserror::Error)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[error("{name}: {message}")]
pub struct Error {
    #[cfg_attr(test, proptest(strategy = "\"[a-zA-Z]{1,20}\""))]
    pub name: String,
    #[cfg_attr(test, proptest(strategy = "\"[a-z ]{1,40}\""))]
    pub message: String,
}

/// Names of the errors produced by the protocol engine itself.
pub mod kind {
    pub const METHOD_NOT_FOUND: &str = "MethodNotFound";
    pub const STREAM_NOT_FOUND: &str = "StreamNotFound";
    pub const HANDLER_FAILED: &str = "HandlerFailed";
    pub const RESPONSE_MARSHALLING_FAILED: &str = "ResponseMarshallingFailed";
}

impl Error {
    pub fn new(name: impl ToString, message: impl ToString) -> Self {
        let name = name.to_string();
        let message = message.to_string();
        Self {
            name: if name.is_empty() {
                kind::HANDLER_FAILED.to_string()
            } else {
                name
            },
            message: if message.is_empty() {
                "unknown error".to_string()
            } else {
                message
            },
        }
    }

    /// Fill in empty fields of an error that was built without [Error::new].
    pub(crate) fn normalized(self) -> Self {
        Self::new(self.name, self.message)
    }

    pub(crate) fn method_not_found(method: &str) -> Self {
        Self::new(
            kind::METHOD_NOT_FOUND,
            format!("no method found for \"{}\"", method),
        )
    }

    pub(crate) fn stream_not_found(method: &str) -> Self {
        Self::new(
            kind::STREAM_NOT_FOUND,
            format!("no stream found for \"{}\"", method),
        )
    }

    pub(crate) fn response_marshalling_failed(error: &dyn std::error::Error) -> Self {
        Self::new(kind::RESPONSE_MARSHALLING_FAILED, error)
    }

    /// Convert an error returned by a handler into the error sent to the peer.
    ///
    /// If the error chain carries an [Error] it is sent as is. Anything else is
    /// reported as `HandlerFailed`.
    pub(crate) fn from_handler(error: &anyhow::Error) -> Self {
        match error.downcast_ref::<Error>() {
            Some(error) => error.clone().normalized(),
            None => Self::new(kind::HANDLER_FAILED, format!("{:#}", error)),
        }
    }

    /// Returns true if the error has the given kind name.
    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }
}
