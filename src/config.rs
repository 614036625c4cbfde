use std::convert::TryFrom as _;
use std::time::Duration;

/// Options shared by all sessions of a [crate::Peer].
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Bound of the queue of envelopes waiting to be written to the transport.
    pub channel_capacity: usize,
    /// Default timeout for unary calls in milliseconds. No timeout if unset.
    pub call_timeout: Option<u64>,
    /// Websocket text message that signals liveness of the remote peer.
    pub ping_message: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel_capacity: 16,
            call_timeout: None,
            ping_message: "__ping__".to_string(),
        }
    }
}

impl Config {
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    pub fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Option<Duration>) -> Self {
        self.call_timeout = call_timeout
            .map(|timeout| u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_ping_message(mut self, ping_message: impl ToString) -> Self {
        self.ping_message = ping_message.to_string();
        self
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout.map(Duration::from_millis)
    }
}
