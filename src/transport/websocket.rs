use futures::channel::mpsc;
use futures::prelude::*;
use tungstenite::error::ProtocolError;
use tungstenite::{Error as WsError, Message};

use crate::envelope::Envelope;
use crate::lifetime::Lifetime;
use crate::telemetry::Observer;

/// Spawn tasks that move envelopes between a session and a websocket.
///
/// Every binary message carries exactly one envelope. A text message equal to
/// `ping_message` is reported to telemetry. Other text messages are ignored.
pub(crate) fn spawn<WebSocket>(
    websocket: WebSocket,
    inbound: mpsc::Sender<Envelope>,
    outbound: mpsc::Receiver<Envelope>,
    lifetime: Lifetime,
    observer: Observer,
    ping_message: String,
) where
    WebSocket: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError>,
    WebSocket: Send + 'static,
{
    let (sink, messages) = websocket.split();
    async_std::task::spawn(read_messages(
        messages,
        inbound,
        lifetime.clone(),
        observer.clone(),
        ping_message,
    ));
    async_std::task::spawn(write_messages(sink, outbound, lifetime, observer));
}

/// Errors that end a websocket without anything having gone wrong.
fn is_expected_close(error: &WsError) -> bool {
    matches!(
        error,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

#[tracing::instrument(level = "debug", skip_all)]
async fn read_messages<Messages>(
    messages: Messages,
    mut inbound: mpsc::Sender<Envelope>,
    lifetime: Lifetime,
    observer: Observer,
    ping_message: String,
) where
    Messages: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let messages = messages.take_until(lifetime.cancelled());
    futures::pin_mut!(messages);
    while let Some(message) = messages.next().await {
        match message {
            Ok(Message::Binary(data)) => match crate::packet::decode(&data) {
                Ok(envelope) => {
                    if inbound.send(envelope).await.is_err() {
                        break;
                    }
                }
                Err(error) => {
                    tracing::error!(?error, "failed to decode websocket message");
                    break;
                }
            },
            Ok(Message::Text(text)) => {
                if text == ping_message {
                    tracing::trace!("ping");
                    observer.ping();
                } else {
                    tracing::warn!(%text, "ignoring text message");
                }
            }
            Ok(Message::Close(frame)) => {
                tracing::debug!(?frame, "websocket closed by remote peer");
                break;
            }
            Ok(message) => tracing::trace!(?message, "ignoring websocket message"),
            Err(error) if is_expected_close(&error) => {
                tracing::debug!(?error, "websocket closed");
                break;
            }
            Err(error) => {
                tracing::error!(?error, "failed to read websocket message");
                break;
            }
        }
    }
    tracing::debug!("end of websocket stream");
}

#[tracing::instrument(level = "debug", skip_all)]
async fn write_messages<Sink_>(
    sink: Sink_,
    outbound: mpsc::Receiver<Envelope>,
    lifetime: Lifetime,
    observer: Observer,
) where
    Sink_: Sink<Message, Error = WsError> + Unpin,
{
    let mut sink = sink;
    let outbound = outbound.take_until(lifetime.cancelled());
    futures::pin_mut!(outbound);
    while let Some(envelope) = outbound.next().await {
        let data = match crate::packet::encode(&envelope) {
            Ok(data) => data,
            Err(error) => {
                tracing::error!(?error, ?envelope, "failed to encode envelope");
                observer.fail();
                continue;
            }
        };
        if let Err(error) = sink.send(Message::Binary(data)).await {
            if is_expected_close(&error) {
                tracing::debug!(?error, "websocket closed");
            } else {
                tracing::error!(?error, "failed to write websocket message");
            }
            lifetime.cancel();
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
    if let Err(error) = sink.close().await {
        if !is_expected_close(&error) {
            tracing::debug!(?error, "failed to close websocket");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn expected_close_errors() {
        assert!(is_expected_close(&WsError::ConnectionClosed));
        assert!(is_expected_close(&WsError::AlreadyClosed));
        assert!(is_expected_close(&WsError::Protocol(
            ProtocolError::ResetWithoutClosingHandshake
        )));
        assert!(!is_expected_close(&WsError::Utf8));
    }
}
