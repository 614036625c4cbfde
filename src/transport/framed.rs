use futures::channel::mpsc;
use futures::prelude::*;

use crate::envelope::Envelope;
use crate::lifetime::Lifetime;
use crate::packet_stream::PacketStream;
use crate::telemetry::Observer;

/// Spawn tasks that move envelopes between a session and a byte transport.
///
/// Each envelope is written to `send` as one buffer. Envelopes are parsed from
/// the buffers of `receive` regardless of how they are chunked.
pub(crate) fn spawn<Sink_, TryStream_>(
    send: Sink_,
    receive: TryStream_,
    inbound: mpsc::Sender<Envelope>,
    outbound: mpsc::Receiver<Envelope>,
    lifetime: Lifetime,
    observer: Observer,
) where
    Sink_: Sink<Vec<u8>> + Send + Unpin + 'static,
    Sink_::Error: std::error::Error + Send + Sync + 'static,
    TryStream_: TryStream<Ok = Vec<u8>> + Send + Unpin + 'static,
    TryStream_::Error: std::error::Error + Send + Sync + 'static,
{
    async_std::task::spawn(read_packets(receive, inbound, lifetime.clone()));
    async_std::task::spawn(write_packets(send, outbound, lifetime, observer));
}

#[tracing::instrument(level = "debug", skip_all)]
async fn read_packets<TryStream_>(
    receive: TryStream_,
    mut inbound: mpsc::Sender<Envelope>,
    lifetime: Lifetime,
) where
    TryStream_: TryStream<Ok = Vec<u8>> + Unpin,
    TryStream_::Error: std::error::Error + Send + Sync + 'static,
{
    let packets = PacketStream::new(receive).take_until(lifetime.cancelled());
    futures::pin_mut!(packets);
    while let Some(next_packet) = packets.next().await {
        match next_packet {
            Ok(envelope) => {
                if inbound.send(envelope).await.is_err() {
                    break;
                }
            }
            Err(error) => {
                tracing::error!(?error, "failed to read envelope");
                break;
            }
        }
    }
    tracing::debug!("end of packet stream");
}

#[tracing::instrument(level = "debug", skip_all)]
async fn write_packets<Sink_>(
    send: Sink_,
    outbound: mpsc::Receiver<Envelope>,
    lifetime: Lifetime,
    observer: Observer,
) where
    Sink_: Sink<Vec<u8>> + Unpin,
    Sink_::Error: std::error::Error + Send + Sync + 'static,
{
    let mut send = send;
    let outbound = outbound.take_until(lifetime.cancelled());
    futures::pin_mut!(outbound);
    while let Some(envelope) = outbound.next().await {
        match crate::packet::encode(&envelope) {
            Ok(data) => {
                if let Err(error) = send.send(data).await {
                    tracing::error!(?error, "failed to write envelope");
                    lifetime.cancel();
                    return;
                }
            }
            Err(error) => {
                tracing::error!(?error, ?envelope, "failed to encode envelope");
                observer.fail();
            }
        }
    }
    if let Err(error) = send.close().await {
        tracing::debug!(?error, "failed to close transport");
    }
}
