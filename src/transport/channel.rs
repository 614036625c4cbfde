//! In-process transport for two sessions in the same program.
use futures::channel::mpsc;

use crate::envelope::Envelope;
use crate::utils::Duplex;

/// One end of an in-process envelope channel.
///
/// Implements `Stream<Item = Envelope>` for envelopes from the other end and
/// `Sink<Envelope>` for envelopes to the other end.
pub type ChannelEnd = Duplex<mpsc::Receiver<Envelope>, mpsc::Sender<Envelope>>;

/// Create two connected channel ends. Pass each to
/// [crate::Peer::connect_channel].
pub fn pair(capacity: usize) -> (ChannelEnd, ChannelEnd) {
    let (a_sender, b_receiver) = mpsc::channel(capacity);
    let (b_sender, a_receiver) = mpsc::channel(capacity);
    (
        Duplex::new(a_receiver, a_sender),
        Duplex::new(b_receiver, b_sender),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::prelude::*;

    #[async_std::test]
    async fn ends_are_connected() {
        let (mut a, mut b) = pair(2);
        a.send(Envelope::Bye).await.unwrap();
        assert_eq!(b.next().await, Some(Envelope::Bye));
        b.send(Envelope::StreamClose { id: 1 }).await.unwrap();
        assert_eq!(a.next().await, Some(Envelope::StreamClose { id: 1 }));
        drop(a);
        assert_eq!(b.next().await, None);
    }
}
