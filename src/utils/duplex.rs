use futures::prelude::*;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Joins a [Stream] of incoming items and a [Sink] for outgoing items into one
/// value that is both.
///
/// Used for the ends of [crate::transport::channel::pair] and to build
/// websockets from separate halves.
#[pin_project::pin_project]
#[derive(Debug)]
pub struct Duplex<Incoming, Outgoing> {
    #[pin]
    incoming: Incoming,
    #[pin]
    outgoing: Outgoing,
}

impl<Incoming, Outgoing> Duplex<Incoming, Outgoing> {
    pub fn new(incoming: Incoming, outgoing: Outgoing) -> Self {
        Self { incoming, outgoing }
    }

    /// Split into the incoming stream and the outgoing sink.
    pub fn into_inner(self) -> (Incoming, Outgoing) {
        (self.incoming, self.outgoing)
    }
}

impl<Incoming: Stream, Outgoing> Stream for Duplex<Incoming, Outgoing> {
    type Item = Incoming::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().incoming.poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.incoming.size_hint()
    }
}

impl<Item, Incoming, Outgoing: Sink<Item>> Sink<Item> for Duplex<Incoming, Outgoing> {
    type Error = Outgoing::Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().outgoing.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Item) -> Result<(), Self::Error> {
        self.project().outgoing.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().outgoing.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().outgoing.poll_close(cx)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[async_std::test]
    async fn loopback() {
        let (sender, receiver) = futures::channel::mpsc::unbounded::<u8>();
        let mut duplex = Duplex::new(receiver, sender);
        duplex.send(1).await.unwrap();
        duplex.send(2).await.unwrap();
        duplex.close().await.unwrap();
        assert_eq!(duplex.collect::<Vec<_>>().await, vec![1, 2]);
    }
}
