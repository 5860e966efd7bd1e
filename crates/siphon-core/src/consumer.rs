//! Destinations for read messages.

use siphon_types::record::ReadMessage;
use tokio::sync::mpsc;

use crate::errors::ConsumerError;

/// Receives records and checkpoints in emission order.
///
/// `accept` returning `Ok` means the message was delivered; the engine only
/// emits a checkpoint after every preceding record was accepted.
#[allow(async_fn_in_trait)]
pub trait RecordConsumer {
    async fn accept(&mut self, message: ReadMessage) -> Result<(), ConsumerError>;
}

impl RecordConsumer for Vec<ReadMessage> {
    async fn accept(&mut self, message: ReadMessage) -> Result<(), ConsumerError> {
        self.push(message);
        Ok(())
    }
}

/// Bounded channel; applies backpressure when the receiver lags.
impl RecordConsumer for mpsc::Sender<ReadMessage> {
    async fn accept(&mut self, message: ReadMessage) -> Result<(), ConsumerError> {
        self.send(message).await.map_err(|_| ConsumerError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_types::record::RecordMessage;

    fn record(n: i64) -> ReadMessage {
        let mut data = serde_json::Map::new();
        data.insert("id".into(), n.into());
        ReadMessage::Record(RecordMessage {
            stream: "s".into(),
            data,
        })
    }

    #[tokio::test]
    async fn vec_collects_in_order() {
        let mut sink = Vec::new();
        sink.accept(record(1)).await.unwrap();
        sink.accept(record(2)).await.unwrap();
        assert_eq!(sink, vec![record(1), record(2)]);
    }

    #[tokio::test]
    async fn sender_forwards_to_receiver() {
        let (mut tx, mut rx) = mpsc::channel(4);
        tx.accept(record(7)).await.unwrap();
        assert_eq!(rx.recv().await, Some(record(7)));
    }

    #[tokio::test]
    async fn dropped_receiver_is_closed() {
        let (mut tx, rx) = mpsc::channel(1);
        drop(rx);
        assert_eq!(tx.accept(record(1)).await, Err(ConsumerError::Closed));
    }
}
