//! SignalRelay - re-broadcasts delivered frames to passive subscribers

use tokio::sync::broadcast;
use tracing::trace;

use contracts::{ContractError, FrameConsumer, FrameEvent, Image, Metadata, RunStatus, Sequence};

/// Default number of events a lagging subscriber may fall behind
pub const DEFAULT_RELAY_CAPACITY: usize = 64;

/// Notification sent to relay subscribers
#[derive(Debug, Clone)]
pub enum RelayEvent {
    Started {
        sequence: Sequence,
        meta: Metadata,
    },
    Frame {
        image: Image,
        event: FrameEvent,
        meta: Metadata,
    },
    Finished {
        sequence: Sequence,
        status: RunStatus,
    },
}

/// Consumer that forwards every callback onto a broadcast channel.
///
/// Sending never blocks; subscribers that fall behind observe
/// `RecvError::Lagged` and skip ahead. Having no subscribers is not an
/// error.
#[derive(Debug, Clone)]
pub struct SignalRelay {
    tx: broadcast::Sender<RelayEvent>,
}

impl SignalRelay {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New subscriber, receiving events sent after this call
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn emit(&self, event: RelayEvent) {
        if self.tx.send(event).is_err() {
            trace!("relay event dropped, no subscribers");
        }
    }
}

impl Default for SignalRelay {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_CAPACITY)
    }
}

impl FrameConsumer for SignalRelay {
    fn setup(&mut self, sequence: &Sequence, meta: &Metadata) -> Result<(), ContractError> {
        self.emit(RelayEvent::Started {
            sequence: sequence.clone(),
            meta: meta.clone(),
        });
        Ok(())
    }

    fn frame(
        &mut self,
        image: &Image,
        event: &FrameEvent,
        meta: &Metadata,
    ) -> Result<(), ContractError> {
        // pixel bytes are shared, not copied
        self.emit(RelayEvent::Frame {
            image: image.clone(),
            event: event.clone(),
            meta: meta.clone(),
        });
        Ok(())
    }

    fn finish(&mut self, sequence: &Sequence, status: RunStatus) -> Result<(), ContractError> {
        self.emit(RelayEvent::Finished {
            sequence: sequence.clone(),
            status,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::DType;

    #[tokio::test]
    async fn test_relay_broadcasts_lifecycle() {
        let mut relay = SignalRelay::new(8);
        let mut rx = relay.subscribe();
        assert_eq!(relay.subscriber_count(), 1);

        let sequence = Sequence::new("run");
        relay.setup(&sequence, &Metadata::new()).unwrap();
        relay
            .frame(
                &Image::zeros(vec![2, 2], DType::U8),
                &FrameEvent::at([("t", 3)]),
                &Metadata::new(),
            )
            .unwrap();
        relay.finish(&sequence, RunStatus::Completed).unwrap();

        assert!(matches!(rx.recv().await.unwrap(), RelayEvent::Started { .. }));
        match rx.recv().await.unwrap() {
            RelayEvent::Frame { event, image, .. } => {
                assert_eq!(event.index["t"], 3);
                assert_eq!(image.nbytes(), 4);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            RelayEvent::Finished {
                status: RunStatus::Completed,
                ..
            }
        ));
    }

    #[test]
    fn test_relay_without_subscribers() {
        let mut relay = SignalRelay::default();
        let result = relay.frame(
            &Image::zeros(vec![1], DType::U8),
            &FrameEvent::default(),
            &Metadata::new(),
        );
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_lagging_subscriber() {
        let mut relay = SignalRelay::new(2);
        let mut rx = relay.subscribe();
        let image = Image::zeros(vec![1], DType::U8);
        for t in 0..5 {
            relay
                .frame(&image, &FrameEvent::at([("t", t)]), &Metadata::new())
                .unwrap();
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        match rx.recv().await.unwrap() {
            RelayEvent::Frame { event, .. } => assert_eq!(event.index["t"], 3),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
