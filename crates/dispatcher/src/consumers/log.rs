//! LogConsumer - logs frame summaries via tracing

use contracts::{ContractError, FrameConsumer, FrameEvent, Image, Metadata, RunStatus, Sequence};
use tracing::{info, instrument};

/// Consumer that logs frame summaries for debugging
#[derive(Debug)]
pub struct LogConsumer {
    name: String,
    frames: u64,
}

impl LogConsumer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frames: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frames seen so far
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl FrameConsumer for LogConsumer {
    fn setup(&mut self, sequence: &Sequence, meta: &Metadata) -> Result<(), ContractError> {
        info!(
            consumer = %self.name,
            uid = %sequence.uid,
            events = sequence.num_events(),
            meta_keys = meta.len(),
            "Sequence started"
        );
        self.frames = 0;
        Ok(())
    }

    #[instrument(
        name = "log_consumer_frame",
        skip(self, image, event, meta),
        fields(consumer = %self.name)
    )]
    fn frame(
        &mut self,
        image: &Image,
        event: &FrameEvent,
        meta: &Metadata,
    ) -> Result<(), ContractError> {
        self.frames += 1;
        info!(
            consumer = %self.name,
            index = ?event.index,
            channel = event.channel.as_deref().unwrap_or("-"),
            shape = ?image.shape,
            dtype = %image.dtype,
            bytes = image.nbytes(),
            meta_keys = meta.len(),
            "Frame received"
        );
        Ok(())
    }

    fn finish(&mut self, sequence: &Sequence, status: RunStatus) -> Result<(), ContractError> {
        info!(
            consumer = %self.name,
            uid = %sequence.uid,
            %status,
            frames = self.frames,
            "Sequence finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::DType;

    #[test]
    fn test_log_consumer_counts_frames() {
        let mut consumer = LogConsumer::new("test_log");
        let sequence = Sequence::new("run");
        consumer.setup(&sequence, &Metadata::new()).unwrap();

        let image = Image::zeros(vec![2, 2], DType::U8);
        for t in 0..3 {
            let result = consumer.frame(&image, &FrameEvent::at([("t", t)]), &Metadata::new());
            assert!(result.is_ok());
        }
        assert_eq!(consumer.frames(), 3);
        assert!(consumer.finish(&sequence, RunStatus::Completed).is_ok());
    }

    #[test]
    fn test_log_consumer_name() {
        let consumer = LogConsumer::new("my_logger");
        assert_eq!(consumer.name(), "my_logger");
    }
}
