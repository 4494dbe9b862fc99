//! NullConsumer - accepts and discards frames

use contracts::{ContractError, FrameConsumer, FrameEvent, Image, Metadata};

/// Consumer that discards every frame
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConsumer;

impl FrameConsumer for NullConsumer {
    fn frame(
        &mut self,
        _image: &Image,
        _event: &FrameEvent,
        _meta: &Metadata,
    ) -> Result<(), ContractError> {
        Ok(())
    }
}
