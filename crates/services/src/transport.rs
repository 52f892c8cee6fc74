//! Outbound delivery seam.

use async_trait::async_trait;
use thiserror::Error;
use trainer_core::model::ChannelAddress;

use crate::render::Screen;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("delivery to {channel} failed: {reason}")]
    Delivery {
        channel: ChannelAddress,
        reason: String,
    },
}

/// Sends rendered screens to a learner's chat.
///
/// Implementations are handed to the dispatcher per call; the engine keeps no
/// process-wide transport handle.
#[async_trait]
pub trait Transport: Send + Sync {
    /// # Errors
    ///
    /// Returns `TransportError::Delivery` if the channel rejects the message.
    async fn deliver(&self, channel: &ChannelAddress, screens: &[Screen])
    -> Result<(), TransportError>;
}
