//! Outbound channel integration.
//!
//! The pipeline only ever talks to the public channel through
//! [`ChannelPublisher`]. It hands over the content descriptor and never the
//! author, so anonymity holds no matter which backend is plugged in.

pub mod telegram;

use async_trait::async_trait;

use crate::error::PublishError;
use crate::submission::{ChannelRef, Content};

pub use telegram::TelegramPublisher;

/// Posts approved content to the public channel.
#[async_trait]
pub trait ChannelPublisher: Send + Sync {
    /// Post `content`, returning where it landed.
    async fn publish(&self, content: &Content) -> Result<ChannelRef, PublishError>;

    /// Remove a previously published message.
    ///
    /// Backends that cannot delete keep the default no-op.
    async fn withdraw(&self, message: &ChannelRef) -> Result<(), PublishError> {
        let _ = message;
        Ok(())
    }
}
