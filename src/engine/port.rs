//! Abstract chat-platform port consumed by the engine.
//!
//! The engine never talks to Discord directly; it calls this trait and
//! the adapter supplies the binding. Tests supply fakes.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{ChannelId, MessageId};

/// Platform call failures.
#[derive(Debug, Error)]
pub enum PortError {
    /// Posting a message failed.
    #[error("send failed: {0}")]
    Send(String),
    /// Deleting a message failed for a reason other than it being gone.
    #[error("delete failed: {0}")]
    Delete(String),
    /// Looking up a message failed.
    #[error("fetch failed: {0}")]
    Fetch(String),
}

/// What happened to the targeted message on delete.
///
/// "Already gone" is a successful outcome in its own right: the desired
/// end state — no stale sticky visible — holds either way. Callers
/// branch on meaning instead of sniffing platform error identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The message existed and was deleted.
    Deleted,
    /// The platform reported the message as already missing.
    AlreadyAbsent,
}

/// Messaging operations the engine needs from the chat platform.
#[async_trait]
pub trait ChannelPort: Send + Sync {
    /// Post `text` to `channel`, returning the new message id.
    async fn send(&self, channel: ChannelId, text: &str) -> Result<MessageId, PortError>;

    /// Delete `message` from `channel`.
    ///
    /// Implementations map the platform's "message not found" response
    /// to [`DeleteOutcome::AlreadyAbsent`], never to an error.
    async fn delete(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<DeleteOutcome, PortError>;

    /// Whether `message` still exists in `channel`.
    ///
    /// Only needed by platform bindings whose delete requires a prior
    /// fetch; the engine itself deletes blindly.
    async fn message_exists(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<bool, PortError>;
}
