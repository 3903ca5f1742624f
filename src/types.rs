//! Core identifier and record types shared by the engine, store, and adapter.

use serde::{Deserialize, Serialize};

/// Repost limit applied when a channel is first configured, matching the
/// `/stick` confirmation text.
pub const DEFAULT_MSG_LIMIT: u32 = 10;

/// Discord channel snowflake.
///
/// Kept numeric throughout the engine; the store encodes it as a string
/// only at the JSON-object-key boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(
    /// Raw snowflake value.
    pub u64,
);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for ChannelId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(ChannelId)
    }
}

/// Discord message snowflake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(
    /// Raw snowflake value.
    pub u64,
);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Sticky state for one channel.
///
/// Field names are the durable JSON contract; any storage engine
/// substituted under the store trait must round-trip this shape exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSticky {
    /// Text that gets (re)posted.
    pub message: String,
    /// Intervening messages before a repost; always at least 1.
    pub msg_limit: u32,
    /// Messages observed since the sticky was last (re)posted.
    pub message_count: u32,
    /// Most recently posted instance of the sticky, if any.
    pub last_message_id: Option<MessageId>,
}

impl ChannelSticky {
    /// Fresh state for newly configured text: zero count, nothing posted yet.
    pub fn new(message: String, msg_limit: u32) -> Self {
        Self {
            message,
            msg_limit,
            message_count: 0,
            last_message_id: None,
        }
    }
}
