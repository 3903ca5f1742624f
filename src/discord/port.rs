//! Channel port implementation over the Discord HTTP API.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serenity::builder::CreateMessage;
use serenity::http::{Http, HttpError};
use serenity::model::id::{ChannelId as ApiChannelId, MessageId as ApiMessageId};
use tracing::debug;

use crate::engine::port::{ChannelPort, DeleteOutcome, PortError};
use crate::types::{ChannelId, MessageId};

/// Discord JSON error code for a message that no longer exists.
const UNKNOWN_MESSAGE: isize = 10008;

/// Error text for calls made before the gateway client exists.
const UNBOUND: &str = "discord port not bound to a client yet";

/// [`ChannelPort`] over serenity's HTTP client.
///
/// Starts unbound so the engine can be constructed before the gateway
/// client; [`bind`](Self::bind) attaches the client's HTTP handle right
/// before the gateway starts, and every gateway event arrives after
/// that.
#[derive(Default)]
pub struct GatewayPort {
    http: OnceLock<Arc<Http>>,
}

impl GatewayPort {
    /// Create an unbound port.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the HTTP handle. Only the first call takes effect.
    pub fn bind(&self, http: Arc<Http>) {
        let _ = self.http.set(http);
    }
}

#[async_trait]
impl ChannelPort for GatewayPort {
    async fn send(&self, channel: ChannelId, text: &str) -> Result<MessageId, PortError> {
        let http = self
            .http
            .get()
            .ok_or_else(|| PortError::Send(UNBOUND.to_owned()))?;
        let message = ApiChannelId::new(channel.0)
            .send_message(http, CreateMessage::new().content(text))
            .await
            .map_err(|e| PortError::Send(e.to_string()))?;
        debug!(%channel, message_id = %message.id, "sticky message posted");
        Ok(MessageId(message.id.get()))
    }

    async fn delete(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<DeleteOutcome, PortError> {
        let http = self
            .http
            .get()
            .ok_or_else(|| PortError::Delete(UNBOUND.to_owned()))?;
        match ApiChannelId::new(channel.0)
            .delete_message(http, ApiMessageId::new(message.0))
            .await
        {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(e) if is_unknown_message(&e) => Ok(DeleteOutcome::AlreadyAbsent),
            Err(e) => Err(PortError::Delete(e.to_string())),
        }
    }

    async fn message_exists(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<bool, PortError> {
        let http = self
            .http
            .get()
            .ok_or_else(|| PortError::Fetch(UNBOUND.to_owned()))?;
        match ApiChannelId::new(channel.0)
            .message(http, ApiMessageId::new(message.0))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_unknown_message(&e) => Ok(false),
            Err(e) => Err(PortError::Fetch(e.to_string())),
        }
    }
}

/// Whether a serenity error is Discord saying the message is gone
/// (HTTP 404 / JSON error code 10008, "Unknown Message").
fn is_unknown_message(err: &serenity::Error) -> bool {
    match err {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(resp)) => {
            resp.error.code == UNKNOWN_MESSAGE || resp.status_code.as_u16() == 404
        }
        _ => false,
    }
}
