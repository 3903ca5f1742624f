//! Slash command definitions and handlers.
//!
//! Each handler maps one command onto the engine and returns the reply
//! text; all replies go out as ephemeral responses so channels stay
//! free of command noise.

use serenity::all::{
    CommandInteraction, CommandOptionType, Context, CreateCommand, CreateCommandOption,
    CreateInteractionResponse, CreateInteractionResponseMessage, ResolvedValue,
};
use tracing::warn;

use crate::engine::{ClearOutcome, EngineError, StickyEngine};
use crate::types::ChannelId;

/// The three sticky commands, ready for global registration.
pub fn definitions() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("stick")
            .description("Set a sticky message for this channel")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "message",
                    "The message to stick in this channel",
                )
                .required(true),
            ),
        CreateCommand::new("unstick").description("Remove the sticky message from this channel"),
        CreateCommand::new("msglimit")
            .description("Set how many messages before the sticky message reposts")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::Integer,
                    "limit",
                    "Number of messages before reposting (minimum 1)",
                )
                .required(true),
            ),
    ]
}

/// Handle `/stick`: requires Manage Messages in the channel.
pub async fn handle_stick(engine: &StickyEngine, command: &CommandInteraction) -> String {
    if !has_manage_messages(command) {
        return "❌ You need the Manage Messages permission to set a sticky message.".to_owned();
    }
    let Some(text) = string_option(command, "message") else {
        return "❌ Missing the message to stick.".to_owned();
    };
    let channel = interaction_channel(command);
    match engine.set_sticky(channel, text.clone()).await {
        Ok(applied) => format!(
            "✅ Sticky message set! It will be reposted every {} messages.\nMessage: {text}",
            applied.msg_limit
        ),
        Err(e) => {
            warn!(%channel, error = %e, "stick command failed to post");
            format!("⚠️ Sticky message saved, but posting it failed: {e}")
        }
    }
}

/// Handle `/unstick`: idempotent removal.
pub async fn handle_unstick(engine: &StickyEngine, command: &CommandInteraction) -> String {
    let channel = interaction_channel(command);
    match engine.clear_sticky(channel).await {
        ClearOutcome::Removed => "✅ Sticky message removed from this channel.".to_owned(),
        ClearOutcome::NothingToClear => {
            "❌ There is no sticky message set in this channel.".to_owned()
        }
    }
}

/// Handle `/msglimit`: update the repost limit.
pub async fn handle_msglimit(engine: &StickyEngine, command: &CommandInteraction) -> String {
    let Some(limit) = integer_option(command, "limit") else {
        return "❌ Missing the message limit.".to_owned();
    };
    let channel = interaction_channel(command);
    match engine.set_limit(channel, limit).await {
        Ok(()) => format!("✅ Message limit updated to {limit} messages."),
        Err(EngineError::InvalidLimit(_)) => "❌ Message limit must be at least 1.".to_owned(),
        Err(EngineError::NoSticky) => {
            "❌ No sticky message is set in this channel. Use /stick first.".to_owned()
        }
        Err(e) => {
            warn!(%channel, error = %e, "msglimit command failed");
            format!("⚠️ {e}")
        }
    }
}

/// Send `text` back as an ephemeral interaction response.
///
/// # Errors
///
/// Returns serenity's error when Discord rejects the response.
pub async fn respond_ephemeral(
    ctx: &Context,
    command: &CommandInteraction,
    text: String,
) -> serenity::Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(text)
                    .ephemeral(true),
            ),
        )
        .await
}

/// Channel the interaction was issued in.
fn interaction_channel(command: &CommandInteraction) -> ChannelId {
    ChannelId(command.channel_id.get())
}

/// Whether the caller holds Manage Messages where the command ran.
///
/// Interactions outside a guild carry no member permissions; those are
/// denied.
fn has_manage_messages(command: &CommandInteraction) -> bool {
    command
        .member
        .as_ref()
        .and_then(|member| member.permissions)
        .is_some_and(|permissions| permissions.manage_messages())
}

/// First string option named `name`.
fn string_option(command: &CommandInteraction, name: &str) -> Option<String> {
    command.data.options().into_iter().find_map(|opt| {
        if opt.name == name {
            if let ResolvedValue::String(s) = opt.value {
                return Some(s.to_owned());
            }
        }
        None
    })
}

/// First integer option named `name`.
fn integer_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command.data.options().into_iter().find_map(|opt| {
        if opt.name == name {
            if let ResolvedValue::Integer(n) = opt.value {
                return Some(n);
            }
        }
        None
    })
}
