//! Discord adapter: gateway client, event handler, and slash commands.
//!
//! Normalizes gateway events into engine calls and implements the
//! engine's channel port over the Discord HTTP API.

use std::sync::Arc;

use anyhow::Context as _;
use serenity::all::{
    Client, Command, Context, EventHandler, GatewayIntents, Interaction, Message, Ready,
};
use serenity::async_trait;
use tracing::{debug, info, warn};

use crate::engine::StickyEngine;
use crate::types::ChannelId;

pub mod commands;
pub mod port;

use port::GatewayPort;

/// Gateway event handler that feeds the sticky engine.
pub struct StickyHandler {
    engine: Arc<StickyEngine>,
}

impl StickyHandler {
    /// Wrap `engine` for gateway dispatch.
    pub fn new(engine: Arc<StickyEngine>) -> Self {
        Self { engine }
    }

    /// Gateway intents the bot needs: guild messages and their content.
    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT
    }
}

#[async_trait]
impl EventHandler for StickyHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(
            bot_name = %ready.user.name,
            guilds = ready.guilds.len(),
            "discord gateway ready"
        );
        match Command::set_global_commands(&ctx.http, commands::definitions()).await {
            Ok(registered) => info!(count = registered.len(), "slash commands registered"),
            Err(e) => warn!(error = %e, "failed to register slash commands"),
        }
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        let channel = ChannelId(msg.channel_id.get());
        debug!(%channel, from_bot = msg.author.bot, "message observed");
        // The engine ignores bot authors; forwarding the flag keeps the
        // guard in one place.
        self.engine.on_message(channel, msg.author.bot).await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };
        let reply = match command.data.name.as_str() {
            "stick" => commands::handle_stick(&self.engine, &command).await,
            "unstick" => commands::handle_unstick(&self.engine, &command).await,
            "msglimit" => commands::handle_msglimit(&self.engine, &command).await,
            other => {
                warn!(command = other, "unknown slash command");
                return;
            }
        };
        if let Err(e) = commands::respond_ephemeral(&ctx, &command, reply).await {
            warn!(error = %e, command = %command.data.name, "failed to answer interaction");
        }
    }
}

/// Build the gateway client, bind the HTTP port, and run until shutdown.
///
/// The port starts unbound so the engine can exist first; it is bound to
/// the client's HTTP handle here, before the gateway starts. On ctrl-c
/// the engine flushes once more and the shards shut down.
///
/// # Errors
///
/// Fails if the client cannot be built or the gateway connection dies.
pub async fn run(
    token: &str,
    engine: Arc<StickyEngine>,
    port: Arc<GatewayPort>,
) -> anyhow::Result<()> {
    let handler = StickyHandler::new(Arc::clone(&engine));
    let mut client = Client::builder(token, StickyHandler::intents())
        .event_handler(handler)
        .await
        .context("failed to build discord client")?;

    port.bind(Arc::clone(&client.http));

    let shard_manager = client.shard_manager.clone();
    tokio::select! {
        result = client.start() => result.context("discord client exited with error"),
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, flushing sticky data");
            if let Err(e) = engine.flush().await {
                warn!(error = %e, "final flush failed");
            }
            shard_manager.shutdown_all().await;
            info!("limpet shut down cleanly");
            Ok(())
        }
    }
}
