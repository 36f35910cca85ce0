//! Discord front end.
//!
//! This module provides:
//! - Prefix and slash commands for guild setup and speech requests
//! - Narration of chat lines for users who opted in with `speak`
//! - Automatic join/leave when listeners enter or leave the audio channel
//! - Songbird-backed voice transport (see `songbird_transport`)

use crate::{
    config::DiscordConfig,
    ids,
    registry::SessionRegistry,
    session::SessionState,
    store::GuildRecord,
    text::{resolve_mentions, voice_for_language, MentionLookup, SayOutcome, SayRequest},
    transport::VoicePresence,
};
use anyhow::{anyhow, Result};
use poise::serenity_prelude::{self as serenity, Cache, GuildChannel};
use songbird::{SerenityInit, Songbird};
use std::{
    num::NonZeroU64,
    sync::{Arc, OnceLock},
};

/// Shared state handed to every command and event handler
pub struct BotState {
    registry: Arc<SessionRegistry>,
    presence: Arc<DiscordPresence>,
}

type Context<'a> = poise::Context<'a, Arc<BotState>, anyhow::Error>;

fn guild_id(id: ids::GuildId) -> Option<serenity::GuildId> {
    NonZeroU64::new(id.get()).map(serenity::GuildId::from)
}

fn user_id(id: ids::UserId) -> Option<serenity::UserId> {
    NonZeroU64::new(id.get()).map(serenity::UserId::from)
}

fn channel_id(id: ids::ChannelId) -> Option<serenity::ChannelId> {
    NonZeroU64::new(id.get()).map(serenity::ChannelId::from)
}

/// Voice presence read from the gateway cache.
///
/// The cache only exists once the client is built, so it is attached
/// afterwards. Until then nobody is considered present.
#[derive(Default)]
pub struct DiscordPresence {
    cache: OnceLock<Arc<Cache>>,
}

impl DiscordPresence {
    pub fn attach(&self, cache: Arc<Cache>) {
        if self.cache.set(cache).is_err() {
            warn!("Discord cache attached twice, keeping the first one");
        }
    }

    fn cache(&self) -> Option<&Cache> {
        self.cache.get().map(Arc::as_ref)
    }

    /// Non-bot members currently connected to `channel`.
    fn listeners(&self, guild: serenity::GuildId, channel: serenity::ChannelId) -> usize {
        let Some(cache) = self.cache() else {
            return 0;
        };
        let Some(guild) = cache.guild(guild) else {
            return 0;
        };

        guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel))
            .filter(|state| {
                !guild
                    .members
                    .get(&state.user_id)
                    .map(|member| member.user.bot)
                    .unwrap_or(false)
            })
            .filter(|state| state.user_id != cache.current_user().id)
            .count()
    }
}

impl VoicePresence for DiscordPresence {
    fn voice_channel_of(&self, guild: ids::GuildId, user: ids::UserId) -> Option<ids::ChannelId> {
        let guild = self.cache()?.guild(guild_id(guild)?)?;
        let channel = guild.voice_states.get(&user_id(user)?)?.channel_id?;

        Some(ids::ChannelId(channel.get()))
    }
}

/// Mention names of one guild, looked up in the cache.
struct GuildMentions<'a> {
    cache: &'a Cache,
    guild: serenity::GuildId,
}

impl MentionLookup for GuildMentions<'_> {
    fn member_name(&self, user: ids::UserId) -> Option<String> {
        let guild = self.cache.guild(self.guild)?;
        let member = guild.members.get(&user_id(user)?)?;
        Some(member.display_name().to_string())
    }

    fn role_name(&self, role: u64) -> Option<String> {
        let guild = self.cache.guild(self.guild)?;
        let role = guild
            .roles
            .get(&serenity::RoleId::from(NonZeroU64::new(role)?))?;
        Some(role.name.clone())
    }

    fn channel_name(&self, channel: ids::ChannelId) -> Option<String> {
        let guild = self.cache.guild(self.guild)?;
        let channel = guild.channels.get(&channel_id(channel)?)?;
        Some(channel.name.clone())
    }
}

fn speakable(cache: &Cache, guild: serenity::GuildId, content: &str) -> String {
    resolve_mentions(content, &GuildMentions { cache, guild })
}

/// Initialize the Discord bot
pub async fn init(
    registry: Arc<SessionRegistry>,
    presence: Arc<DiscordPresence>,
    songbird: Arc<Songbird>,
    discord_config: &DiscordConfig,
) -> Result<()> {
    let token = discord_config.discord_token.clone();
    let prefix = discord_config.command_prefix.clone();

    let state = Arc::new(BotState {
        registry,
        presence: presence.clone(),
    });

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                setup(),
                remove(),
                speak(),
                quiet(),
                connect(),
                disconnect(),
                set_text(),
                set_voice(),
                say(),
                say_as(),
                say_in(),
                info(),
            ],
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(prefix),
                ..Default::default()
            },
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            on_error: |error| Box::pin(on_error(error)),
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                info!("Discord bot ready and commands registered!");
                Ok(state)
            })
        })
        .build();

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_VOICE_STATES;

    let client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .register_songbird_with(songbird)
        .await?;

    presence.attach(client.cache.clone());

    tokio::spawn(async move {
        let mut client = client;
        if let Err(e) = client.start().await {
            error!("Discord client error: {:?}", e);
        }
    });

    Ok(())
}

async fn on_error(error: poise::FrameworkError<'_, Arc<BotState>, anyhow::Error>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            warn!("Command {} failed: {error:#}", ctx.command().qualified_name);
            if let Err(e) = ctx.say(format!("❌ {error}")).await {
                error!("Could not report command error: {e:?}");
            }
        }
        error => {
            if let Err(e) = poise::builtins::on_error(error).await {
                error!("Error while handling framework error: {e:?}");
            }
        }
    }
}

/// Handle Discord events (chat narration and voice presence)
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    framework: poise::FrameworkContext<'_, Arc<BotState>, anyhow::Error>,
    data: &Arc<BotState>,
) -> Result<(), anyhow::Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            if new_message.author.bot {
                return Ok(());
            }
            let Some(guild) = new_message.guild_id else {
                return Ok(());
            };

            let prefix = framework
                .options()
                .prefix_options
                .prefix
                .as_deref()
                .unwrap_or_default();
            if !prefix.is_empty() && new_message.content.starts_with(prefix) {
                return Ok(());
            }

            let author_name = new_message
                .member
                .as_ref()
                .and_then(|member| member.nick.clone())
                .unwrap_or_else(|| new_message.author.display_name().to_string());

            let request = SayRequest::narration(
                ids::ChannelId(new_message.channel_id.get()),
                ids::UserId(new_message.author.id.get()),
                author_name,
                speakable(&ctx.cache, guild, &new_message.content),
            );

            let outcome = data.registry.say(ids::GuildId(guild.get()), request);
            if outcome == SayOutcome::QueueFull {
                debug!("Dropped narration in guild {guild}, queue is full");
            }
        }
        serenity::FullEvent::VoiceStateUpdate { old, new } => {
            let Some(guild) = new.guild_id else {
                return Ok(());
            };
            let Some(session) = data.registry.get(ids::GuildId(guild.get())) else {
                return Ok(());
            };

            let audio_channel = session.settings().audio_channel;
            let touched = [old.as_ref().and_then(|s| s.channel_id), new.channel_id]
                .into_iter()
                .flatten()
                .any(|channel| channel.get() == audio_channel.get());
            if !touched {
                return Ok(());
            }

            let Some(channel) = channel_id(audio_channel) else {
                return Ok(());
            };
            let listeners = data.presence.listeners(guild, channel);
            debug!("{listeners} listeners in audio channel of guild {guild}");

            data.registry
                .on_presence_changed(ids::GuildId(guild.get()), listeners)
                .await;
        }
        _ => {}
    }

    Ok(())
}

fn command_guild(ctx: &Context<'_>) -> Result<ids::GuildId> {
    ctx.guild_id()
        .map(|guild| ids::GuildId(guild.get()))
        .ok_or_else(|| anyhow!("This command only works in a server"))
}

async fn author_name(ctx: &Context<'_>) -> String {
    match ctx.author_member().await {
        Some(member) => member.display_name().to_string(),
        None => ctx.author().display_name().to_string(),
    }
}

fn outcome_message(outcome: SayOutcome) -> Option<&'static str> {
    match outcome {
        SayOutcome::Queued => None,
        SayOutcome::UnknownGuild => Some("TTS is not set up here, ask an admin to run setup"),
        SayOutcome::WrongChannel => Some("Use the TTS text channel for this"),
        SayOutcome::NotSpeaker => Some("Use speak first"),
        SayOutcome::NotListening => Some("Join the TTS voice channel first"),
        SayOutcome::NotConnected => Some("Not connected to voice, use connect first"),
        SayOutcome::QueueFull => Some("Too many messages queued, try again in a bit"),
    }
}

async fn submit(ctx: Context<'_>, request: SayRequest) -> Result<(), anyhow::Error> {
    let guild = command_guild(&ctx)?;
    let outcome = ctx.data().registry.say(guild, request);

    match outcome_message(outcome) {
        Some(message) => {
            ctx.say(message).await?;
        }
        None => {
            if let poise::Context::Application(_) = ctx {
                ctx.send(
                    poise::CreateReply::default()
                        .content("🗣️ Queued")
                        .ephemeral(true),
                )
                .await?;
            }
        }
    }

    Ok(())
}

async fn say_request(ctx: &Context<'_>, text: &str) -> Result<SayRequest> {
    let guild = ctx
        .guild_id()
        .ok_or_else(|| anyhow!("This command only works in a server"))?;

    Ok(SayRequest::once(
        ids::ChannelId(ctx.channel_id().get()),
        ids::UserId(ctx.author().id.get()),
        author_name(ctx).await,
        speakable(&ctx.serenity_context().cache, guild, text),
    ))
}

/// Configure the TTS text and voice channel of this server
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR"
)]
async fn setup(
    ctx: Context<'_>,
    #[description = "Channel for commands and narrated chat"]
    #[channel_types("Text")]
    text_channel: GuildChannel,
    #[description = "Voice channel to speak in"]
    #[channel_types("Voice")]
    voice_channel: GuildChannel,
) -> Result<(), anyhow::Error> {
    let guild = command_guild(&ctx)?;
    let record = GuildRecord::new(
        guild,
        ids::ChannelId(voice_channel.id.get()),
        ids::ChannelId(text_channel.id.get()),
    );

    let record = match ctx.data().registry.get(guild) {
        Some(existing) => GuildRecord {
            fallback_voice: existing.settings().voice,
            ..record
        },
        None => record,
    };

    ctx.data().registry.create_or_replace(record);
    ctx.say("TTS Services configured").await?;

    Ok(())
}

/// Remove the TTS configuration of this server
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    aliases("yeet"),
    required_permissions = "ADMINISTRATOR"
)]
async fn remove(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let guild = command_guild(&ctx)?;
    let registry = &ctx.data().registry;

    // A streaming guild is only disconnected, run the command again to remove it
    if registry.stop(guild).await? {
        ctx.say("Disconnected, run remove again to delete the TTS configuration")
            .await?;
        return Ok(());
    }

    registry.remove(guild)?;
    ctx.say("TTS configuration removed").await?;

    Ok(())
}

/// Have your messages in the TTS channel read aloud
#[poise::command(prefix_command, slash_command, guild_only)]
async fn speak(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let guild = command_guild(&ctx)?;
    ctx.data()
        .registry
        .start_speaking(guild, ids::UserId(ctx.author().id.get()))?;
    ctx.say("Your messages will now be read aloud").await?;

    Ok(())
}

/// Stop reading your messages aloud
#[poise::command(prefix_command, slash_command, guild_only)]
async fn quiet(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let guild = command_guild(&ctx)?;
    ctx.data()
        .registry
        .stop_speaking(guild, ids::UserId(ctx.author().id.get()))?;
    ctx.say("Your messages will no longer be read aloud").await?;

    Ok(())
}

/// Join the TTS voice channel
#[poise::command(prefix_command, slash_command, guild_only)]
async fn connect(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let guild = command_guild(&ctx)?;
    ctx.defer().await?;
    ctx.data().registry.start(guild).await?;
    ctx.say("🔊 Connected").await?;

    Ok(())
}

/// Leave the TTS voice channel
#[poise::command(prefix_command, slash_command, guild_only)]
async fn disconnect(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let guild = command_guild(&ctx)?;
    let message = if ctx.data().registry.stop(guild).await? {
        "🔇 Disconnected"
    } else {
        "Not connected"
    };
    ctx.say(message).await?;

    Ok(())
}

/// Move the TTS text channel
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "set-text",
    required_permissions = "ADMINISTRATOR"
)]
async fn set_text(
    ctx: Context<'_>,
    #[description = "New channel for commands and narrated chat"]
    #[channel_types("Text")]
    channel: GuildChannel,
) -> Result<(), anyhow::Error> {
    let guild = command_guild(&ctx)?;
    ctx.data()
        .registry
        .set_command_channel(guild, ids::ChannelId(channel.id.get()))?;
    ctx.say(format!(
        "Successfully set <#{}> as text/command channel.",
        channel.id
    ))
    .await?;

    Ok(())
}

/// Change the default voice of this server
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "set-voice",
    required_permissions = "ADMINISTRATOR"
)]
async fn set_voice(
    ctx: Context<'_>,
    #[description = "Voice name, e.g. en-GB-SoniaNeural"] voice: String,
) -> Result<(), anyhow::Error> {
    let guild = command_guild(&ctx)?;
    ctx.data().registry.set_voice(guild, voice.as_str())?;
    ctx.say(format!("Default voice is now {voice}")).await?;

    Ok(())
}

/// Read a message aloud
#[poise::command(prefix_command, slash_command, guild_only)]
async fn say(
    ctx: Context<'_>,
    #[description = "What to say"]
    #[rest]
    text: String,
) -> Result<(), anyhow::Error> {
    let request = say_request(&ctx, &text).await?;
    submit(ctx, request).await
}

/// Read a message aloud in a specific voice
#[poise::command(prefix_command, slash_command, guild_only, rename = "say-as")]
async fn say_as(
    ctx: Context<'_>,
    #[description = "Voice name"] voice: String,
    #[description = "What to say"]
    #[rest]
    text: String,
) -> Result<(), anyhow::Error> {
    let request = say_request(&ctx, &text).await?.with_voice(voice);
    submit(ctx, request).await
}

/// Read a message aloud in a language
#[poise::command(prefix_command, slash_command, guild_only, rename = "say-in")]
async fn say_in(
    ctx: Context<'_>,
    #[description = "Language code, e.g. de or fr"] lang: String,
    #[description = "What to say"]
    #[rest]
    text: String,
) -> Result<(), anyhow::Error> {
    if voice_for_language(&lang).is_none() {
        ctx.say(format!("I don't know a voice for `{lang}`")).await?;
        return Ok(());
    }

    let request = say_request(&ctx, &text).await?.with_lang(lang);
    submit(ctx, request).await
}

/// Show the TTS configuration of this server
#[poise::command(prefix_command, slash_command, guild_only)]
async fn info(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let guild = command_guild(&ctx)?;
    let Some(session) = ctx.data().registry.get(guild) else {
        ctx.say("TTS is not set up here").await?;
        return Ok(());
    };

    let settings = session.settings();
    let state = match session.state() {
        SessionState::Idle => "idle",
        SessionState::Connecting => "connecting",
        SessionState::Streaming => "speaking",
        SessionState::Stopping => "stopping",
    };

    ctx.say(format!(
        "Text channel: <#{}>\nVoice channel: <#{}>\nVoice: {}\nStatus: {state}, {} queued",
        settings.command_channel,
        settings.audio_channel,
        settings.voice,
        session.queue().len(),
    ))
    .await?;

    Ok(())
}
