use anyhow::{bail, Result};
use guild_tts::{
    codec,
    config::{self, Config},
    event::{self, EventBus},
    registry::SessionRegistry,
    session::VoiceServices,
    store::{self, GuildRecord, GuildStore},
    synth::{azure::AzureSpeech, SpeechEngine},
};
use std::sync::Arc;

#[macro_use]
extern crate log;

fn speech_engine(config: &Config) -> Result<Arc<dyn SpeechEngine>> {
    if let Some(azure) = &config.azure {
        info!("Using Azure speech in region {}", azure.azure_region);
        return Ok(Arc::new(AzureSpeech::new(
            azure.azure_key.clone(),
            &azure.azure_region,
        )?));
    }

    offline_engine(config)
}

#[cfg(feature = "espeak")]
fn offline_engine(config: &Config) -> Result<Arc<dyn SpeechEngine>> {
    match &config.espeak {
        Some(espeak) => {
            info!("Using espeak-ng voice {}", espeak.espeak_voice);
            Ok(Arc::new(guild_tts::synth::espeak::EspeakSpeech::new(
                espeak.espeak_voice.clone(),
            )))
        }
        None => bail!("No speech engine configured, set azure_key or espeak_voice"),
    }
}

#[cfg(not(feature = "espeak"))]
fn offline_engine(_config: &Config) -> Result<Arc<dyn SpeechEngine>> {
    bail!("No speech engine configured, set azure_key")
}

/// Build the session registry on top of the compiled-in voice platform.
#[cfg(feature = "discord")]
async fn start_platform(
    config: &Config,
    bus: &EventBus,
    engine: Arc<dyn SpeechEngine>,
    records: Vec<GuildRecord>,
) -> Result<Arc<SessionRegistry>> {
    use guild_tts::{
        discord::{self, DiscordPresence},
        songbird_transport::SongbirdTransport,
    };

    let songbird = songbird::Songbird::serenity();
    let presence = Arc::new(DiscordPresence::default());

    let registry = SessionRegistry::new(VoiceServices {
        transport: Arc::new(SongbirdTransport::new(songbird.clone())),
        engine,
        encoders: codec::raw_pcm(),
        presence: presence.clone(),
        bus: bus.clone(),
    });
    registry.load(records);

    match &config.discord {
        Some(discord_config) => {
            discord::init(registry.clone(), presence, songbird, discord_config).await?
        }
        None => warn!("No discord_token configured, not connecting to Discord"),
    }

    Ok(registry)
}

#[cfg(not(feature = "discord"))]
async fn start_platform(
    _config: &Config,
    bus: &EventBus,
    engine: Arc<dyn SpeechEngine>,
    records: Vec<GuildRecord>,
) -> Result<Arc<SessionRegistry>> {
    warn!("Built without the discord feature, no voice platform available");

    let registry = SessionRegistry::new(VoiceServices {
        transport: Arc::new(offline::NoTransport),
        engine,
        encoders: codec::raw_pcm(),
        presence: Arc::new(offline::NoTransport),
        bus: bus.clone(),
    });
    registry.load(records);

    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    let config = config::load().await?;
    let engine = speech_engine(&config)?;

    let bus = EventBus::new();
    event::debug(&bus);

    let guild_store = GuildStore::open(&config.store.guild_file).await?;
    let records = guild_store.records().cloned().collect::<Vec<_>>();
    store::init(&bus, guild_store);

    let registry = start_platform(&config, &bus, engine, records).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    registry.shutdown().await;

    Ok(())
}

#[cfg(not(feature = "discord"))]
mod offline {
    use async_trait::async_trait;
    use guild_tts::{
        error::TransportError,
        ids::{ChannelId, GuildId, UserId},
        transport::{VoiceConnection, VoicePresence, VoiceTransport},
    };

    /// Stand-in platform for builds without a voice integration.
    pub struct NoTransport;

    #[async_trait]
    impl VoiceTransport for NoTransport {
        async fn connect(
            &self,
            _guild: GuildId,
            _channel: ChannelId,
        ) -> Result<Box<dyn VoiceConnection>, TransportError> {
            Err(TransportError::Connect(
                "no voice platform compiled in".to_string(),
            ))
        }
    }

    impl VoicePresence for NoTransport {
        fn voice_channel_of(&self, _guild: GuildId, _user: UserId) -> Option<ChannelId> {
            None
        }
    }
}
