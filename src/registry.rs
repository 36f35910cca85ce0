//! Guild id to voice session lookup.
//!
//! The registry is shared by every platform handler. It never touches the
//! guild store itself, configuration changes are reported on the event bus.

use crate::{
    error::SessionError,
    event::{Event, EventBus, GuildAction},
    ids::{ChannelId, GuildId, UserId},
    session::{GuildSettings, VoiceServices, VoiceSession},
    store::GuildRecord,
    text::{SayOutcome, SayRequest},
};
use dashmap::DashMap;
use std::sync::Arc;

pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<VoiceSession>>,
    services: VoiceServices,
}

impl SessionRegistry {
    pub fn new(services: VoiceServices) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            services,
        })
    }

    pub fn services(&self) -> &VoiceServices {
        &self.services
    }

    fn bus(&self) -> &EventBus {
        &self.services.bus
    }

    /// Populate from persisted records without reporting them as changes.
    pub fn load(&self, records: impl IntoIterator<Item = GuildRecord>) {
        for record in records {
            self.sessions.insert(
                record.guild_id,
                VoiceSession::new(record.guild_id, GuildSettings::from(&record)),
            );
        }
        info!("Loaded {} guild configurations", self.sessions.len());
    }

    pub fn get(&self, guild: GuildId) -> Option<Arc<VoiceSession>> {
        self.sessions.get(&guild).map(|entry| entry.value().clone())
    }

    fn require(&self, guild: GuildId) -> Result<Arc<VoiceSession>, SessionError> {
        self.get(guild).ok_or(SessionError::UnknownGuild(guild))
    }

    /// Register a guild, or update the settings of an existing session in
    /// place. A new audio channel is joined the next time the session starts.
    pub fn create_or_replace(&self, record: GuildRecord) -> Arc<VoiceSession> {
        let session = self
            .sessions
            .entry(record.guild_id)
            .and_modify(|session| session.apply(&record))
            .or_insert_with(|| {
                VoiceSession::new(record.guild_id, GuildSettings::from(&record))
            })
            .value()
            .clone();

        self.bus()
            .send(Event::Guild(GuildAction::Upserted(record)));

        session
    }

    /// Forget a guild. Rejected while its session is streaming.
    pub fn remove(&self, guild: GuildId) -> Result<Arc<VoiceSession>, SessionError> {
        match self.sessions.remove_if(&guild, |_, session| !session.is_active()) {
            Some((_, session)) => {
                self.bus().send(Event::Guild(GuildAction::Removed(guild)));
                Ok(session)
            }
            None if self.sessions.contains_key(&guild) => Err(SessionError::StillStreaming(guild)),
            None => Err(SessionError::UnknownGuild(guild)),
        }
    }

    pub fn guilds(&self) -> Vec<GuildId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn records(&self) -> Vec<GuildRecord> {
        self.sessions
            .iter()
            .map(|entry| entry.value().record())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub async fn start(&self, guild: GuildId) -> Result<(), SessionError> {
        let session = self.require(guild)?;
        session.start(&self.services).await
    }

    /// Returns `false` if the session was not running.
    pub async fn stop(&self, guild: GuildId) -> Result<bool, SessionError> {
        let session = self.require(guild)?;
        Ok(session.stop().await)
    }

    pub fn say(&self, guild: GuildId, request: SayRequest) -> SayOutcome {
        match self.get(guild) {
            Some(session) => session.offer(&request, self.services.presence.as_ref()),
            None => SayOutcome::UnknownGuild,
        }
    }

    fn update(
        &self,
        guild: GuildId,
        f: impl FnOnce(&VoiceSession),
    ) -> Result<(), SessionError> {
        let session = self.require(guild)?;
        f(&session);
        self.bus()
            .send(Event::Guild(GuildAction::Upserted(session.record())));
        Ok(())
    }

    pub fn set_voice(&self, guild: GuildId, voice: impl Into<String>) -> Result<(), SessionError> {
        let voice = voice.into();
        self.update(guild, |session| session.set_voice(voice))
    }

    pub fn set_command_channel(
        &self,
        guild: GuildId,
        channel: ChannelId,
    ) -> Result<(), SessionError> {
        self.update(guild, |session| session.set_command_channel(channel))
    }

    pub fn start_speaking(&self, guild: GuildId, user: UserId) -> Result<bool, SessionError> {
        Ok(self.require(guild)?.add_speaker(user))
    }

    pub fn stop_speaking(&self, guild: GuildId, user: UserId) -> Result<bool, SessionError> {
        Ok(self.require(guild)?.remove_speaker(user))
    }

    /// React to the number of listeners (the bot itself excluded) in the
    /// guild's audio channel: join when someone is there, leave when the
    /// channel is empty.
    pub async fn on_presence_changed(&self, guild: GuildId, listeners: usize) {
        let Some(session) = self.get(guild) else {
            return;
        };

        if listeners > 0 && !session.is_active() {
            match session.start(&self.services).await {
                Ok(()) => {}
                Err(SessionError::AlreadyStreaming(_)) => {}
                Err(e) => error!("Could not join voice in guild {guild}: {e}"),
            }
        } else if listeners == 0 && session.is_active() {
            info!("Audio channel of guild {guild} is empty, leaving");
            session.stop().await;
        }
    }

    /// Stop every session concurrently.
    pub async fn shutdown(&self) {
        let sessions = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect::<Vec<_>>();

        futures::future::join_all(sessions.iter().map(|session| session.stop())).await;
        info!("Stopped {} voice sessions", sessions.len());
    }
}
