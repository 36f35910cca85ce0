//! Per-guild voice session.
//!
//! A session owns the guild's speech queue for its whole lifetime and, while
//! streaming, one consumer task that pulls utterances, synthesizes them and
//! pushes the framed audio into the voice connection.
//!
//! ```text
//!          start()                      stop() / error
//!   Idle ───────────► Connecting ──► Streaming ──────► Stopping ──► Idle
//!    ▲                    │ connect failed                            │
//!    └────────────────────┴──────────────────────────────────────────┘
//! ```

use crate::{
    codec::{EncoderFactory, FrameEncoder},
    constants::STOP_GRACE_PERIOD,
    error::{PipelineError, SessionError},
    event::{Event, EventBus, SessionEvent},
    ids::{ChannelId, GuildId, UserId},
    pipeline::FramePipeline,
    queue::{QueueConsumer, SpeechQueue},
    store::GuildRecord,
    synth::SpeechEngine,
    text::{SayMode, SayOutcome, SayRequest, Utterance},
    transport::{PacketSink, VoiceConnection, VoicePresence, VoiceTransport},
};
use dashmap::DashSet;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
    },
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Stopping,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuildSettings {
    pub command_channel: ChannelId,
    pub audio_channel: ChannelId,
    pub voice: String,
}

impl From<&GuildRecord> for GuildSettings {
    fn from(record: &GuildRecord) -> Self {
        Self {
            command_channel: record.text_channel,
            audio_channel: record.audio_channel,
            voice: record.fallback_voice.clone(),
        }
    }
}

/// Collaborators a session needs while streaming.
#[derive(Clone)]
pub struct VoiceServices {
    pub transport: Arc<dyn VoiceTransport>,
    pub engine: Arc<dyn SpeechEngine>,
    pub encoders: Arc<dyn EncoderFactory>,
    pub presence: Arc<dyn VoicePresence>,
    pub bus: EventBus,
}

struct Runner {
    generation: u64,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

pub struct VoiceSession {
    guild_id: GuildId,
    settings: RwLock<GuildSettings>,
    speakers: DashSet<UserId>,
    queue: SpeechQueue,
    state: watch::Sender<SessionState>,
    runner: Mutex<Option<Runner>>,
    generation: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl VoiceSession {
    pub fn new(guild_id: GuildId, settings: GuildSettings) -> Arc<Self> {
        Arc::new(Self {
            guild_id,
            settings: RwLock::new(settings),
            speakers: DashSet::new(),
            queue: SpeechQueue::default(),
            state: watch::Sender::new(SessionState::Idle),
            runner: Mutex::new(None),
            generation: AtomicU64::new(0),
        })
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn settings(&self) -> GuildSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn record(&self) -> GuildRecord {
        let settings = self.settings();
        GuildRecord {
            guild_id: self.guild_id,
            audio_channel: settings.audio_channel,
            text_channel: settings.command_channel,
            fallback_voice: settings.voice,
        }
    }

    fn update_settings(&self, f: impl FnOnce(&mut GuildSettings)) {
        let mut settings = self
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut settings);
    }

    /// Takes effect with the next dequeued utterance.
    pub fn set_voice(&self, voice: impl Into<String>) {
        let voice = voice.into();
        self.update_settings(|s| s.voice = voice);
    }

    pub fn set_command_channel(&self, channel: ChannelId) {
        self.update_settings(|s| s.command_channel = channel);
    }

    /// Used the next time the session connects.
    pub fn set_audio_channel(&self, channel: ChannelId) {
        self.update_settings(|s| s.audio_channel = channel);
    }

    pub fn apply(&self, record: &GuildRecord) {
        self.update_settings(|s| *s = GuildSettings::from(record));
    }

    pub fn add_speaker(&self, user: UserId) -> bool {
        self.speakers.insert(user)
    }

    pub fn remove_speaker(&self, user: UserId) -> bool {
        self.speakers.remove(&user).is_some()
    }

    pub fn is_speaker(&self, user: UserId) -> bool {
        self.speakers.contains(&user)
    }

    pub fn queue(&self) -> &SpeechQueue {
        &self.queue
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Whether a consumer loop is running or being set up or torn down.
    pub fn is_active(&self) -> bool {
        lock(&self.runner).is_some()
    }

    fn is_listening(&self, user: UserId, presence: &dyn VoicePresence) -> bool {
        presence.voice_channel_of(self.guild_id, user) == Some(self.settings().audio_channel)
    }

    /// Check a say request against the guild's channels, the author's
    /// narration opt-in and the connection, then queue it.
    pub fn offer(&self, request: &SayRequest, presence: &dyn VoicePresence) -> SayOutcome {
        if request.channel != self.settings().command_channel {
            return SayOutcome::WrongChannel;
        }

        if request.mode == SayMode::Narration {
            if !self.is_speaker(request.author) {
                return SayOutcome::NotSpeaker;
            }
            if !self.is_listening(request.author, presence) {
                return SayOutcome::NotListening;
            }
        }

        // Lines typed while nobody is in voice are not saved up for later
        if !matches!(
            self.state(),
            SessionState::Connecting | SessionState::Streaming
        ) {
            return SayOutcome::NotConnected;
        }

        if self.queue.try_enqueue(Utterance::from_request(request)) {
            SayOutcome::Queued
        } else {
            SayOutcome::QueueFull
        }
    }

    fn begin_run(&self) -> Result<(u64, CancellationToken), SessionError> {
        let mut runner = lock(&self.runner);
        if runner.is_some() {
            return Err(SessionError::AlreadyStreaming(self.guild_id));
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        *runner = Some(Runner {
            generation,
            cancel: cancel.clone(),
            handle: None,
        });
        self.state.send_replace(SessionState::Connecting);

        Ok((generation, cancel))
    }

    fn finish_run(&self, generation: u64) {
        let mut runner = lock(&self.runner);
        if runner.as_ref().is_some_and(|r| r.generation == generation) {
            *runner = None;
            self.state.send_replace(SessionState::Idle);
        }
    }

    /// Connect to the audio channel and start consuming the queue.
    ///
    /// Rejected without any state change if the session is not idle.
    pub async fn start(self: &Arc<Self>, services: &VoiceServices) -> Result<(), SessionError> {
        let (generation, cancel) = self.begin_run()?;

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Stop requested while connecting guild {}", self.guild_id);
                self.finish_run(generation);
                return Ok(());
            }
            connected = self.connect(services, generation) => connected,
        };

        let (encoder, link) = match connected {
            Ok(connected) => connected,
            Err(e) => {
                self.finish_run(generation);
                return Err(e);
            }
        };

        if cancel.is_cancelled() {
            debug!("Stop requested while connecting guild {}", self.guild_id);
            link.release().await;
            return Ok(());
        }

        {
            let runner = lock(&self.runner);
            if runner.as_ref().is_some_and(|r| r.generation == generation) {
                self.state.send_if_modified(|state| {
                    let connecting = *state == SessionState::Connecting;
                    if connecting {
                        *state = SessionState::Streaming;
                    }
                    connecting
                });
            }
        }
        services.bus.send(Event::Session(SessionEvent::Started(self.guild_id)));

        let handle = tokio::spawn(consume(
            self.clone(),
            services.clone(),
            FramePipeline::new(encoder),
            link,
            cancel,
        ));

        if let Some(runner) = lock(&self.runner)
            .as_mut()
            .filter(|r| r.generation == generation)
        {
            runner.handle = Some(handle);
        }

        Ok(())
    }

    async fn connect(
        self: &Arc<Self>,
        services: &VoiceServices,
        generation: u64,
    ) -> Result<(Box<dyn FrameEncoder>, ActiveLink), SessionError> {
        let encoder = services.encoders.create()?;
        let channel = self.settings().audio_channel;

        info!("Joining voice channel {channel} in guild {}", self.guild_id);
        let mut connection = services.transport.connect(self.guild_id, channel).await?;
        let sink = match connection.transmit_sink() {
            Ok(sink) => sink,
            Err(e) => {
                connection.disconnect().await;
                return Err(e.into());
            }
        };

        let Some(consumer) = self.queue.consumer() else {
            connection.disconnect().await;
            return Err(SessionError::AlreadyStreaming(self.guild_id));
        };

        Ok((
            encoder,
            ActiveLink {
                session: self.clone(),
                bus: services.bus.clone(),
                generation,
                consumer: Some(consumer),
                sink: Some(sink),
                connection: Some(connection),
            },
        ))
    }

    /// Cancel the consumer loop and wait for it to wind down.
    ///
    /// The loop gets `STOP_GRACE_PERIOD` to finish its current frame; after
    /// that it is aborted and its resources are released regardless. Returns
    /// `false` if nothing was running.
    pub async fn stop(&self) -> bool {
        let (generation, cancel, handle) = {
            let mut runner = lock(&self.runner);
            let Some(runner) = runner.as_mut() else {
                return false;
            };
            (runner.generation, runner.cancel.clone(), runner.handle.take())
        };

        self.state.send_if_modified(|state| {
            let running = matches!(*state, SessionState::Connecting | SessionState::Streaming);
            if running {
                *state = SessionState::Stopping;
            }
            running
        });
        cancel.cancel();
        info!("Stopping voice session for guild {}", self.guild_id);

        match handle {
            Some(mut handle) => {
                if timeout(STOP_GRACE_PERIOD, &mut handle).await.is_err() {
                    warn!(
                        "Voice loop for guild {} did not stop within {:?}, aborting it",
                        self.guild_id, STOP_GRACE_PERIOD
                    );
                    handle.abort();
                    let _ = handle.await;
                }
            }
            // Still connecting, or another stop is already waiting on the task
            None => {
                self.wait_until_idle(STOP_GRACE_PERIOD).await;
                if self.state() != SessionState::Idle {
                    // Nobody is driving the connect anymore
                    warn!(
                        "Voice session for guild {} did not go idle within {:?}, releasing it",
                        self.guild_id, STOP_GRACE_PERIOD
                    );
                    self.finish_run(generation);
                }
            }
        }

        true
    }

    pub async fn wait_until_idle(&self, limit: Duration) {
        let mut state = self.state.subscribe();
        let _ = timeout(limit, state.wait_for(|s| *s == SessionState::Idle)).await;
    }
}

/// Resources held by one streaming run. Released exactly once, either by
/// `release` on a normal exit or on drop when the task is aborted.
struct ActiveLink {
    session: Arc<VoiceSession>,
    bus: EventBus,
    generation: u64,
    consumer: Option<QueueConsumer<Utterance>>,
    sink: Option<Box<dyn PacketSink>>,
    connection: Option<Box<dyn VoiceConnection>>,
}

impl ActiveLink {
    async fn release(mut self) {
        self.consumer.take();
        self.sink.take();
        if let Some(connection) = self.connection.take() {
            connection.disconnect().await;
        }
    }
}

impl Drop for ActiveLink {
    fn drop(&mut self) {
        self.consumer.take();
        self.sink.take();

        if let Some(connection) = self.connection.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(connection.disconnect());
                }
                Err(_) => warn!(
                    "No runtime to disconnect guild {} from voice",
                    self.session.guild_id
                ),
            }
        }

        self.session.finish_run(self.generation);
        self.bus
            .send(Event::Session(SessionEvent::Stopped(self.session.guild_id)));
        info!("Voice session for guild {} is idle", self.session.guild_id);
    }
}

/// Consumer loop of one streaming run.
async fn consume(
    session: Arc<VoiceSession>,
    services: VoiceServices,
    mut pipeline: FramePipeline<Box<dyn FrameEncoder>>,
    mut link: ActiveLink,
    cancel: CancellationToken,
) {
    let guild = session.guild_id;

    loop {
        let Some(consumer) = link.consumer.as_mut() else {
            break;
        };
        let Some(utterance) = consumer.next(&cancel).await else {
            break;
        };

        // Presence may have changed since the line was queued
        if let Some(narrator) = utterance.narrator {
            if !session.is_speaker(narrator)
                || !session.is_listening(narrator, services.presence.as_ref())
            {
                debug!("Skipping narration of {narrator} in guild {guild}, no longer listening");
                continue;
            }
        }

        let Some(sink) = link.sink.as_mut() else {
            break;
        };

        let speech = utterance.render(&session.settings().voice);
        let result = async {
            let pcm = services.engine.synthesize(&speech).await?;
            pipeline.recode(pcm, sink, &cancel).await
        }
        .await;

        match result {
            Ok(samples) => {
                debug!("Spoke {samples} samples in guild {guild}");
            }
            Err(e) => {
                let fatal = e.is_fatal_for_session();
                report_failure(&services.bus, guild, &e, fatal);
                if fatal {
                    break;
                }
            }
        }

        if cancel.is_cancelled() {
            break;
        }
    }

    link.release().await;
}

fn report_failure(bus: &EventBus, guild: GuildId, error: &PipelineError, fatal: bool) {
    if fatal {
        error!("Voice session for guild {guild} failed: {error}");
    } else {
        warn!("Dropped utterance in guild {guild}: {error}");
    }

    bus.send(Event::Session(SessionEvent::UtteranceFailed {
        guild,
        reason: error.to_string(),
    }));
}
