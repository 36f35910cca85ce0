//! Test infrastructure for guild-tts integration tests.
//!
//! Provides an in-memory voice platform, a scripted speech engine and helper
//! functions for driving sessions without Discord or a real TTS service.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

pub use guild_tts::codec::{raw_pcm, RawPcmEncoder};
pub use guild_tts::constants::{FRAME_SIZE, TRAILING_SILENCE_FRAMES};
pub use guild_tts::error::{SessionError, SynthesisError, TransportError};
pub use guild_tts::event::{Event, EventBus, GuildAction, SessionEvent, Subscriber};
pub use guild_tts::ids::{ChannelId, GuildId, UserId};
pub use guild_tts::registry::SessionRegistry;
pub use guild_tts::session::{SessionState, VoiceServices, VoiceSession};
pub use guild_tts::store::GuildRecord;
pub use guild_tts::synth::{PcmStream, SpeechEngine};
pub use guild_tts::text::{SayOutcome, SayRequest, Speech, Utterance};
pub use guild_tts::transport::{PacketSink, VoiceConnection, VoicePresence, VoiceTransport};

pub const GUILD: GuildId = GuildId(100);
pub const TEXT_CHANNEL: ChannelId = ChannelId(200);
pub const AUDIO_CHANNEL: ChannelId = ChannelId(300);
pub const USER: UserId = UserId(400);

pub fn test_record() -> GuildRecord {
    GuildRecord::new(GUILD, AUDIO_CHANNEL, TEXT_CHANNEL)
}

/// One-shot say request in the command channel.
pub fn say(text: &str) -> SayRequest {
    SayRequest::once(TEXT_CHANNEL, USER, "tester", text)
}

// ============================================================================
// Voice platform
// ============================================================================

#[derive(Default)]
pub struct TransportState {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub fail_connect: AtomicBool,
    /// Connect never completes while set
    pub hang_connect: AtomicBool,
    /// Sink never completes a send while set
    pub block_sink: AtomicBool,
    /// Delay per packet, in milliseconds
    pub packet_delay_ms: AtomicUsize,
    pub packets: Mutex<Vec<Vec<u8>>>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    pub state: Arc<TransportState>,
}

impl MockTransport {
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub fn packet_count(&self) -> usize {
        self.state.packets.lock().unwrap().len()
    }

    pub fn set_packet_delay(&self, delay: Duration) {
        self.state
            .packet_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }
}

#[async_trait]
impl VoiceTransport for MockTransport {
    async fn connect(
        &self,
        _guild: GuildId,
        _channel: ChannelId,
    ) -> Result<Box<dyn VoiceConnection>, TransportError> {
        if self.state.hang_connect.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("mock refused".to_string()));
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            state: self.state.clone(),
        }))
    }
}

struct MockConnection {
    state: Arc<TransportState>,
}

#[async_trait]
impl VoiceConnection for MockConnection {
    fn transmit_sink(&mut self) -> Result<Box<dyn PacketSink>, TransportError> {
        Ok(Box::new(RecordingSink {
            state: self.state.clone(),
        }))
    }

    async fn disconnect(self: Box<Self>) {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct RecordingSink {
    state: Arc<TransportState>,
}

#[async_trait]
impl PacketSink for RecordingSink {
    async fn send_packet(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        if self.state.block_sink.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }

        let delay = self.state.packet_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        self.state.packets.lock().unwrap().push(packet.to_vec());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockPresence {
    channels: Mutex<HashMap<(GuildId, UserId), ChannelId>>,
}

impl MockPresence {
    pub fn join(&self, guild: GuildId, user: UserId, channel: ChannelId) {
        self.channels
            .lock()
            .unwrap()
            .insert((guild, user), channel);
    }

    pub fn leave(&self, guild: GuildId, user: UserId) {
        self.channels.lock().unwrap().remove(&(guild, user));
    }
}

impl VoicePresence for MockPresence {
    fn voice_channel_of(&self, guild: GuildId, user: UserId) -> Option<ChannelId> {
        self.channels.lock().unwrap().get(&(guild, user)).copied()
    }
}

// ============================================================================
// Speech engine
// ============================================================================

/// Engine producing a fixed number of samples per utterance, in small
/// irregular chunks, and recording everything it was asked to say.
pub struct MockEngine {
    pub samples: usize,
    pub spoken: Mutex<Vec<Speech>>,
    /// Utterances whose text contains this fail to synthesize
    pub fail_on: Mutex<Option<String>>,
}

impl MockEngine {
    pub fn new(samples: usize) -> Arc<Self> {
        Arc::new(Self {
            samples,
            spoken: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
        })
    }

    pub fn fail_on(&self, marker: &str) {
        *self.fail_on.lock().unwrap() = Some(marker.to_string());
    }

    /// Message part of every utterance synthesized so far, in order.
    pub fn spoken_texts(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|speech| {
                speech
                    .text
                    .split_once(". ")
                    .map(|(_, text)| text.to_string())
                    .unwrap_or_default()
            })
            .collect()
    }

    pub fn spoken_count(&self) -> usize {
        self.spoken.lock().unwrap().len()
    }
}

#[async_trait]
impl SpeechEngine for MockEngine {
    async fn synthesize(&self, speech: &Speech) -> Result<PcmStream, SynthesisError> {
        self.spoken.lock().unwrap().push(speech.clone());

        if let Some(marker) = self.fail_on.lock().unwrap().as_deref() {
            if speech.text.contains(marker) {
                return Err(SynthesisError::Engine(format!("cannot say {marker}")));
            }
        }

        let samples = vec![1000i16; self.samples];
        let chunks = samples
            .chunks(700)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect::<Vec<_>>();

        Ok(stream::iter(chunks).boxed())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub transport: MockTransport,
    pub engine: Arc<MockEngine>,
    pub presence: Arc<MockPresence>,
    pub bus: EventBus,
    pub services: VoiceServices,
}

impl Harness {
    pub fn new(samples_per_utterance: usize) -> Self {
        let transport = MockTransport::default();
        let engine = MockEngine::new(samples_per_utterance);
        let presence = Arc::new(MockPresence::default());
        let bus = EventBus::new();

        let services = VoiceServices {
            transport: Arc::new(transport.clone()),
            engine: engine.clone(),
            encoders: raw_pcm(),
            presence: presence.clone(),
            bus: bus.clone(),
        };

        Self {
            transport,
            engine,
            presence,
            bus,
            services,
        }
    }

    pub fn session(&self) -> Arc<VoiceSession> {
        VoiceSession::new(GUILD, (&test_record()).into())
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        SessionRegistry::new(self.services.clone())
    }
}

/// Packets expected on the wire for one utterance of `samples` samples.
pub fn packets_for(samples: usize) -> usize {
    samples.div_ceil(FRAME_SIZE) + TRAILING_SILENCE_FRAMES
}

/// Poll `condition` until it holds, panicking after `limit`.
pub async fn wait_until<F>(limit: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {limit:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_state(session: &VoiceSession, state: SessionState) {
    let mut rx = session.subscribe_state();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == state))
        .await
        .expect("state change timed out")
        .expect("state channel closed");
}

/// Drain every event currently buffered for `subscriber`.
pub fn drain(subscriber: &mut Subscriber) -> Vec<Event> {
    std::iter::from_fn(|| subscriber.try_recv().ok()).collect()
}

/// Run `future` with a timeout so a hung test fails instead of stalling.
pub async fn within<T>(limit: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(limit, future)
        .await
        .expect("operation timed out")
}
