//! Voice transport backed by songbird.
//!
//! Songbird does its own Opus encoding, so the pipeline runs with the raw PCM
//! encoder and every packet is decoded straight into a [`PlaybackBuffer`].
//! Songbird's audio thread pulls from that buffer through a `RawAdapter` at
//! its own 20ms cadence; the sink applies backpressure so the pipeline never
//! runs more than a few frames ahead of playback.

use crate::{
    buffer::{PlaybackBuffer, SharedBuffer},
    codec::RawPcmEncoder,
    constants::{CHANNELS, FRAME_DURATION, FRAME_SIZE, SAMPLE_RATE},
    error::TransportError,
    ids::{ChannelId, GuildId},
    transport::{PacketSink, VoiceConnection, VoiceTransport},
};
use async_trait::async_trait;
use songbird::{input::RawAdapter, tracks::Track, Songbird};
use std::{
    io::{Read, Seek, SeekFrom},
    num::NonZeroU64,
    sync::{Arc, MutexGuard, PoisonError},
    time::Duration,
};
use symphonia::core::io::MediaSource;

/// Frames the sink may queue ahead of playback before it starts waiting.
const MAX_FRAMES_AHEAD: usize = 10;

/// Give up on a sink whose buffer has not been drained for this long.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

fn lock(buffer: &SharedBuffer) -> MutexGuard<'_, PlaybackBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

fn non_zero(id: u64) -> Result<NonZeroU64, TransportError> {
    NonZeroU64::new(id).ok_or_else(|| TransportError::Connect("id must not be zero".to_string()))
}

pub struct SongbirdTransport {
    manager: Arc<Songbird>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn connect(
        &self,
        guild: GuildId,
        channel: ChannelId,
    ) -> Result<Box<dyn VoiceConnection>, TransportError> {
        let guild_id = songbird::id::GuildId::from(non_zero(guild.get())?);
        let channel_id = songbird::id::ChannelId::from(non_zero(channel.get())?);

        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let buffer = PlaybackBuffer::shared();
        {
            let mut handler = call.lock().await;
            let input = RawAdapter::new(BufferSource::new(buffer.clone()), SAMPLE_RATE, 2);
            handler.play_only(Track::new(input.into()));
        }

        info!("Connected to voice channel {channel} in guild {guild}");

        Ok(Box::new(SongbirdConnection {
            manager: self.manager.clone(),
            guild_id,
            buffer,
        }))
    }
}

struct SongbirdConnection {
    manager: Arc<Songbird>,
    guild_id: songbird::id::GuildId,
    buffer: SharedBuffer,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    fn transmit_sink(&mut self) -> Result<Box<dyn PacketSink>, TransportError> {
        if lock(&self.buffer).is_closed() {
            return Err(TransportError::Closed);
        }

        Ok(Box::new(BufferSink {
            buffer: self.buffer.clone(),
            decoded: Vec::with_capacity(FRAME_SIZE * CHANNELS),
        }))
    }

    async fn disconnect(self: Box<Self>) {
        lock(&self.buffer).close();

        if let Err(e) = self.manager.remove(self.guild_id).await {
            warn!("Error while leaving voice in guild {}: {e}", self.guild_id);
        }
    }
}

struct BufferSink {
    buffer: SharedBuffer,
    decoded: Vec<i16>,
}

impl BufferSink {
    /// Wait until playback has caught up, failing if it stopped pulling.
    async fn wait_for_room(&self) -> Result<(), TransportError> {
        let limit = MAX_FRAMES_AHEAD * FRAME_SIZE * CHANNELS;
        let mut last_consumed = lock(&self.buffer).total_consumed();
        let mut stalled = Duration::ZERO;

        loop {
            let (buffered, consumed, closed) = {
                let buffer = lock(&self.buffer);
                (buffer.buffered(), buffer.total_consumed(), buffer.is_closed())
            };

            if closed {
                return Err(TransportError::Closed);
            }
            if buffered < limit {
                return Ok(());
            }

            if consumed != last_consumed {
                last_consumed = consumed;
                stalled = Duration::ZERO;
            } else if stalled >= STALL_TIMEOUT {
                return Err(TransportError::Other(
                    "voice playback stopped pulling audio".to_string(),
                ));
            }

            tokio::time::sleep(FRAME_DURATION).await;
            stalled += FRAME_DURATION;
        }
    }
}

#[async_trait]
impl PacketSink for BufferSink {
    async fn send_packet(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        self.wait_for_room().await?;

        self.decoded.clear();
        RawPcmEncoder::decode(packet, &mut self.decoded);
        lock(&self.buffer).push_interleaved(&self.decoded);

        Ok(())
    }
}

/// Pull-based source read by songbird's audio thread, as interleaved f32.
struct BufferSource {
    buffer: SharedBuffer,
    scratch: Vec<i16>,
}

impl BufferSource {
    fn new(buffer: SharedBuffer) -> Self {
        Self {
            buffer,
            scratch: Vec::new(),
        }
    }
}

fn samples_to_f32_bytes_into(samples: &[i16], buf: &mut [u8]) -> usize {
    let mut offset = 0;
    for (sample, out) in samples.iter().zip(buf.chunks_exact_mut(4)) {
        out.copy_from_slice(&(*sample as f32 / 32768.0).to_le_bytes());
        offset += 4;
    }
    offset
}

impl Read for BufferSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let samples_needed = buf.len() / 4;
        self.scratch.resize(samples_needed, 0);

        {
            let mut buffer = lock(&self.buffer);
            if buffer.is_closed() {
                return Ok(0);
            }
            buffer.pull_into(&mut self.scratch);
        }

        let written = samples_to_f32_bytes_into(&self.scratch, buf);
        buf[written..].fill(0);

        Ok(buf.len())
    }
}

impl Seek for BufferSource {
    fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
        Ok(0)
    }
}

impl MediaSource for BufferSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}
