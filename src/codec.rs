//! Frame encoders.
//!
//! The pipeline hands every 20ms stereo frame to a [`FrameEncoder`] and ships
//! whatever bytes come back. Compression itself lives outside this crate; the
//! only built-in encoder writes raw PCM for transports that compress on their
//! own (songbird does).

use crate::{
    constants::{CHANNELS, FRAME_SIZE, OPUS_SILENCE_PACKET, PACKET_BUFFER_SIZE_HINT},
    error::CodecError,
};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::sync::Arc;

pub trait FrameEncoder: Send {
    /// Encode one interleaved stereo frame into `packet`, returning the
    /// number of bytes written.
    fn encode(&mut self, frame: &[i16], packet: &mut [u8]) -> Result<usize, CodecError>;

    /// Pre-built packet sent for each trailing silence frame.
    fn silence_packet(&self) -> &[u8] {
        &OPUS_SILENCE_PACKET
    }

    /// Size of the scratch buffer `encode` writes into.
    fn max_packet_size(&self) -> usize {
        PACKET_BUFFER_SIZE_HINT
    }
}

impl<E: FrameEncoder + ?Sized> FrameEncoder for Box<E> {
    fn encode(&mut self, frame: &[i16], packet: &mut [u8]) -> Result<usize, CodecError> {
        (**self).encode(frame, packet)
    }

    fn silence_packet(&self) -> &[u8] {
        (**self).silence_packet()
    }

    fn max_packet_size(&self) -> usize {
        (**self).max_packet_size()
    }
}

/// Creates one encoder per streaming run, so encoder state never leaks
/// between connections.
pub trait EncoderFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn FrameEncoder>, CodecError>;
}

impl<F> EncoderFactory for F
where
    F: Fn() -> Result<Box<dyn FrameEncoder>, CodecError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn FrameEncoder>, CodecError> {
        self()
    }
}

const RAW_FRAME_BYTES: usize = FRAME_SIZE * CHANNELS * 2;

/// 16-bit little-endian interleaved PCM, one packet per frame.
pub struct RawPcmEncoder {
    silence: Vec<u8>,
}

impl RawPcmEncoder {
    pub fn new() -> Self {
        Self {
            silence: vec![0; RAW_FRAME_BYTES],
        }
    }

    /// Inverse of `encode`, used by transports consuming raw packets.
    pub fn decode(packet: &[u8], out: &mut Vec<i16>) {
        out.extend(packet.chunks_exact(2).map(LittleEndian::read_i16));
    }
}

impl Default for RawPcmEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder for RawPcmEncoder {
    fn encode(&mut self, frame: &[i16], packet: &mut [u8]) -> Result<usize, CodecError> {
        let needed = frame.len() * 2;
        if needed > packet.len() {
            return Err(CodecError::PacketTooLarge {
                needed,
                available: packet.len(),
            });
        }

        let mut out = &mut packet[..needed];
        for &sample in frame {
            out.write_i16::<LittleEndian>(sample)
                .map_err(|e| CodecError::Encode(e.to_string()))?;
        }

        Ok(needed)
    }

    fn silence_packet(&self) -> &[u8] {
        &self.silence
    }

    fn max_packet_size(&self) -> usize {
        RAW_FRAME_BYTES
    }
}

pub fn raw_pcm() -> Arc<dyn EncoderFactory> {
    Arc::new(|| -> Result<Box<dyn FrameEncoder>, CodecError> {
        Ok(Box::new(RawPcmEncoder::new()))
    })
}
