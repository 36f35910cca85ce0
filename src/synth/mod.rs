//! Speech engines.
//!
//! An engine turns a rendered [`Speech`] into a stream of 48kHz mono 16-bit
//! PCM chunks. Chunk sizes are whatever the engine happens to produce, the
//! frame pipeline takes care of reframing.

pub mod azure;
#[cfg(feature = "espeak")]
pub mod espeak;

use crate::{error::SynthesisError, text::Speech};
use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use futures::{stream::BoxStream, Stream, StreamExt};

pub type PcmChunk = Vec<i16>;
pub type PcmStream = BoxStream<'static, Result<PcmChunk, SynthesisError>>;

#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn synthesize(&self, speech: &Speech) -> Result<PcmStream, SynthesisError>;
}

/// Decode a stream of raw little-endian 16-bit PCM bytes into sample chunks.
///
/// Byte chunks may split a sample in half; the dangling byte is carried over
/// into the next chunk. A trailing odd byte at the end of the stream is
/// dropped.
pub fn decode_pcm_stream<S, B, E>(bytes: S) -> PcmStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + 'static,
    E: Into<SynthesisError> + 'static,
{
    let mut carry: Option<u8> = None;

    bytes
        .map(move |chunk| {
            let chunk = chunk.map_err(Into::into)?;
            Ok(decode_chunk(chunk.as_ref(), &mut carry))
        })
        .filter(|chunk| {
            let keep = !matches!(chunk, Ok(samples) if samples.is_empty());
            futures::future::ready(keep)
        })
        .boxed()
}

fn decode_chunk(mut bytes: &[u8], carry: &mut Option<u8>) -> PcmChunk {
    let mut samples = Vec::with_capacity(bytes.len().div_ceil(2));

    if let Some(low) = carry.take() {
        match bytes.split_first() {
            Some((&high, rest)) => {
                samples.push(i16::from_le_bytes([low, high]));
                bytes = rest;
            }
            None => {
                *carry = Some(low);
                return samples;
            }
        }
    }

    let even = bytes.len() & !1;
    samples.extend(bytes[..even].chunks_exact(2).map(LittleEndian::read_i16));
    if even < bytes.len() {
        *carry = Some(bytes[even]);
    }

    samples
}
