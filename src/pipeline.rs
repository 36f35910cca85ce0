//! Audio frame pipeline.
//!
//! Turns an irregularly chunked 48kHz mono PCM stream into fixed 20ms
//! packets: samples are collected into 960-sample frames, each frame is
//! duplicated into both stereo channels, encoded, and pushed to the transmit
//! sink. The last frame is zero-padded and every stream ends with a fixed run
//! of cached silence packets.

use crate::{
    codec::FrameEncoder,
    constants::{CHANNELS, FRAME_SIZE, TRAILING_SILENCE_FRAMES},
    error::{CodecError, PipelineError, SynthesisError},
    transport::PacketSink,
};
use futures::{pin_mut, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// Copy each mono sample into the left and right slot of `output`.
///
/// `output[2k] == output[2k + 1] == input[k]`
pub fn interleave(output: &mut [i16], input: &[i16]) {
    assert!(
        output.len() >= input.len() * CHANNELS,
        "interleave buffer too small: {} < {}",
        output.len(),
        input.len() * CHANNELS
    );

    for (pair, &sample) in output.chunks_exact_mut(CHANNELS).zip(input) {
        pair[0] = sample;
        pair[1] = sample;
    }
}

/// Regular (non-silence) frames produced for `samples` input samples.
pub fn frame_count(samples: usize) -> usize {
    samples.div_ceil(FRAME_SIZE)
}

/// Per-call working memory. Dropped on every exit path of `recode`.
struct FrameScratch {
    mono: Vec<i16>,
    interleaved: Vec<i16>,
    packet: Vec<u8>,
}

impl FrameScratch {
    fn new(packet_size: usize) -> Self {
        Self {
            mono: Vec::with_capacity(FRAME_SIZE),
            interleaved: vec![0; FRAME_SIZE * CHANNELS],
            packet: vec![0; packet_size],
        }
    }

    /// Samples still needed to complete the current frame.
    fn missing(&self) -> usize {
        FRAME_SIZE - self.mono.len()
    }
}

pub struct FramePipeline<E> {
    encoder: E,
}

impl<E: FrameEncoder> FramePipeline<E> {
    pub fn new(encoder: E) -> Self {
        Self { encoder }
    }

    /// Frame, encode and transmit one PCM stream.
    ///
    /// Returns the number of source samples that made it into frames. Once
    /// `cancel` fires no further frame is started, but the trailing silence is
    /// still sent so the receiver sees a clean end of speech.
    pub async fn recode<S, K>(
        &mut self,
        source: S,
        sink: &mut K,
        cancel: &CancellationToken,
    ) -> Result<usize, PipelineError>
    where
        S: Stream<Item = Result<Vec<i16>, SynthesisError>>,
        K: PacketSink + ?Sized,
    {
        pin_mut!(source);

        let mut scratch = FrameScratch::new(self.encoder.max_packet_size());
        let mut consumed = 0;

        'source: loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'source,
                chunk = source.next() => chunk,
            };

            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk?;
            let mut rest = chunk.as_slice();

            while !rest.is_empty() {
                let take = scratch.missing().min(rest.len());
                scratch.mono.extend_from_slice(&rest[..take]);
                rest = &rest[take..];

                if scratch.missing() == 0 {
                    self.emit_frame(&mut scratch, sink).await?;
                    consumed += FRAME_SIZE;

                    if cancel.is_cancelled() {
                        break 'source;
                    }
                }
            }
        }

        // Short tail: pad with silence to a full frame, never send a short one
        if !cancel.is_cancelled() && !scratch.mono.is_empty() {
            consumed += scratch.mono.len();
            scratch.mono.resize(FRAME_SIZE, 0);
            self.emit_frame(&mut scratch, sink).await?;
        }

        self.finish(sink).await?;

        Ok(consumed)
    }

    async fn emit_frame<K>(
        &mut self,
        scratch: &mut FrameScratch,
        sink: &mut K,
    ) -> Result<(), PipelineError>
    where
        K: PacketSink + ?Sized,
    {
        interleave(&mut scratch.interleaved, &scratch.mono);
        scratch.mono.clear();

        let len = self
            .encoder
            .encode(&scratch.interleaved, &mut scratch.packet)?;
        if len > scratch.packet.len() {
            return Err(CodecError::PacketTooLarge {
                needed: len,
                available: scratch.packet.len(),
            }
            .into());
        }

        sink.send_packet(&scratch.packet[..len]).await?;

        Ok(())
    }

    /// Trailing silence marking the end of an audio block.
    async fn finish<K>(&mut self, sink: &mut K) -> Result<(), PipelineError>
    where
        K: PacketSink + ?Sized,
    {
        for _ in 0..TRAILING_SILENCE_FRAMES {
            sink.send_packet(self.encoder.silence_packet()).await?;
        }

        Ok(())
    }
}
