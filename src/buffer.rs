//! Growable sample buffer between the frame pipeline and a pull-based
//! audio consumer.
//!
//! The voice sink pushes decoded stereo frames, the transport's audio thread
//! pulls whatever it needs and gets silence for anything not there yet.

use crate::constants::{CHANNELS, SAMPLE_RATE};
use std::sync::{Arc, Mutex};

/// When the read position passes this many samples, consumed data is dropped.
/// One second of interleaved stereo audio.
const COMPACT_THRESHOLD: usize = SAMPLE_RATE as usize * CHANNELS;

pub type SharedBuffer = Arc<Mutex<PlaybackBuffer>>;

#[derive(Default)]
pub struct PlaybackBuffer {
    position: usize,
    /// Interleaved stereo samples
    buffer: Vec<i16>,
    closed: bool,
    total_consumed: usize,
}

impl PlaybackBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedBuffer {
        Arc::new(Mutex::new(Self::new()))
    }

    fn compact(&mut self) {
        if self.position > 0 {
            self.buffer.drain(..self.position);
            self.position = 0;
        }
    }

    pub fn push_interleaved(&mut self, samples: &[i16]) {
        self.buffer.extend_from_slice(samples);
    }

    /// Fill `out` with buffered samples, padding with silence when short.
    /// Returns how many real samples were copied.
    pub fn pull_into(&mut self, out: &mut [i16]) -> usize {
        let to_read = out.len().min(self.buffered());

        out[..to_read].copy_from_slice(&self.buffer[self.position..self.position + to_read]);
        out[to_read..].fill(0);
        self.position += to_read;
        self.total_consumed += to_read;

        if self.position >= COMPACT_THRESHOLD {
            self.compact();
        }

        to_read
    }

    /// Samples waiting to be pulled.
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.position
    }

    /// Samples pulled since the last `clear`.
    pub fn total_consumed(&self) -> usize {
        self.total_consumed
    }

    /// Mark the consumer as gone, producers should stop pushing.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
