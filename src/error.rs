//! Error taxonomy of the voice delivery core.

use crate::ids::GuildId;
use thiserror::Error;

/// The codec could not encode a frame.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("encoder rejected frame: {0}")]
    Encode(String),

    #[error("packet of {needed} bytes does not fit the {available} byte packet buffer")]
    PacketTooLarge { needed: usize, available: usize },

    #[error("could not create encoder: {0}")]
    Create(String),
}

/// The speech engine failed to produce audio.
#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("synthesis request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("synthesis rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("speech engine error: {0}")]
    Engine(String),
}

/// The voice transport failed or went away.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("could not connect to voice channel: {0}")]
    Connect(String),

    #[error("transmit sink is closed")]
    Closed,

    #[error("transport error: {0}")]
    Other(String),
}

/// Failure while turning one utterance into packets.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Encode(#[from] CodecError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl PipelineError {
    /// Encode failures only spoil the current utterance. Everything else
    /// means the session can no longer produce audio.
    pub fn is_fatal_for_session(&self) -> bool {
        !matches!(self, PipelineError::Encode(_))
    }
}

/// Operations rejected by a session or the registry.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("guild {0} has no voice session")]
    UnknownGuild(GuildId),

    #[error("voice session for guild {0} is already running")]
    AlreadyStreaming(GuildId),

    #[error("voice session for guild {0} is streaming, stop it first")]
    StillStreaming(GuildId),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}
