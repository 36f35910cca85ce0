//! guild-tts library crate
//!
//! Per-guild text-to-speech delivery into voice channels. The main binary is
//! in main.rs.

#[macro_use]
extern crate log;

pub mod buffer;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod ids;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod session;
pub mod store;
pub mod synth;
pub mod text;
pub mod transport;

#[cfg(feature = "discord")]
pub mod discord;
#[cfg(feature = "discord")]
pub mod songbird_transport;

// Test modules
#[cfg(test)]
mod buffer_tests;
#[cfg(test)]
mod codec_tests;
#[cfg(test)]
mod queue_tests;
#[cfg(test)]
mod text_tests;
