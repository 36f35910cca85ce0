//! Contracts of the voice platform the core streams into.
//!
//! Connection establishment, packet transmission and presence tracking all
//! belong to the platform adapter (see `songbird_transport` for the Discord
//! one). The session only sees these traits.

use crate::{
    error::TransportError,
    ids::{ChannelId, GuildId, UserId},
};
use async_trait::async_trait;

/// Write end for outbound audio packets on an established connection.
///
/// Dropping the sink releases it.
#[async_trait]
pub trait PacketSink: Send {
    async fn send_packet(&mut self, packet: &[u8]) -> Result<(), TransportError>;
}

#[async_trait]
impl<S: PacketSink + ?Sized> PacketSink for Box<S> {
    async fn send_packet(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        (**self).send_packet(packet).await
    }
}

#[async_trait]
pub trait VoiceConnection: Send {
    fn transmit_sink(&mut self) -> Result<Box<dyn PacketSink>, TransportError>;

    /// Leave the channel and free the connection.
    async fn disconnect(self: Box<Self>);
}

#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn connect(
        &self,
        guild: GuildId,
        channel: ChannelId,
    ) -> Result<Box<dyn VoiceConnection>, TransportError>;
}

/// Who is sitting in which voice channel right now.
pub trait VoicePresence: Send + Sync {
    fn voice_channel_of(&self, guild: GuildId, user: UserId) -> Option<ChannelId>;
}
