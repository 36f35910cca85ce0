use std::time::Duration;

// Audio parameters of the voice transport
pub const SAMPLE_RATE: u32 = 48000; // 48 kHz sample rate
pub const CHANNELS: usize = 2; // Stereo output
pub const FRAME_SIZE: usize = 960; // Mono samples per frame
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Upper bound for a single encoded packet.
pub const PACKET_BUFFER_SIZE_HINT: usize = 2048;

/// Silence frames sent after every utterance so the receiving decoder sees
/// an end of speech instead of packet loss.
pub const TRAILING_SILENCE_FRAMES: usize = 5;

/// Opus "silence" frame, sent as-is without going through the encoder.
pub const OPUS_SILENCE_PACKET: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Pending utterances per guild before new ones are dropped.
pub const QUEUE_CAPACITY: usize = 16;

/// How long a stop request waits for the consumer loop before tearing it down.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_millis(500);

pub const DEFAULT_VOICE: &str = "en-US-JennyNeural";

/// Messages longer than this are cut before synthesis.
pub const MAX_MESSAGE_CHARS: usize = 210;

pub const ESPEAK_SAMPLE_RATE: u32 = 22050;
