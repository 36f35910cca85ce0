//! Unit tests for the codec module

#[cfg(test)]
mod tests {
    use crate::codec::{raw_pcm, FrameEncoder, RawPcmEncoder};
    use crate::constants::{CHANNELS, FRAME_SIZE, OPUS_SILENCE_PACKET};
    use crate::error::CodecError;

    #[test]
    fn test_raw_pcm_writes_little_endian_samples() {
        let mut encoder = RawPcmEncoder::new();
        let mut packet = [0u8; 8];

        let len = encoder.encode(&[1, -2, 256, 0], &mut packet).unwrap();

        assert_eq!(len, 8);
        assert_eq!(packet, [0x01, 0x00, 0xFE, 0xFF, 0x00, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_raw_pcm_decode_reverses_encode() {
        let mut encoder = RawPcmEncoder::new();
        let frame: Vec<i16> = (0..(FRAME_SIZE * CHANNELS) as i16).collect();
        let mut packet = vec![0u8; encoder.max_packet_size()];

        let len = encoder.encode(&frame, &mut packet).unwrap();
        let mut decoded = Vec::new();
        RawPcmEncoder::decode(&packet[..len], &mut decoded);

        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_raw_pcm_rejects_small_packet_buffer() {
        let mut encoder = RawPcmEncoder::new();
        let mut packet = [0u8; 3];

        let result = encoder.encode(&[1, 2], &mut packet);

        assert!(matches!(
            result,
            Err(CodecError::PacketTooLarge {
                needed: 4,
                available: 3
            })
        ));
    }

    #[test]
    fn test_raw_pcm_silence_is_one_zeroed_frame() {
        let encoder = RawPcmEncoder::new();
        let silence = encoder.silence_packet();

        assert_eq!(silence.len(), FRAME_SIZE * CHANNELS * 2);
        assert!(silence.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_default_silence_packet_is_opus_silence() {
        struct Nop;
        impl FrameEncoder for Nop {
            fn encode(&mut self, _frame: &[i16], _packet: &mut [u8]) -> Result<usize, CodecError> {
                Ok(0)
            }
        }

        assert_eq!(Nop.silence_packet(), &OPUS_SILENCE_PACKET);
    }

    #[test]
    fn test_factory_creates_independent_encoders() {
        let factory = raw_pcm();

        let first = factory.create().unwrap();
        let second = factory.create().unwrap();

        assert_eq!(first.max_packet_size(), second.max_packet_size());
    }
}
