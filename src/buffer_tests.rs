//! Unit tests for the buffer module

#[cfg(test)]
mod tests {
    use crate::buffer::PlaybackBuffer;

    #[test]
    fn test_playback_buffer_default() {
        let buffer = PlaybackBuffer::default();

        assert_eq!(buffer.buffered(), 0);
        assert!(!buffer.is_closed());
    }

    #[test]
    fn test_pull_returns_pushed_samples_in_order() {
        let mut buffer = PlaybackBuffer::new();
        buffer.push_interleaved(&[1, 1, 2, 2, 3, 3]);

        let mut out = [0i16; 4];
        assert_eq!(buffer.pull_into(&mut out), 4);
        assert_eq!(out, [1, 1, 2, 2]);

        let mut out = [0i16; 2];
        assert_eq!(buffer.pull_into(&mut out), 2);
        assert_eq!(out, [3, 3]);
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn test_pull_pads_with_silence() {
        let mut buffer = PlaybackBuffer::new();
        buffer.push_interleaved(&[7, 7]);

        let mut out = [9i16; 6];
        assert_eq!(buffer.pull_into(&mut out), 2);
        assert_eq!(out, [7, 7, 0, 0, 0, 0]);
    }

    #[test]
    fn test_pull_from_empty_buffer_is_silence() {
        let mut buffer = PlaybackBuffer::new();

        let mut out = [5i16; 8];
        assert_eq!(buffer.pull_into(&mut out), 0);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_compaction_keeps_unread_samples() {
        let mut buffer = PlaybackBuffer::new();
        let samples: Vec<i16> = (0..200_000).map(|i| (i % 1000) as i16).collect();
        buffer.push_interleaved(&samples);

        // Cross the compaction threshold several times
        let mut out = vec![0i16; 50_000];
        for _ in 0..3 {
            buffer.pull_into(&mut out);
        }

        assert_eq!(buffer.buffered(), 50_000);
        assert_eq!(buffer.total_consumed(), 150_000);

        buffer.pull_into(&mut out);
        assert_eq!(out[0], (150_000 % 1000) as i16);
        assert_eq!(out[49_999], (199_999 % 1000) as i16);
    }

    #[test]
    fn test_close_flag() {
        let mut buffer = PlaybackBuffer::new();
        buffer.close();
        assert!(buffer.is_closed());
    }
}
