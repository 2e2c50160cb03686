//! Outgoing mixed-audio payload
//!
//! `sequence: u16 little-endian` followed by 960 bytes of interleaved L,R
//! 16-bit little-endian PCM. The transport prepends its own header.

use es_core::{Sample, FRAME_BYTES_STEREO, FRAME_SAMPLES_STEREO};

/// Payload size of one mixed-audio packet
pub const MIXED_AUDIO_PAYLOAD_BYTES: usize = 2 + FRAME_BYTES_STEREO;

/// Serialize one mixed frame into `out`, replacing its contents
pub fn encode_mixed_audio(
    sequence: u16,
    samples: &[Sample; FRAME_SAMPLES_STEREO],
    out: &mut Vec<u8>,
) {
    out.clear();
    out.reserve(MIXED_AUDIO_PAYLOAD_BYTES);
    out.extend_from_slice(&sequence.to_le_bytes());
    for &sample in samples.iter() {
        out.extend_from_slice(&sample.to_le_bytes());
    }
}

/// Split a mixed-audio payload back into its parts. Used by tests and the
/// loopback tooling; the production client does its own parsing.
pub fn decode_mixed_audio(payload: &[u8]) -> Option<(u16, Vec<Sample>)> {
    if payload.len() != MIXED_AUDIO_PAYLOAD_BYTES {
        return None;
    }
    let sequence = u16::from_le_bytes([payload[0], payload[1]]);
    let samples = payload[2..]
        .chunks_exact(2)
        .map(|pair| Sample::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Some((sequence, samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_layout() {
        let mut samples = [0; FRAME_SAMPLES_STEREO];
        samples[0] = 0x0102;
        samples[1] = -2;

        let mut out = Vec::new();
        encode_mixed_audio(0xABCD, &samples, &mut out);

        assert_eq!(out.len(), 962);
        assert_eq!(&out[..2], &[0xCD, 0xAB]);
        assert_eq!(&out[2..4], &[0x02, 0x01]);
        assert_eq!(&out[4..6], &[0xFE, 0xFF]);
    }

    #[test]
    fn test_round_trip() {
        let mut samples = [0; FRAME_SAMPLES_STEREO];
        for (i, slot) in samples.iter_mut().enumerate() {
            *slot = (i as i32 - 240) as Sample;
        }
        let mut out = Vec::new();
        encode_mixed_audio(7, &samples, &mut out);

        let (sequence, decoded) = decode_mixed_audio(&out).unwrap();
        assert_eq!(sequence, 7);
        assert_eq!(decoded.as_slice(), samples.as_slice());
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert!(decode_mixed_audio(&[0; 10]).is_none());
    }

    #[test]
    fn test_encode_reuses_buffer() {
        let samples = [0; FRAME_SAMPLES_STEREO];
        let mut out = vec![1, 2, 3];
        encode_mixed_audio(0, &samples, &mut out);
        assert_eq!(out.len(), MIXED_AUDIO_PAYLOAD_BYTES);
        assert_eq!(&out[..2], &[0, 0]);
    }
}
