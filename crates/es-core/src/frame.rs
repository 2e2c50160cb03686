//! Network frame contract
//!
//! Every stream on the wire is 16-bit linear PCM at 24 kHz, moved in 10 ms
//! frames. These values are a protocol contract, not tuning parameters.

use serde::{Deserialize, Serialize};

/// Type alias for wire samples (signed 16-bit linear PCM)
pub type Sample = i16;

/// Widened accumulator used while summing samples
pub type WideSample = i32;

/// PCM sample rate in Hz
pub const SAMPLE_RATE: u32 = 24_000;

/// Samples in one mono network frame (10 ms)
pub const FRAME_SAMPLES_MONO: usize = 240;

/// Samples in one stereo network frame, interleaved L,R
pub const FRAME_SAMPLES_STEREO: usize = FRAME_SAMPLES_MONO * 2;

/// Bytes in one stereo network frame
pub const FRAME_BYTES_STEREO: usize = FRAME_SAMPLES_STEREO * std::mem::size_of::<Sample>();

/// Interval between mix frames in microseconds
pub const FRAME_INTERVAL_US: u64 = 10_000;

/// Mono samples of inter-aural delay for a source at 90 degrees off the
/// listener's forward axis
pub const SAMPLE_PHASE_DELAY_AT_90: usize = 20;

/// Lower clamp for accumulated samples
pub const MIN_SAMPLE_VALUE: WideSample = Sample::MIN as WideSample;

/// Upper clamp for accumulated samples
pub const MAX_SAMPLE_VALUE: WideSample = Sample::MAX as WideSample;

/// Channel layout of a source stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelFormat {
    Mono,
    Stereo,
}

impl ChannelFormat {
    /// Interleaved samples per network frame for this layout
    #[inline]
    pub fn samples_per_frame(self) -> usize {
        match self {
            ChannelFormat::Mono => FRAME_SAMPLES_MONO,
            ChannelFormat::Stereo => FRAME_SAMPLES_STEREO,
        }
    }

    #[inline]
    pub fn is_stereo(self) -> bool {
        self == ChannelFormat::Stereo
    }
}
