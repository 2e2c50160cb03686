//! Positional streams: the jitter-absorbing FIFO behind every source
//!
//! A stream is split at creation into a `StreamWriter` for the packet thread
//! and a `PositionalStream` for the mix loop. The shared half is the sample
//! ring plus the pose and loudness cells the producer refreshes with every
//! pushed frame; all frame discipline (pre-frame check, jitter margin,
//! pre-roll capture, advance) is consumer-owned state that never crosses
//! threads.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use es_core::{Aabb, ChannelFormat, Pose, Sample, FRAME_SAMPLES_MONO, SAMPLE_PHASE_DELAY_AT_90};

use crate::{SampleRing, SourceKind, StreamDescriptor};

/// Weight of the newest frame in the trailing loudness average
const LOUDNESS_CURRENT_FRAME_RATIO: f32 = 0.1;

/// Below this the trailing loudness snaps to zero. With the 1/10 frame
/// weight a source that goes silent crosses it in under a second.
const LOUDNESS_EPSILON: f32 = 1e-4;

/// Jitter margin used in static mode and as the dynamic-mode floor, in frames
pub const STATIC_JITTER_MARGIN_FRAMES: usize = 1;

/// Consecutive healthy frames before a grown margin decays by one frame
pub const JITTER_MARGIN_DECAY_FRAMES: u32 = 1000;

/// Atomic f32 cell used to publish the loudness estimate across threads
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// State shared between the producer and consumer halves
struct SharedStream {
    ring: SampleRing,
    pose: Mutex<Pose>,
    trailing_loudness: AtomicF32,
    should_loopback: AtomicBool,
    overflow_count: AtomicU64,
}

/// Producer handle held by the packet ingest path
pub struct StreamWriter {
    shared: Arc<SharedStream>,
    format: ChannelFormat,
}

impl StreamWriter {
    /// Append one newly arrived frame, refreshing the source pose and the
    /// trailing loudness estimate.
    pub fn push_frame(&self, samples: &[Sample], pose: Pose) {
        debug_assert_eq!(samples.len(), self.format.samples_per_frame());

        *self.shared.pose.lock() = pose;

        let written = self.shared.ring.push(samples);
        if written < samples.len() {
            self.shared.overflow_count.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "stream overflow, dropped {} samples",
                samples.len() - written
            );
        }

        let old = self.shared.trailing_loudness.load();
        let mut next =
            LOUDNESS_CURRENT_FRAME_RATIO * frame_rms(samples) + (1.0 - LOUDNESS_CURRENT_FRAME_RATIO) * old;
        if next < LOUDNESS_EPSILON {
            next = 0.0;
        }
        self.shared.trailing_loudness.store(next);
    }

    /// Append a silent frame. Keeps the stream fed (and the loudness
    /// decaying) while the client sends silence markers instead of PCM.
    pub fn push_silence(&self, pose: Pose) {
        let zeros = vec![0; self.format.samples_per_frame()];
        self.push_frame(&zeros, pose);
    }

    /// Change whether the owning listener hears this source back
    pub fn set_loopback(&self, enabled: bool) {
        self.shared.should_loopback.store(enabled, Ordering::Relaxed);
    }
}

/// Per-stream counters exported for the jitter statistics line
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamStats {
    pub starve_count: u64,
    pub overflow_count: u64,
    pub frames_available: usize,
    pub jitter_margin_frames: usize,
}

/// Consumer half: one audio-emitting source as seen by the mix loop
pub struct PositionalStream {
    shared: Arc<SharedStream>,
    kind: SourceKind,
    format: ChannelFormat,
    listener_unattenuated_zone: Option<Aabb>,
    dynamic_jitter: bool,
    capacity_frames: usize,

    margin_frames: usize,
    is_starved: bool,
    healthy_streak: u32,
    starve_count: u64,
    will_be_added: bool,

    /// Snapshot of the next output frame, taken at the pre-frame check
    next_frame: Box<[Sample]>,
    /// Tail of the previously consumed frame, feeding the inter-aural delay
    preroll: [Sample; SAMPLE_PHASE_DELAY_AT_90],
}

/// Open a positional stream, returning the producer and consumer halves
pub fn open_stream(desc: StreamDescriptor) -> (StreamWriter, PositionalStream) {
    let samples_per_frame = desc.format.samples_per_frame();
    let shared = Arc::new(SharedStream {
        ring: SampleRing::new(desc.capacity_frames * samples_per_frame),
        pose: Mutex::new(Pose::default()),
        trailing_loudness: AtomicF32::new(0.0),
        should_loopback: AtomicBool::new(desc.should_loopback),
        overflow_count: AtomicU64::new(0),
    });

    let writer = StreamWriter {
        shared: Arc::clone(&shared),
        format: desc.format,
    };

    let stream = PositionalStream {
        shared,
        kind: desc.kind,
        format: desc.format,
        listener_unattenuated_zone: desc.listener_unattenuated_zone,
        dynamic_jitter: desc.dynamic_jitter,
        capacity_frames: desc.capacity_frames,
        margin_frames: STATIC_JITTER_MARGIN_FRAMES,
        // the initial fill is not a starvation event
        is_starved: true,
        healthy_streak: 0,
        starve_count: 0,
        will_be_added: false,
        next_frame: vec![0; samples_per_frame].into_boxed_slice(),
        preroll: [0; SAMPLE_PHASE_DELAY_AT_90],
    };

    (writer, stream)
}

impl PositionalStream {
    /// Decide whether this source participates in the coming frame and, if
    /// so, snapshot its next output frame.
    ///
    /// A starved stream waits until the jitter margin has refilled before it
    /// resumes. In dynamic mode each starvation event grows the margin by a
    /// frame (capped at half the ring) and a long healthy streak shrinks it
    /// back toward the static floor.
    pub fn pre_frame_check(&mut self) -> bool {
        let frame = self.format.samples_per_frame();
        let needed = if self.is_starved {
            frame * self.margin_frames
        } else {
            frame
        };
        let available = self.shared.ring.available_read();

        if available >= needed.max(frame) {
            let copied = self.shared.ring.peek_into(&mut self.next_frame);
            debug_assert_eq!(copied, frame);
            self.is_starved = false;
            self.will_be_added = true;

            self.healthy_streak = self.healthy_streak.saturating_add(1);
            if self.dynamic_jitter
                && self.margin_frames > STATIC_JITTER_MARGIN_FRAMES
                && self.healthy_streak >= JITTER_MARGIN_DECAY_FRAMES
            {
                self.margin_frames -= 1;
                self.healthy_streak = 0;
            }
        } else {
            if !self.is_starved {
                self.is_starved = true;
                self.starve_count += 1;
                self.healthy_streak = 0;
                if self.dynamic_jitter {
                    self.margin_frames = (self.margin_frames + 1).min(self.capacity_frames / 2);
                }
            }
            self.will_be_added = false;
        }

        self.will_be_added
    }

    /// The frame the mixer reads this cycle. Valid only after a successful
    /// `pre_frame_check`.
    #[inline]
    pub fn peek_next_output(&self) -> &[Sample] {
        &self.next_frame
    }

    /// The `n` samples immediately preceding the next output frame. Zeros
    /// until the first frame has been consumed.
    #[inline]
    pub fn peek_delay_window(&self, n: usize) -> &[Sample] {
        &self.preroll[SAMPLE_PHASE_DELAY_AT_90 - n..]
    }

    /// Consume the frame snapshotted by the last pre-frame check. A no-op
    /// for the frames a starved stream sat out.
    pub fn advance(&mut self) {
        if !self.will_be_added {
            return;
        }
        if self.format == ChannelFormat::Mono {
            self.preroll
                .copy_from_slice(&self.next_frame[FRAME_SAMPLES_MONO - SAMPLE_PHASE_DELAY_AT_90..]);
        }
        self.shared.ring.skip(self.format.samples_per_frame());
        self.will_be_added = false;
    }

    #[inline]
    pub fn will_be_added_to_mix(&self) -> bool {
        self.will_be_added
    }

    #[inline]
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    #[inline]
    pub fn format(&self) -> ChannelFormat {
        self.format
    }

    #[inline]
    pub fn should_loopback(&self) -> bool {
        self.shared.should_loopback.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn listener_unattenuated_zone(&self) -> Option<Aabb> {
        self.listener_unattenuated_zone
    }

    pub fn pose(&self) -> Pose {
        *self.shared.pose.lock()
    }

    #[inline]
    pub fn trailing_loudness(&self) -> f32 {
        self.shared.trailing_loudness.load()
    }

    /// True once the producer half has been dropped
    pub fn is_abandoned(&self) -> bool {
        Arc::strong_count(&self.shared) == 1
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            starve_count: self.starve_count,
            overflow_count: self.shared.overflow_count.load(Ordering::Relaxed),
            frames_available: self.shared.ring.available_read() / self.format.samples_per_frame(),
            jitter_margin_frames: self.margin_frames,
        }
    }
}

/// RMS of one frame, normalized so full-scale PCM maps to 1.0
fn frame_rms(samples: &[Sample]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let x = s as f64;
            x * x
        })
        .sum();
    ((sum / samples.len() as f64).sqrt() / Sample::MAX as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono_desc() -> StreamDescriptor {
        StreamDescriptor::microphone(ChannelFormat::Mono)
    }

    fn push_frames(writer: &StreamWriter, count: usize, value: Sample) {
        let frame = vec![value; FRAME_SAMPLES_MONO];
        for _ in 0..count {
            writer.push_frame(&frame, Pose::default());
        }
    }

    #[test]
    fn test_consumes_exactly_one_frame_per_advance() {
        let (writer, mut stream) = open_stream(mono_desc());
        push_frames(&writer, 8, 100);

        for _ in 0..5 {
            assert!(stream.pre_frame_check());
            stream.advance();
        }
        assert_eq!(stream.stats().frames_available, 3);
    }

    #[test]
    fn test_empty_stream_is_not_added() {
        let (_writer, mut stream) = open_stream(mono_desc());
        assert!(!stream.pre_frame_check());
        assert!(!stream.will_be_added_to_mix());
        // the initial fill does not count as a starvation event
        assert_eq!(stream.stats().starve_count, 0);
        stream.advance();
        assert_eq!(stream.stats().frames_available, 0);
    }

    #[test]
    fn test_starvation_counted_once_per_event() {
        let (writer, mut stream) = open_stream(mono_desc());
        push_frames(&writer, 2, 100);
        assert!(stream.pre_frame_check());
        stream.advance();
        assert!(stream.pre_frame_check());
        stream.advance();

        // dry for three frames, one starvation event
        for _ in 0..3 {
            assert!(!stream.pre_frame_check());
            stream.advance();
        }
        assert_eq!(stream.stats().starve_count, 1);

        push_frames(&writer, 2, 100);
        assert!(stream.pre_frame_check());
    }

    #[test]
    fn test_dynamic_margin_grows_and_is_capped() {
        let desc = mono_desc().with_dynamic_jitter(true);
        let cap = desc.capacity_frames / 2;
        let (writer, mut stream) = open_stream(desc);

        for _ in 0..10 {
            // refill to the current margin so the starved stream resumes,
            // then run it dry to trigger the next starvation event
            let margin = stream.stats().jitter_margin_frames;
            push_frames(&writer, margin, 100);
            assert!(stream.pre_frame_check());
            while stream.will_be_added_to_mix() {
                stream.advance();
                stream.pre_frame_check();
            }
            assert_eq!(stream.stats().jitter_margin_frames, (margin + 1).min(cap));
        }
        assert_eq!(stream.stats().jitter_margin_frames, cap);
    }

    #[test]
    fn test_static_margin_is_pinned() {
        let (writer, mut stream) = open_stream(mono_desc());
        push_frames(&writer, 1, 100);
        assert!(stream.pre_frame_check());
        stream.advance();
        assert!(!stream.pre_frame_check());
        assert_eq!(stream.stats().jitter_margin_frames, STATIC_JITTER_MARGIN_FRAMES);
    }

    #[test]
    fn test_dynamic_margin_never_below_static_floor() {
        let desc = mono_desc().with_dynamic_jitter(true);
        let (writer, mut stream) = open_stream(desc);

        // long healthy run with no prior starvation must not shrink below
        // the static floor
        for _ in 0..(JITTER_MARGIN_DECAY_FRAMES + 10) {
            push_frames(&writer, 1, 100);
            stream.pre_frame_check();
            stream.advance();
        }
        assert_eq!(stream.stats().jitter_margin_frames, STATIC_JITTER_MARGIN_FRAMES);
    }

    #[test]
    fn test_dynamic_margin_decays_after_healthy_streak() {
        let desc = mono_desc().with_dynamic_jitter(true);
        let (writer, mut stream) = open_stream(desc);

        // force one starvation to grow the margin to 2
        push_frames(&writer, 1, 100);
        assert!(stream.pre_frame_check());
        stream.advance();
        assert!(!stream.pre_frame_check());
        stream.advance();
        assert_eq!(stream.stats().jitter_margin_frames, 2);

        // refill past the margin, then stay healthy long enough to decay
        push_frames(&writer, 4, 100);
        for _ in 0..JITTER_MARGIN_DECAY_FRAMES {
            push_frames(&writer, 1, 100);
            assert!(stream.pre_frame_check());
            stream.advance();
        }
        assert_eq!(stream.stats().jitter_margin_frames, 1);
    }

    #[test]
    fn test_trailing_loudness_rises_and_decays_to_zero() {
        let (writer, mut stream) = open_stream(mono_desc());

        push_frames(&writer, 10, 8000);
        let loud = stream.trailing_loudness();
        assert!(loud > 0.1, "loudness {} after loud frames", loud);

        // silence must decay below audibility within ~1s (100 frames)
        for _ in 0..100 {
            writer.push_silence(Pose::default());
        }
        assert_eq!(stream.trailing_loudness(), 0.0);

        // drain so the test does not starve the ring assertions elsewhere
        while stream.pre_frame_check() {
            stream.advance();
        }
    }

    #[test]
    fn test_preroll_is_zero_until_first_advance() {
        let (writer, mut stream) = open_stream(mono_desc());
        push_frames(&writer, 2, 777);

        assert!(stream.pre_frame_check());
        assert!(stream
            .peek_delay_window(SAMPLE_PHASE_DELAY_AT_90)
            .iter()
            .all(|&s| s == 0));

        stream.advance();
        assert!(stream.pre_frame_check());
        assert!(stream
            .peek_delay_window(SAMPLE_PHASE_DELAY_AT_90)
            .iter()
            .all(|&s| s == 777));
        // a shorter window is the tail of the full one
        assert_eq!(stream.peek_delay_window(3).len(), 3);
    }

    #[test]
    fn test_overflow_truncates_and_counts() {
        let (writer, stream) = open_stream(mono_desc());
        // ring holds capacity_frames rounded up to a power of two of samples;
        // push far past it
        push_frames(&writer, 40, 5);
        assert!(stream.stats().overflow_count > 0);
    }

    #[test]
    fn test_loopback_toggle() {
        let (writer, stream) = open_stream(mono_desc());
        assert!(!stream.should_loopback());
        writer.set_loopback(true);
        assert!(stream.should_loopback());
    }
}
