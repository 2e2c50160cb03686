//! Per-listener mixing
//!
//! For each listener the mixer walks every source in the registry, asks the
//! spatializer for parameters and accumulates the source's next frame into
//! the listener's output block. Mono sources get the full treatment: the
//! leading ear at full attenuation, the trailing ear delayed and scaled by
//! the weak-channel ratio, with the first delayed samples pulled from the
//! stream's pre-roll window. Stereo and unattenuated sources copy straight
//! through.

use es_core::{Pose, Sample, WideSample, Zones, FRAME_SAMPLES_MONO, FRAME_SAMPLES_STEREO};
use es_stream::PositionalStream;

use crate::{spatialize, MixParams, OutputBlock};

/// Accumulate every eligible source into `block` for one listener.
///
/// `sources` yields each candidate source along with whether the listener
/// owns it; owned sources are mixed only when they ask for loopback.
/// Returns the number of sources that contributed.
pub fn mix_for_listener<'a, I>(
    block: &mut OutputBlock,
    listener: Pose,
    sources: I,
    zones: &Zones,
    min_audibility_threshold: f32,
) -> u32
where
    I: IntoIterator<Item = (&'a PositionalStream, bool)>,
{
    block.clear();
    let mut mixed = 0;

    for (source, own) in sources {
        if own && !source.should_loopback() {
            continue;
        }
        if !source.will_be_added_to_mix() || source.trailing_loudness() <= 0.0 {
            continue;
        }

        let params = spatialize(source, listener, zones, min_audibility_threshold, own);
        if params.skip {
            continue;
        }

        mix_source(block, source, &params);
        mixed += 1;
    }

    mixed
}

/// Accumulate one source's next frame into the block
pub fn mix_source(block: &mut OutputBlock, source: &PositionalStream, params: &MixParams) {
    debug_assert!(!params.skip);
    let next = source.peek_next_output();

    if source.format().is_stereo() || params.is_unattenuated() {
        mix_plain(block, next, source.format().is_stereo(), params.attenuation);
    } else {
        mix_spatialized(block, source, next, params);
    }
}

/// Stereo or unattenuated branch: no delay, no weak-channel scaling. Mono
/// sources are duplicated into both channels.
fn mix_plain(block: &mut OutputBlock, next: &[Sample], stereo: bool, attenuation: f32) {
    let divider = if stereo { 1 } else { 2 };
    for s in 0..FRAME_SAMPLES_STEREO {
        let value = (next[s / divider] as f32 * attenuation).round() as WideSample;
        block.accumulate(s, value);
    }
}

/// Mono branch with full spatialization
fn mix_spatialized(
    block: &mut OutputBlock,
    source: &PositionalStream,
    next: &[Sample],
    params: &MixParams,
) {
    let delay = params.delay_samples as usize;
    // the leading ear is the one opposite the delayed channel
    let (lead, trail) = if params.delay_on_right { (0, 1) } else { (1, 0) };
    let gain = params.attenuation;
    let weak_gain = params.attenuation * params.weak_channel_ratio;

    for (i, &x) in next.iter().enumerate() {
        let sample = x as f32;
        block.accumulate(2 * i + lead, (sample * gain).round() as WideSample);

        let delayed = i + delay;
        if delayed < FRAME_SAMPLES_MONO {
            block.accumulate(2 * delayed + trail, (sample * weak_gain).round() as WideSample);
        }
    }

    if delay > 0 {
        // the start of the trailing channel predates this frame
        let window = source.peek_delay_window(delay);
        for (i, &x) in window.iter().enumerate() {
            block.accumulate(2 * i + trail, (x as f32 * weak_gain).round() as WideSample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use es_core::{ChannelFormat, Quat, Sample, Vec3, SAMPLE_PHASE_DELAY_AT_90};
    use es_stream::{open_stream, StreamDescriptor, StreamWriter};

    const THRESHOLD: f32 = crate::LOUDNESS_TO_DISTANCE_RATIO / 2.0;

    fn fill_mono(writer: &StreamWriter, value: Sample, pose: Pose) {
        let frame = vec![value; FRAME_SAMPLES_MONO];
        for _ in 0..300 {
            writer.push_frame(&frame, pose);
        }
    }

    fn ready_mic(position: Vec3, value: Sample) -> es_stream::PositionalStream {
        let (writer, mut stream) = open_stream(StreamDescriptor::microphone(ChannelFormat::Mono));
        fill_mono(&writer, value, Pose::new(position, Quat::IDENTITY));
        assert!(stream.pre_frame_check());
        stream
    }

    fn listener_at(position: Vec3) -> Pose {
        Pose::new(position, Quat::IDENTITY)
    }

    #[test]
    fn test_no_sources_means_silence() {
        let mut block = OutputBlock::new();
        let mixed = mix_for_listener(
            &mut block,
            listener_at(Vec3::ZERO),
            std::iter::empty(),
            &Zones::default(),
            THRESHOLD,
        );
        assert_eq!(mixed, 0);
        assert!(block.samples().iter().all(|&s| s == 0));
    }

    #[test]
    fn test_own_microphone_not_mixed_without_loopback() {
        let stream = ready_mic(Vec3::ZERO, 1000);
        let mut block = OutputBlock::new();
        let mixed = mix_for_listener(
            &mut block,
            listener_at(Vec3::ZERO),
            [(&stream, true)],
            &Zones::default(),
            THRESHOLD,
        );
        assert_eq!(mixed, 0);
        assert!(block.samples().iter().all(|&s| s == 0));
    }

    #[test]
    fn test_own_injector_loops_back_at_full_gain() {
        let (writer, mut stream) = open_stream(StreamDescriptor::injector(ChannelFormat::Mono, 0.0, 0.3));
        fill_mono(&writer, 1000, Pose::new(Vec3::ZERO, Quat::IDENTITY));
        assert!(stream.pre_frame_check());

        let mut block = OutputBlock::new();
        let mixed = mix_for_listener(
            &mut block,
            listener_at(Vec3::ZERO),
            [(&stream, true)],
            &Zones::default(),
            THRESHOLD,
        );
        assert_eq!(mixed, 1);
        // loopback bypasses the injector ratio as well
        assert!(block.samples().iter().all(|&s| s == 1000));
    }

    #[test]
    fn test_starved_source_not_mixed() {
        let (writer, mut stream) = open_stream(StreamDescriptor::microphone(ChannelFormat::Mono));
        // loudness without enough buffered audio
        fill_mono(&writer, 1000, Pose::default());
        while stream.pre_frame_check() {
            stream.advance();
        }

        let mut block = OutputBlock::new();
        let mixed = mix_for_listener(
            &mut block,
            listener_at(Vec3::ZERO),
            [(&stream, false)],
            &Zones::default(),
            THRESHOLD,
        );
        assert_eq!(mixed, 0);
    }

    #[test]
    fn test_two_identical_sources_double_one() {
        let one = ready_mic(Vec3::new(0.0, 0.0, -3.0), 4000);
        let other = ready_mic(Vec3::new(0.0, 0.0, -3.0), 4000);
        let listener = listener_at(Vec3::ZERO);
        let zones = Zones::default();

        let mut single = OutputBlock::new();
        mix_for_listener(&mut single, listener, [(&one, false)], &zones, THRESHOLD);

        let mut double = OutputBlock::new();
        let mixed = mix_for_listener(
            &mut double,
            listener,
            [(&one, false), (&other, false)],
            &zones,
            THRESHOLD,
        );
        assert_eq!(mixed, 2);

        for s in 0..FRAME_SAMPLES_STEREO {
            assert_eq!(double.get(s), single.get(s) * 2, "sample {}", s);
        }
    }

    #[test]
    fn test_output_clamped_under_pileup() {
        // several hot colocated sources must saturate, not wrap
        let sources: Vec<_> = (0..4).map(|_| ready_mic(Vec3::ZERO, 30_000)).collect();
        let mut block = OutputBlock::new();
        mix_for_listener(
            &mut block,
            listener_at(Vec3::ZERO),
            sources.iter().map(|s| (s, false)),
            &Zones::default(),
            THRESHOLD,
        );
        for &s in block.samples().iter() {
            assert_eq!(s, Sample::MAX);
        }
    }

    #[test]
    fn test_hard_pan_shapes_the_ears() {
        // listener facing -z, source hard right: left leads at full gain,
        // right trails at half gain, delayed by the phase constant
        let stream = ready_mic(Vec3::new(4.0, 0.0, 0.0), 8000);
        let params = spatialize(
            &stream,
            listener_at(Vec3::ZERO),
            &Zones::default(),
            THRESHOLD,
            false,
        );
        assert!(params.delay_on_right);
        let delay = params.delay_samples as usize;
        assert_eq!(delay, SAMPLE_PHASE_DELAY_AT_90);

        let mut block = OutputBlock::new();
        mix_source(&mut block, &stream, &params);

        let lead = (8000.0 * params.attenuation).round() as WideSample;
        let weak = (8000.0 * params.attenuation * params.weak_channel_ratio).round() as WideSample;

        // pre-roll is zeros at cold start: the right ear opens silent
        for i in 0..delay {
            assert_eq!(block.get(2 * i), lead, "left sample {}", i);
            assert_eq!(block.get(2 * i + 1), 0, "right sample {}", i);
        }
        // past the delay the right ear carries the weak copy
        for i in delay..FRAME_SAMPLES_MONO {
            assert_eq!(block.get(2 * i), lead, "left sample {}", i);
            assert_eq!(block.get(2 * i + 1), weak, "right sample {}", i);
        }
        assert!((params.weak_channel_ratio - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_preroll_fills_the_delay_gap_after_advance() {
        let (writer, mut stream) = open_stream(StreamDescriptor::microphone(ChannelFormat::Mono));
        fill_mono(&writer, 8000, Pose::new(Vec3::new(4.0, 0.0, 0.0), Quat::IDENTITY));
        assert!(stream.pre_frame_check());
        stream.advance();
        assert!(stream.pre_frame_check());

        let params = spatialize(
            &stream,
            listener_at(Vec3::ZERO),
            &Zones::default(),
            THRESHOLD,
            false,
        );
        let mut block = OutputBlock::new();
        mix_source(&mut block, &stream, &params);

        // with a warm pre-roll the trailing ear is continuous from sample 0
        let weak = (8000.0 * params.attenuation * params.weak_channel_ratio).round() as WideSample;
        for i in 0..params.delay_samples as usize {
            assert_eq!(block.get(2 * i + 1), weak, "right sample {}", i);
        }
    }

    #[test]
    fn test_stereo_source_copies_through() {
        let (writer, mut stream) = open_stream(StreamDescriptor::microphone(ChannelFormat::Stereo));
        let mut frame = vec![0; FRAME_SAMPLES_STEREO];
        for (i, slot) in frame.iter_mut().enumerate() {
            *slot = if i % 2 == 0 { 2000 } else { -3000 };
        }
        for _ in 0..300 {
            writer.push_frame(&frame, Pose::new(Vec3::new(2.0, 0.0, 0.0), Quat::IDENTITY));
        }
        assert!(stream.pre_frame_check());

        let mut block = OutputBlock::new();
        let mixed = mix_for_listener(
            &mut block,
            listener_at(Vec3::ZERO),
            [(&stream, false)],
            &Zones::default(),
            THRESHOLD,
        );
        assert_eq!(mixed, 1);
        let samples = block.samples();
        for i in 0..FRAME_SAMPLES_MONO {
            assert_eq!(samples[2 * i], 2000);
            assert_eq!(samples[2 * i + 1], -3000);
        }
    }

    #[test]
    fn test_unattenuated_mono_duplicates_both_channels() {
        // colocated source takes the plain branch with the mono divider
        let stream = ready_mic(Vec3::ZERO, 1500);
        let mut block = OutputBlock::new();
        mix_for_listener(
            &mut block,
            listener_at(Vec3::ZERO),
            [(&stream, false)],
            &Zones::default(),
            THRESHOLD,
        );
        assert!(block.samples().iter().all(|&s| s == 1500));
    }
}
