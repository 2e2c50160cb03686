//! Fixed-cadence frame scheduler with load-shedding throttle
//!
//! Single-threaded cooperative loop: one mix frame every 10 ms, deadlines
//! anchored to the loop start so drift never accumulates. The fraction of
//! each interval spent sleeping feeds a trailing average; when the mixer
//! stops getting to sleep, the throttle raises the audibility threshold so
//! distant quiet sources drop out of the mix until the load recovers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use es_core::{EsResult, Sample, Zones, FRAME_INTERVAL_US, FRAME_SAMPLES_STEREO};
use es_mix::{mix_for_listener, OutputBlock, LOUDNESS_TO_DISTANCE_RATIO};

use crate::{
    encode_mixed_audio, mixer_stats_documents, JsonStreamStatsEncoder, LogStatsSink, MixerConfig,
    MixerStatsSnapshot, PeerId, Registry, StatsSink, StreamStatsEncoder, TOO_BIG_FOR_MTU,
};

/// Frames between throttle adjustments, and the trailing average horizon
pub const TRAILING_AVERAGE_FRAMES: u32 = 100;

const CURRENT_FRAME_RATIO: f32 = 1.0 / TRAILING_AVERAGE_FRAMES as f32;
const PREVIOUS_FRAMES_RATIO: f32 = 1.0 - CURRENT_FRAME_RATIO;

/// Sleeping less than this fraction of the frame means we are struggling
const STRUGGLE_TRIGGER_SLEEP_RATIO: f32 = 0.10;

/// Sleeping more than this fraction of the frame allows backing off
const BACK_OFF_TRIGGER_SLEEP_RATIO: f32 = 0.20;

/// How much throttle is released per back-off step
const RATIO_BACK_OFF: f32 = 0.02;

/// Interval between stats emissions in microseconds
pub const STATS_INTERVAL_US: u64 = 1_000_000;

/// Monotonic time source
pub trait Clock {
    fn now_us(&self) -> u64;
}

/// Wall clock backed by `Instant`
#[derive(Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

/// Datagram transport the mixer talks through
pub trait Transport {
    /// Non-blocking receive of one datagram, if any is pending. Transports
    /// whose receive path lives elsewhere (a separate ingest half) keep the
    /// default.
    fn recv(&mut self) -> Option<(Vec<u8>, PeerId)> {
        None
    }

    /// Send one payload to a peer. The transport prepends its own header.
    fn send(&mut self, peer: PeerId, payload: &[u8]) -> EsResult<()>;
}

/// Cloneable flag that stops the mix loop at the next frame boundary
#[derive(Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The mix loop and everything it owns
pub struct FrameScheduler<C: Clock, T: Transport> {
    clock: C,
    transport: T,
    registry: Registry,
    zones: Zones,
    finished: Arc<AtomicBool>,

    // scratch acquired once, reused for every listener every frame
    block: OutputBlock,
    samples: [Sample; FRAME_SAMPLES_STEREO],
    payload: Vec<u8>,

    trailing_sleep_ratio: f32,
    performance_throttling_ratio: f32,
    min_audibility_threshold: f32,
    frames_since_cutoff: u32,
    last_sleep_us: u64,

    sum_listeners: u64,
    sum_mixes: u64,
    stat_frames: u64,
    last_mixer_stats_us: u64,
    last_stream_stats_us: u64,

    stats_sink: Box<dyn StatsSink>,
    stream_stats_encoder: Box<dyn StreamStatsEncoder>,
}

impl<C: Clock, T: Transport> FrameScheduler<C, T> {
    pub fn new(registry: Registry, config: &MixerConfig, transport: T, clock: C) -> Self {
        let now = clock.now_us();
        Self {
            clock,
            transport,
            registry,
            zones: config.zones,
            finished: Arc::new(AtomicBool::new(false)),
            block: OutputBlock::new(),
            samples: [0; FRAME_SAMPLES_STEREO],
            payload: Vec::with_capacity(crate::MIXED_AUDIO_PAYLOAD_BYTES),
            // neither struggling nor throttled at startup
            trailing_sleep_ratio: BACK_OFF_TRIGGER_SLEEP_RATIO,
            performance_throttling_ratio: 0.0,
            min_audibility_threshold: LOUDNESS_TO_DISTANCE_RATIO / 2.0,
            frames_since_cutoff: TRAILING_AVERAGE_FRAMES,
            last_sleep_us: FRAME_INTERVAL_US,
            sum_listeners: 0,
            sum_mixes: 0,
            stat_frames: 0,
            last_mixer_stats_us: now,
            last_stream_stats_us: now,
            stats_sink: Box::new(LogStatsSink),
            stream_stats_encoder: Box::new(JsonStreamStatsEncoder),
        }
    }

    pub fn with_stats_sink(mut self, sink: Box<dyn StatsSink>) -> Self {
        self.stats_sink = sink;
        self
    }

    pub fn with_stream_stats_encoder(mut self, encoder: Box<dyn StreamStatsEncoder>) -> Self {
        self.stream_stats_encoder = encoder;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.finished))
    }

    pub fn performance_throttling_ratio(&self) -> f32 {
        self.performance_throttling_ratio
    }

    pub fn min_audibility_threshold(&self) -> f32 {
        self.min_audibility_threshold
    }

    pub fn trailing_sleep_ratio(&self) -> f32 {
        self.trailing_sleep_ratio
    }

    /// Record how long the loop slept after the previous frame. `run` calls
    /// this itself; tests drive it directly to script load patterns.
    pub fn record_sleep(&mut self, usec: u64) {
        self.last_sleep_us = usec;
    }

    /// Run the loop until the shutdown flag is raised. `pump` is called once
    /// per frame so the embedding process can service its event sources; it
    /// and the inter-frame sleep are the only suspension points.
    pub fn run(&mut self, mut pump: impl FnMut()) {
        log::info!("mix loop starting");
        let start = self.clock.now_us();
        let mut next_frame: u64 = 0;

        while !self.finished.load(Ordering::Acquire) {
            self.run_frame();

            pump();

            if self.finished.load(Ordering::Acquire) {
                break;
            }

            next_frame += 1;
            let deadline = start + next_frame * FRAME_INTERVAL_US;
            let sleep_us = deadline.saturating_sub(self.clock.now_us());
            self.record_sleep(sleep_us);
            if sleep_us > 0 {
                std::thread::sleep(Duration::from_micros(sleep_us));
            }
        }
        log::info!("mix loop finished");
    }

    /// One frame of work: drain membership changes, pre-check every stream,
    /// adjust the throttle, mix and send per listener, advance every stream.
    pub fn run_frame(&mut self) {
        self.registry.drain_commands();
        self.registry.pre_frame_check_all();
        self.update_throttle();

        let now = self.clock.now_us();
        let send_stream_stats = now - self.last_stream_stats_us > STATS_INTERVAL_US;
        if send_stream_stats {
            self.last_stream_stats_us = now;
        }

        for index in 0..self.registry.len() {
            // a listener with no microphone yet has no pose to mix for
            let Some((peer, pose)) = self.registry.listener_pose(index) else {
                continue;
            };

            let mixed = mix_for_listener(
                &mut self.block,
                pose,
                self.registry.sources_for(peer),
                &self.zones,
                self.min_audibility_threshold,
            );

            self.block.write_samples(&mut self.samples);
            let sequence = self.registry.sequence(index);
            encode_mixed_audio(sequence, &self.samples, &mut self.payload);
            if let Err(error) = self.transport.send(peer, &self.payload) {
                log::warn!("dropping mixed audio for {}: {}", peer, error);
            }
            self.registry.increment_sequence(index);

            if send_stream_stats {
                let streams = self.registry.listener_stream_stats(index);
                if let Some(bytes) = self.stream_stats_encoder.encode(peer, &streams) {
                    if let Err(error) = self.transport.send(peer, &bytes) {
                        log::warn!("dropping stream stats for {}: {}", peer, error);
                    }
                }
            }

            self.sum_listeners += 1;
            self.sum_mixes += mixed as u64;
        }

        self.registry.advance_all();
        self.stat_frames += 1;

        if now - self.last_mixer_stats_us > STATS_INTERVAL_US {
            self.last_mixer_stats_us = now;
            self.emit_mixer_stats();
        }
    }

    /// Fold the last sleep into the trailing average and, at most once per
    /// debounce window, move the throttle and the audibility threshold.
    fn update_throttle(&mut self) {
        self.trailing_sleep_ratio = PREVIOUS_FRAMES_RATIO * self.trailing_sleep_ratio
            + CURRENT_FRAME_RATIO * (self.last_sleep_us as f32 / FRAME_INTERVAL_US as f32);

        let mut changed = false;
        if self.frames_since_cutoff >= TRAILING_AVERAGE_FRAMES {
            let old = self.performance_throttling_ratio;

            if self.trailing_sleep_ratio <= STRUGGLE_TRIGGER_SLEEP_RATIO {
                self.performance_throttling_ratio = old + 0.5 * (1.0 - old);
                log::warn!(
                    "mixer is struggling, sleeping {:.1}% of frame time, throttle {:.3} -> {:.3}",
                    self.trailing_sleep_ratio * 100.0,
                    old,
                    self.performance_throttling_ratio
                );
                changed = true;
            } else if self.trailing_sleep_ratio >= BACK_OFF_TRIGGER_SLEEP_RATIO
                && self.performance_throttling_ratio > 0.0
            {
                self.performance_throttling_ratio = (old - RATIO_BACK_OFF).max(0.0);
                log::info!(
                    "mixer is recovering, sleeping {:.1}% of frame time, throttle {:.3} -> {:.3}",
                    self.trailing_sleep_ratio * 100.0,
                    old,
                    self.performance_throttling_ratio
                );
                changed = true;
            }

            if changed {
                self.min_audibility_threshold = LOUDNESS_TO_DISTANCE_RATIO
                    / (2.0 * (1.0 - self.performance_throttling_ratio));
                log::debug!(
                    "minimum audibility to be mixed is now {:e}",
                    self.min_audibility_threshold
                );
                self.frames_since_cutoff = 0;
            }
        }

        if !changed {
            self.frames_since_cutoff += 1;
        }
    }

    fn emit_mixer_stats(&mut self) {
        let snapshot = MixerStatsSnapshot {
            trailing_sleep_percentage: self.trailing_sleep_ratio * 100.0,
            performance_throttling_ratio: self.performance_throttling_ratio,
            average_listeners_per_frame: if self.stat_frames > 0 {
                self.sum_listeners as f32 / self.stat_frames as f32
            } else {
                0.0
            },
            average_mixes_per_listener: if self.sum_listeners > 0 {
                self.sum_mixes as f32 / self.sum_listeners as f32
            } else {
                0.0
            },
        };

        let jitter = self.registry.jitter_stats();
        for document in mixer_stats_documents(&snapshot, &jitter, TOO_BIG_FOR_MTU) {
            self.stats_sink.publish(&document);
        }

        self.sum_listeners = 0;
        self.sum_mixes = 0;
        self.stat_frames = 0;
    }
}
