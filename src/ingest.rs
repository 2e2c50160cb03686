//! Datagram ingest: parse, attach streams, feed the rings
//!
//! Runs on the mix thread inside the scheduler's per-frame pump. The first
//! audio packet from a peer opens its stream and hands the consumer half to
//! the registry through the command queue; every later packet just pushes
//! PCM into the shared ring. Peers that go quiet past the timeout are
//! reported gone and their writers dropped.

use std::collections::HashMap;

use crossbeam_channel::Sender;

use es_core::ChannelFormat;
use es_server::{Clock, PeerId, RegistryCommand};
use es_stream::{open_stream, StreamDescriptor, StreamWriter};

use crate::net::UdpReceiver;
use crate::protocol::{parse_packet, IngestPacket};

/// A peer silent for this long is considered gone
const PEER_TIMEOUT_US: u64 = 10_000_000;

/// How often the timeout sweep runs
const REAP_INTERVAL_US: u64 = 1_000_000;

struct MicSlot {
    writer: StreamWriter,
    format: ChannelFormat,
}

pub struct Ingest {
    receiver: UdpReceiver,
    commands: Sender<RegistryCommand>,
    dynamic_jitter: bool,

    microphones: HashMap<PeerId, MicSlot>,
    injectors: HashMap<(PeerId, u8), StreamWriter>,
    last_seen_us: HashMap<PeerId, u64>,
    last_reap_us: u64,
    malformed_packets: u64,
}

impl Ingest {
    pub fn new(
        receiver: UdpReceiver,
        commands: Sender<RegistryCommand>,
        dynamic_jitter: bool,
    ) -> Self {
        Self {
            receiver,
            commands,
            dynamic_jitter,
            microphones: HashMap::new(),
            injectors: HashMap::new(),
            last_seen_us: HashMap::new(),
            last_reap_us: 0,
            malformed_packets: 0,
        }
    }

    /// Drain the receive queue, then sweep for departed peers. Called once
    /// per frame from the scheduler's pump.
    pub fn pump(&mut self, clock: &impl Clock) {
        let now = clock.now_us();

        while let Some((peer, bytes)) = self.receiver.try_recv() {
            match parse_packet(&bytes) {
                Ok(packet) => {
                    self.last_seen_us.insert(peer, now);
                    self.apply(peer, packet);
                }
                Err(error) => {
                    self.malformed_packets += 1;
                    log::debug!("dropping packet from {}: {}", peer, error);
                }
            }
        }

        if now.saturating_sub(self.last_reap_us) >= REAP_INTERVAL_US {
            self.last_reap_us = now;
            self.reap_silent_peers(now);
        }
    }

    fn apply(&mut self, peer: PeerId, packet: IngestPacket) {
        match packet {
            IngestPacket::Microphone {
                echo,
                format,
                pose,
                samples,
            } => {
                let slot = self.microphone_for(peer, format);
                slot.writer.set_loopback(echo);
                slot.writer.push_frame(&samples, pose);
            }
            IngestPacket::Silent { format, pose } => {
                let slot = self.microphone_for(peer, format);
                slot.writer.push_silence(pose);
            }
            IngestPacket::Inject {
                stream_id,
                format,
                pose,
                radius,
                attenuation_ratio,
                samples,
            } => {
                let writer = self.injector_for(peer, stream_id, format, radius, attenuation_ratio);
                writer.push_frame(&samples, pose);
            }
        }
    }

    /// The peer's microphone writer, opening (or reopening on a channel
    /// layout change) the stream as needed
    fn microphone_for(&mut self, peer: PeerId, format: ChannelFormat) -> &mut MicSlot {
        let stale = self
            .microphones
            .get(&peer)
            .is_some_and(|slot| slot.format != format);
        if stale {
            self.microphones.remove(&peer);
        }

        self.microphones.entry(peer).or_insert_with(|| {
            let desc = StreamDescriptor::microphone(format)
                .with_dynamic_jitter(self.dynamic_jitter);
            let (writer, stream) = open_stream(desc);
            let _ = self.commands.send(RegistryCommand::PeerJoined(peer));
            let _ = self
                .commands
                .send(RegistryCommand::AttachMicrophone(peer, stream));
            log::info!("{} microphone stream opened ({:?})", peer, format);
            MicSlot { writer, format }
        })
    }

    fn injector_for(
        &mut self,
        peer: PeerId,
        stream_id: u8,
        format: ChannelFormat,
        radius: f32,
        attenuation_ratio: f32,
    ) -> &StreamWriter {
        self.injectors.entry((peer, stream_id)).or_insert_with(|| {
            let desc = StreamDescriptor::injector(format, radius, attenuation_ratio)
                .with_dynamic_jitter(self.dynamic_jitter);
            let (writer, stream) = open_stream(desc);
            let _ = self
                .commands
                .send(RegistryCommand::AttachInjector(peer, stream));
            log::info!("{} injector {} opened", peer, stream_id);
            writer
        })
    }

    fn reap_silent_peers(&mut self, now: u64) {
        let gone: Vec<PeerId> = self
            .last_seen_us
            .iter()
            .filter(|(_, &seen)| now.saturating_sub(seen) > PEER_TIMEOUT_US)
            .map(|(&peer, _)| peer)
            .collect();

        for peer in gone {
            log::info!("{} timed out", peer);
            self.last_seen_us.remove(&peer);
            self.microphones.remove(&peer);
            self.injectors.retain(|(owner, _), _| *owner != peer);
            self.receiver.forget(peer);
            let _ = self.commands.send(RegistryCommand::PeerLeft(peer));
        }
    }

    pub fn malformed_packets(&self) -> u64 {
        self.malformed_packets
    }
}
