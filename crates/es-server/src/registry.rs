//! Peer registry: sources grouped by the listener that owns them
//!
//! The registry is mutated only from the mix-loop thread. Peer arrivals,
//! departures and stream attachments come in over a command channel that the
//! scheduler drains at the top of each frame, so the mix itself never races
//! a membership change.

use std::collections::HashMap;
use std::fmt;

use crossbeam_channel::{unbounded, Receiver, Sender};

use es_core::Pose;
use es_stream::{PositionalStream, StreamStats};

/// Opaque peer identity assigned by the transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Registry mutations, serialized through the command queue
pub enum RegistryCommand {
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    /// Attach the avatar microphone for a peer. Replaces any previous one.
    AttachMicrophone(PeerId, PositionalStream),
    /// Attach an injector stream owned by a peer
    AttachInjector(PeerId, PositionalStream),
}

/// One connected agent: a listener and the sources it owns
pub struct ListenerSlot {
    peer: PeerId,
    microphone: Option<PositionalStream>,
    injectors: Vec<PositionalStream>,
    outgoing_sequence: u16,
}

impl ListenerSlot {
    fn new(peer: PeerId) -> Self {
        Self {
            peer,
            microphone: None,
            injectors: Vec::new(),
            outgoing_sequence: 0,
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }
}

/// All connected peers and their streams
pub struct Registry {
    slots: Vec<ListenerSlot>,
    index: HashMap<PeerId, usize>,
    commands: Receiver<RegistryCommand>,
}

impl Registry {
    /// Create a registry and the sender half of its command queue
    pub fn new() -> (Self, Sender<RegistryCommand>) {
        let (tx, rx) = unbounded();
        (
            Self {
                slots: Vec::new(),
                index: HashMap::new(),
                commands: rx,
            },
            tx,
        )
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Apply every queued membership change, then reap injector streams
    /// whose producer is gone and whose ring has drained.
    pub fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                RegistryCommand::PeerJoined(peer) => {
                    self.slot_for(peer);
                    log::info!("{} joined", peer);
                }
                RegistryCommand::PeerLeft(peer) => {
                    if let Some(slot_index) = self.index.remove(&peer) {
                        self.slots.swap_remove(slot_index);
                        if let Some(moved) = self.slots.get(slot_index) {
                            self.index.insert(moved.peer, slot_index);
                        }
                        log::info!("{} left", peer);
                    }
                }
                RegistryCommand::AttachMicrophone(peer, stream) => {
                    self.slot_for(peer).microphone = Some(stream);
                }
                RegistryCommand::AttachInjector(peer, stream) => {
                    self.slot_for(peer).injectors.push(stream);
                }
            }
        }

        for slot in &mut self.slots {
            slot.injectors
                .retain(|stream| !(stream.is_abandoned() && stream.stats().frames_available == 0));
        }
    }

    fn slot_for(&mut self, peer: PeerId) -> &mut ListenerSlot {
        let slot_index = *self.index.entry(peer).or_insert_with(|| {
            self.slots.push(ListenerSlot::new(peer));
            self.slots.len() - 1
        });
        &mut self.slots[slot_index]
    }

    /// Run the pre-frame check on every stream
    pub fn pre_frame_check_all(&mut self) {
        for slot in &mut self.slots {
            if let Some(mic) = slot.microphone.as_mut() {
                mic.pre_frame_check();
            }
            for injector in &mut slot.injectors {
                injector.pre_frame_check();
            }
        }
    }

    /// Advance every stream by exactly one frame
    pub fn advance_all(&mut self) {
        for slot in &mut self.slots {
            if let Some(mic) = slot.microphone.as_mut() {
                mic.advance();
            }
            for injector in &mut slot.injectors {
                injector.advance();
            }
        }
    }

    /// The listener pose of the slot at `index`, if its microphone has
    /// arrived. A listener without a pose is skipped for the frame.
    pub fn listener_pose(&self, index: usize) -> Option<(PeerId, Pose)> {
        let slot = &self.slots[index];
        slot.microphone.as_ref().map(|mic| (slot.peer, mic.pose()))
    }

    /// Every source in the mix, flagged with whether `listener` owns it
    pub fn sources_for(
        &self,
        listener: PeerId,
    ) -> impl Iterator<Item = (&PositionalStream, bool)> + '_ {
        self.slots.iter().flat_map(move |slot| {
            let own = slot.peer == listener;
            slot.microphone
                .iter()
                .chain(slot.injectors.iter())
                .map(move |stream| (stream, own))
        })
    }

    pub fn sequence(&self, index: usize) -> u16 {
        self.slots[index].outgoing_sequence
    }

    pub fn increment_sequence(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        slot.outgoing_sequence = slot.outgoing_sequence.wrapping_add(1);
    }

    /// Jitter statistics for every stream of one listener
    pub fn listener_stream_stats(&self, index: usize) -> Vec<StreamStats> {
        let slot = &self.slots[index];
        slot.microphone
            .iter()
            .chain(slot.injectors.iter())
            .map(|stream| stream.stats())
            .collect()
    }

    /// Labeled jitter statistics for every stream in the registry
    pub fn jitter_stats(&self) -> Vec<(String, StreamStats)> {
        let mut all = Vec::new();
        for slot in &self.slots {
            if let Some(mic) = slot.microphone.as_ref() {
                all.push((format!("{}.mic", slot.peer), mic.stats()));
            }
            for (i, injector) in slot.injectors.iter().enumerate() {
                all.push((format!("{}.injector-{}", slot.peer, i), injector.stats()));
            }
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use es_core::{ChannelFormat, Vec3, FRAME_SAMPLES_MONO};
    use es_stream::{open_stream, StreamDescriptor};

    fn mic_pair() -> (es_stream::StreamWriter, PositionalStream) {
        open_stream(StreamDescriptor::microphone(ChannelFormat::Mono))
    }

    #[test]
    fn test_join_attach_leave() {
        let (mut registry, tx) = Registry::new();
        let (writer, stream) = mic_pair();

        tx.send(RegistryCommand::PeerJoined(PeerId(1))).unwrap();
        tx.send(RegistryCommand::AttachMicrophone(PeerId(1), stream))
            .unwrap();
        registry.drain_commands();
        assert_eq!(registry.len(), 1);
        assert!(registry.listener_pose(0).is_some());

        tx.send(RegistryCommand::PeerLeft(PeerId(1))).unwrap();
        registry.drain_commands();
        assert!(registry.is_empty());
        drop(writer);
    }

    #[test]
    fn test_listener_without_microphone_has_no_pose() {
        let (mut registry, tx) = Registry::new();
        tx.send(RegistryCommand::PeerJoined(PeerId(7))).unwrap();
        registry.drain_commands();
        assert!(registry.listener_pose(0).is_none());
    }

    #[test]
    fn test_attach_before_join_creates_slot() {
        let (mut registry, tx) = Registry::new();
        let (_writer, stream) = mic_pair();
        tx.send(RegistryCommand::AttachMicrophone(PeerId(9), stream))
            .unwrap();
        registry.drain_commands();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_sources_flagged_by_owner() {
        let (mut registry, tx) = Registry::new();
        let (_w1, mic1) = mic_pair();
        let (_w2, mic2) = mic_pair();
        let (_w3, injector) = open_stream(StreamDescriptor::injector(ChannelFormat::Mono, 0.0, 1.0));

        tx.send(RegistryCommand::AttachMicrophone(PeerId(1), mic1))
            .unwrap();
        tx.send(RegistryCommand::AttachMicrophone(PeerId(2), mic2))
            .unwrap();
        tx.send(RegistryCommand::AttachInjector(PeerId(2), injector))
            .unwrap();
        registry.drain_commands();

        let own_count = registry
            .sources_for(PeerId(2))
            .filter(|(_, own)| *own)
            .count();
        let other_count = registry
            .sources_for(PeerId(2))
            .filter(|(_, own)| !*own)
            .count();
        assert_eq!(own_count, 2);
        assert_eq!(other_count, 1);
    }

    #[test]
    fn test_abandoned_drained_injector_is_reaped() {
        let (mut registry, tx) = Registry::new();
        let (writer, mut stream) = open_stream(StreamDescriptor::injector(ChannelFormat::Mono, 0.0, 1.0));
        writer.push_frame(&vec![100; FRAME_SAMPLES_MONO], es_core::Pose::default());
        drop(writer);

        // consume the remaining frame so the stream is fully drained
        assert!(stream.pre_frame_check());
        stream.advance();

        tx.send(RegistryCommand::AttachInjector(PeerId(3), stream))
            .unwrap();
        registry.drain_commands();
        assert_eq!(registry.sources_for(PeerId(3)).count(), 0);
    }

    #[test]
    fn test_abandoned_injector_with_audio_survives() {
        let (mut registry, tx) = Registry::new();
        let (writer, stream) = open_stream(StreamDescriptor::injector(ChannelFormat::Mono, 0.0, 1.0));
        writer.push_frame(&vec![100; FRAME_SAMPLES_MONO], es_core::Pose::default());
        drop(writer);

        tx.send(RegistryCommand::AttachInjector(PeerId(3), stream))
            .unwrap();
        registry.drain_commands();
        assert_eq!(registry.sources_for(PeerId(3)).count(), 1);
    }

    #[test]
    fn test_sequence_wraps() {
        let (mut registry, tx) = Registry::new();
        tx.send(RegistryCommand::PeerJoined(PeerId(1))).unwrap();
        registry.drain_commands();

        assert_eq!(registry.sequence(0), 0);
        for _ in 0..u16::MAX as u32 + 1 {
            registry.increment_sequence(0);
        }
        assert_eq!(registry.sequence(0), 0);
    }

    #[test]
    fn test_microphone_pose_follows_pushes() {
        let (mut registry, tx) = Registry::new();
        let (writer, stream) = mic_pair();
        tx.send(RegistryCommand::AttachMicrophone(PeerId(1), stream))
            .unwrap();
        registry.drain_commands();

        let pose = es_core::Pose::new(Vec3::new(1.0, 2.0, 3.0), es_core::Quat::IDENTITY);
        writer.push_frame(&vec![0; FRAME_SAMPLES_MONO], pose);
        let (_, seen) = registry.listener_pose(0).unwrap();
        assert_eq!(seen.position, Vec3::new(1.0, 2.0, 3.0));
    }
}
