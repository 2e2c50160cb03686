//! Source kinds and stream descriptors

use es_core::{Aabb, ChannelFormat};

/// What kind of entity is emitting audio
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceKind {
    /// An avatar's microphone; its pose is also the listener's pose
    Microphone,
    /// An injected sound, optionally spherical, with a static per-source
    /// attenuation ratio
    Injector {
        /// Radius of the spherical source; 0 means point source
        radius: f32,
        /// Static attenuation in [0, 1] applied on top of distance roll-off
        attenuation_ratio: f32,
    },
}

impl SourceKind {
    #[inline]
    pub fn is_injector(&self) -> bool {
        matches!(self, SourceKind::Injector { .. })
    }
}

/// Everything needed to open a positional stream
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub kind: SourceKind,
    pub format: ChannelFormat,
    /// Mix this source back into its own listener's output
    pub should_loopback: bool,
    /// Listeners inside this box hear the source at full gain
    pub listener_unattenuated_zone: Option<Aabb>,
    /// Grow the jitter margin after starvation instead of pinning it
    pub dynamic_jitter: bool,
    /// Ring capacity in frames
    pub capacity_frames: usize,
}

/// Default jitter-absorbing depth of a stream, in frames
pub const DEFAULT_CAPACITY_FRAMES: usize = 16;

impl StreamDescriptor {
    /// Descriptor for an avatar microphone. Microphones default to no
    /// loopback: a client does not hear its own voice back.
    pub fn microphone(format: ChannelFormat) -> Self {
        Self {
            kind: SourceKind::Microphone,
            format,
            should_loopback: false,
            listener_unattenuated_zone: None,
            dynamic_jitter: false,
            capacity_frames: DEFAULT_CAPACITY_FRAMES,
        }
    }

    /// Descriptor for an injected sound. Injectors default to loopback so
    /// the owning client hears what it injected.
    pub fn injector(format: ChannelFormat, radius: f32, attenuation_ratio: f32) -> Self {
        Self {
            kind: SourceKind::Injector {
                radius,
                attenuation_ratio: attenuation_ratio.clamp(0.0, 1.0),
            },
            format,
            should_loopback: true,
            listener_unattenuated_zone: None,
            dynamic_jitter: false,
            capacity_frames: DEFAULT_CAPACITY_FRAMES,
        }
    }

    pub fn with_dynamic_jitter(mut self, enabled: bool) -> Self {
        self.dynamic_jitter = enabled;
        self
    }

    pub fn with_listener_zone(mut self, zone: Aabb) -> Self {
        self.listener_unattenuated_zone = Some(zone);
        self
    }
}
