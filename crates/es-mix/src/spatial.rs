//! Pure spatialization: one (source, listener) pair in, mix parameters out

use std::f32::consts::FRAC_PI_2;

use es_core::{Pose, Vec3, Zones, EPSILON, SAMPLE_PHASE_DELAY_AT_90};
use es_stream::{PositionalStream, SourceKind};

/// Loudness-over-distance anchor for the audibility gate. The scheduler
/// derives the running threshold from this and the throttling ratio.
pub const LOUDNESS_TO_DISTANCE_RATIO: f32 = 1e-5;

/// Floor of the off-axis coefficient, reached directly behind the source
const MAX_OFF_AXIS_ATTENUATION: f32 = 0.2;

/// Off-axis coefficient gained per quarter turn of delivery angle
const OFF_AXIS_ATTENUATION_STEP: f32 = (1.0 - MAX_OFF_AXIS_ATTENUATION) / 2.0;

/// Gain of a point source heard from the roll-off scale distance
const GEOMETRIC_AMPLITUDE_SCALAR: f32 = 0.3;

const DISTANCE_SCALE: f32 = 2.5;
const DISTANCE_LOG_BASE: f32 = 2.5;

/// Fraction of amplitude lost in the far ear at 90 degrees
const PHASE_AMPLITUDE_RATIO_AT_90: f32 = 0.5;

/// Output of the spatializer for one (source, listener) pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixParams {
    pub attenuation: f32,
    pub delay_samples: u32,
    pub weak_channel_ratio: f32,
    pub delay_on_right: bool,
    pub skip: bool,
}

impl MixParams {
    /// Source is below the audibility threshold for this listener
    pub fn skipped() -> Self {
        Self {
            attenuation: 0.0,
            delay_samples: 0,
            weak_channel_ratio: 1.0,
            delay_on_right: false,
            skip: true,
        }
    }

    /// Full gain, no inter-aural shaping
    pub fn unattenuated() -> Self {
        Self {
            attenuation: 1.0,
            delay_samples: 0,
            weak_channel_ratio: 1.0,
            delay_on_right: false,
            skip: false,
        }
    }

    /// True when the source carries no spatial shaping at all
    #[inline]
    pub fn is_unattenuated(&self) -> bool {
        self.attenuation == 1.0 && self.delay_samples == 0 && self.weak_channel_ratio == 1.0
    }
}

/// Compute the mix parameters for one source heard by one listener.
///
/// `loopback` marks a source being mixed into its own listener's output;
/// it bypasses all shaping, as do stereo sources.
pub fn spatialize(
    source: &PositionalStream,
    listener: Pose,
    zones: &Zones,
    min_audibility_threshold: f32,
    loopback: bool,
) -> MixParams {
    if loopback {
        return MixParams::unattenuated();
    }

    let source_pose = source.pose();
    let relative = source_pose.position - listener.position;
    let distance = relative.length().max(EPSILON);

    // load-shedding gate: too quiet for this distance does not get mixed
    if source.trailing_loudness() / distance <= min_audibility_threshold {
        return MixParams::skipped();
    }

    // a listener inside the source's unattenuated zone, or a (source zone,
    // listener zone) pair match, hears at full gain
    let zone_exempt = source
        .listener_unattenuated_zone()
        .map(|zone| zone.contains(listener.position))
        .unwrap_or(false)
        || zones.exempts(source_pose.position, listener.position);
    if zone_exempt {
        return MixParams::unattenuated();
    }

    if source.format().is_stereo() {
        return MixParams::unattenuated();
    }

    // a source on top of the listener has no usable direction; full gain
    if relative.length_squared() <= EPSILON * EPSILON {
        return MixParams::unattenuated();
    }

    let mut attenuation = 1.0_f32;
    let mut distance_squared = relative.length_squared();
    let mut directional = true;

    if let SourceKind::Injector {
        radius,
        attenuation_ratio,
    } = source.kind()
    {
        attenuation *= attenuation_ratio;
        if radius > 0.0 {
            // a spherical source has no facing direction
            directional = false;
            if distance_squared <= radius * radius {
                // inside the sphere: full gain before the ratio
                distance_squared = 0.0;
            } else {
                // roll off from the sphere boundary, not the center
                distance_squared -= radius * radius;
            }
        }
    }

    if directional {
        // angle between the source's facing axis and the listener direction,
        // in the source's frame
        let source_local = source_pose.orientation.inverse().rotate(relative);
        let delivery_angle = Vec3::FORWARD.angle_to(source_local.normalize());
        attenuation *=
            MAX_OFF_AXIS_ATTENUATION + OFF_AXIS_ATTENUATION_STEP * (delivery_angle / FRAC_PI_2);
    }

    attenuation *= distance_coefficient(distance_squared);

    // bearing around the listener's up axis drives the inter-aural cues
    let mut listener_local = listener.orientation.inverse().rotate(relative);
    listener_local.y = 0.0;
    let bearing = listener_local.azimuth();
    let sin_ratio = bearing.sin().abs();

    MixParams {
        attenuation: attenuation.min(1.0),
        delay_samples: (SAMPLE_PHASE_DELAY_AT_90 as f32 * sin_ratio) as u32,
        weak_channel_ratio: 1.0 - PHASE_AMPLITUDE_RATIO_AT_90 * sin_ratio,
        delay_on_right: bearing > 0.0,
        skip: false,
    }
}

/// Geometric roll-off in base 2.5: unit distance is full gain, the scale
/// distance lands on the amplitude scalar, clamped into [0, 1].
fn distance_coefficient(distance_squared: f32) -> f32 {
    if distance_squared <= EPSILON * EPSILON {
        return 1.0;
    }
    let log_base = DISTANCE_LOG_BASE.ln();
    let scale_log = DISTANCE_SCALE.ln() / log_base;
    GEOMETRIC_AMPLITUDE_SCALAR
        .powf(scale_log + 0.5 * distance_squared.ln() / log_base - 1.0)
        .min(1.0)
}
