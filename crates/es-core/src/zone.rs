//! Axis-aligned boxes for unattenuated zones

use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Axis-aligned box described by its minimum corner and its dimensions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub corner: Vec3,
    pub dimensions: Vec3,
}

impl Aabb {
    pub fn new(corner: Vec3, dimensions: Vec3) -> Self {
        Self { corner, dimensions }
    }

    /// True if `point` lies inside the box, boundary included
    pub fn contains(&self, point: Vec3) -> bool {
        point.x >= self.corner.x
            && point.x <= self.corner.x + self.dimensions.x
            && point.y >= self.corner.y
            && point.y <= self.corner.y + self.dimensions.y
            && point.z >= self.corner.z
            && point.z <= self.corner.z + self.dimensions.z
    }

    pub fn center(&self) -> Vec3 {
        self.corner + self.dimensions * 0.5
    }
}

/// The process-wide unattenuated zone pair
///
/// When a source sits inside the source box and the listener inside the
/// listener box, that pair mixes at full gain. Immutable after startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Zones {
    pub source_unattenuated_zone: Option<Aabb>,
    pub listener_unattenuated_zone: Option<Aabb>,
}

impl Zones {
    /// True when the global zone pair forces this source/listener pair to
    /// full gain
    pub fn exempts(&self, source_position: Vec3, listener_position: Vec3) -> bool {
        match (self.source_unattenuated_zone, self.listener_unattenuated_zone) {
            (Some(source_zone), Some(listener_zone)) => {
                source_zone.contains(source_position) && listener_zone.contains(listener_position)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_boundaries() {
        let zone = Aabb::new(Vec3::new(-1.0, 0.0, -1.0), Vec3::new(2.0, 2.0, 2.0));
        assert!(zone.contains(Vec3::new(0.0, 1.0, 0.0)));
        assert!(zone.contains(Vec3::new(-1.0, 0.0, -1.0)));
        assert!(zone.contains(Vec3::new(1.0, 2.0, 1.0)));
        assert!(!zone.contains(Vec3::new(1.1, 1.0, 0.0)));
        assert!(!zone.contains(Vec3::new(0.0, -0.1, 0.0)));
    }

    #[test]
    fn test_center() {
        let zone = Aabb::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(4.0, 2.0, 6.0));
        assert_eq!(zone.center(), Vec3::new(2.0, 1.0, 3.0));
    }

    #[test]
    fn test_zone_pair_requires_both() {
        let unit = Aabb::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0));
        let both = Zones {
            source_unattenuated_zone: Some(unit),
            listener_unattenuated_zone: Some(unit),
        };
        let inside = Vec3::new(0.5, 0.5, 0.5);
        let outside = Vec3::new(5.0, 0.0, 0.0);

        assert!(both.exempts(inside, inside));
        assert!(!both.exempts(inside, outside));
        assert!(!both.exempts(outside, inside));
        assert!(!Zones::default().exempts(inside, inside));
    }
}
