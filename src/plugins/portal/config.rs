use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::error::PortalError;

/// Tunables of the portal traversal code.
#[derive(Debug, Clone, Resource, Reflect, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Maximum number of portals a single tracked point may cross during one step. Guards
    /// against two portals facing each other bouncing an object forever.
    pub max_crossings_per_step: usize,
    /// Distance the crossing start point is pushed past the exit surface after a teleport so
    /// that the next segment does not begin exactly on the boundary.
    ///
    /// This is an approximation: a point moving faster than this offset can compensate for in
    /// one step is not guaranteed to be handled.
    pub crossing_epsilon: f32,
    /// Default segment cap of portal ray traces.
    pub max_ray_segments: usize,
    /// Whether teleports also carry the rigid body velocity through the portal.
    pub teleport_velocity: bool,
}

impl Default for PortalConfig {
    fn default() -> Self {
        PortalConfig {
            max_crossings_per_step: 16,
            crossing_epsilon: 0.001,
            max_ray_segments: 8,
            teleport_velocity: true,
        }
    }
}

impl PortalConfig {
    pub fn from_json(json: &str) -> Result<Self, PortalError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = PortalConfig::from_json(r#"{ "max_crossings_per_step": 4 }"#).unwrap();
        assert_eq!(config.max_crossings_per_step, 4);
        assert_eq!(config.max_ray_segments, 8);
        assert!(config.teleport_velocity);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = PortalConfig::from_json("{ max_crossings_per_step: }").unwrap_err();
        assert!(matches!(err, PortalError::Config(_)));
    }
}
